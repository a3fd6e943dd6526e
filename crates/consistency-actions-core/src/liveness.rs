use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::status::atomic_write;

/// Position of this process among the live instances of the same executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    pub worker: usize,
    pub total: usize,
}

impl Default for Assignment {
    fn default() -> Self {
        Assignment { worker: 0, total: 1 }
    }
}

/// Process liveness registration, held for the duration of the daemon loop.
pub trait Liveness {
    fn register(&self) -> Result<Assignment>;
    fn beat(&self) -> Result<Assignment>;
    fn deregister(&self) -> Result<()>;
}

/// Registration that does nothing. Used by one-shot tools and tests.
pub struct NoLiveness;

impl Liveness for NoLiveness {
    fn register(&self) -> Result<Assignment> {
        Ok(Assignment::default())
    }

    fn beat(&self) -> Result<Assignment> {
        Ok(Assignment::default())
    }

    fn deregister(&self) -> Result<()> {
        Ok(())
    }
}

/// Scoped registration: deregisters when dropped.
pub struct Heartbeat<'a> {
    liveness: &'a dyn Liveness,
    assignment: Assignment,
}

impl<'a> Heartbeat<'a> {
    pub fn acquire(liveness: &'a dyn Liveness) -> Result<Heartbeat<'a>> {
        let assignment = liveness.register()?;
        Ok(Heartbeat {
            liveness,
            assignment,
        })
    }

    /// Refresh the registration. A failed refresh keeps the previous assignment.
    pub fn beat(&mut self) -> Assignment {
        match self.liveness.beat() {
            Ok(assignment) => self.assignment = assignment,
            Err(e) => warn!("Heartbeat failed: {}", e),
        }
        self.assignment
    }

    pub fn assignment(&self) -> Assignment {
        self.assignment
    }
}

impl Drop for Heartbeat<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.liveness.deregister() {
            warn!("Failed to deregister heartbeat: {}", e);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HeartbeatRecord {
    executable: String,
    hostname: String,
    pid: u32,
    registered_at: DateTime<Utc>,
    last_beat: DateTime<Utc>,
}

/// Heartbeats as small JSON files under `<dir>/.heartbeat/`.
///
/// Instances whose last beat is older than `stale_after` are not counted
/// when computing the [`Assignment`].
pub struct FileHeartbeat {
    dir: PathBuf,
    executable: String,
    hostname: String,
    pid: u32,
    stale_after: Duration,
    registered_at: DateTime<Utc>,
}

impl FileHeartbeat {
    pub fn new(dir: impl Into<PathBuf>, executable: &str, stale_after: Duration) -> Self {
        Self {
            dir: dir.into().join(".heartbeat"),
            executable: executable.to_string(),
            hostname: hostname(),
            pid: std::process::id(),
            stale_after,
            registered_at: Utc::now(),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir
            .join(format!("{}_{}_{}.json", self.executable, self.hostname, self.pid))
    }

    fn write(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let record = HeartbeatRecord {
            executable: self.executable.clone(),
            hostname: self.hostname.clone(),
            pid: self.pid,
            registered_at: self.registered_at,
            last_beat: Utc::now(),
        };
        atomic_write(&self.path(), serde_json::to_string_pretty(&record)?.as_bytes())
    }

    fn assignment(&self) -> Result<Assignment> {
        let now = Utc::now();
        let stale_after = chrono::Duration::from_std(self.stale_after)
            .map_err(|e| Error::Liveness(e.to_string()))?;

        let mut live: Vec<(String, u32)> = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let record: HeartbeatRecord = match fs::read_to_string(&path)
                .ok()
                .and_then(|text| serde_json::from_str(&text).ok())
            {
                Some(record) => record,
                None => {
                    debug!("Ignoring unreadable heartbeat {}", path.display());
                    continue;
                }
            };
            if record.executable == self.executable && now - record.last_beat <= stale_after {
                live.push((record.hostname, record.pid));
            }
        }
        live.sort();

        let me = (self.hostname.clone(), self.pid);
        let worker = live
            .iter()
            .position(|instance| *instance == me)
            .ok_or_else(|| Error::Liveness("own heartbeat missing".to_string()))?;
        Ok(Assignment {
            worker,
            total: live.len(),
        })
    }
}

impl Liveness for FileHeartbeat {
    fn register(&self) -> Result<Assignment> {
        self.write().map_err(|e| {
            Error::Liveness(format!("cannot register {}: {}", self.path().display(), e))
        })?;
        self.assignment()
    }

    fn beat(&self) -> Result<Assignment> {
        self.write()?;
        self.assignment()
    }

    fn deregister(&self) -> Result<()> {
        match fs::remove_file(self.path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| fs::read_to_string("/etc/hostname").ok())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}
