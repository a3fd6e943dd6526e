pub mod run_id;

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use glob::Pattern;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::status::{StatusDocument, StatusStore};
pub use run_id::RunId;

/// Read-only view over the scanner output directory.
///
/// A run exists when its non-empty `<endpoint>_<timestamp>_stats.json` is
/// present; the dark and missing lists sit next to it.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
    status: StatusStore,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            status: StatusStore::new(root.clone()),
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn status_store(&self) -> &StatusStore {
        &self.status
    }

    pub fn path_of(&self, run: &RunId) -> PathBuf {
        self.root.join(run.to_string())
    }

    /// Every parseable, non-empty status file, optionally restricted to one endpoint.
    fn stats_runs(&self, endpoint: Option<&str>) -> Result<Vec<RunId>> {
        let root = Pattern::escape(&self.root.to_string_lossy());
        let pattern = match endpoint {
            Some(endpoint) => format!("{}/{}_*_stats.json", root, Pattern::escape(endpoint)),
            None => format!("{}/*_stats.json", root),
        };

        let mut runs = Vec::new();
        for entry in glob::glob(&pattern)? {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    warn!("Error listing scanner output: {}", e);
                    continue;
                }
            };

            match fs::metadata(&path) {
                Ok(metadata) if metadata.len() > 0 => {}
                Ok(_) => {
                    debug!("Skipping empty status file {}", path.display());
                    continue;
                }
                Err(e) => {
                    warn!("Error reading metadata for {}: {}", path.display(), e);
                    continue;
                }
            }

            let file_name = match path.file_name() {
                Some(name) => name.to_string_lossy().into_owned(),
                None => continue,
            };
            let run = match RunId::parse(&file_name) {
                Ok(run) => run,
                Err(e) => {
                    debug!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };

            // `X_*` also matches runs of an endpoint called `X_Y`
            if endpoint.map_or(true, |endpoint| run.endpoint == endpoint) {
                runs.push(run);
            }
        }

        runs.sort();
        Ok(runs)
    }

    pub fn list_scanned_endpoints(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .stats_runs(None)?
            .into_iter()
            .map(|run| run.endpoint)
            .collect())
    }

    /// Runs of `endpoint`, oldest first. `nlast > 0` keeps only the newest `nlast`.
    pub fn list_runs(&self, endpoint: &str, nlast: usize) -> Result<Vec<RunId>> {
        let mut runs = self.stats_runs(Some(endpoint))?;
        if nlast > 0 && runs.len() > nlast {
            runs.drain(..runs.len() - nlast);
        }
        Ok(runs)
    }

    pub fn latest_run(&self, endpoint: &str) -> Result<Option<RunId>> {
        Ok(self.list_runs(endpoint, 1)?.pop())
    }

    /// Other runs of `endpoint` with their age in days relative to `reference`,
    /// oldest first.
    pub fn list_runs_by_age(
        &self,
        endpoint: &str,
        reference: &RunId,
    ) -> Result<Vec<(RunId, i64)>> {
        let reference = reference.stats();
        Ok(self
            .list_runs(endpoint, 0)?
            .into_iter()
            .filter(|run| *run != reference)
            .map(|run| {
                let age = run.age_days(&reference);
                (run, age)
            })
            .collect())
    }

    /// Timestamps of runs never attempted by the action phases, newest first.
    pub fn list_unprocessed_runs(&self, endpoint: &str, nlast: usize) -> Result<Vec<String>> {
        let mut stamps: Vec<String> = self
            .list_runs(endpoint, 0)?
            .into_iter()
            .rev()
            .filter(|run| !self.was_attempted(run))
            .map(|run| run.stamp())
            .collect();
        if nlast > 0 {
            stamps.truncate(nlast);
        }
        Ok(stamps)
    }

    pub fn status(&self, run: &RunId) -> StatusDocument {
        self.status.get(run)
    }

    /// True if a dark or missing action phase was ever recorded for `run`.
    pub fn was_attempted(&self, run: &RunId) -> bool {
        self.status(run).was_attempted()
    }

    /// True if a dark or missing action phase reached `done` for `run`.
    pub fn was_completed(&self, run: &RunId) -> bool {
        self.status(run).was_completed()
    }

    /// Load a newline separated path list. A missing list reads as empty.
    pub fn read_list(&self, list: &RunId) -> Result<PathList> {
        read_path_list(&self.path_of(list))
    }
}

/// Entries of a scanner path list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathList {
    pub entries: Vec<String>,
    /// Lines dropped because they are not valid UTF-8.
    pub unreadable: u64,
}

impl PathList {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub(crate) fn read_path_list(path: &Path) -> Result<PathList> {
    let list_error = |source: io::Error| Error::List {
        path: path.to_path_buf(),
        source,
    };

    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!("List {} not found, treating as empty", path.display());
            return Ok(PathList::default());
        }
        Err(e) => return Err(list_error(e)),
    };

    let mut reader = BufReader::new(file);
    let mut list = PathList::default();
    let mut line = Vec::new();
    let mut line_number = 0u64;
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).map_err(list_error)? == 0 {
            break;
        }
        line_number += 1;
        match std::str::from_utf8(&line) {
            Ok(text) => {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    list.entries.push(trimmed.to_string());
                }
            }
            Err(e) => {
                warn!(
                    "Skipping line {} of {}: not valid UTF-8 ({})",
                    line_number,
                    path.display(),
                    e
                );
                list.unreadable += 1;
            }
        }
    }
    Ok(list)
}
