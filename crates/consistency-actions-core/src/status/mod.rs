pub mod models;

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::Result;
use crate::snapshot::RunId;
pub use models::{
    CompareRecord, DarkActionRecord, DbDumpRecord, MissActionRecord, Phase, PhaseRecord,
    PhaseStatus, ScannerRecord, StatusDocument,
};

/// Seconds since the epoch, the time unit used inside status documents.
pub fn epoch_seconds() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Read/write access to the per-run `_stats.json` documents.
///
/// Writes are load-or-default, replace one phase, then persist through a
/// temp file and rename. There is no locking: one writer per run is assumed.
#[derive(Debug, Clone)]
pub struct StatusStore {
    root: PathBuf,
}

impl StatusStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_of(&self, run: &RunId) -> PathBuf {
        self.root.join(run.stats().to_string())
    }

    /// Load the status document of `run`. Absent or corrupt files read as empty.
    pub fn get(&self, run: &RunId) -> StatusDocument {
        let path = self.path_of(run);
        match fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => StatusDocument::new(),
            Ok(text) => StatusDocument::parse(&text).unwrap_or_else(|| {
                warn!("Corrupt status document {}, treating as empty", path.display());
                StatusDocument::new()
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => StatusDocument::new(),
            Err(e) => {
                warn!("Error reading status document {}: {}", path.display(), e);
                StatusDocument::new()
            }
        }
    }

    /// Replace a single phase entry and persist the whole document.
    pub fn set_phase(&self, run: &RunId, record: &PhaseRecord) -> Result<StatusDocument> {
        let mut doc = self.get(run);
        doc.set(record)?;
        let path = self.path_of(run);
        atomic_write(&path, doc.to_json_pretty()?.as_bytes())?;
        debug!(
            "Recorded phase '{}' in {}",
            record.phase().key(),
            path.display()
        );
        Ok(doc)
    }
}

/// Write `bytes` to `path` through a sibling temp file, fsync and rename.
pub(crate) fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
