use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use tracing::{debug, trace};

use super::{Catalog, CatalogError, StorageLocation};

const QUARANTINE_JOURNAL: &str = "quarantine.csv";
const BAD_REPLICA_JOURNAL: &str = "bad_replicas.csv";

/// File-backed catalog: requests are appended as CSV rows to per-endpoint
/// journals in an outbox directory, from which the reaper and the recovery
/// machinery pick them up.
///
/// Journals are `<outbox>/<endpoint>_quarantine.csv` with rows
/// `requested_at,path,location` and `<outbox>/<endpoint>_bad_replicas.csv`
/// with rows `requested_at,path,reason`. A path already present in a journal
/// is not appended again.
///
/// The paths of each journal are read once and then tracked in memory; a
/// journal whose size changed behind our back (rotated or consumed) is read
/// again.
pub struct JournalCatalog {
    outbox: PathBuf,
    storage_prefixes: BTreeMap<String, String>,
    writable_endpoints: Vec<String>,
    // also serialises appends, calls may overlap when wrapped in a DeadlineCatalog
    indexes: Mutex<HashMap<PathBuf, JournalIndex>>,
}

/// Paths present in one journal file, and the file size they were read at.
#[derive(Debug, Default)]
struct JournalIndex {
    paths: HashSet<String>,
    len: u64,
}

impl JournalIndex {
    fn load(journal: &Path) -> Result<JournalIndex, CatalogError> {
        let len = journal_len(journal)?;
        if len == 0 {
            return Ok(JournalIndex::default());
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(journal)
            .map_err(|e| CatalogError::Unavailable(format!("{}: {}", journal.display(), e)))?;

        let mut paths = HashSet::new();
        for record in reader.records() {
            match record {
                Ok(record) => {
                    if let Some(path) = record.get(1) {
                        paths.insert(path.to_string());
                    }
                }
                // a torn trailing row from an interrupted append
                Err(e) => debug!("Skipping unreadable row in {}: {}", journal.display(), e),
            }
        }
        trace!("Indexed {} paths from {}", paths.len(), journal.display());
        Ok(JournalIndex { paths, len })
    }
}

impl JournalCatalog {
    pub fn new(
        outbox: impl Into<PathBuf>,
        storage_prefixes: BTreeMap<String, String>,
        writable_endpoints: Vec<String>,
    ) -> Self {
        Self {
            outbox: outbox.into(),
            storage_prefixes,
            writable_endpoints,
            indexes: Mutex::new(HashMap::new()),
        }
    }

    pub fn quarantine_journal(&self, endpoint: &str) -> PathBuf {
        self.outbox.join(format!("{}_{}", endpoint, QUARANTINE_JOURNAL))
    }

    pub fn bad_replica_journal(&self, endpoint: &str) -> PathBuf {
        self.outbox.join(format!("{}_{}", endpoint, BAD_REPLICA_JOURNAL))
    }

    /// Append `path` with `detail` unless the journal already lists it.
    /// Returns whether a row was written.
    fn append_once(&self, journal: &Path, path: &str, detail: &str) -> Result<bool, CatalogError> {
        let mut indexes = self
            .indexes
            .lock()
            .map_err(|e| CatalogError::Unavailable(format!("journal lock poisoned: {}", e)))?;

        let current_len = journal_len(journal)?;
        let index = match indexes.entry(journal.to_path_buf()) {
            Entry::Occupied(entry) => {
                let index = entry.into_mut();
                if index.len != current_len {
                    *index = JournalIndex::load(journal)?;
                }
                index
            }
            Entry::Vacant(entry) => entry.insert(JournalIndex::load(journal)?),
        };

        if index.paths.contains(path) {
            return Ok(false);
        }

        fs::create_dir_all(&self.outbox).map_err(|e| unavailable(&self.outbox, e))?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(journal)
            .map_err(|e| unavailable(journal, e))?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        let requested_at = Utc::now().to_rfc3339();
        writer
            .write_record([requested_at.as_str(), path, detail])
            .map_err(|e| CatalogError::Unavailable(format!("{}: {}", journal.display(), e)))?;
        writer.flush().map_err(|e| unavailable(journal, e))?;

        index.paths.insert(path.to_string());
        index.len = journal_len(journal)?;
        Ok(true)
    }
}

impl Catalog for JournalCatalog {
    fn resolve_storage_location(
        &self,
        endpoint: &str,
        path: &str,
    ) -> Result<StorageLocation, CatalogError> {
        let prefix = self
            .storage_prefixes
            .get(endpoint)
            .ok_or_else(|| CatalogError::Resolution {
                endpoint: endpoint.to_string(),
                path: path.to_string(),
                reason: "no storage prefix configured".to_string(),
            })?;
        Ok(StorageLocation(format!(
            "{}/{}",
            prefix.trim_end_matches('/'),
            path.trim_start_matches('/')
        )))
    }

    fn request_quarantine(
        &self,
        endpoint: &str,
        path: &str,
        location: &StorageLocation,
    ) -> Result<(), CatalogError> {
        let journal = self.quarantine_journal(endpoint);
        if self.append_once(&journal, path, &location.0)? {
            trace!("Queued {} for quarantine at {}", location, endpoint);
        } else {
            debug!("{} already queued for quarantine at {}", path, endpoint);
        }
        Ok(())
    }

    fn request_replica_invalidation(
        &self,
        endpoint: &str,
        path: &str,
        reason: &str,
    ) -> Result<(), CatalogError> {
        let journal = self.bad_replica_journal(endpoint);
        if self.append_once(&journal, path, reason)? {
            trace!("Declared {} bad at {}", path, endpoint);
        } else {
            debug!("{} already declared bad at {}", path, endpoint);
        }
        Ok(())
    }

    /// The configured writable endpoints, or every endpoint with a storage prefix.
    fn list_writable_endpoints(&self) -> Result<Vec<String>, CatalogError> {
        if self.writable_endpoints.is_empty() {
            Ok(self.storage_prefixes.keys().cloned().collect())
        } else {
            Ok(self.writable_endpoints.clone())
        }
    }
}

fn journal_len(journal: &Path) -> Result<u64, CatalogError> {
    match fs::metadata(journal) {
        Ok(metadata) => Ok(metadata.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(unavailable(journal, e)),
    }
}

fn unavailable(path: &Path, e: std::io::Error) -> CatalogError {
    CatalogError::Unavailable(format!("{}: {}", path.display(), e))
}
