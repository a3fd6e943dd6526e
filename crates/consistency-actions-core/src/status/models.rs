use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

/// The phase keys a run status document is known to carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Scanner,
    DbDumpBefore,
    DbDumpAfter,
    Cmp2Dark,
    CcDark,
    CcMiss,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Phase::Scanner,
        Phase::DbDumpBefore,
        Phase::DbDumpAfter,
        Phase::Cmp2Dark,
        Phase::CcDark,
        Phase::CcMiss,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Phase::Scanner => "scanner",
            Phase::DbDumpBefore => "dbdump_before",
            Phase::DbDumpAfter => "dbdump_after",
            Phase::Cmp2Dark => "cmp2dark",
            Phase::CcDark => "cc_dark",
            Phase::CcMiss => "cc_miss",
        }
    }

    pub fn from_key(key: &str) -> Option<Phase> {
        Phase::ALL.into_iter().find(|phase| phase.key() == key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhaseStatus {
    #[serde(rename = "started")]
    Started,
    #[serde(rename = "done")]
    Done,
    #[serde(rename = "ABORTED")]
    Aborted,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RootRecord {
    #[serde(default)]
    pub files: u64,
}

/// Written by the scanner. Only the file counts are of interest here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScannerRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_files: Option<u64>,
    #[serde(default)]
    pub roots: Vec<RootRecord>,
}

impl ScannerRecord {
    /// `total_files` when reported, else the sum over the scanned roots.
    pub fn file_count(&self) -> u64 {
        self.total_files
            .unwrap_or_else(|| self.roots.iter().map(|root| root.files).sum())
    }
}

/// A catalog dump taken before or after the storage scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DbDumpRecord {
    #[serde(default)]
    pub files: u64,
}

/// Result of intersecting two dark lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompareRecord {
    pub elapsed: Option<f64>,
    pub start_time: f64,
    pub end_time: Option<f64>,
    pub new_list: String,
    pub old_list: String,
    pub out_list: String,
    pub status: PhaseStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DarkActionRecord {
    pub start_time: f64,
    pub end_time: Option<f64>,
    #[serde(default)]
    pub initial_dark_files: u64,
    #[serde(default)]
    pub confirmed_dark_files: u64,
    #[serde(default)]
    pub failed_dark_files: u64,
    #[serde(rename = "x-check_run")]
    pub xcheck_run: Option<String>,
    pub status: PhaseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aborted_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissActionRecord {
    pub start_time: f64,
    pub end_time: Option<f64>,
    #[serde(default)]
    pub initial_miss_files: u64,
    #[serde(default)]
    pub confirmed_miss_files: u64,
    #[serde(default)]
    pub failed_miss_files: u64,
    #[serde(rename = "x-check_run")]
    pub xcheck_run: Option<String>,
    pub status: PhaseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aborted_reason: Option<String>,
}

/// One typed phase entry of a status document.
#[derive(Debug, Clone, PartialEq)]
pub enum PhaseRecord {
    Scanner(ScannerRecord),
    DbDumpBefore(DbDumpRecord),
    DbDumpAfter(DbDumpRecord),
    Cmp2Dark(CompareRecord),
    CcDark(DarkActionRecord),
    CcMiss(MissActionRecord),
}

impl PhaseRecord {
    pub fn phase(&self) -> Phase {
        match self {
            PhaseRecord::Scanner(_) => Phase::Scanner,
            PhaseRecord::DbDumpBefore(_) => Phase::DbDumpBefore,
            PhaseRecord::DbDumpAfter(_) => Phase::DbDumpAfter,
            PhaseRecord::Cmp2Dark(_) => Phase::Cmp2Dark,
            PhaseRecord::CcDark(_) => Phase::CcDark,
            PhaseRecord::CcMiss(_) => Phase::CcMiss,
        }
    }

    fn to_value(&self) -> Result<Value> {
        let value = match self {
            PhaseRecord::Scanner(r) => serde_json::to_value(r)?,
            PhaseRecord::DbDumpBefore(r) | PhaseRecord::DbDumpAfter(r) => serde_json::to_value(r)?,
            PhaseRecord::Cmp2Dark(r) => serde_json::to_value(r)?,
            PhaseRecord::CcDark(r) => serde_json::to_value(r)?,
            PhaseRecord::CcMiss(r) => serde_json::to_value(r)?,
        };
        Ok(value)
    }

    fn from_value(phase: Phase, value: &Value) -> Option<PhaseRecord> {
        fn parse<T: DeserializeOwned>(value: &Value) -> Option<T> {
            T::deserialize(value).ok()
        }

        match phase {
            Phase::Scanner => parse(value).map(PhaseRecord::Scanner),
            Phase::DbDumpBefore => parse(value).map(PhaseRecord::DbDumpBefore),
            Phase::DbDumpAfter => parse(value).map(PhaseRecord::DbDumpAfter),
            Phase::Cmp2Dark => parse(value).map(PhaseRecord::Cmp2Dark),
            Phase::CcDark => parse(value).map(PhaseRecord::CcDark),
            Phase::CcMiss => parse(value).map(PhaseRecord::CcMiss),
        }
    }
}

/// A run status document.
///
/// The raw JSON object is kept as-is so that keys written by other tools
/// (known or not) survive when a phase is replaced and the file rewritten.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusDocument {
    entries: Map<String, Value>,
}

impl StatusDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a document, `None` unless `text` is a JSON object.
    pub fn parse(text: &str) -> Option<Self> {
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(entries)) => Some(StatusDocument { entries }),
            _ => None,
        }
    }

    /// Like [`StatusDocument::parse`], degrading to an empty document.
    pub fn from_json(text: &str) -> Self {
        Self::parse(text).unwrap_or_default()
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.entries)?)
    }

    pub fn contains(&self, phase: Phase) -> bool {
        self.entries.contains_key(phase.key())
    }

    /// The typed record for `phase`, or `None` when absent or of unexpected shape.
    pub fn record(&self, phase: Phase) -> Option<PhaseRecord> {
        self.entries
            .get(phase.key())
            .and_then(|value| PhaseRecord::from_value(phase, value))
    }

    /// Replace one phase entry as a whole.
    pub fn set(&mut self, record: &PhaseRecord) -> Result<()> {
        self.entries
            .insert(record.phase().key().to_string(), record.to_value()?);
        Ok(())
    }

    /// Status field of a phase, tolerating records that otherwise fail to parse.
    pub fn phase_status(&self, phase: Phase) -> Option<PhaseStatus> {
        self.entries
            .get(phase.key())
            .and_then(|value| value.get("status"))
            .and_then(|status| PhaseStatus::deserialize(status).ok())
    }

    /// Phase keys present in the document that this crate does not know about.
    pub fn unknown_keys(&self) -> Vec<&str> {
        self.entries
            .keys()
            .filter(|key| Phase::from_key(key).is_none())
            .map(String::as_str)
            .collect()
    }

    pub fn was_attempted(&self) -> bool {
        self.contains(Phase::CcDark) || self.contains(Phase::CcMiss)
    }

    pub fn was_completed(&self) -> bool {
        self.phase_status(Phase::CcDark) == Some(PhaseStatus::Done)
            || self.phase_status(Phase::CcMiss) == Some(PhaseStatus::Done)
    }

    /// Largest plausible number of files at the endpoint for this run.
    pub fn total_known_files(&self) -> u64 {
        let scanner = match self.record(Phase::Scanner) {
            Some(PhaseRecord::Scanner(r)) => r.file_count(),
            _ => 0,
        };
        let before = match self.record(Phase::DbDumpBefore) {
            Some(PhaseRecord::DbDumpBefore(r)) => r.files,
            _ => 0,
        };
        let after = match self.record(Phase::DbDumpAfter) {
            Some(PhaseRecord::DbDumpAfter(r)) => r.files,
            _ => 0,
        };
        scanner.max(before).max(after)
    }
}
