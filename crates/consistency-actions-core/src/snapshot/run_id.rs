use std::fmt;

use chrono::NaiveDateTime;

use crate::error::{Error, Result};

/// `chrono` format of the five timestamp tokens in a run file name.
pub const TIMESTAMP_FORMAT: &str = "%Y_%m_%d_%H_%M";

const TIMESTAMP_TOKENS: usize = 5;

pub const STATS_KIND: &str = "stats";
pub const DARK_KIND: &str = "D";
pub const MISSING_KIND: &str = "M";
pub const CONFIRMED_DARK_KIND: &str = "DeletionList";

/// Structured identity of one scanner artifact:
/// `<endpoint>_<YYYY>_<MM>_<DD>_<HH>_<mm>_<kind>.<ext>`.
///
/// The endpoint may itself contain underscores, so parsing anchors on the
/// trailing kind token and the five timestamp tokens before it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunId {
    pub endpoint: String,
    pub timestamp: NaiveDateTime,
    pub kind: String,
    pub extension: String,
}

impl RunId {
    pub fn parse(file_name: &str) -> Result<RunId> {
        let malformed = |reason: &str| Error::RunName {
            name: file_name.to_string(),
            reason: reason.to_string(),
        };

        let (stem, extension) = file_name
            .rsplit_once('.')
            .ok_or_else(|| malformed("missing extension"))?;

        let parts: Vec<&str> = stem.split('_').collect();
        if parts.len() < TIMESTAMP_TOKENS + 2 {
            return Err(malformed("too few '_' separated tokens"));
        }

        let kind = parts[parts.len() - 1];
        let stamp = parts[parts.len() - 1 - TIMESTAMP_TOKENS..parts.len() - 1].join("_");
        let endpoint = parts[..parts.len() - 1 - TIMESTAMP_TOKENS].join("_");

        if endpoint.is_empty() {
            return Err(malformed("empty endpoint name"));
        }
        if kind.is_empty() {
            return Err(malformed("empty kind"));
        }

        let timestamp = NaiveDateTime::parse_from_str(&stamp, TIMESTAMP_FORMAT)
            .map_err(|e| malformed(&format!("bad timestamp '{}': {}", stamp, e)))?;

        Ok(RunId {
            endpoint,
            timestamp,
            kind: kind.to_string(),
            extension: extension.to_string(),
        })
    }

    /// The artifact of another kind belonging to the same scan run.
    pub fn with_kind(&self, kind: &str, extension: &str) -> RunId {
        RunId {
            endpoint: self.endpoint.clone(),
            timestamp: self.timestamp,
            kind: kind.to_string(),
            extension: extension.to_string(),
        }
    }

    pub fn stats(&self) -> RunId {
        self.with_kind(STATS_KIND, "json")
    }

    pub fn dark_list(&self) -> RunId {
        self.with_kind(DARK_KIND, "list")
    }

    pub fn missing_list(&self) -> RunId {
        self.with_kind(MISSING_KIND, "list")
    }

    pub fn confirmed_dark_list(&self) -> RunId {
        self.with_kind(CONFIRMED_DARK_KIND, "csv")
    }

    pub fn stamp(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }

    /// Whole days from `self` back to `reference` (positive when `self` is older).
    pub fn age_days(&self, reference: &RunId) -> i64 {
        (reference.timestamp - self.timestamp).num_days()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}.{}",
            self.endpoint,
            self.stamp(),
            self.kind,
            self.extension
        )
    }
}
