use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Glob pattern error: {0}")]
    Glob(#[from] glob::PatternError),

    #[error("Cannot read list {}: {source}", .path.display())]
    List {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed run name '{name}': {reason}")]
    RunName { name: String, reason: String },

    #[error("Liveness error: {0}")]
    Liveness(String),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),
}

/// Failure of a single catalog or storage request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CatalogError {
    #[error("cannot resolve storage location for '{path}' at {endpoint}: {reason}")]
    Resolution {
        endpoint: String,
        path: String,
        reason: String,
    },

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("request timed out after {0:.1}s")]
    Timeout(f64),

    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, Error>;
