pub mod journal;

use std::fmt;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::warn;

pub use crate::error::CatalogError;
pub use journal::JournalCatalog;

/// Physical location of a replica on a storage endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLocation(pub String);

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The replica catalog and storage resolution services the actions act through.
///
/// Implementations must tolerate repeated calls for the same replica:
/// delivery is at-least-once.
pub trait Catalog: Send + Sync {
    fn resolve_storage_location(
        &self,
        endpoint: &str,
        path: &str,
    ) -> Result<StorageLocation, CatalogError>;

    /// Mark a replica for deferred deletion by the reaper.
    fn request_quarantine(
        &self,
        endpoint: &str,
        path: &str,
        location: &StorageLocation,
    ) -> Result<(), CatalogError>;

    /// Declare a replica bad so that it gets re-transferred.
    fn request_replica_invalidation(
        &self,
        endpoint: &str,
        path: &str,
        reason: &str,
    ) -> Result<(), CatalogError>;

    fn list_writable_endpoints(&self) -> Result<Vec<String>, CatalogError>;
}

/// Bounds every call of the wrapped catalog by `timeout`.
///
/// Each call runs on a helper thread; when the deadline passes the call is
/// reported as [`CatalogError::Timeout`] and its thread is left to finish on
/// its own.
pub struct DeadlineCatalog<C> {
    inner: Arc<C>,
    timeout: Duration,
}

impl<C: Catalog + 'static> DeadlineCatalog<C> {
    pub fn new(inner: Arc<C>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    fn call<T, F>(&self, what: &str, f: F) -> Result<T, CatalogError>
    where
        T: Send + 'static,
        F: FnOnce(&C) -> Result<T, CatalogError> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name(format!("catalog-{}", what))
            .spawn(move || {
                let _ = tx.send(f(&*inner));
            })
            .map_err(|e| CatalogError::Unavailable(format!("cannot spawn worker: {}", e)))?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!("Catalog {} did not answer within {:?}", what, self.timeout);
                Err(CatalogError::Timeout(self.timeout.as_secs_f64()))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(CatalogError::Unavailable(format!(
                "{} worker exited without a result",
                what
            ))),
        }
    }
}

impl<C: Catalog + 'static> Catalog for DeadlineCatalog<C> {
    fn resolve_storage_location(
        &self,
        endpoint: &str,
        path: &str,
    ) -> Result<StorageLocation, CatalogError> {
        let (endpoint, path) = (endpoint.to_string(), path.to_string());
        self.call("resolve", move |c| c.resolve_storage_location(&endpoint, &path))
    }

    fn request_quarantine(
        &self,
        endpoint: &str,
        path: &str,
        location: &StorageLocation,
    ) -> Result<(), CatalogError> {
        let (endpoint, path, location) = (endpoint.to_string(), path.to_string(), location.clone());
        self.call("quarantine", move |c| {
            c.request_quarantine(&endpoint, &path, &location)
        })
    }

    fn request_replica_invalidation(
        &self,
        endpoint: &str,
        path: &str,
        reason: &str,
    ) -> Result<(), CatalogError> {
        let (endpoint, path, reason) = (endpoint.to_string(), path.to_string(), reason.to_string());
        self.call("invalidate", move |c| {
            c.request_replica_invalidation(&endpoint, &path, &reason)
        })
    }

    fn list_writable_endpoints(&self) -> Result<Vec<String>, CatalogError> {
        self.call("list-endpoints", |c| c.list_writable_endpoints())
    }
}
