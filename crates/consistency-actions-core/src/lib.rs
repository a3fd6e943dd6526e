pub mod actions;
pub mod catalog;
pub mod config;
pub mod daemon;
pub mod engine;
pub mod error;
pub mod liveness;
pub mod metrics;
pub mod reconcile;
pub mod safeguard;
pub mod snapshot;
pub mod status;

pub use catalog::{Catalog, DeadlineCatalog, JournalCatalog, StorageLocation};
pub use config::{ActionSettings, AppConfig, Schedule};
pub use daemon::{next_cycle_delay, run_loop, StopSignal};
pub use engine::{ActionEngine, CycleReport, EndpointOutcome};
pub use error::{CatalogError, Error};
pub use liveness::{FileHeartbeat, Liveness, NoLiveness};
pub use metrics::{MetricsSink, SilentMetrics, TracingMetrics};
pub use snapshot::{PathList, RunId, SnapshotStore};
pub use status::{PhaseStatus, StatusDocument, StatusStore};
