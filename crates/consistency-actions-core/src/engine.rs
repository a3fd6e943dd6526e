use std::num::NonZeroU64;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::actions::{self, ActionContext, PhaseOutcome};
use crate::catalog::Catalog;
use crate::config::ActionSettings;
use crate::daemon::StopSignal;
use crate::error::Result;
use crate::metrics::{MetricsSink, TracingMetrics};
use crate::reconcile;
use crate::snapshot::{RunId, SnapshotStore};

/// Applies the scanner's findings for one endpoint at a time.
///
/// Processing state lives only in the run status files, which are rewritten
/// without locking. At most one engine may work on a given endpoint at any
/// time; running several daemons requires partitioning endpoints between them
/// externally.
pub struct ActionEngine {
    store: SnapshotStore,
    catalog: Arc<dyn Catalog>,
    metrics: Arc<dyn MetricsSink>,
}

/// Where an endpoint ended up after one pass.
#[derive(Debug, Clone, PartialEq)]
pub enum EndpointOutcome {
    NotScanned,
    /// The latest run already carries a dark or missing phase.
    AlreadyProcessed { latest: RunId },
    /// Neither the scanner nor the catalog dumps report any file.
    NoFiles { latest: RunId },
    Processed {
        latest: RunId,
        comparison: Option<RunId>,
        dark: Option<PhaseOutcome>,
        miss: PhaseOutcome,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub stopped_early: bool,
}

impl ActionEngine {
    pub fn new(store: SnapshotStore, catalog: Arc<dyn Catalog>) -> Self {
        Self {
            store,
            catalog,
            metrics: Arc::new(TracingMetrics),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// The configured endpoints, or every writable endpoint when none are configured.
    pub fn resolve_endpoints(&self, configured: &[String]) -> Result<Vec<String>> {
        if !configured.is_empty() {
            return Ok(configured.to_vec());
        }
        info!("No endpoints configured, using all writable endpoints");
        Ok(self.catalog.list_writable_endpoints()?)
    }

    /// Process the latest scan run of `endpoint`, if it has not been processed yet.
    pub fn process_endpoint(
        &self,
        endpoint: &str,
        settings: &ActionSettings,
    ) -> Result<EndpointOutcome> {
        let Some(latest) = self.store.latest_run(endpoint)? else {
            info!(endpoint, "No scans available");
            return Ok(EndpointOutcome::NotScanned);
        };

        let unprocessed = self.store.list_unprocessed_runs(endpoint, 0)?;
        info!(
            endpoint,
            latest = %latest,
            "Found {} unprocessed runs",
            unprocessed.len()
        );

        let status = self.store.status(&latest);
        if status.was_attempted() && !settings.force_proceed {
            info!(endpoint, latest = %latest, "Latest run already attempted, nothing to do");
            return Ok(EndpointOutcome::AlreadyProcessed { latest });
        }

        let total_known_files = status.total_known_files();
        let Some(total_known_files) = NonZeroU64::new(total_known_files) else {
            warn!(endpoint, latest = %latest, "No files reported for this run, skipping");
            return Ok(EndpointOutcome::NoFiles { latest });
        };
        info!(
            endpoint,
            total_known_files = total_known_files.get(),
            "Processing run {}",
            latest
        );

        let ctx = ActionContext {
            store: &self.store,
            catalog: self.catalog.as_ref(),
            metrics: self.metrics.as_ref(),
            settings,
        };

        let runs_by_age = self.store.list_runs_by_age(endpoint, &latest)?;
        let comparison = reconcile::select_comparison_run(&runs_by_age, settings.dark_min_age);

        let mut dark_error = None;
        let dark = match &comparison {
            Some(comparison) => {
                info!(
                    endpoint,
                    "Comparing dark files with {}, at least {} days older",
                    comparison,
                    settings.dark_min_age
                );
                match actions::process_dark_files(&ctx, &latest, comparison, total_known_files) {
                    Ok(outcome) => Some(outcome),
                    Err(e) => {
                        error!(endpoint, "Dark file processing failed: {}", e);
                        dark_error = Some(e);
                        None
                    }
                }
            }
            None => {
                info!(
                    endpoint,
                    "No run at least {} days older than the latest, skipping dark files",
                    settings.dark_min_age
                );
                None
            }
        };

        let miss = match actions::process_miss_files(
            &ctx,
            &latest,
            comparison.as_ref(),
            total_known_files,
        ) {
            Ok(miss) => miss,
            Err(e) => {
                error!(endpoint, "Missing file processing failed: {}", e);
                // the dark phase failed first; report that one
                return Err(dark_error.unwrap_or(e));
            }
        };

        if let Some(e) = dark_error {
            return Err(e);
        }

        Ok(EndpointOutcome::Processed {
            latest,
            comparison,
            dark,
            miss,
        })
    }

    /// One pass over `endpoints`. A failing endpoint is logged and the pass
    /// moves on; `stop` is honoured between endpoints.
    pub fn run_cycle(
        &self,
        endpoints: &[String],
        settings: &ActionSettings,
        stop: &StopSignal,
    ) -> CycleReport {
        let mut report = CycleReport::default();

        for endpoint in endpoints {
            if stop.is_stopped() {
                info!("Stop requested, leaving the cycle before {}", endpoint);
                report.stopped_early = true;
                break;
            }

            info!(endpoint = %endpoint, "Now processing endpoint");
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                self.process_endpoint(endpoint, settings)
            }));
            match result {
                Ok(Ok(EndpointOutcome::Processed { .. })) => report.processed += 1,
                Ok(Ok(_)) => report.skipped += 1,
                Ok(Err(e)) => {
                    error!(endpoint = %endpoint, "Error processing endpoint: {}", e);
                    report.failed += 1;
                }
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<String>()
                        .map(String::as_str)
                        .or_else(|| panic.downcast_ref::<&str>().copied())
                        .unwrap_or("unknown panic");
                    error!(endpoint = %endpoint, "Panic while processing endpoint: {}", message);
                    report.failed += 1;
                }
            }
        }

        info!(
            "Cycle finished: {} processed, {} skipped, {} failed",
            report.processed, report.skipped, report.failed
        );
        report
    }
}
