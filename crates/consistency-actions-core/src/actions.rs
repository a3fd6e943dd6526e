use std::num::NonZeroU64;

use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::config::ActionSettings;
use crate::error::Result;
use crate::metrics::{self, MetricsSink};
use crate::reconcile;
use crate::safeguard::{self, Verdict};
use crate::snapshot::{RunId, SnapshotStore};
use crate::status::{
    epoch_seconds, DarkActionRecord, MissActionRecord, PhaseRecord, PhaseStatus,
};

pub const MISSING_REASON: &str = "invalidating damaged/missing replica";

/// Everything a phase needs besides the runs themselves.
pub struct ActionContext<'a> {
    pub store: &'a SnapshotStore,
    pub catalog: &'a dyn Catalog,
    pub metrics: &'a dyn MetricsSink,
    pub settings: &'a ActionSettings,
}

/// What one dark or missing phase did.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseOutcome {
    /// Entries in the latest run's list.
    pub found: u64,
    /// Entries the safeguard was applied to.
    pub confirmed: u64,
    /// Requests accepted by the catalog.
    pub acted: u64,
    /// Requests that failed and were left for the next scan.
    pub failed: u64,
    pub status: PhaseStatus,
    pub verdict: Verdict,
}

/// Confirm the dark files of `latest` against `comparison` and, unless the
/// safeguard trips, request quarantine of each confirmed replica.
pub fn process_dark_files(
    ctx: &ActionContext<'_>,
    latest: &RunId,
    comparison: &RunId,
    total_known_files: NonZeroU64,
) -> Result<PhaseOutcome> {
    let endpoint = latest.endpoint.as_str();
    let status = ctx.store.status_store();

    let mut record = DarkActionRecord {
        start_time: epoch_seconds(),
        end_time: None,
        initial_dark_files: 0,
        confirmed_dark_files: 0,
        failed_dark_files: 0,
        xcheck_run: Some(comparison.stats().to_string()),
        status: PhaseStatus::Started,
        aborted_reason: None,
    };
    status.set_phase(latest, &PhaseRecord::CcDark(record.clone()))?;

    let confirmed = reconcile::compare_dark_lists(ctx.store, latest, comparison)?;
    let latest_dark = ctx.store.read_list(&latest.dark_list())?;
    let dark_files = latest_dark.len() as u64 + latest_dark.unreadable;
    let confirmed_count = confirmed.len() as u64;

    ctx.metrics.gauge(metrics::DARK_FILES_FOUND, dark_files, endpoint);
    ctx.metrics.gauge(metrics::DARK_FILES_CONFIRMED, confirmed_count, endpoint);

    let verdict = safeguard::evaluate(
        confirmed_count,
        total_known_files.get(),
        ctx.settings.dark_threshold,
        ctx.settings.force_proceed,
    );
    info!(
        endpoint,
        dark_files,
        confirmed_dark_files = confirmed_count,
        total_known_files = total_known_files.get(),
        max_fraction = ctx.settings.dark_threshold,
        "Dark file safeguard: {:?}",
        verdict
    );

    record.initial_dark_files = dark_files;

    let Verdict::Proceed { .. } = verdict else {
        let reason = verdict.reason("dark").unwrap_or_default();
        warn!(
            endpoint,
            "Too many dark files ({}), not deleting; operator attention needed", reason
        );
        record.end_time = Some(epoch_seconds());
        record.status = PhaseStatus::Aborted;
        record.aborted_reason = Some(reason);
        status.set_phase(latest, &PhaseRecord::CcDark(record))?;
        ctx.metrics.gauge(metrics::DARK_FILES_DELETED, 0, endpoint);
        return Ok(PhaseOutcome {
            found: dark_files,
            confirmed: confirmed_count,
            acted: 0,
            failed: 0,
            status: PhaseStatus::Aborted,
            verdict,
        });
    };

    let mut deleted = 0u64;
    let mut failed = 0u64;
    for path in &confirmed {
        let result = ctx
            .catalog
            .resolve_storage_location(endpoint, path)
            .and_then(|location| {
                debug!(endpoint, path = %path, location = %location, "Quarantining dark file");
                ctx.catalog.request_quarantine(endpoint, path, &location)
            });
        match result {
            Ok(()) => {
                deleted += 1;
                ctx.metrics.counter(metrics::DARK_FILES_DELETED_COUNTER, 1, endpoint);
            }
            Err(e) => {
                failed += 1;
                warn!(endpoint, path = %path, "Dark file not quarantined: {}", e);
            }
        }
    }

    record.end_time = Some(epoch_seconds());
    record.confirmed_dark_files = deleted;
    record.failed_dark_files = failed;
    record.status = PhaseStatus::Done;
    status.set_phase(latest, &PhaseRecord::CcDark(record))?;
    ctx.metrics.gauge(metrics::DARK_FILES_DELETED, deleted, endpoint);

    info!(
        endpoint,
        "Quarantined {} of {} confirmed dark files ({} failed)",
        deleted,
        confirmed_count,
        failed
    );
    Ok(PhaseOutcome {
        found: dark_files,
        confirmed: confirmed_count,
        acted: deleted,
        failed,
        status: PhaseStatus::Done,
        verdict,
    })
}

/// Request invalidation of every replica in the latest missing list, unless
/// the safeguard trips. No comparison run is needed; `comparison` is only
/// recorded.
pub fn process_miss_files(
    ctx: &ActionContext<'_>,
    latest: &RunId,
    comparison: Option<&RunId>,
    total_known_files: NonZeroU64,
) -> Result<PhaseOutcome> {
    let endpoint = latest.endpoint.as_str();
    let status = ctx.store.status_store();

    let mut record = MissActionRecord {
        start_time: epoch_seconds(),
        end_time: None,
        initial_miss_files: 0,
        confirmed_miss_files: 0,
        failed_miss_files: 0,
        xcheck_run: comparison.map(|run| run.stats().to_string()),
        status: PhaseStatus::Started,
        aborted_reason: None,
    };
    status.set_phase(latest, &PhaseRecord::CcMiss(record.clone()))?;

    let missing = ctx.store.read_list(&latest.missing_list())?;
    // undecodable lines cannot be acted on; they count as failures
    let miss_files = missing.len() as u64 + missing.unreadable;
    ctx.metrics.gauge(metrics::MISS_FILES_FOUND, miss_files, endpoint);

    let verdict = safeguard::evaluate(
        miss_files,
        total_known_files.get(),
        ctx.settings.miss_threshold,
        ctx.settings.force_proceed,
    );
    info!(
        endpoint,
        miss_files,
        total_known_files = total_known_files.get(),
        max_fraction = ctx.settings.miss_threshold,
        "Missing file safeguard: {:?}",
        verdict
    );

    record.initial_miss_files = miss_files;

    let Verdict::Proceed { .. } = verdict else {
        let reason = verdict.reason("miss").unwrap_or_default();
        warn!(
            endpoint,
            "Too many missing files ({}), not invalidating; operator attention needed", reason
        );
        record.end_time = Some(epoch_seconds());
        record.status = PhaseStatus::Aborted;
        record.aborted_reason = Some(reason);
        status.set_phase(latest, &PhaseRecord::CcMiss(record))?;
        ctx.metrics.gauge(metrics::MISS_FILES_TO_RETRANSFER, 0, endpoint);
        return Ok(PhaseOutcome {
            found: miss_files,
            confirmed: miss_files,
            acted: 0,
            failed: 0,
            status: PhaseStatus::Aborted,
            verdict,
        });
    };

    let mut invalidated = 0u64;
    let mut failed = missing.unreadable;
    for path in &missing.entries {
        debug!(endpoint, path = %path, "Invalidating missing replica");
        match ctx
            .catalog
            .request_replica_invalidation(endpoint, path, MISSING_REASON)
        {
            Ok(()) => {
                invalidated += 1;
                ctx.metrics.counter(metrics::MISS_FILES_TO_RETRANSFER_COUNTER, 1, endpoint);
            }
            Err(e) => {
                failed += 1;
                warn!(endpoint, path = %path, "Missing replica not invalidated: {}", e);
            }
        }
    }

    record.end_time = Some(epoch_seconds());
    record.confirmed_miss_files = invalidated;
    record.failed_miss_files = failed;
    record.status = PhaseStatus::Done;
    status.set_phase(latest, &PhaseRecord::CcMiss(record))?;
    ctx.metrics.gauge(metrics::MISS_FILES_TO_RETRANSFER, invalidated, endpoint);

    info!(
        endpoint,
        "Invalidated {} of {} missing replicas ({} failed)", invalidated, miss_files, failed
    );
    Ok(PhaseOutcome {
        found: miss_files,
        confirmed: miss_files,
        acted: invalidated,
        failed,
        status: PhaseStatus::Done,
        verdict,
    })
}
