use std::collections::BTreeSet;
use std::time::Instant;

use tracing::{debug, info};

use crate::error::Result;
use crate::snapshot::{RunId, SnapshotStore};
use crate::status::{self, epoch_seconds, CompareRecord, PhaseRecord, PhaseStatus};

/// Paths present in both dark lists, sorted and without duplicates.
///
/// Entries are trimmed and blank lines ignored, so the result does not depend
/// on argument order or on how either list was formatted.
pub fn confirmed_dark<A, B>(latest: &[A], comparison: &[B]) -> Vec<String>
where
    A: AsRef<str>,
    B: AsRef<str>,
{
    let latest: BTreeSet<&str> = latest
        .iter()
        .map(|p| p.as_ref().trim())
        .filter(|p| !p.is_empty())
        .collect();
    let comparison: BTreeSet<&str> = comparison
        .iter()
        .map(|p| p.as_ref().trim())
        .filter(|p| !p.is_empty())
        .collect();

    latest
        .intersection(&comparison)
        .map(|p| p.to_string())
        .collect()
}

/// The newest run at least `min_age_dark` days older than the reference run.
///
/// `runs_by_age` pairs each run with its age in whole days, as returned by
/// [`SnapshotStore::list_runs_by_age`]. Runs of the same age are told apart
/// by their timestamp.
pub fn select_comparison_run(runs_by_age: &[(RunId, i64)], min_age_dark: i64) -> Option<RunId> {
    runs_by_age
        .iter()
        .filter(|(_, age)| *age >= min_age_dark)
        .max_by_key(|(run, _)| run.timestamp)
        .map(|(run, _)| run.clone())
}

/// Intersect the dark lists of `latest` and `comparison`, write the result
/// next to `latest` as its confirmed-dark list, and record a `cmp2dark` phase.
///
/// Returns the confirmed paths. Re-running on the same inputs rewrites an
/// identical artifact.
pub fn compare_dark_lists(
    store: &SnapshotStore,
    latest: &RunId,
    comparison: &RunId,
) -> Result<Vec<String>> {
    let started = Instant::now();
    let start_time = epoch_seconds();

    let new_list = store.path_of(&latest.dark_list());
    let old_list = store.path_of(&comparison.dark_list());
    let out_list = store.path_of(&latest.confirmed_dark_list());

    let mut record = CompareRecord {
        elapsed: None,
        start_time,
        end_time: None,
        new_list: new_list.to_string_lossy().into_owned(),
        old_list: old_list.to_string_lossy().into_owned(),
        out_list: out_list.to_string_lossy().into_owned(),
        status: PhaseStatus::Started,
    };
    store
        .status_store()
        .set_phase(latest, &PhaseRecord::Cmp2Dark(record.clone()))?;

    let latest_dark = store.read_list(&latest.dark_list())?;
    let comparison_dark = store.read_list(&comparison.dark_list())?;
    let confirmed = confirmed_dark(&latest_dark.entries, &comparison_dark.entries);
    debug!(
        "{} dark in latest, {} dark in comparison, {} in both",
        latest_dark.len(),
        comparison_dark.len(),
        confirmed.len()
    );

    let mut contents = confirmed.join("\n");
    if !contents.is_empty() {
        contents.push('\n');
    }
    status::atomic_write(&out_list, contents.as_bytes())?;

    record.elapsed = Some(started.elapsed().as_secs_f64());
    record.end_time = Some(epoch_seconds());
    record.status = PhaseStatus::Done;
    store
        .status_store()
        .set_phase(latest, &PhaseRecord::Cmp2Dark(record))?;

    info!(
        "Confirmed {} dark files for {} against {}",
        confirmed.len(),
        latest.stats(),
        comparison.stats()
    );
    Ok(confirmed)
}
