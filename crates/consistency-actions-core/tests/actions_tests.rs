use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tempfile::tempdir;

use consistency_actions_core::actions::MISSING_REASON;
use consistency_actions_core::metrics::{self, RecordingMetrics};
use consistency_actions_core::status::{DarkActionRecord, MissActionRecord, Phase, PhaseRecord};
use consistency_actions_core::{
    ActionEngine, ActionSettings, Catalog, CatalogError, EndpointOutcome, PhaseStatus, RunId,
    SnapshotStore, StopSignal, StorageLocation,
};

const T0: &str = "2024_01_01_00_00";
const T1: &str = "2024_01_31_00_00";

/// Catalog double keeping every accepted request in memory.
#[derive(Default)]
struct RecordingCatalog {
    quarantined: Mutex<Vec<(String, String, String)>>,
    invalidated: Mutex<Vec<(String, String, String)>>,
    failing_paths: HashSet<String>,
    writable: Vec<String>,
}

impl RecordingCatalog {
    fn failing(paths: &[&str]) -> Self {
        Self {
            failing_paths: paths.iter().map(|p| p.to_string()).collect(),
            ..Self::default()
        }
    }

    fn quarantined_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .quarantined
            .lock()
            .unwrap()
            .iter()
            .map(|(_, path, _)| path.clone())
            .collect();
        paths.sort();
        paths
    }

    fn invalidated(&self) -> Vec<(String, String, String)> {
        let mut calls = self.invalidated.lock().unwrap().clone();
        calls.sort();
        calls
    }
}

impl Catalog for RecordingCatalog {
    fn resolve_storage_location(
        &self,
        endpoint: &str,
        path: &str,
    ) -> Result<StorageLocation, CatalogError> {
        Ok(StorageLocation(format!("root://{}.example.org/{}", endpoint, path)))
    }

    fn request_quarantine(
        &self,
        endpoint: &str,
        path: &str,
        location: &StorageLocation,
    ) -> Result<(), CatalogError> {
        if self.failing_paths.contains(path) {
            return Err(CatalogError::Rejected(format!("{} is locked", path)));
        }
        self.quarantined.lock().unwrap().push((
            endpoint.to_string(),
            path.to_string(),
            location.to_string(),
        ));
        Ok(())
    }

    fn request_replica_invalidation(
        &self,
        endpoint: &str,
        path: &str,
        reason: &str,
    ) -> Result<(), CatalogError> {
        if self.failing_paths.contains(path) {
            return Err(CatalogError::Rejected(format!("{} is locked", path)));
        }
        self.invalidated.lock().unwrap().push((
            endpoint.to_string(),
            path.to_string(),
            reason.to_string(),
        ));
        Ok(())
    }

    fn list_writable_endpoints(&self) -> Result<Vec<String>, CatalogError> {
        Ok(self.writable.clone())
    }
}

fn write_list(path: &Path, entries: &[String]) {
    let mut text = entries.join("\n");
    if !entries.is_empty() {
        text.push('\n');
    }
    fs::write(path, text).unwrap();
}

/// Write the scanner output of one run: status file plus dark and missing lists.
fn write_run(
    root: &Path,
    endpoint: &str,
    stamp: &str,
    total_files: u64,
    dark: &[String],
    missing: &[String],
) -> RunId {
    let run = RunId::parse(&format!("{}_{}_stats.json", endpoint, stamp)).unwrap();
    let status = serde_json::json!({
        "scanner": { "total_files": total_files, "roots": [] },
        "dbdump_before": { "files": 0 },
    });
    fs::write(root.join(run.to_string()), status.to_string()).unwrap();
    write_list(&root.join(run.dark_list().to_string()), dark);
    write_list(&root.join(run.missing_list().to_string()), missing);
    run
}

fn paths(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

fn settings(max_fraction: f64) -> ActionSettings {
    ActionSettings {
        dark_min_age: 28,
        dark_threshold: max_fraction,
        miss_threshold: max_fraction,
        force_proceed: false,
    }
}

fn engine(root: &Path, catalog: Arc<RecordingCatalog>) -> (ActionEngine, Arc<RecordingMetrics>) {
    let metrics = Arc::new(RecordingMetrics::new());
    let engine = ActionEngine::new(SnapshotStore::new(root), catalog).with_metrics(metrics.clone());
    (engine, metrics)
}

fn dark_record(store: &SnapshotStore, run: &RunId) -> DarkActionRecord {
    match store.status(run).record(Phase::CcDark) {
        Some(PhaseRecord::CcDark(record)) => record,
        other => panic!("no cc_dark record: {:?}", other),
    }
}

fn miss_record(store: &SnapshotStore, run: &RunId) -> MissActionRecord {
    match store.status(run).record(Phase::CcMiss) {
        Some(PhaseRecord::CcMiss(record)) => record,
        other => panic!("no cc_miss record: {:?}", other),
    }
}

#[test]
fn test_confirmed_dark_files_are_quarantined() {
    let dir = tempdir().unwrap();
    write_run(dir.path(), "SITE", T0, 10, &paths(&["a", "b", "c"]), &[]);
    let latest = write_run(dir.path(), "SITE", T1, 10, &paths(&["b", "c", "d"]), &[]);
    let catalog = Arc::new(RecordingCatalog::default());
    let (engine, recorded) = engine(dir.path(), catalog.clone());

    let outcome = engine.process_endpoint("SITE", &settings(0.5)).unwrap();

    let EndpointOutcome::Processed { comparison, dark, .. } = outcome else {
        panic!("endpoint was not processed");
    };
    assert_eq!(comparison.unwrap().stamp(), T0);
    let dark = dark.unwrap();
    assert_eq!(dark.found, 3);
    assert_eq!(dark.confirmed, 2);
    assert_eq!(dark.acted, 2);
    assert_eq!(catalog.quarantined_paths(), vec!["b", "c"]);

    let record = dark_record(engine.store(), &latest);
    assert_eq!(record.status, PhaseStatus::Done);
    assert_eq!(record.initial_dark_files, 3);
    assert_eq!(record.confirmed_dark_files, 2);
    assert_eq!(record.xcheck_run.as_deref(), Some("SITE_2024_01_01_00_00_stats.json"));
    assert!(record.end_time.is_some());

    let deletion_list = dir.path().join(latest.confirmed_dark_list().to_string());
    let listed = fs::read_to_string(deletion_list).unwrap();
    assert_eq!(listed.lines().collect::<Vec<_>>(), vec!["b", "c"]);
    assert_eq!(
        engine.store().status(&latest).phase_status(Phase::Cmp2Dark),
        Some(PhaseStatus::Done)
    );

    assert_eq!(recorded.last_gauge(metrics::DARK_FILES_FOUND), Some(3));
    assert_eq!(recorded.last_gauge(metrics::DARK_FILES_CONFIRMED), Some(2));
    assert_eq!(recorded.last_gauge(metrics::DARK_FILES_DELETED), Some(2));
    assert_eq!(recorded.counter_total(metrics::DARK_FILES_DELETED_COUNTER), 2);
}

#[test]
fn test_missing_files_are_invalidated() {
    let dir = tempdir().unwrap();
    let latest = write_run(dir.path(), "SITE", T1, 10, &[], &paths(&["x", "y"]));
    let catalog = Arc::new(RecordingCatalog::default());
    let (engine, recorded) = engine(dir.path(), catalog.clone());

    let outcome = engine.process_endpoint("SITE", &settings(0.5)).unwrap();
    let EndpointOutcome::Processed { miss, .. } = outcome else {
        panic!("endpoint was not processed");
    };
    assert_eq!(miss.acted, 2);
    assert_eq!(
        catalog.invalidated(),
        vec![
            ("SITE".to_string(), "x".to_string(), MISSING_REASON.to_string()),
            ("SITE".to_string(), "y".to_string(), MISSING_REASON.to_string()),
        ]
    );

    let record = miss_record(engine.store(), &latest);
    assert_eq!(record.status, PhaseStatus::Done);
    assert_eq!(record.initial_miss_files, 2);
    assert_eq!(record.confirmed_miss_files, 2);
    assert_eq!(recorded.last_gauge(metrics::MISS_FILES_FOUND), Some(2));
    assert_eq!(recorded.last_gauge(metrics::MISS_FILES_TO_RETRANSFER), Some(2));
}

#[test]
fn test_too_many_dark_files_aborts_phase() {
    let dir = tempdir().unwrap();
    let dark: Vec<String> = (0..600).map(|i| format!("/store/dark/{:04}", i)).collect();
    write_run(dir.path(), "SITE", T0, 1000, &dark, &[]);
    let latest = write_run(dir.path(), "SITE", T1, 1000, &dark, &[]);
    let catalog = Arc::new(RecordingCatalog::default());
    let (engine, recorded) = engine(dir.path(), catalog.clone());

    engine.process_endpoint("SITE", &settings(0.1)).unwrap();

    assert!(catalog.quarantined_paths().is_empty());
    let record = dark_record(engine.store(), &latest);
    assert_eq!(record.status, PhaseStatus::Aborted);
    assert!(record.aborted_reason.unwrap().contains("60.00%"));
    assert_eq!(recorded.last_gauge(metrics::DARK_FILES_DELETED), Some(0));
}

#[test]
fn test_too_many_missing_files_aborts_phase() {
    let dir = tempdir().unwrap();
    let missing: Vec<String> = (0..20).map(|i| format!("/store/miss/{}", i)).collect();
    let latest = write_run(dir.path(), "SITE", T1, 100, &[], &missing);
    let catalog = Arc::new(RecordingCatalog::default());
    let (engine, _) = engine(dir.path(), catalog.clone());

    engine.process_endpoint("SITE", &settings(0.1)).unwrap();

    assert!(catalog.invalidated().is_empty());
    let record = miss_record(engine.store(), &latest);
    assert_eq!(record.status, PhaseStatus::Aborted);
    assert_eq!(record.aborted_reason.as_deref(), Some("20.00% miss"));
}

#[test]
fn test_force_proceed_overrides_safeguard() {
    let dir = tempdir().unwrap();
    let missing: Vec<String> = (0..20).map(|i| format!("/store/miss/{}", i)).collect();
    write_run(dir.path(), "SITE", T1, 100, &[], &missing);
    let catalog = Arc::new(RecordingCatalog::default());
    let (engine, _) = engine(dir.path(), catalog.clone());

    let forced = ActionSettings {
        force_proceed: true,
        ..settings(0.1)
    };
    engine.process_endpoint("SITE", &forced).unwrap();
    assert_eq!(catalog.invalidated().len(), 20);
}

#[test]
fn test_processed_run_is_not_acted_on_twice() {
    let dir = tempdir().unwrap();
    write_run(dir.path(), "SITE", T0, 10, &paths(&["a", "b"]), &[]);
    let latest = write_run(dir.path(), "SITE", T1, 10, &paths(&["a", "b"]), &paths(&["x"]));
    let catalog = Arc::new(RecordingCatalog::default());
    let (engine, _) = engine(dir.path(), catalog.clone());

    engine.process_endpoint("SITE", &settings(0.5)).unwrap();
    assert_eq!(catalog.quarantined_paths().len(), 2);
    assert_eq!(catalog.invalidated().len(), 1);

    let again = engine.process_endpoint("SITE", &settings(0.5)).unwrap();
    assert_eq!(again, EndpointOutcome::AlreadyProcessed { latest: latest.clone() });
    assert_eq!(catalog.quarantined_paths().len(), 2);
    assert_eq!(catalog.invalidated().len(), 1);

    // forcing reprocesses the same run
    let forced = ActionSettings {
        force_proceed: true,
        ..settings(0.5)
    };
    let outcome = engine.process_endpoint("SITE", &forced).unwrap();
    assert!(matches!(outcome, EndpointOutcome::Processed { .. }));
    assert_eq!(catalog.quarantined_paths().len(), 4);
}

#[test]
fn test_dark_phase_skipped_without_old_enough_run() {
    let dir = tempdir().unwrap();
    write_run(dir.path(), "SITE", "2024_01_20_00_00", 10, &paths(&["a"]), &[]);
    let latest = write_run(dir.path(), "SITE", T1, 10, &paths(&["a"]), &paths(&["x"]));
    let catalog = Arc::new(RecordingCatalog::default());
    let (engine, _) = engine(dir.path(), catalog.clone());

    let outcome = engine.process_endpoint("SITE", &settings(0.5)).unwrap();
    let EndpointOutcome::Processed { comparison, dark, miss, .. } = outcome else {
        panic!("endpoint was not processed");
    };
    assert!(comparison.is_none());
    assert!(dark.is_none());
    assert_eq!(miss.acted, 1);

    let status = engine.store().status(&latest);
    assert!(!status.contains(Phase::CcDark));
    assert!(status.contains(Phase::CcMiss));
    assert!(catalog.quarantined_paths().is_empty());
}

#[test]
fn test_run_without_file_counts_is_skipped() {
    let dir = tempdir().unwrap();
    let latest = write_run(dir.path(), "SITE", T1, 0, &paths(&["a"]), &paths(&["x"]));
    let catalog = Arc::new(RecordingCatalog::default());
    let (engine, _) = engine(dir.path(), catalog.clone());

    let outcome = engine.process_endpoint("SITE", &settings(0.5)).unwrap();
    assert_eq!(outcome, EndpointOutcome::NoFiles { latest: latest.clone() });
    assert!(!engine.store().was_attempted(&latest));
    assert!(catalog.invalidated().is_empty());
}

#[test]
fn test_unscanned_endpoint() {
    let dir = tempdir().unwrap();
    let catalog = Arc::new(RecordingCatalog::default());
    let (engine, _) = engine(dir.path(), catalog);
    assert_eq!(
        engine.process_endpoint("NOWHERE", &settings(0.5)).unwrap(),
        EndpointOutcome::NotScanned
    );
}

#[test]
fn test_prefixed_endpoint_names_stay_separate() {
    let dir = tempdir().unwrap();
    let x = write_run(dir.path(), "X", T1, 10, &[], &paths(&["x-file"]));
    let xy = write_run(dir.path(), "X_Y", "2024_02_10_00_00", 10, &[], &paths(&["xy-file"]));
    let catalog = Arc::new(RecordingCatalog::default());
    let (engine, _) = engine(dir.path(), catalog.clone());

    engine.process_endpoint("X", &settings(0.5)).unwrap();

    let invalidated = catalog.invalidated();
    assert_eq!(invalidated.len(), 1);
    assert_eq!(invalidated[0].0, "X");
    assert_eq!(invalidated[0].1, "x-file");
    assert!(engine.store().was_attempted(&x));
    assert!(!engine.store().was_attempted(&xy));
}

#[test]
fn test_failed_requests_are_counted_and_phase_completes() {
    let dir = tempdir().unwrap();
    write_run(dir.path(), "SITE", T0, 10, &paths(&["a", "b", "c"]), &[]);
    let latest = write_run(dir.path(), "SITE", T1, 10, &paths(&["b", "c"]), &[]);
    let catalog = Arc::new(RecordingCatalog::failing(&["c"]));
    let (engine, _) = engine(dir.path(), catalog.clone());

    let outcome = engine.process_endpoint("SITE", &settings(0.5)).unwrap();
    let EndpointOutcome::Processed { dark: Some(dark), .. } = outcome else {
        panic!("endpoint was not processed");
    };
    assert_eq!(dark.acted, 1);
    assert_eq!(dark.failed, 1);
    assert_eq!(catalog.quarantined_paths(), vec!["b"]);

    let record = dark_record(engine.store(), &latest);
    assert_eq!(record.status, PhaseStatus::Done);
    assert_eq!(record.confirmed_dark_files, 1);
    assert_eq!(record.failed_dark_files, 1);
}

#[test]
fn test_undecodable_missing_entry_counts_as_failure() {
    let dir = tempdir().unwrap();
    let latest = write_run(dir.path(), "SITE", T1, 10, &[], &[]);
    let missing_list = dir.path().join(latest.missing_list().to_string());
    fs::write(&missing_list, b"/store/ok1\n/store/bad\xff\n/store/ok2\n").unwrap();
    let catalog = Arc::new(RecordingCatalog::default());
    let (engine, _) = engine(dir.path(), catalog.clone());

    let outcome = engine.process_endpoint("SITE", &settings(0.5)).unwrap();
    let EndpointOutcome::Processed { miss, .. } = outcome else {
        panic!("endpoint was not processed");
    };
    assert_eq!(miss.found, 3);
    assert_eq!(miss.acted, 2);
    assert_eq!(miss.failed, 1);

    let invalidated: Vec<String> = catalog.invalidated().into_iter().map(|c| c.1).collect();
    assert_eq!(invalidated, vec!["/store/ok1", "/store/ok2"]);

    let record = miss_record(engine.store(), &latest);
    assert_eq!(record.status, PhaseStatus::Done);
    assert_eq!(record.initial_miss_files, 3);
    assert_eq!(record.failed_miss_files, 1);

    // the run is finished, so the next pass leaves it alone
    let again = engine.process_endpoint("SITE", &settings(0.5)).unwrap();
    assert_eq!(again, EndpointOutcome::AlreadyProcessed { latest });
}

#[test]
fn test_dark_failure_is_reported_when_both_phases_fail() {
    let dir = tempdir().unwrap();
    write_run(dir.path(), "SITE", T0, 10, &paths(&["a"]), &[]);
    let latest = write_run(dir.path(), "SITE", T1, 10, &[], &[]);
    for list in [latest.dark_list(), latest.missing_list()] {
        let path = dir.path().join(list.to_string());
        fs::remove_file(&path).unwrap();
        fs::create_dir(&path).unwrap();
    }
    let catalog = Arc::new(RecordingCatalog::default());
    let (engine, _) = engine(dir.path(), catalog);

    let err = engine.process_endpoint("SITE", &settings(0.5)).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("_D.list"), "unexpected error: {}", message);
}

#[test]
fn test_unknown_status_keys_survive_processing() {
    let dir = tempdir().unwrap();
    let latest = write_run(dir.path(), "SITE", T1, 10, &[], &paths(&["x"]));
    let status_path = dir.path().join(latest.to_string());
    let mut status: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&status_path).unwrap()).unwrap();
    status["custom_tool"] = serde_json::json!({ "note": "keep me" });
    fs::write(&status_path, status.to_string()).unwrap();

    let catalog = Arc::new(RecordingCatalog::default());
    let (engine, _) = engine(dir.path(), catalog);
    engine.process_endpoint("SITE", &settings(0.5)).unwrap();

    let rewritten: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&status_path).unwrap()).unwrap();
    assert_eq!(rewritten["custom_tool"]["note"], "keep me");
    assert_eq!(rewritten["scanner"]["total_files"], 10);
    assert_eq!(rewritten["cc_miss"]["status"], "done");
}

#[test]
fn test_cycle_isolates_failing_endpoint() {
    let dir = tempdir().unwrap();
    let broken = write_run(dir.path(), "BROKEN", T1, 10, &[], &[]);
    // a directory where the missing list should be makes reading it fail
    let missing_list = dir.path().join(broken.missing_list().to_string());
    fs::remove_file(&missing_list).unwrap();
    fs::create_dir(&missing_list).unwrap();
    write_run(dir.path(), "GOOD", T1, 10, &[], &paths(&["x"]));

    let catalog = Arc::new(RecordingCatalog::default());
    let (engine, _) = engine(dir.path(), catalog.clone());
    let endpoints = paths(&["BROKEN", "GOOD", "NOWHERE"]);

    let report = engine.run_cycle(&endpoints, &settings(0.5), &StopSignal::new());
    assert_eq!(report.failed, 1);
    assert_eq!(report.processed, 1);
    assert_eq!(report.skipped, 1);
    assert!(!report.stopped_early);
    assert_eq!(catalog.invalidated().len(), 1);
}

#[test]
fn test_cycle_honours_stop() {
    let dir = tempdir().unwrap();
    write_run(dir.path(), "GOOD", T1, 10, &[], &paths(&["x"]));
    let catalog = Arc::new(RecordingCatalog::default());
    let (engine, _) = engine(dir.path(), catalog.clone());

    let stop = StopSignal::new();
    stop.stop();
    let report = engine.run_cycle(&paths(&["GOOD"]), &settings(0.5), &stop);
    assert!(report.stopped_early);
    assert_eq!(report.processed, 0);
    assert!(catalog.invalidated().is_empty());
}

#[test]
fn test_empty_endpoint_list_uses_writable_endpoints() {
    let dir = tempdir().unwrap();
    let catalog = Arc::new(RecordingCatalog {
        writable: paths(&["A", "B"]),
        ..RecordingCatalog::default()
    });
    let (engine, _) = engine(dir.path(), catalog);

    assert_eq!(engine.resolve_endpoints(&[]).unwrap(), vec!["A", "B"]);
    assert_eq!(engine.resolve_endpoints(&paths(&["C"])).unwrap(), vec!["C"]);
}
