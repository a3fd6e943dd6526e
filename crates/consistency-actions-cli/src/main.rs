mod commands;
mod logging;

use std::process;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands, RunArgs};
use consistency_actions_core::config::load_configuration;
use consistency_actions_core::{
    run_loop, ActionEngine, AppConfig, DeadlineCatalog, FileHeartbeat, JournalCatalog,
    SnapshotStore, StopSignal, TracingMetrics,
};
use dotenv::dotenv;
use tracing::{error, info, warn};

const EXECUTABLE: &str = "consistency-actions";

fn main() {
    dotenv().ok();

    let _guard = logging::init_logger();

    let args = Cli::parse();

    let mut config = match load_configuration(args.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let result = match args.command {
        Some(Commands::Run(run_args)) => run_daemon(&mut config, &run_args),
        Some(Commands::ListEndpoints) => list_endpoints(&config),
        Some(Commands::ListRuns { endpoint }) => list_runs(&config, &endpoint),
        Some(Commands::Status { endpoint }) => print_status(&config, &endpoint),
        Some(Commands::PrintConfig) => print_config(&config),
        None => {
            let _ = Cli::command().print_long_help();
            Ok(())
        }
    };

    if let Err(err) = result {
        error!("Error: {:#}", err);
        process::exit(1);
    }
}

fn run_daemon(config: &mut AppConfig, run_args: &RunArgs) -> Result<()> {
    run_args.apply(config);
    config
        .validate()
        .context("invalid configuration after command line overrides")?;
    config.effective_threads();

    let settings = config.action_settings();
    let schedule = config.schedule();
    info!(
        "Starting: scanner output in {}, dark min age {} days, thresholds dark {} miss {}{}",
        config.scanner_files_path,
        settings.dark_min_age,
        settings.dark_threshold,
        settings.miss_threshold,
        if settings.force_proceed { ", FORCED" } else { "" }
    );

    let journal = Arc::new(JournalCatalog::new(
        config.outbox(),
        config.prefix_map(),
        config.writable_endpoints.clone(),
    ));
    let catalog = Arc::new(DeadlineCatalog::new(journal, config.action_timeout()));
    let engine = ActionEngine::new(SnapshotStore::new(&config.scanner_files_path), catalog)
        .with_metrics(Arc::new(TracingMetrics));

    let stop = StopSignal::new();
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || {
        warn!("Stop requested, finishing the current endpoint");
        handler_stop.stop();
    })
    .context("cannot install the signal handler")?;

    let liveness = FileHeartbeat::new(
        &config.scanner_files_path,
        EXECUTABLE,
        schedule.sleep_time * 3,
    );
    let cycles = run_loop(
        &engine,
        &config.endpoints,
        &settings,
        &schedule,
        &liveness,
        &stop,
    )
    .context("daemon failed to start")?;

    info!("{} cycles run", format!("{}", cycles).green());
    Ok(())
}

fn list_endpoints(config: &AppConfig) -> Result<()> {
    let store = SnapshotStore::new(&config.scanner_files_path);
    let endpoints = store
        .list_scanned_endpoints()
        .with_context(|| format!("cannot list scanner output in {}", config.scanner_files_path))?;

    if endpoints.is_empty() {
        println!("No scanner output in {}", config.scanner_files_path);
    }
    for endpoint in endpoints {
        println!("{}", endpoint);
    }
    Ok(())
}

fn list_runs(config: &AppConfig, endpoint: &str) -> Result<()> {
    let store = SnapshotStore::new(&config.scanner_files_path);
    let runs = store
        .list_runs(endpoint, 0)
        .with_context(|| format!("cannot list runs of {}", endpoint))?;
    if runs.is_empty() {
        bail!("no scan runs found for {}", endpoint);
    }

    for run in runs {
        let status = store.status(&run);
        let state = if status.was_completed() {
            "done".green()
        } else if status.was_attempted() {
            "attempted".yellow()
        } else {
            "new".cyan()
        };
        println!(
            "{}  {:>10}  {} files",
            run.stamp(),
            state,
            status.total_known_files()
        );
    }
    Ok(())
}

fn print_status(config: &AppConfig, endpoint: &str) -> Result<()> {
    let store = SnapshotStore::new(&config.scanner_files_path);
    let latest = store
        .latest_run(endpoint)
        .with_context(|| format!("cannot list runs of {}", endpoint))?
        .with_context(|| format!("no scan runs found for {}", endpoint))?;

    let status = store.status(&latest);
    println!("{}", store.path_of(&latest).display().to_string().bold());
    println!("{}", status.to_json_pretty()?);
    let unknown = status.unknown_keys();
    if !unknown.is_empty() {
        println!("{} {}", "Unrecognised keys:".yellow(), unknown.join(", "));
    }
    Ok(())
}

fn print_config(config: &AppConfig) -> Result<()> {
    let rendered = toml::to_string_pretty(config).context("cannot render configuration")?;
    println!("{}", rendered);
    Ok(())
}
