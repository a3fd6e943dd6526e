use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use consistency_actions_core::AppConfig;

#[derive(Debug, Parser)]
#[command(name = "consistency-actions")]
#[command(
    about = "Act on storage consistency scans: quarantine dark files, invalidate missing ones",
    long_about = None
)]
pub struct Cli {
    /// Configuration file to use instead of ./Config.toml
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the actions daemon
    Run(RunArgs),
    /// List endpoints with scanner output
    ListEndpoints,
    /// List the scan runs of an endpoint and whether they were processed
    ListRuns { endpoint: String },
    /// Print the status document of the latest run of an endpoint
    Status { endpoint: String },
    /// Print configuration values
    PrintConfig,
}

/// Command line overrides of the configuration file.
#[derive(Debug, Args)]
pub struct RunArgs {
    /// Run a single cycle and exit
    #[arg(long)]
    pub once: bool,
    /// Endpoint to process; repeat for several. Defaults to all writable endpoints
    #[arg(long = "endpoint")]
    pub endpoints: Vec<String>,
    /// Act even when a safeguard threshold is exceeded or the run was already processed
    #[arg(long)]
    pub force_proceed: bool,
    /// Seconds between the starts of two cycles
    #[arg(long)]
    pub sleep_time: Option<u64>,
    /// Minimum age in days of the run dark files are confirmed against
    #[arg(long)]
    pub dark_min_age: Option<i64>,
    /// Largest fraction of dark files that may be quarantined
    #[arg(long)]
    pub dark_threshold: Option<f64>,
    /// Largest fraction of missing files that may be invalidated
    #[arg(long)]
    pub miss_threshold: Option<f64>,
    /// Directory holding the scanner output
    #[arg(long)]
    pub scanner_files_path: Option<String>,
}

impl RunArgs {
    pub fn apply(&self, config: &mut AppConfig) {
        if self.once {
            config.once = true;
        }
        if !self.endpoints.is_empty() {
            config.endpoints = self.endpoints.clone();
        }
        if self.force_proceed {
            config.force_proceed = true;
        }
        if let Some(sleep_time) = self.sleep_time {
            config.sleep_time = sleep_time;
        }
        if let Some(days) = self.dark_min_age {
            config.dark_min_age = days;
        }
        if let Some(fraction) = self.dark_threshold {
            config.dark_threshold = fraction;
        }
        if let Some(fraction) = self.miss_threshold {
            config.miss_threshold = fraction;
        }
        if let Some(path) = &self.scanner_files_path {
            config.scanner_files_path = path.clone();
        }
    }
}
