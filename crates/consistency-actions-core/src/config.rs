use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const ENV_PREFIX: &str = "CONSISTENCY_ACTIONS";
pub const DEFAULT_SCANNER_FILES_PATH: &str = "/var/cache/consistency-dump";

/// Storage URL prefix of one endpoint, used to resolve replica locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoragePrefix {
    pub endpoint: String,
    pub prefix: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Endpoints to process; empty means every writable endpoint.
    pub endpoints: Vec<String>,
    pub once: bool,
    /// Seconds between the starts of two cycles.
    pub sleep_time: u64,
    /// Minimum age in days of the run the latest dark list is compared with.
    pub dark_min_age: i64,
    pub dark_threshold: f64,
    pub miss_threshold: f64,
    pub force_proceed: bool,
    pub scanner_files_path: String,
    pub threads: usize,
    /// Seconds allowed for a single catalog call.
    pub action_timeout: u64,
    pub outbox_path: Option<String>,
    pub storage_prefixes: Vec<StoragePrefix>,
    pub writable_endpoints: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            once: false,
            sleep_time: 60,
            dark_min_age: 28,
            dark_threshold: 0.01,
            miss_threshold: 0.01,
            force_proceed: false,
            scanner_files_path: DEFAULT_SCANNER_FILES_PATH.to_string(),
            threads: 1,
            action_timeout: 30,
            outbox_path: None,
            storage_prefixes: Vec::new(),
            writable_endpoints: Vec::new(),
        }
    }
}

/// The knobs of one processing cycle, passed explicitly to every phase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActionSettings {
    pub dark_min_age: i64,
    pub dark_threshold: f64,
    pub miss_threshold: f64,
    pub force_proceed: bool,
}

impl Default for ActionSettings {
    fn default() -> Self {
        AppConfig::default().action_settings()
    }
}

/// How the daemon loop repeats.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Schedule {
    pub once: bool,
    pub sleep_time: Duration,
}

impl AppConfig {
    pub fn action_settings(&self) -> ActionSettings {
        ActionSettings {
            dark_min_age: self.dark_min_age,
            dark_threshold: self.dark_threshold,
            miss_threshold: self.miss_threshold,
            force_proceed: self.force_proceed,
        }
    }

    pub fn schedule(&self) -> Schedule {
        Schedule {
            once: self.once,
            sleep_time: Duration::from_secs(self.sleep_time),
        }
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout)
    }

    pub fn outbox(&self) -> PathBuf {
        match &self.outbox_path {
            Some(path) => PathBuf::from(path),
            None => Path::new(&self.scanner_files_path).join("actions"),
        }
    }

    pub fn prefix_map(&self) -> BTreeMap<String, String> {
        self.storage_prefixes
            .iter()
            .map(|p| (p.endpoint.clone(), p.prefix.clone()))
            .collect()
    }

    /// Worker count actually used; only a single worker is supported.
    pub fn effective_threads(&self) -> usize {
        if self.threads != 1 {
            warn!(
                "threads = {} requested, running a single worker",
                self.threads
            );
        }
        1
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("dark_threshold", self.dark_threshold),
            ("miss_threshold", self.miss_threshold),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::Message(format!(
                    "{} must be a fraction in (0, 1], got {}",
                    name, value
                )));
            }
        }
        if self.sleep_time == 0 {
            return Err(ConfigError::Message("sleep_time must be positive".to_string()));
        }
        if self.dark_min_age < 0 {
            return Err(ConfigError::Message(format!(
                "dark_min_age must not be negative, got {}",
                self.dark_min_age
            )));
        }
        if self.action_timeout == 0 {
            return Err(ConfigError::Message(
                "action_timeout must be positive".to_string(),
            ));
        }
        if self.scanner_files_path.trim().is_empty() {
            return Err(ConfigError::Message(
                "scanner_files_path must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Defaults, then `Config.toml` (or `path` when given), then
/// `CONSISTENCY_ACTIONS_*` environment variables.
pub fn load_configuration(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let file_source = match path {
        Some(path) => ConfigFile::from(path).required(true),
        None => ConfigFile::with_name("Config").required(false),
    };

    let builder = Config::builder()
        .add_source(file_source)
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("endpoints")
                .with_list_parse_key("writable_endpoints"),
        )
        .build()?;
    let config = builder.try_deserialize::<AppConfig>()?;
    config.validate()?;
    Ok(config)
}
