//! Configuration using Figment
//!
//! Settings are layered, later sources overriding earlier ones:
//! 1. built-in defaults
//! 2. `config/tnmr_daq.toml` (or a path given on the command line)
//! 3. environment variables prefixed with `TNMR_DAQ_`, `__` separating
//!    nested keys (`TNMR_DAQ_STORAGE__FORMAT=hdf5`)
//!
//! # Example
//! ```no_run
//! use tnmr_daq::config::Settings;
//!
//! let settings = Settings::load()?;
//! settings.validate()?;
//! println!("Writing {} files to {}", settings.storage.format, settings.storage.output_dir.display());
//! # Ok::<(), tnmr_daq::error::NmrError>(())
//! ```

use crate::error::{AppResult, NmrError};
use crate::experiment::ExperimentContext;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/tnmr_daq.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub application: ApplicationConfig,
    pub storage: StorageConfig,
    pub scan: ScanConfig,
    pub sink: SinkConfig,
    pub experiment: ExperimentContext,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output (pretty, compact, json)
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "tnmr-daq".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

/// Output file configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend name, see `BackendRegistry::list_formats`.
    pub format: String,
    /// Directory holding data files.
    pub output_dir: PathBuf,
    /// Optional directory below `output_dir`.
    pub subdir: String,
    /// One output file per template; see `data::naming` for variables.
    pub filename_templates: Vec<String>,
    /// First scan counter handed out.
    pub counter_start: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            format: "nxjson".to_string(),
            output_dir: PathBuf::from("data"),
            subdir: String::new(),
            filename_templates: vec!["{proposal}_{year}{month}{day}_{counter}".to_string()],
            counter_start: 1,
        }
    }
}

/// Scan driver timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Pause after uploading a sequence.
    #[serde(with = "humantime_serde")]
    pub settle_delay: Duration,
    /// Fraction of the estimated run time to wait before polling status.
    pub run_wait_fraction: f64,
    /// Highest status code that counts as finished.
    pub finished_status: u16,
    /// Longest wait for the acquisition counter to reach its target.
    #[serde(with = "humantime_serde")]
    pub flush_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub flush_interval: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(1),
            run_wait_fraction: 0.9,
            finished_status: 200,
            flush_timeout: Duration::from_secs(30),
            flush_interval: Duration::from_millis(500),
        }
    }
}

/// Data sink behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Retries after a failed detector/environment read before recording zero.
    pub max_read_retries: u32,
    #[serde(with = "humantime_serde")]
    pub retry_wait: Duration,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            max_read_retries: 10,
            retry_wait: Duration::from_millis(100),
        }
    }
}

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const VALID_FORMATS: [&str; 3] = ["pretty", "compact", "json"];

impl Settings {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file and the environment. A missing file is
    /// not an error; defaults apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Ok(Self::figment(path).extract()?)
    }

    /// Provider stack used by [`load_from`](Self::load_from).
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("TNMR_DAQ_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let invalid = |msg: String| Err(NmrError::Configuration(msg));

        let level = self.application.log_level.to_lowercase();
        if !VALID_LEVELS.contains(&level.as_str()) {
            return invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                VALID_LEVELS.join(", ")
            ));
        }

        let format = self.application.log_format.to_lowercase();
        if !VALID_FORMATS.contains(&format.as_str()) {
            return invalid(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                VALID_FORMATS.join(", ")
            ));
        }

        if self.storage.filename_templates.is_empty() {
            return invalid("storage.filename_templates must not be empty".to_string());
        }

        let fraction = self.scan.run_wait_fraction;
        if !(0.0..=1.0).contains(&fraction) {
            return invalid(format!(
                "Invalid run_wait_fraction {fraction}. Must be between 0 and 1"
            ));
        }

        if self.scan.flush_interval.is_zero() {
            return invalid("scan.flush_interval must be greater than zero".to_string());
        }

        let mut names = HashSet::new();
        for name in self
            .experiment
            .detectors
            .iter()
            .chain(&self.experiment.environment)
        {
            if !names.insert(name) {
                return invalid(format!("Duplicate device name: {name}"));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_validate() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.sink.max_read_retries, 10);
        assert_eq!(settings.scan.finished_status, 200);
        assert_eq!(settings.scan.flush_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_file_and_env_layers() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "tnmr.toml",
                r#"
                [storage]
                format = "nxjson"
                filename_templates = ["{proposal}_{counter}", "backup_{counter}"]

                [scan]
                flush_interval = "250ms"

                [experiment]
                proposal = "p1234"
                environment = ["temperature", "field"]
                "#,
            )?;
            jail.set_env("TNMR_DAQ_SINK__MAX_READ_RETRIES", "3");
            jail.set_env("TNMR_DAQ_APPLICATION__LOG_LEVEL", "debug");

            let settings = Settings::load_from("tnmr.toml").expect("settings load");
            assert_eq!(settings.storage.filename_templates.len(), 2);
            assert_eq!(settings.scan.flush_interval, Duration::from_millis(250));
            assert_eq!(settings.scan.flush_timeout, Duration::from_secs(30));
            assert_eq!(settings.experiment.environment, vec!["temperature", "field"]);
            assert_eq!(settings.sink.max_read_retries, 3);
            assert_eq!(settings.application.log_level, "debug");
            Ok(())
        });
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        Jail::expect_with(|_jail| {
            let settings = Settings::load_from("nope.toml").expect("settings load");
            assert_eq!(settings, Settings::default());
            Ok(())
        });
    }

    #[test]
    fn test_invalid_log_level() {
        let mut settings = Settings::default();
        settings.application.log_level = "loud".to_string();
        assert!(matches!(
            settings.validate(),
            Err(NmrError::Configuration(_))
        ));
    }

    #[test]
    fn test_invalid_fraction_and_templates() {
        let mut settings = Settings::default();
        settings.scan.run_wait_fraction = 1.5;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.storage.filename_templates.clear();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_duplicate_device_names() {
        let mut settings = Settings::default();
        settings.experiment.detectors = vec!["probe".to_string()];
        settings.experiment.environment = vec!["probe".to_string()];
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate device name: probe"));
    }
}
