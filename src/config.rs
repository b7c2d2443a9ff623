//! Service configuration using Figment
//!
//! Strongly-typed settings for the acquisition service. Configuration is loaded from:
//! 1. `config/fbg_daq.toml` (base configuration)
//! 2. Environment variables (prefixed with `FBG_DAQ_`, sections split on `__`)
//!
//! Device calibration is *not* part of these settings: it arrives at runtime over the
//! control channel (see [`crate::description`]).
//!
//! # Example
//! ```no_run
//! use fbg_daq::config::Settings;
//!
//! let settings = Settings::load()?;
//! println!("Listening on {}", settings.server.listen_address);
//! # Ok::<(), fbg_daq::error::DaqError>(())
//! ```

use crate::error::{AppResult, DaqError};
use crate::validation;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the settings file.
pub const DEFAULT_CONFIG_PATH: &str = "config/fbg_daq.toml";

/// Top-level settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Control channel settings
    #[serde(default)]
    pub server: ServerConfig,
    /// Pipeline tuning
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Flat-file archive
    #[serde(default)]
    pub archive: ArchiveConfig,
    /// Upstream peak source
    #[serde(default)]
    pub source: SourceConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log line format
    #[serde(default)]
    pub log_format: LogFormat,
    /// Log span open/close events
    #[serde(default)]
    pub log_span_events: bool,
}

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Single-line records without colours
    #[default]
    Compact,
    /// Multi-line coloured records for a terminal
    Pretty,
    /// One JSON object per record
    Json,
}

/// Control channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the websocket control channel binds to
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
}

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Capacity of the bounded queue between the peak source and intake
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Upper bound on how long the averaging task waits for new peaks, in milliseconds
    #[serde(default = "default_pause_ms")]
    pub pause_ms: u64,
    /// Upper bound on how long the publish task waits for a closed block, in milliseconds
    #[serde(default = "default_publish_poll_ms")]
    pub publish_poll_ms: u64,
}

/// Archive configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Whether published blocks are appended to hourly files
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Directory holding the hourly files
    #[serde(default = "default_archive_dir")]
    pub output_dir: PathBuf,
}

/// Upstream source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Source kind; only "simulated" is built in
    #[serde(default = "default_source_kind")]
    pub kind: String,
    /// Stop after this many scans and send the end marker (unbounded if absent)
    #[serde(default)]
    pub max_scans: Option<u64>,
    /// Uniform jitter applied to simulated peaks, in picometres
    #[serde(default = "default_noise_pm")]
    pub noise_pm: f64,
}

// Default value functions
fn default_name() -> String {
    "FBG DAQ".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_listen_address() -> String {
    "0.0.0.0:7681".to_string()
}

fn default_queue_capacity() -> usize {
    5
}

fn default_pause_ms() -> u64 {
    10
}

fn default_publish_poll_ms() -> u64 {
    1000
}

fn default_enabled() -> bool {
    true
}

fn default_archive_dir() -> PathBuf {
    PathBuf::from("archive")
}

fn default_source_kind() -> String {
    "simulated".to_string()
}

fn default_noise_pm() -> f64 {
    2.0
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            log_span_events: false,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            pause_ms: default_pause_ms(),
            publish_poll_ms: default_publish_poll_ms(),
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            output_dir: default_archive_dir(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: default_source_kind(),
            max_scans: None,
            noise_pm: default_noise_pm(),
        }
    }
}

impl PipelineConfig {
    /// Wait bound of the averaging task.
    pub fn pause(&self) -> Duration {
        Duration::from_millis(self.pause_ms)
    }

    /// Wait bound of the publish task.
    pub fn publish_poll(&self) -> Duration {
        Duration::from_millis(self.publish_poll_ms)
    }
}

impl Settings {
    /// Load settings from `config/fbg_daq.toml` and environment variables
    ///
    /// Environment variables override the file with prefix `FBG_DAQ_`.
    /// Example: `FBG_DAQ_SERVER__LISTEN_ADDRESS=127.0.0.1:9000`
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load settings from a specific file path. A missing file yields the defaults.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings: Settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("FBG_DAQ_").split("__"))
            .extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate settings after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        validation::is_valid_socket_address(&self.server.listen_address)
            .map_err(|e| DaqError::Configuration(format!("server.listen_address: {e}")))?;

        if self.pipeline.queue_capacity == 0 {
            return Err(DaqError::Configuration(
                "pipeline.queue_capacity must be at least 1".to_string(),
            ));
        }

        if self.archive.enabled {
            validation::is_valid_path(&self.archive.output_dir.to_string_lossy())
                .map_err(|e| DaqError::Configuration(format!("archive.output_dir: {e}")))?;
        }

        if self.source.kind != "simulated" {
            return Err(DaqError::Configuration(format!(
                "Unknown source kind '{}'. Must be: simulated",
                self.source.kind
            )));
        }

        validation::is_non_negative(self.source.noise_pm)
            .map_err(|e| DaqError::Configuration(format!("source.noise_pm: {e}")))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.pipeline.queue_capacity, 5);
        assert_eq!(settings.pipeline.pause(), Duration::from_millis(10));
    }

    #[test]
    fn load_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[server]\nlisten_address = \"127.0.0.1:9100\"\n[archive]\nenabled = false"
        )
        .unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.server.listen_address, "127.0.0.1:9100");
        assert!(!settings.archive.enabled);
        assert_eq!(settings.pipeline.queue_capacity, 5);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let settings = Settings::load_from("does/not/exist.toml").unwrap();
        assert_eq!(settings.server.listen_address, "0.0.0.0:7681");
    }

    #[test]
    fn test_invalid_log_level() {
        let mut settings = Settings::default();
        settings.application.log_level = "loud".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn log_format_is_read_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[application]\nlog_format = \"json\"\nlog_span_events = true").unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.application.log_format, LogFormat::Json);
        assert!(settings.application.log_span_events);
        assert_eq!(Settings::default().application.log_format, LogFormat::Compact);
    }

    #[test]
    fn unknown_log_format_is_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[application]\nlog_format = \"xml\"").unwrap();
        assert!(matches!(Settings::load_from(file.path()), Err(DaqError::Config(_))));
    }

    #[test]
    fn zero_queue_capacity_is_rejected() {
        let mut settings = Settings::default();
        settings.pipeline.queue_capacity = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn bad_listen_address_is_rejected() {
        let mut settings = Settings::default();
        settings.server.listen_address = "not-an-address".to_string();
        assert!(settings.validate().is_err());
    }
}
