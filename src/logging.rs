//! Tracing subscriber setup.
//!
//! The service installs one `fmt` layer whose format comes from
//! `application.log_format` (compact, pretty or JSON). `RUST_LOG` overrides
//! `application.log_level` when it is set.
//!
//! # Example
//! ```no_run
//! use fbg_daq::{config::Settings, logging};
//! use tracing::info;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::load()?;
//! logging::init_from_settings(&settings)?;
//! info!("service started");
//! # Ok(())
//! # }
//! ```

use crate::config::{LogFormat, Settings};
use tracing::Level;
use tracing_subscriber::{
    filter::LevelFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Subscriber options derived from [`Settings`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is unset
    pub level: Level,
    /// Record format
    pub format: LogFormat,
    /// Emit span open/close events
    pub span_events: bool,
}

impl LoggingConfig {
    /// Read the `application` section of the settings.
    pub fn from_settings(settings: &Settings) -> Result<Self, String> {
        let app = &settings.application;
        Ok(Self {
            level: parse_log_level(&app.log_level)?,
            format: app.log_format,
            span_events: app.log_span_events,
        })
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::builder()
            .with_default_directive(LevelFilter::from_level(self.level).into())
            .from_env_lossy()
    }

    fn fmt_span(&self) -> FmtSpan {
        if self.span_events {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }
}

/// Install the global subscriber described by `settings`.
pub fn init_from_settings(settings: &Settings) -> Result<(), String> {
    init(LoggingConfig::from_settings(settings)?)
}

/// Install the global subscriber.
///
/// A second call is a no-op, so tests and embedders may call it freely.
pub fn init(config: LoggingConfig) -> Result<(), String> {
    let registry = tracing_subscriber::registry();
    let result = match config.format {
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_ansi(false)
                    .with_span_events(config.fmt_span())
                    .with_filter(config.filter()),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .pretty()
                    .with_span_events(config.fmt_span())
                    .with_filter(config.filter()),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(config.span_events)
                    .with_span_events(config.fmt_span())
                    .with_filter(config.filter()),
            )
            .try_init(),
    };

    result.or_else(|e| {
        if e
            .to_string()
            .contains("a global default trace dispatcher has already been set")
        {
            Ok(())
        } else {
            Err(format!("Failed to initialize tracing: {e}"))
        }
    })
}

/// Parse a level name, case-insensitively.
pub fn parse_log_level(level: &str) -> Result<Level, String> {
    level.parse::<Level>().map_err(|_| {
        format!("Invalid log level '{level}'. Must be one of: trace, debug, info, warn, error")
    })
}
