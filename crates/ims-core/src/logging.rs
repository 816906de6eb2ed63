//! Subscriber installation driven by [`ImsSettings`]
//!
//! The library only emits `tracing` events. An embedding application (or
//! [`ImsCore::install_logging`](crate::ImsCore::install_logging)) installs the
//! global subscriber once, with the level and format taken from the settings.

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::ImsSettings;
use crate::error::{ImsError, ImsResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Level applied to `ims_core` targets
    pub level: Level,
    pub json: bool,
    pub file_info: bool,
    /// Log span enter/exit (timer and registration spans)
    pub log_spans: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json: false,
            file_info: false,
            log_spans: false,
        }
    }
}

impl LoggingConfig {
    /// Level and format from `log_level` / `log_json`
    pub fn from_settings(settings: &ImsSettings) -> ImsResult<Self> {
        Ok(Self {
            level: parse_log_level(&settings.log_level)?,
            json: settings.log_json,
            ..Default::default()
        })
    }

    pub fn with_file_info(mut self) -> Self {
        self.file_info = true;
        self
    }

    pub fn with_spans(mut self) -> Self {
        self.log_spans = true;
        self
    }

    /// Filter directive for this crate's events, e.g. `ims_core=debug`
    pub fn directive(&self) -> ImsResult<Directive> {
        let text = format!("{}={}", env!("CARGO_CRATE_NAME"), self.level.to_string().to_ascii_lowercase());
        text.parse()
            .map_err(|e| ImsError::Config(format!("Invalid log directive {}: {}", text, e)))
    }
}

/// Install a global subscriber for `config`
///
/// `RUST_LOG` directives still apply to other targets. Fails if a global
/// subscriber is already installed.
pub fn setup_logging(config: &LoggingConfig) -> ImsResult<()> {
    let filter = EnvFilter::from_default_env().add_directive(config.directive()?);

    let span_events = if config.log_spans {
        FmtSpan::ACTIVE
    } else {
        FmtSpan::NONE
    };

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_span_events(span_events)
        .with_file(config.file_info)
        .with_line_number(config.file_info);

    let result = if config.json {
        subscriber.with_writer(std::io::stdout).json().try_init()
    } else {
        subscriber.try_init()
    };
    result.map_err(|e| ImsError::Config(format!("Failed to install logger: {}", e)))?;

    tracing::debug!(level = %config.level, json = config.json, "Logging installed");
    Ok(())
}

pub fn parse_log_level(level: &str) -> ImsResult<Level> {
    Level::from_str(level.trim()).map_err(|_| ImsError::Config(format!("Invalid log level: {}", level)))
}
