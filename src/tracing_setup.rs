//! Subscriber installation for the processor and the simulator.
//!
//! Events carry `frame_number`, `pipeline_id` and `stream_id` fields. The
//! worker thread (`emucam-request-{id}`) and the sensor's vsync thread are
//! named, so thread names are on by default. `RUST_LOG` takes precedence over
//! the configured level.
//!
//! ```no_run
//! use emucam::{config::EmucamConfig, tracing_setup};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EmucamConfig::load()?;
//! tracing_setup::init_from_config(&config)?;
//! tracing::info!(frame_number = 1, "request queued");
//! # Ok(())
//! # }
//! ```

use crate::config::{EmucamConfig, LogFormat};
use thiserror::Error;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Subscriber setup failures.
#[derive(Debug, Error)]
pub enum TracingError {
    /// The level name is not one `tracing` knows.
    #[error("Invalid log level '{0}'. Must be one of: trace, debug, info, warn, error")]
    InvalidLevel(String),

    /// The registry refused the subscriber.
    #[error("Failed to install tracing subscriber: {0}")]
    Install(String),
}

/// How the global subscriber formats and filters events.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Default filter level when `RUST_LOG` is unset.
    pub level: Level,
    /// Event layout.
    pub format: LogFormat,
    /// Include the emitting thread name in each event.
    pub thread_names: bool,
    /// Colors; honored by the pretty format only.
    pub ansi: bool,
}

impl TracingConfig {
    /// Pretty output at `level`, with thread names and colors.
    pub fn new(level: Level) -> Self {
        Self {
            level,
            format: LogFormat::Pretty,
            thread_names: true,
            ansi: true,
        }
    }

    /// Level and format from the `[application]` section.
    pub fn from_config(config: &EmucamConfig) -> Result<Self, TracingError> {
        let level = parse_log_level(&config.application.log_level)?;
        Ok(Self::new(level).with_format(config.application.log_format))
    }

    /// Set the event layout.
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Enable or disable colors.
    pub fn with_ansi(mut self, ansi: bool) -> Self {
        self.ansi = ansi;
        self
    }

    /// Enable or disable thread names.
    pub fn with_thread_names(mut self, thread_names: bool) -> Self {
        self.thread_names = thread_names;
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.level.as_str().to_lowercase()))
    }
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::new(Level::INFO)
    }
}

/// Install the subscriber described by the `[application]` section.
pub fn init_from_config(config: &EmucamConfig) -> Result<(), TracingError> {
    init(TracingConfig::from_config(config)?)
}

/// Install the global subscriber.
///
/// A process gets one subscriber; once any is installed, later calls return
/// `Ok(())` without touching it.
pub fn init(config: TracingConfig) -> Result<(), TracingError> {
    if tracing::dispatcher::has_been_set() {
        return Ok(());
    }

    let filter = config.filter();
    let base = fmt::layer()
        .with_thread_names(config.thread_names)
        .with_target(false);

    let layer = match config.format {
        LogFormat::Pretty => base.pretty().with_ansi(config.ansi).with_filter(filter).boxed(),
        LogFormat::Compact => base.compact().with_ansi(false).with_filter(filter).boxed(),
        LogFormat::Json => base
            .json()
            .flatten_event(true)
            .with_filter(filter)
            .boxed(),
    };

    match tracing_subscriber::registry().with(layer).try_init() {
        Ok(()) => Ok(()),
        // Lost a race with another thread installing first
        Err(_) if tracing::dispatcher::has_been_set() => Ok(()),
        Err(e) => Err(TracingError::Install(e.to_string())),
    }
}

/// Parse a case-insensitive level name.
pub fn parse_log_level(level: &str) -> Result<Level, TracingError> {
    level
        .parse::<Level>()
        .map_err(|_| TracingError::InvalidLevel(level.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("trace").unwrap(), Level::TRACE);
        assert_eq!(parse_log_level("Debug").unwrap(), Level::DEBUG);
        assert!(matches!(
            parse_log_level("verbose"),
            Err(TracingError::InvalidLevel(level)) if level == "verbose"
        ));
    }

    #[test]
    fn test_from_config_carries_level_and_format() {
        let mut config = EmucamConfig::default();
        config.application.log_level = "warn".to_string();
        config.application.log_format = LogFormat::Json;

        let tracing_config = TracingConfig::from_config(&config).unwrap();
        assert_eq!(tracing_config.level, Level::WARN);
        assert_eq!(tracing_config.format, LogFormat::Json);
        assert!(tracing_config.thread_names);
    }
}
