//! Configuration using Figment
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. Built-in defaults ([`EmucamConfig::default`])
//! 2. A TOML file (`config/emucam.toml` by default)
//! 3. Environment variables prefixed with `EMUCAM_`, nested keys separated by `__`
//!
//! Durations are humantime strings (`"30s"`, `"33ms"`).
//!
//! # Example
//! ```no_run
//! use emucam::config::EmucamConfig;
//!
//! // EMUCAM_PROCESSOR__PIPELINE_DEPTH=5 overrides processor.pipeline_depth
//! let config = EmucamConfig::load()?;
//! config.validate()?;
//! println!("pipeline depth: {}", config.processor.pipeline_depth);
//! # Ok::<(), emucam::config::ConfigError>(())
//! ```

use emucam_core::{DataSpace, PixelFormat, StreamDescriptor};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/emucam.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "EMUCAM_";

/// Configuration loading or validation failure.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A source could not be read or did not match the schema.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] figment::Error),

    /// Values loaded but are not usable.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EmucamConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Request processor settings
    #[serde(default)]
    pub processor: ProcessorConfig,
    /// Simulated sensor settings
    #[serde(default)]
    pub sensor: SensorConfig,
    /// Streams configured on the simulator's pipeline
    #[serde(default = "default_streams")]
    pub streams: Vec<StreamConfig>,
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
    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, colored
    #[default]
    Pretty,
    /// Single line per event
    Compact,
    /// One JSON object per event
    Json,
}

/// Request processor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Camera served by the processor
    #[serde(default)]
    pub camera_id: u32,
    /// Sensor pipeline depth; the queue holds at most `pipeline_depth + 1` requests
    #[serde(default = "default_pipeline_depth")]
    pub pipeline_depth: u32,
    /// Longest supported frame duration. Bounds the backpressure wait, every
    /// fence wait and every vsync wait.
    #[serde(default = "default_max_frame_duration", with = "humantime_serde")]
    pub max_frame_duration: Duration,
}

/// Simulated sensor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Time between vsync ticks
    #[serde(default = "default_frame_interval", with = "humantime_serde")]
    pub frame_interval: Duration,
    /// Pixel array width
    #[serde(default = "default_width")]
    pub width: u32,
    /// Pixel array height
    #[serde(default = "default_height")]
    pub height: u32,
}

/// Stream declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Stream id, unique within the pipeline
    pub id: u32,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Pixel format (e.g. "ycbcr_420_888", "rgba8888", "blob")
    pub format: PixelFormat,
    /// Data space (e.g. "v0_jfif" for blob streams)
    #[serde(default)]
    pub data_space: DataSpace,
    /// Declared buffer size for blob streams
    #[serde(default)]
    pub buffer_size: u32,
    /// Reprocess input stream
    #[serde(default)]
    pub is_input: bool,
}

impl StreamConfig {
    /// Descriptor for the processor's stream table.
    pub fn to_descriptor(&self) -> StreamDescriptor {
        let descriptor = if self.is_input {
            StreamDescriptor::input(self.id, self.width, self.height, self.format)
        } else {
            StreamDescriptor::output(self.id, self.width, self.height, self.format)
        };
        descriptor
            .with_data_space(self.data_space)
            .with_buffer_size(self.buffer_size)
    }
}

// Default value functions
fn default_name() -> String {
    "emucam".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_pipeline_depth() -> u32 {
    3
}

fn default_max_frame_duration() -> Duration {
    Duration::from_secs(30)
}

fn default_frame_interval() -> Duration {
    Duration::from_millis(33)
}

fn default_width() -> u32 {
    640
}

fn default_height() -> u32 {
    480
}

fn default_streams() -> Vec<StreamConfig> {
    vec![StreamConfig {
        id: 0,
        width: default_width(),
        height: default_height(),
        format: PixelFormat::YCbCr420_888,
        data_space: DataSpace::Unknown,
        buffer_size: 0,
        is_input: false,
    }]
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            camera_id: 0,
            pipeline_depth: default_pipeline_depth(),
            max_frame_duration: default_max_frame_duration(),
        }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            frame_interval: default_frame_interval(),
            width: default_width(),
            height: default_height(),
        }
    }
}

impl EmucamConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path and the environment.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Ok(Figment::from(Serialized::defaults(EmucamConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.processor.pipeline_depth == 0 {
            return Err(ConfigError::Invalid(
                "processor.pipeline_depth must be at least 1".to_string(),
            ));
        }

        if self.processor.max_frame_duration.is_zero() {
            return Err(ConfigError::Invalid(
                "processor.max_frame_duration must be non-zero".to_string(),
            ));
        }

        if self.sensor.frame_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "sensor.frame_interval must be non-zero".to_string(),
            ));
        }

        let mut ids = HashSet::new();
        for stream in &self.streams {
            if !ids.insert(stream.id) {
                return Err(ConfigError::Invalid(format!("Duplicate stream ID: {}", stream.id)));
            }
            if stream.width == 0 || stream.height == 0 {
                return Err(ConfigError::Invalid(format!(
                    "Stream {} has zero size {}x{}",
                    stream.id, stream.width, stream.height
                )));
            }
        }

        Ok(())
    }

    /// Output streams
    pub fn output_streams(&self) -> impl Iterator<Item = &StreamConfig> {
        self.streams.iter().filter(|s| !s.is_input)
    }
}
