//! Configuration using Figment
//!
//! This module provides strongly-typed configuration for the analyser driver.
//! Configuration is layered, later sources overriding earlier ones:
//! 1. Built-in defaults (the power-on configuration sequence)
//! 2. `config/te300x.toml` (or any file passed to [`AnalyserConfig::load_from`])
//! 3. Environment variables prefixed with `TE300X_`, nested keys split on `__`
//!
//! # Example
//! ```no_run
//! use te300x_daq::config::AnalyserConfig;
//!
//! let config = AnalyserConfig::load()?;
//! config.validate()?;
//! println!("Port: {}", config.connection.port);
//! # Ok::<(), te300x_daq::error::AnalyserError>(())
//! ```

use crate::error::{AnalyserError, AppResult};
use crate::hardware::state::{DataFormat, Mode};
use crate::hardware::sweep::{AcquisitionMode, SweepLimits};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/te300x.toml";

/// Prefix of environment variable overrides.
pub const ENV_PREFIX: &str = "TE300X_";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AnalyserConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Serial link settings
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Configuration applied when a session connects
    #[serde(default)]
    pub sweep: SweepDefaults,
    /// Result file settings
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "TE300x DAQ".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

/// Serial link configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Serial port path (e.g., "/dev/ttyUSB0", "COM3")
    pub port: String,
    /// Line speed used to open the port
    pub baud_rate: u32,
    /// Overall response timeout in milliseconds
    pub timeout_ms: u64,
    /// Longest accepted response line
    pub max_line_len: usize,
    /// Largest bulk sweep block buffered
    pub max_sweep_bytes: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        let limits = SweepLimits::default();
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
            timeout_ms: 5000,
            max_line_len: limits.max_line_len,
            max_sweep_bytes: limits.max_sweep_bytes,
        }
    }
}

impl ConnectionConfig {
    /// Response timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Line and block size limits.
    pub fn limits(&self) -> SweepLimits {
        SweepLimits {
            max_line_len: self.max_line_len,
            max_sweep_bytes: self.max_sweep_bytes,
        }
    }
}

/// Default configuration sequence applied right after the port opens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepDefaults {
    /// Sweep start frequency in Hz
    pub fmin_hz: f64,
    /// Sweep stop frequency in Hz
    pub fmax_hz: f64,
    /// Number of sweep points
    pub points: u32,
    /// Averaging factor
    pub averaging: u32,
    /// Reference impedance in Ohm
    pub z0_ohm: f64,
    /// Output level in percent
    pub output_percent: f64,
    /// Output data format
    pub format: DataFormat,
    /// Measurement mode
    pub mode: Mode,
    /// How sweeps are read by default
    pub acquisition: AcquisitionMode,
}

impl Default for SweepDefaults {
    fn default() -> Self {
        Self {
            fmin_hz: 300e3,
            fmax_hz: 20e6,
            points: 500,
            averaging: 16,
            z0_ohm: 50.0,
            output_percent: 100.0,
            format: DataFormat::PolarImpedance,
            mode: Mode::Reflection,
            acquisition: AcquisitionMode::Bulk,
        }
    }
}

/// Result file configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory result files are written to
    pub result_dir: PathBuf,
    /// File name prefix, also names the counter file
    pub prefix: String,
    /// File name extension
    pub extension: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            result_dir: PathBuf::from("results"),
            prefix: "ZTE".to_string(),
            extension: "trc".to_string(),
        }
    }
}

impl StorageConfig {
    /// Next free result file in `result_dir`.
    pub fn next_result_path(&self) -> AppResult<PathBuf> {
        crate::data::filename::next_result_path(&self.result_dir, &self.prefix, &self.extension)
    }
}

impl AnalyserConfig {
    /// Load configuration from `config/te300x.toml` and environment variables
    ///
    /// Environment variables override the file, e.g.
    /// `TE300X_CONNECTION__PORT=/dev/ttyUSB1`.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path. A missing file is not an error.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Ok(Self::figment(path).extract()?)
    }

    /// The layered provider stack behind [`load_from`](Self::load_from).
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::from(Serialized::defaults(AnalyserConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Render as TOML, e.g. to write a starter configuration file.
    pub fn to_toml_string(&self) -> AppResult<String> {
        toml::to_string_pretty(self).map_err(|e| AnalyserError::Configuration(e.to_string()))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(AnalyserError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.to_lowercase().as_str()) {
            return Err(AnalyserError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        if self.connection.timeout_ms == 0 {
            return Err(AnalyserError::Configuration(
                "timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.connection.max_line_len == 0 || self.connection.max_sweep_bytes == 0 {
            return Err(AnalyserError::Configuration(
                "max_line_len and max_sweep_bytes must be greater than 0".to_string(),
            ));
        }
        if crate::hardware::state::BaudRate::try_from(self.connection.baud_rate).is_err() {
            return Err(AnalyserError::Configuration(format!(
                "Invalid baud_rate {}. Must be 9600 or 115200",
                self.connection.baud_rate
            )));
        }

        self.sweep.validate()
    }
}

impl SweepDefaults {
    /// Check the ranges the device accepts.
    pub fn validate(&self) -> AppResult<()> {
        if !(self.fmin_hz.is_finite() && self.fmax_hz.is_finite()) || self.fmin_hz <= 0.0 {
            return Err(AnalyserError::Configuration(format!(
                "Invalid frequency range {}..{} Hz",
                self.fmin_hz, self.fmax_hz
            )));
        }
        if self.fmin_hz >= self.fmax_hz {
            return Err(AnalyserError::Configuration(format!(
                "fmin_hz ({}) must be below fmax_hz ({})",
                self.fmin_hz, self.fmax_hz
            )));
        }
        if self.points == 0 {
            return Err(AnalyserError::Configuration(
                "points must be at least 1".to_string(),
            ));
        }
        if self.averaging == 0 {
            return Err(AnalyserError::Configuration(
                "averaging must be at least 1".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&self.output_percent) {
            return Err(AnalyserError::Configuration(format!(
                "Invalid output_percent {}. Must be 0-100",
                self.output_percent
            )));
        }
        if self.z0_ohm <= 0.0 {
            return Err(AnalyserError::Configuration(format!(
                "Invalid z0_ohm {}",
                self.z0_ohm
            )));
        }
        Ok(())
    }
}
