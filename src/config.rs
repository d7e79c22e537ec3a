//! Configuration file format.
//!
//! Every section is optional; defaults reproduce the stock behaviour
//! (224 px input, 2 s sampling, 0.70 ambient threshold, rear 1280×720
//! camera first).

use crate::capture::{DeviceClass, ProfileTable, DEFAULT_READY_TIMEOUT};
use crate::inference::ModelSource;
use crate::pipeline::{ConfidenceGate, DEFAULT_INTERVAL};
use crate::session::LifecycleOptions;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("model input size must be positive")]
    InvalidInputSize,
    #[error("no labels configured and no labels file given")]
    NoLabels,
    #[error("sampling interval must be at least 1 ms")]
    InvalidInterval,
    #[error("confidence threshold {0} must be in [0.0, 1.0)")]
    InvalidThreshold(f32),
    #[error("camera ready timeout must be at least 1 ms")]
    InvalidReadyTimeout,
    #[error("invalid constraint ladder for device class {0:?}")]
    InvalidLadder(String),
    #[error("failed to read config file: {0}")]
    FileReadError(String),
    #[error("failed to parse config file: {0}")]
    ParseError(String),
}

/// Camera acquisition configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Selects the constraint-profile ladder.
    pub device_class: DeviceClass,
    /// Bound on the wait for stream metadata.
    pub ready_timeout_ms: u64,
    /// Per-class ladder overrides.
    pub profiles: ProfileTable,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_class: DeviceClass::default(),
            ready_timeout_ms: DEFAULT_READY_TIMEOUT.as_millis() as u64,
            profiles: ProfileTable::default(),
        }
    }
}

/// Live sampling configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub interval_ms: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_INTERVAL.as_millis() as u64,
        }
    }
}

/// Metrics exporter configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// HTTP port for `/metrics` (0 to disable).
    pub port: u16,
}

/// Full configuration file format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub model: ModelSource,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub sampling: SamplingConfig,
    #[serde(default)]
    pub gate: ConfidenceGate,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl FileConfig {
    /// Loads and validates configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileReadError(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Parses and validates configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: FileConfig =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.input_size == 0 {
            return Err(ConfigError::InvalidInputSize);
        }
        if self.model.labels.is_empty() && self.model.labels_path.is_none() {
            return Err(ConfigError::NoLabels);
        }
        if self.sampling.interval_ms == 0 {
            return Err(ConfigError::InvalidInterval);
        }
        let threshold = self.gate.threshold;
        if !(0.0..1.0).contains(&threshold) {
            return Err(ConfigError::InvalidThreshold(threshold));
        }
        if self.camera.ready_timeout_ms == 0 {
            return Err(ConfigError::InvalidReadyTimeout);
        }
        if let Some(class) = self.camera.profiles.first_invalid() {
            return Err(ConfigError::InvalidLadder(class.to_string()));
        }
        Ok(())
    }

    /// Builds lifecycle settings from this configuration.
    pub fn lifecycle_options(&self) -> LifecycleOptions {
        LifecycleOptions {
            device_class: self.camera.device_class,
            model: self.model.clone(),
            profiles: self.camera.profiles.clone(),
            ready_timeout: Duration::from_millis(self.camera.ready_timeout_ms),
            sampling_interval: Duration::from_millis(self.sampling.interval_ms),
            gate: self.gate,
        }
    }
}
