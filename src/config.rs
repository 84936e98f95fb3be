//! Engine configuration management via TOML files.
//!
//! This module provides configuration parsing from TOML format with sensible defaults.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use toml::Value;

/// How classifier retraining is scheduled once the trigger fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetrainMode {
    /// Retrain on the calling thread before the event returns.
    Inline,
    /// Retrain on a worker thread and swap the model in on completion.
    Background,
}

impl Default for RetrainMode {
    fn default() -> Self {
        RetrainMode::Background
    }
}

/// Engine configuration loaded from a TOML file.
///
/// # Examples
///
/// ```
/// use neuroadapt_core::EngineConfig;
///
/// let config = EngineConfig::load_from_file("config/engine.toml")
///     .unwrap_or_else(|_| EngineConfig::default());
///
/// println!("Arms: {}, trait features: {}", config.n_arms, config.trait_dims);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of content variants the bandit chooses between
    pub n_arms: usize,
    /// Number of learner trait features supplied with each event
    pub trait_dims: usize,
    /// Random seed for deterministic sampling and initialization
    pub seed: u64,
    /// Whether insight and retrain records are appended under `logs/`
    pub log_insights: bool,
    /// Plasticity scoring parameters
    pub plasticity: PlasticityConfig,
    /// Controller gains and accumulator bounds
    pub controller: ControllerConfig,
    /// Classifier and retraining parameters
    pub learner: LearnerConfig,
}

impl EngineConfig {
    /// Context dimensionality after plasticity augmentation.
    ///
    /// The bandit and the classifier both operate on the trait features
    /// extended with the plasticity score and the three band powers.
    pub fn augmented_dims(&self) -> usize {
        self.trait_dims + 4
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(&path)?;
        Self::from_str(&contents)
    }

    pub fn from_str(toml_str: &str) -> Result<Self, ConfigError> {
        let value: Value =
            toml::from_str(toml_str).map_err(|err| ConfigError::Parse(err.to_string()))?;
        let table = value
            .get("engine")
            .and_then(|v| v.as_table())
            .cloned()
            .unwrap_or_default();

        let n_arms = table
            .get("n_arms")
            .and_then(|v| v.as_integer())
            .map(|v| v.max(2) as usize)
            .unwrap_or(4)
            .min(64);

        let trait_dims = table
            .get("trait_dims")
            .and_then(|v| v.as_integer())
            .map(|v| v.max(1) as usize)
            .unwrap_or(8)
            .min(256);

        let seed = table
            .get("seed")
            .and_then(|v| v.as_integer())
            .map(|v| v as u64)
            .unwrap_or(42);

        let log_insights = table
            .get("log_insights")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        Ok(Self {
            n_arms,
            trait_dims,
            seed,
            log_insights,
            plasticity: PlasticityConfig::from_str(toml_str)?,
            controller: ControllerConfig::from_str(toml_str)?,
            learner: LearnerConfig::from_str(toml_str)?,
        })
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            n_arms: 4,
            trait_dims: 8,
            seed: 42,
            log_insights: false,
            plasticity: PlasticityConfig::default(),
            controller: ControllerConfig::default(),
            learner: LearnerConfig::default(),
        }
    }
}

/// Plasticity scorer parameters parsed from the `[plasticity]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlasticityConfig {
    /// Maximum retained score history length
    pub history_capacity: usize,
}

impl PlasticityConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(&path)?;
        Self::from_str(&contents)
    }

    pub fn from_str(toml_str: &str) -> Result<Self, ConfigError> {
        let value: Value =
            toml::from_str(toml_str).map_err(|err| ConfigError::Parse(err.to_string()))?;
        let table = value
            .get("plasticity")
            .and_then(|v| v.as_table())
            .cloned()
            .unwrap_or_default();

        let history_capacity = table
            .get("history_capacity")
            .and_then(|v| v.as_integer())
            .map(|v| v.max(10) as usize)
            .unwrap_or(100)
            .min(10_000);

        Ok(Self { history_capacity })
    }
}

impl Default for PlasticityConfig {
    fn default() -> Self {
        Self {
            history_capacity: 100,
        }
    }
}

/// Controller parameters parsed from the `[controller]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Proportional base gain
    pub kp: f32,
    /// Integral base gain
    pub ki: f32,
    /// Derivative base gain
    pub kd: f32,
    /// Symmetric bound on the accumulated integral error
    pub integral_clamp: f32,
    /// Maximum retained error history length
    pub history_capacity: usize,
}

impl ControllerConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(&path)?;
        Self::from_str(&contents)
    }

    pub fn from_str(toml_str: &str) -> Result<Self, ConfigError> {
        let value: Value =
            toml::from_str(toml_str).map_err(|err| ConfigError::Parse(err.to_string()))?;
        let table = value
            .get("controller")
            .and_then(|v| v.as_table())
            .cloned()
            .unwrap_or_default();

        let kp = table
            .get("kp")
            .and_then(|v| v.as_float())
            .map(|v| (v as f32).clamp(0.0, 10.0))
            .unwrap_or(1.0);

        let ki = table
            .get("ki")
            .and_then(|v| v.as_float())
            .map(|v| (v as f32).clamp(0.0, 10.0))
            .unwrap_or(0.1);

        let kd = table
            .get("kd")
            .and_then(|v| v.as_float())
            .map(|v| (v as f32).clamp(0.0, 10.0))
            .unwrap_or(0.05);

        let integral_clamp = table
            .get("integral_clamp")
            .and_then(|v| v.as_float())
            .map(|v| (v as f32).max(0.1))
            .unwrap_or(10.0);

        let history_capacity = table
            .get("history_capacity")
            .and_then(|v| v.as_integer())
            .map(|v| v.max(10) as usize)
            .unwrap_or(100)
            .min(10_000);

        Ok(Self {
            kp,
            ki,
            kd,
            integral_clamp,
            history_capacity,
        })
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            kp: 1.0,
            ki: 0.1,
            kd: 0.05,
            integral_clamp: 10.0,
            history_capacity: 100,
        }
    }
}

/// Classifier and retraining parameters parsed from the `[learner]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnerConfig {
    /// Whether the retention classifier path runs at all
    pub enabled: bool,
    /// Hidden layer width
    pub hidden_size: usize,
    /// Training epochs per retrain
    pub epochs: usize,
    /// Examples per gradient step
    pub batch_size: usize,
    /// Initial learning rate
    pub learning_rate: f32,
    /// Multiplicative learning rate decay per epoch
    pub lr_decay: f32,
    /// Examples that must accumulate before the first retrain
    pub min_buffer: u64,
    /// Retrain every this many accumulated examples once past `min_buffer`
    pub retrain_interval: u64,
    /// Most recent examples handed to each retrain
    pub retrain_window: usize,
    /// Maximum examples retained in the buffer
    pub buffer_capacity: usize,
    /// Inline or background retraining
    pub retrain_mode: RetrainMode,
}

impl LearnerConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(&path)?;
        Self::from_str(&contents)
    }

    pub fn from_str(toml_str: &str) -> Result<Self, ConfigError> {
        let value: Value =
            toml::from_str(toml_str).map_err(|err| ConfigError::Parse(err.to_string()))?;
        let table = value
            .get("learner")
            .and_then(|v| v.as_table())
            .cloned()
            .unwrap_or_default();

        let enabled = table
            .get("enabled")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);

        let hidden_size = table
            .get("hidden_size")
            .and_then(|v| v.as_integer())
            .map(|v| v.max(2) as usize)
            .unwrap_or(16)
            .min(1024);

        let epochs = table
            .get("epochs")
            .and_then(|v| v.as_integer())
            .map(|v| v.max(1) as usize)
            .unwrap_or(30)
            .min(1000);

        let batch_size = table
            .get("batch_size")
            .and_then(|v| v.as_integer())
            .map(|v| v.max(1) as usize)
            .unwrap_or(16)
            .min(1024);

        let learning_rate = table
            .get("learning_rate")
            .and_then(|v| v.as_float())
            .map(|v| (v as f32).clamp(1e-5, 1.0))
            .unwrap_or(0.05);

        let lr_decay = table
            .get("lr_decay")
            .and_then(|v| v.as_float())
            .map(|v| (v as f32).clamp(0.1, 1.0))
            .unwrap_or(0.95);

        let min_buffer = table
            .get("min_buffer")
            .and_then(|v| v.as_integer())
            .map(|v| v.max(1) as u64)
            .unwrap_or(50);

        let retrain_interval = table
            .get("retrain_interval")
            .and_then(|v| v.as_integer())
            .map(|v| v.max(1) as u64)
            .unwrap_or(25);

        let retrain_window = table
            .get("retrain_window")
            .and_then(|v| v.as_integer())
            .map(|v| v.max(10) as usize)
            .unwrap_or(200)
            .min(100_000);

        let buffer_capacity = table
            .get("buffer_capacity")
            .and_then(|v| v.as_integer())
            .map(|v| v.max(10) as usize)
            .unwrap_or(1000)
            .min(1_000_000);

        let retrain_mode = table
            .get("retrain_mode")
            .and_then(|v| v.as_str())
            .map(|name| match name {
                "inline" => RetrainMode::Inline,
                _ => RetrainMode::Background,
            })
            .unwrap_or_default();

        Ok(Self {
            enabled,
            hidden_size,
            epochs,
            batch_size,
            learning_rate,
            lr_decay,
            min_buffer,
            retrain_interval,
            retrain_window,
            buffer_capacity,
            retrain_mode,
        })
    }
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hidden_size: 16,
            epochs: 30,
            batch_size: 16,
            learning_rate: 0.05,
            lr_decay: 0.95,
            min_buffer: 50,
            retrain_interval: 25,
            retrain_window: 200,
            buffer_capacity: 1000,
            retrain_mode: RetrainMode::Background,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "IO error: {}", err),
            ConfigError::Parse(err) => write!(f, "Parse error: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        ConfigError::Io(value)
    }
}
