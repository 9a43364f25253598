use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::TrainingError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub hook: HookConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

impl RunConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, TrainingError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let mut config: RunConfig = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents)?,
            Some("toml") | Some("tml") | None => toml::from_str(&contents)?,
            Some(other) => {
                return Err(TrainingError::ConfigFormat(format!(
                    "unsupported configuration extension '{}'",
                    other
                )));
            }
        };

        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        config.apply_base_path(base_dir);
        config.validate()?;

        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, TrainingError> {
        Self::from_path(path)
    }

    pub fn validate(&self) -> Result<(), TrainingError> {
        let mut errors = self.hook.problems();

        if self.tracking.tensorboard_flush_every_n == 0 {
            errors.push("tracking.tensorboard_flush_every_n must be greater than 0".to_string());
        }

        for (label, path) in [
            ("tracking.jsonl", self.tracking.jsonl.as_ref()),
            ("tracking.tensorboard", self.tracking.tensorboard.as_ref()),
        ] {
            if let Some(path) = path {
                if path.as_os_str().is_empty() {
                    errors.push(format!("{label} must not be empty"));
                }
            }
        }

        if self.simulation.steps == 0 {
            errors.push("simulation.steps must be greater than 0".to_string());
        }

        if self.simulation.learning_rate <= 0.0 {
            errors.push("simulation.learning_rate must be greater than 0".to_string());
        }

        if !(self.simulation.initial_loss.is_finite() && self.simulation.initial_loss > 0.0) {
            errors.push("simulation.initial_loss must be a positive finite number".to_string());
        }

        if self.simulation.l2_weight < 0.0 {
            errors.push("simulation.l2_weight must be >= 0".to_string());
        }

        if !errors.is_empty() {
            return Err(TrainingError::validation(errors));
        }

        Ok(())
    }

    fn apply_base_path(&mut self, base: &Path) {
        self.tracking.apply_base_path(base);
    }
}

/// Construction parameters of the metrics logging hook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookConfig {
    pub global_batch_size: usize,
    #[serde(default = "default_log_every")]
    pub log_every: u64,
}

impl HookConfig {
    pub fn new(global_batch_size: usize) -> Self {
        Self {
            global_batch_size,
            log_every: default_log_every(),
        }
    }

    pub fn validate(&self) -> Result<(), TrainingError> {
        let errors = self.problems();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(TrainingError::validation(errors))
        }
    }

    fn problems(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.global_batch_size == 0 {
            errors.push("hook.global_batch_size must be greater than 0".to_string());
        }
        if self.log_every == 0 {
            errors.push("hook.log_every must be greater than 0".to_string());
        }
        errors
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    #[serde(default)]
    pub enable_stdout: bool,
    #[serde(default)]
    pub jsonl: Option<PathBuf>,
    #[serde(default)]
    pub tensorboard: Option<PathBuf>,
    #[serde(default = "default_tensorboard_flush_every_n")]
    pub tensorboard_flush_every_n: usize,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            enable_stdout: true,
            jsonl: None,
            tensorboard: None,
            tensorboard_flush_every_n: default_tensorboard_flush_every_n(),
        }
    }
}

impl TrackingConfig {
    fn apply_base_path(&mut self, base: &Path) {
        for path in [self.jsonl.as_mut(), self.tensorboard.as_mut()] {
            if let Some(path) = path {
                absolutize_in_place(path, base);
            }
        }
    }
}

/// Shape of the synthetic loop driven by the `simulate` binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_steps")]
    pub steps: u64,
    #[serde(default)]
    pub step_millis: u64,
    #[serde(default = "default_initial_loss")]
    pub initial_loss: f64,
    #[serde(default = "default_l2_weight")]
    pub l2_weight: f64,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default)]
    pub warmup_steps: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            steps: default_steps(),
            step_millis: 0,
            initial_loss: default_initial_loss(),
            l2_weight: default_l2_weight(),
            learning_rate: default_learning_rate(),
            warmup_steps: 0,
        }
    }
}

fn absolutize_in_place(path: &mut PathBuf, base: &Path) {
    if path.is_relative() {
        *path = base.join(&*path);
    }
}

pub const DEFAULT_LOG_EVERY: u64 = 10;

fn default_log_every() -> u64 {
    DEFAULT_LOG_EVERY
}

fn default_tensorboard_flush_every_n() -> usize {
    10
}

fn default_steps() -> u64 {
    100
}

fn default_initial_loss() -> f64 {
    6.9
}

fn default_l2_weight() -> f64 {
    1e-4
}

fn default_learning_rate() -> f64 {
    0.1
}
