//! YAML run configuration and logging setup.

use anyhow::{anyhow, bail, Context};
use ctalearn_core::{DevicePreference, LoggingConfig, ModelParams};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Optimiser and loop settings for the array-model trainer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub lr: f64,
    pub beta_1: f64,
    pub beta_2: f64,
    pub eps: f64,
    pub weight_decay: f64,
    pub batch_size: usize,
    pub max_epochs: usize,
    /// Epochs without validation-loss improvement before stopping.
    pub patience: usize,
    pub seed: u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            lr: 1e-3,
            beta_1: 0.9,
            beta_2: 0.999,
            eps: 1e-8,
            weight_decay: 1e-4,
            batch_size: 64,
            max_epochs: 50,
            patience: 10,
            seed: 42,
        }
    }
}

/// Top-level configuration file for `ctalearn-train train`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub model: ModelParams,
    #[serde(default)]
    pub training: TrainConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub device: DevicePreference,
}

/// Load a [`RunConfig`] from a YAML file at `path`.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the YAML is invalid.
pub fn load_config(path: &Path) -> anyhow::Result<RunConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: RunConfig =
        serde_yaml::from_str(&contents).context("Failed to parse config YAML")?;
    if config.training.batch_size == 0 {
        bail!("training.batch_size must be at least 1");
    }
    Ok(config)
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `config.level`.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .with_context(|| format!("Invalid log level '{}'", config.level))?,
    };
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = match config.format.as_str() {
        "json" => builder.json().try_init(),
        "text" => builder.try_init(),
        other => bail!("Unknown log format '{other}' (expected 'text' or 'json')"),
    };
    installed.map_err(|e| anyhow!("Failed to install tracing subscriber: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctalearn_core::ImageShape;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_yaml(yaml: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(yaml.as_bytes()).unwrap();
        f
    }

    #[test]
    fn test_load_config_minimal() {
        let yaml = r#"
model:
  image_shape: [16, 16, 1]
  num_telescopes: 3
  num_auxiliary_inputs: 2
  num_gamma_hadron_classes: 2
  cnn_block: alexnet
  telescope_combination: featuremap
  network_head: alexnet
"#;
        let f = write_yaml(yaml);
        let config = load_config(f.path()).unwrap();
        assert_eq!(config.model.image_shape, ImageShape::new(16, 16, 1));
        assert_eq!(config.training, TrainConfig::default());
        assert_eq!(config.logging, LoggingConfig::default());
        assert_eq!(config.device, DevicePreference::Auto);
    }

    #[test]
    fn test_load_config_overrides() {
        let yaml = r#"
model:
  image_shape: [8, 8, 2]
  num_telescopes: 4
  num_auxiliary_inputs: 3
  num_gamma_hadron_classes: 2
  cnn_block: sumpool
  telescope_combination: vector
  network_head: resnetfeaturevector
  dropout_rate: 0.25
training:
  lr: 0.0002
  batch_size: 16
  patience: 3
logging:
  level: debug
  format: json
device: cpu
"#;
        let f = write_yaml(yaml);
        let config = load_config(f.path()).unwrap();
        assert!((config.training.lr - 0.0002).abs() < 1e-12);
        assert_eq!(config.training.batch_size, 16);
        assert_eq!(config.training.patience, 3);
        assert_eq!(config.training.max_epochs, 50);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.device, DevicePreference::Cpu);
        assert!((config.model.dropout_rate - 0.25).abs() < f32::EPSILON);
    }

    #[test]
    fn test_shipped_configs_parse() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs");
        for name in ["array_featuremap.yaml", "array_vector.yaml"] {
            let config = load_config(&dir.join(name)).unwrap();
            config.model.validate().unwrap();
            config.model.combination().unwrap();
        }
    }

    #[test]
    fn test_load_config_missing_file() {
        assert!(load_config(Path::new("/nonexistent/run.yaml")).is_err());
    }

    #[test]
    fn test_load_config_rejects_zero_batch() {
        let yaml = r#"
model:
  image_shape: [8, 8, 1]
  num_telescopes: 1
  num_auxiliary_inputs: 2
  num_gamma_hadron_classes: 2
  cnn_block: alexnet
  telescope_combination: featuremap
  network_head: alexnet
training:
  batch_size: 0
"#;
        let f = write_yaml(yaml);
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn test_unknown_log_format_is_rejected() {
        let config = LoggingConfig {
            level: "info".to_string(),
            format: "xml".to_string(),
        };
        assert!(init_logging(&config).is_err());
    }
}
