//! Core types, configuration, and errors for ctalearn
//!
//! This crate holds the pieces shared by the model and training crates: the
//! declarative model configuration, logging and device preferences, and the
//! error taxonomy every fallible operation in the workspace reports through.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Image geometry
// ---------------------------------------------------------------------------

/// Static per-telescope image dimensions: `(width, height, channel depth)`.
///
/// Serialized as a three-element sequence, e.g. `image_shape: [32, 32, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[usize; 3]", into = "[usize; 3]")]
pub struct ImageShape {
    /// Image width in pixels.
    pub width: usize,
    /// Image height in pixels.
    pub height: usize,
    /// Number of channels per pixel.
    pub depth: usize,
}

impl ImageShape {
    /// Create a new image shape.
    pub const fn new(width: usize, height: usize, depth: usize) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    /// Number of scalar values in one image.
    #[must_use]
    pub fn elem_count(&self) -> usize {
        self.width * self.height * self.depth
    }

    /// The shape as `[width, height, depth]`.
    #[must_use]
    pub fn dims(&self) -> [usize; 3] {
        [self.width, self.height, self.depth]
    }
}

impl From<[usize; 3]> for ImageShape {
    fn from([width, height, depth]: [usize; 3]) -> Self {
        Self::new(width, height, depth)
    }
}

impl From<ImageShape> for [usize; 3] {
    fn from(shape: ImageShape) -> Self {
        shape.dims()
    }
}

impl fmt::Display for ImageShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.depth)
    }
}

// ---------------------------------------------------------------------------
// Telescope combination
// ---------------------------------------------------------------------------

/// How per-telescope features are fused into one array-level tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TelescopeCombination {
    /// Flatten each telescope's features and concatenate along the feature axis.
    Vector,
    /// Stack spatial feature maps along the channel axis.
    FeatureMap,
}

impl TelescopeCombination {
    /// Configuration spelling of this strategy.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vector => "vector",
            Self::FeatureMap => "featuremap",
        }
    }
}

impl fmt::Display for TelescopeCombination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TelescopeCombination {
    type Err = CtaLearnError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "vector" => Ok(Self::Vector),
            "featuremap" | "feature_map" => Ok(Self::FeatureMap),
            other => Err(CtaLearnError::Config(format!(
                "unknown telescope_combination '{other}' (expected 'vector' or 'featuremap')"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Model configuration
// ---------------------------------------------------------------------------

/// Declarative configuration of the variable-input array model.
///
/// Component names stay plain strings so that an unknown value surfaces as a
/// [`CtaLearnError::Config`] from the model constructor rather than as a
/// deserialization failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    /// Per-telescope image dimensions.
    pub image_shape: ImageShape,
    /// Number of telescope slots in every event.
    pub num_telescopes: usize,
    /// Width of the static per-telescope metadata vector (e.g. x, y).
    pub num_auxiliary_inputs: usize,
    /// Number of output classes.
    pub num_gamma_hadron_classes: usize,
    /// Registered name of the shared per-telescope extractor.
    pub cnn_block: String,
    /// `vector` or `featuremap`.
    pub telescope_combination: String,
    /// Registered name of the array-level head.
    pub network_head: String,
    /// Dropout probability used by heads that carry a dropout layer.
    #[serde(default = "default_dropout_rate")]
    pub dropout_rate: f32,
}

fn default_dropout_rate() -> f32 {
    0.5
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            image_shape: ImageShape::new(32, 32, 1),
            num_telescopes: 4,
            num_auxiliary_inputs: 2,
            num_gamma_hadron_classes: 2,
            cnn_block: "alexnet".to_string(),
            telescope_combination: "featuremap".to_string(),
            network_head: "alexnet".to_string(),
            dropout_rate: default_dropout_rate(),
        }
    }
}

impl ModelParams {
    /// Check the numeric options for values no model can be built from.
    ///
    /// # Errors
    ///
    /// Returns [`CtaLearnError::Config`] on zero telescopes, a zero image
    /// dimension, fewer than two classes, or a dropout rate outside `[0, 1)`.
    pub fn validate(&self) -> Result<()> {
        if self.num_telescopes == 0 {
            return Err(CtaLearnError::Config(
                "num_telescopes must be at least 1".to_string(),
            ));
        }
        if self.image_shape.elem_count() == 0 {
            return Err(CtaLearnError::Config(format!(
                "image_shape must have non-zero dimensions, got {}",
                self.image_shape
            )));
        }
        if self.num_gamma_hadron_classes < 2 {
            return Err(CtaLearnError::Config(format!(
                "num_gamma_hadron_classes must be at least 2, got {}",
                self.num_gamma_hadron_classes
            )));
        }
        if !(0.0..1.0).contains(&self.dropout_rate) {
            return Err(CtaLearnError::Config(format!(
                "dropout_rate must be in [0, 1), got {}",
                self.dropout_rate
            )));
        }
        Ok(())
    }

    /// Parse the configured fusion strategy.
    ///
    /// # Errors
    ///
    /// Returns [`CtaLearnError::Config`] for an unrecognised value.
    pub fn combination(&self) -> Result<TelescopeCombination> {
        self.telescope_combination.parse()
    }
}

// ---------------------------------------------------------------------------
// Device & logging configuration
// ---------------------------------------------------------------------------

/// Compute device preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    /// CUDA, then Metal, then CPU, depending on what was compiled in.
    #[default]
    Auto,
    /// Always run on the CPU.
    Cpu,
    /// CUDA device 0.
    Cuda,
    /// Metal device 0.
    Metal,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format: `text` (human-readable) or `json` (structured).
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Core error types.
#[derive(thiserror::Error, Debug)]
pub enum CtaLearnError {
    /// Unknown component name, incompatible component combination, or an
    /// invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Input or intermediate tensor does not have the declared static shape.
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Correctly shaped input carrying invalid values.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Failure reported by the tensor engine.
    #[error("Model error: {0}")]
    Model(String),

    /// Filesystem error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization / deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias for `std::result::Result<T, CtaLearnError>`.
pub type Result<T> = std::result::Result<T, CtaLearnError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_shape_roundtrips_as_sequence() {
        let shape: ImageShape = serde_json::from_str("[32, 16, 3]").unwrap();
        assert_eq!(shape, ImageShape::new(32, 16, 3));
        assert_eq!(shape.elem_count(), 32 * 16 * 3);
        assert_eq!(serde_json::to_string(&shape).unwrap(), "[32,16,3]");
        assert_eq!(shape.to_string(), "32x16x3");
    }

    #[test]
    fn test_combination_parsing() {
        assert_eq!(
            "vector".parse::<TelescopeCombination>().unwrap(),
            TelescopeCombination::Vector
        );
        assert_eq!(
            "FeatureMap".parse::<TelescopeCombination>().unwrap(),
            TelescopeCombination::FeatureMap
        );
        assert_eq!(
            "feature_map".parse::<TelescopeCombination>().unwrap(),
            TelescopeCombination::FeatureMap
        );
    }

    #[test]
    fn test_unknown_combination_is_config_error() {
        let err = "stacked".parse::<TelescopeCombination>().unwrap_err();
        assert!(matches!(err, CtaLearnError::Config(_)));
        assert!(err.to_string().contains("stacked"));
    }

    #[test]
    fn test_model_params_from_yaml() {
        let yaml = r#"
image_shape: [32, 32, 1]
num_telescopes: 3
num_auxiliary_inputs: 2
num_gamma_hadron_classes: 2
cnn_block: resnet
telescope_combination: vector
network_head: resnetfeaturevector
"#;
        let params: ModelParams = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(params.image_shape, ImageShape::new(32, 32, 1));
        assert_eq!(params.num_telescopes, 3);
        assert_eq!(params.cnn_block, "resnet");
        assert!((params.dropout_rate - 0.5).abs() < f32::EPSILON);
        assert_eq!(params.combination().unwrap(), TelescopeCombination::Vector);
        params.validate().unwrap();
    }

    #[test]
    fn test_unknown_component_names_still_deserialize() {
        let yaml = r#"
image_shape: [8, 8, 1]
num_telescopes: 1
num_auxiliary_inputs: 0
num_gamma_hadron_classes: 2
cnn_block: vgg
telescope_combination: bogus
network_head: transformer
"#;
        let params: ModelParams = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            params.combination(),
            Err(CtaLearnError::Config(_))
        ));
    }

    #[test]
    fn test_validate_rejects_degenerate_values() {
        let mut params = ModelParams {
            num_telescopes: 0,
            ..ModelParams::default()
        };
        assert!(matches!(params.validate(), Err(CtaLearnError::Config(_))));

        params.num_telescopes = 2;
        params.image_shape = ImageShape::new(32, 0, 1);
        assert!(matches!(params.validate(), Err(CtaLearnError::Config(_))));

        params.image_shape = ImageShape::new(32, 32, 1);
        params.num_gamma_hadron_classes = 1;
        assert!(matches!(params.validate(), Err(CtaLearnError::Config(_))));

        params.num_gamma_hadron_classes = 2;
        params.dropout_rate = 1.0;
        assert!(matches!(params.validate(), Err(CtaLearnError::Config(_))));

        params.dropout_rate = 0.0;
        params.validate().unwrap();
    }

    #[test]
    fn test_default_params_are_valid() {
        ModelParams::default().validate().unwrap();
    }

    #[test]
    fn test_device_preference_serde() {
        let pref: DevicePreference = serde_json::from_str("\"metal\"").unwrap();
        assert_eq!(pref, DevicePreference::Metal);
        assert_eq!(DevicePreference::default(), DevicePreference::Auto);
    }

    #[test]
    fn test_logging_config_defaults() {
        let cfg: LoggingConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, LoggingConfig::default());
        assert_eq!(cfg.level, "info");
        assert_eq!(cfg.format, "text");
    }
}
