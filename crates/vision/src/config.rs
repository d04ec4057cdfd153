//! Configuration for the Aperture vision engine

use crate::error::{VisionError, VisionResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use validator::Validate;

/// Default Hugging Face model repository for the classifier weights
pub const DEFAULT_MODEL_ID: &str = "timm/mobilenetv3_small_100.lamb_in1k";

/// Hugging Face dataset repository carrying the ImageNet-1k label table
pub const LABEL_DATASET_ID: &str = "huggingface/label-files";

/// Label file within [`LABEL_DATASET_ID`]
pub const LABEL_FILE: &str = "imagenet-1k-id2label.json";

/// Classifier variant selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelVariant {
    /// MobileNetV3-small (the reference configuration)
    Small,
    /// MobileNetV3-large
    Large,
}

impl std::str::FromStr for ModelVariant {
    type Err = VisionError;

    fn from_str(s: &str) -> VisionResult<Self> {
        match s.to_lowercase().as_str() {
            "small" => Ok(Self::Small),
            "large" => Ok(Self::Large),
            other => Err(VisionError::Configuration(format!(
                "unknown model variant '{other}' (expected 'small' or 'large')"
            ))),
        }
    }
}

impl std::fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Small => write!(f, "small"),
            Self::Large => write!(f, "large"),
        }
    }
}

/// Configuration for model loading and prediction defaults
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ModelConfig {
    /// Hugging Face repository to fetch safetensors weights from
    #[validate(length(min = 1, message = "Model id cannot be empty"))]
    pub model_id: String,

    /// Classifier variant
    pub variant: ModelVariant,

    /// Local safetensors file overriding the hub download
    pub weights_file: Option<PathBuf>,

    /// Local label file (id2label JSON) overriding the hub download
    pub labels_file: Option<PathBuf>,

    /// Number of predictions returned when the caller does not ask for more
    #[validate(range(min = 1, max = 1000, message = "Default top-k must be between 1 and 1000"))]
    pub default_topk: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_string(),
            variant: ModelVariant::Small,
            weights_file: None,
            labels_file: None,
            default_topk: 5,
        }
    }
}

impl ModelConfig {
    /// Load configuration from `APERTURE_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> VisionResult<Self> {
        let mut config = Self::default();

        if let Ok(model_id) = env::var("APERTURE_MODEL_ID") {
            config.model_id = model_id;
        }
        if let Ok(variant) = env::var("APERTURE_MODEL_VARIANT") {
            config.variant = variant.parse()?;
        }
        if let Ok(path) = env::var("APERTURE_WEIGHTS_FILE") {
            config.weights_file = Some(PathBuf::from(path));
        }
        if let Ok(path) = env::var("APERTURE_LABELS_FILE") {
            config.labels_file = Some(PathBuf::from(path));
        }
        if let Ok(topk) = env::var("APERTURE_DEFAULT_TOPK") {
            config.default_topk = topk.parse().map_err(|_| {
                VisionError::Configuration(format!("invalid APERTURE_DEFAULT_TOPK '{topk}'"))
            })?;
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ModelConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.model_id, DEFAULT_MODEL_ID);
        assert_eq!(config.variant, ModelVariant::Small);
        assert_eq!(config.default_topk, 5);
    }

    #[test]
    fn test_topk_out_of_range_rejected() {
        let config = ModelConfig {
            default_topk: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ModelConfig {
            default_topk: 1001,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_variant_parsing() {
        assert_eq!("small".parse::<ModelVariant>().unwrap(), ModelVariant::Small);
        assert_eq!("Large".parse::<ModelVariant>().unwrap(), ModelVariant::Large);
        assert!("tiny".parse::<ModelVariant>().is_err());
    }
}
