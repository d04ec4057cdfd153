//! Weight and label acquisition
//!
//! Resolves the classifier's safetensors weights and the label table either
//! from local files (configuration override) or from the Hugging Face hub.
//! Downloads happen once at startup; the hub client caches on disk.

use crate::config::{ModelConfig, LABEL_DATASET_ID, LABEL_FILE};
use crate::error::{VisionError, VisionResult};
use hf_hub::api::sync::Api;
use std::path::PathBuf;
use tracing::info;

/// Resolve the safetensors weights file for the configured model.
pub fn locate_weights(config: &ModelConfig) -> VisionResult<PathBuf> {
    if let Some(path) = &config.weights_file {
        info!(path = %path.display(), "using local weights file");
        return Ok(path.clone());
    }

    info!(model_id = %config.model_id, "fetching weights from the hub");
    let api = Api::new().map_err(|e| VisionError::ModelLoad(format!("hub api: {e}")))?;
    let path = api
        .model(config.model_id.clone())
        .get("model.safetensors")
        .map_err(|e| {
            VisionError::ModelLoad(format!("cannot fetch weights for {}: {e}", config.model_id))
        })?;
    Ok(path)
}

/// Resolve the `id2label` JSON file naming the classifier's label set.
pub fn locate_labels(config: &ModelConfig) -> VisionResult<PathBuf> {
    if let Some(path) = &config.labels_file {
        info!(path = %path.display(), "using local label file");
        return Ok(path.clone());
    }

    info!(dataset = LABEL_DATASET_ID, "fetching label table from the hub");
    let api = Api::new().map_err(|e| VisionError::ModelLoad(format!("hub api: {e}")))?;
    let path = api
        .dataset(LABEL_DATASET_ID.to_string())
        .get(LABEL_FILE)
        .map_err(|e| VisionError::ModelLoad(format!("cannot fetch label table: {e}")))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_override_wins() {
        let config = ModelConfig {
            weights_file: Some(PathBuf::from("/tmp/weights.safetensors")),
            labels_file: Some(PathBuf::from("/tmp/labels.json")),
            ..Default::default()
        };

        assert_eq!(
            locate_weights(&config).unwrap(),
            PathBuf::from("/tmp/weights.safetensors")
        );
        assert_eq!(
            locate_labels(&config).unwrap(),
            PathBuf::from("/tmp/labels.json")
        );
    }
}
