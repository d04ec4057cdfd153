//! Vision engine: preprocessing, top-K prediction, and explanation
//!
//! One engine instance is built at startup and shared across all requests.
//! Model weights are read-only, Grad-CAM capture state is call-scoped, so
//! every operation here may run concurrently without coordination.

use crate::error::{VisionError, VisionResult};
use crate::gradcam::{GradCam, Saliency};
use crate::labels::Labels;
use crate::model::VisionModel;
use crate::preprocess::Preprocessor;
use candle_core::{Device, IndexOp, D};
use candle_nn::ops::softmax;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};

/// A single classification result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    /// Human-readable class label
    pub label: String,
    /// Softmax probability in [0, 1]
    pub prob: f32,
}

/// Shared inference engine over a loaded classifier
pub struct VisionEngine {
    model: Arc<dyn VisionModel>,
    explainer: GradCam,
    labels: Labels,
    preprocessor: Preprocessor,
    device: Device,
}

impl VisionEngine {
    /// Build an engine from a loaded model and its label table.
    ///
    /// Fails if the label table does not cover the model's class count,
    /// since a mismatched table would mislabel every prediction.
    pub fn new(
        model: Arc<dyn VisionModel>,
        labels: Labels,
        preprocessor: Preprocessor,
        device: Device,
    ) -> VisionResult<Self> {
        if labels.len() != model.num_classes() {
            return Err(VisionError::ModelLoad(format!(
                "label table has {} entries but the model scores {} classes",
                labels.len(),
                model.num_classes()
            )));
        }
        let explainer = GradCam::new(Arc::clone(&model));
        Ok(Self {
            model,
            explainer,
            labels,
            preprocessor,
            device,
        })
    }

    /// The label table fixed at load time
    #[must_use]
    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    /// Number of classes the classifier scores over
    #[must_use]
    pub fn num_classes(&self) -> usize {
        self.model.num_classes()
    }

    /// Classify an image and return the `k` most probable labels, sorted by
    /// probability descending. Ties keep their computation order.
    ///
    /// `k` must be between 1 and the label-set size; anything else fails
    /// explicitly rather than clamping or truncating.
    #[instrument(skip(self, img))]
    pub fn predict_topk(&self, img: &DynamicImage, k: usize) -> VisionResult<Vec<Prediction>> {
        if k == 0 {
            return Err(VisionError::InvalidArgument(
                "k must be at least 1".to_string(),
            ));
        }
        if k > self.labels.len() {
            return Err(VisionError::InvalidArgument(format!(
                "k={k} exceeds the label-set size of {}",
                self.labels.len()
            )));
        }

        let input = self.preprocessor.tensor_from_image(img, &self.device)?;
        let logits = self.model.forward(&input)?;
        let probs = softmax(&logits, D::Minus1)?.i(0)?.to_vec1::<f32>()?;

        let mut indexed: Vec<(usize, f32)> = probs.into_iter().enumerate().collect();
        indexed.sort_by(|(_, a), (_, b)| b.total_cmp(a));

        let predictions = indexed
            .into_iter()
            .take(k)
            .map(|(index, prob)| Prediction {
                label: self
                    .labels
                    .get(index)
                    .unwrap_or_default()
                    .to_string(),
                prob,
            })
            .collect();

        debug!(k, "prediction complete");
        Ok(predictions)
    }

    /// Compute a Grad-CAM saliency map for an image.
    ///
    /// With `target == None` the map explains the model's own top
    /// prediction; an explicit target out of label range fails with
    /// [`VisionError::InvalidArgument`].
    #[instrument(skip(self, img))]
    pub fn explain(&self, img: &DynamicImage, target: Option<usize>) -> VisionResult<Saliency> {
        let input = self.preprocessor.tensor_from_image(img, &self.device)?;
        self.explainer.explain(&input, target)
    }
}
