//! Grad-CAM saliency explainer
//!
//! Gradient-weighted class activation mapping over the classifier's
//! instrumented layer. Instead of registering hooks that mutate shared model
//! state, each invocation re-enters the computation graph through a fresh
//! [`Var`] wrapping the captured activation map: the backward pass then
//! reports the gradient at exactly that point, and both the capture and the
//! gradient store live only for the duration of the call. Concurrent
//! explanations on the same shared model are therefore safe without any
//! serialization.

use crate::error::{VisionError, VisionResult};
use crate::model::VisionModel;
use candle_core::{IndexOp, Tensor, Var};
use std::sync::Arc;
use tracing::{debug, warn};

/// Epsilon added to the normalization denominator so a uniformly-flat map
/// rescales to all-zero instead of dividing by zero.
const NORM_EPSILON: f32 = 1e-8;

/// Single-channel spatial importance map with every value in [0, 1]
#[derive(Debug, Clone)]
pub struct SaliencyMap {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl SaliencyMap {
    /// Build a map from row-major intensities.
    ///
    /// Values are clamped into [0, 1] so the unit-interval invariant holds
    /// regardless of the producer.
    ///
    /// # Panics
    ///
    /// Panics if `data.len() != width * height`.
    #[must_use]
    pub fn new(width: usize, height: usize, data: Vec<f32>) -> Self {
        assert_eq!(data.len(), width * height, "saliency map size mismatch");
        let data = data.into_iter().map(|v| v.clamp(0.0, 1.0)).collect();
        Self {
            width,
            height,
            data,
        }
    }

    /// Map width (the instrumented layer's spatial width, not the image's)
    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Map height
    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Row-major intensity values in [0, 1]
    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Intensity at (x, y)
    #[must_use]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }
}

/// A saliency map together with the class index it explains
#[derive(Debug, Clone)]
pub struct Saliency {
    /// Normalized importance map at the instrumented layer's resolution
    pub map: SaliencyMap,
    /// The class index that was explained (the model's own top prediction
    /// unless the caller overrode it)
    pub class_index: usize,
}

/// Grad-CAM explainer over a shared classifier
pub struct GradCam {
    model: Arc<dyn VisionModel>,
}

impl GradCam {
    /// Create an explainer for the given classifier
    #[must_use]
    pub fn new(model: Arc<dyn VisionModel>) -> Self {
        Self { model }
    }

    /// Explain one prediction.
    ///
    /// Runs a forward pass with gradient tracking from the instrumented
    /// layer, back-propagates the target class score, and combines the
    /// captured activations and gradients into a normalized saliency map.
    ///
    /// `target` selects the class to explain; `None` (the default) explains
    /// the model's own top prediction, so the map answers "why did you
    /// predict this" unless the caller asks about a specific class.
    pub fn explain(&self, input: &Tensor, target: Option<usize>) -> VisionResult<Saliency> {
        // Capture point: the activation map re-enters the graph as a leaf
        // variable, scoped to this call.
        let activations = self.model.forward_features(input)?;
        let capture = Var::from_tensor(&activations.detach())?;

        let logits = self.model.forward_head(capture.as_tensor())?;
        let scores = logits.i(0)?.to_vec1::<f32>()?;

        let class_index = match target {
            Some(index) if index < scores.len() => index,
            Some(index) => {
                return Err(VisionError::InvalidArgument(format!(
                    "class index {index} out of range for {} classes",
                    scores.len()
                )))
            }
            None => argmax(&scores),
        };

        // Backward from the single scalar logit of the target class. The
        // gradient store is dropped with this call; nothing leaks into the
        // next invocation.
        let score = logits.i((0, class_index))?;
        let grads = score.backward()?;
        let gradient = grads.get(&capture).ok_or(VisionError::CaptureMissing)?;

        // Grad-CAM weighting: one weight per channel, the spatial mean of
        // the gradient, then a weighted channel sum rectified to keep only
        // positive contributions toward the target class.
        let weights = gradient.mean_keepdim((2, 3))?;
        let cam = capture
            .as_tensor()
            .broadcast_mul(&weights)?
            .sum(1)?
            .relu()?
            .i(0)?;
        let rows = cam.to_vec2::<f32>()?;

        let map = normalize(rows);
        debug!(
            class_index,
            width = map.width,
            height = map.height,
            "computed saliency map"
        );

        Ok(Saliency { map, class_index })
    }
}

fn argmax(scores: &[f32]) -> usize {
    let mut best = 0;
    for (index, score) in scores.iter().enumerate() {
        if *score > scores[best] {
            best = index;
        }
    }
    best
}

// Min-max rescale into [0, 1]. A flat map (max == min) collapses to zero;
// the epsilon keeps the division defined in that case.
fn normalize(rows: Vec<Vec<f32>>) -> SaliencyMap {
    let height = rows.len();
    let width = rows.first().map_or(0, Vec::len);

    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for row in &rows {
        for &value in row {
            min = min.min(value);
            max = max.max(value);
        }
    }

    if max - min <= NORM_EPSILON {
        warn!("saliency map is flat; no region contributed to the target class");
    }

    let denom = max - min + NORM_EPSILON;
    let data = rows
        .into_iter()
        .flatten()
        .map(|value| ((value - min) / denom).clamp(0.0, 1.0))
        .collect();

    SaliencyMap {
        width,
        height,
        data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argmax_picks_first_of_ties() {
        assert_eq!(argmax(&[0.5, 0.5, 0.1]), 0);
        assert_eq!(argmax(&[0.1, 0.9, 0.9]), 1);
    }

    #[test]
    fn test_normalize_rescales_to_unit_interval() {
        let map = normalize(vec![vec![1.0, 3.0], vec![2.0, 5.0]]);
        assert_eq!(map.width(), 2);
        assert_eq!(map.height(), 2);
        assert!(map.data().iter().all(|v| (0.0..=1.0).contains(v)));
        assert!(map.get(0, 0) < 1e-6);
        assert!((map.get(1, 1) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_flat_map_is_all_zero() {
        let map = normalize(vec![vec![0.0; 4]; 4]);
        assert!(map.data().iter().all(|v| *v == 0.0));

        // Flat but nonzero maps collapse to zero too.
        let map = normalize(vec![vec![2.5; 3]; 3]);
        assert!(map.data().iter().all(|v| v.abs() < 1e-5));
    }
}
