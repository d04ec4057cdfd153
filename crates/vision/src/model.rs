//! Classifier abstraction
//!
//! The engine treats the network as an opaque scoring function with one extra
//! capability: its forward pass is split at an instrumented layer so the
//! Grad-CAM explainer can re-enter the graph at that point. The split is the
//! whole instrumentation contract: there are no hooks and no shared mutable
//! capture state on the model.

use candle_core::{Result, Tensor};

/// A convolutional classifier split at its instrumented layer.
///
/// `forward_features` runs the network up to and including the layer whose
/// activations the explainer reads (the final convolutional feature stage);
/// `forward_head` runs the rest, from an activation map to class logits.
/// Implementations hold read-only weights and are safe to share across
/// concurrent requests.
pub trait VisionModel: Send + Sync {
    /// Run the feature extractor, returning the activation map of the
    /// instrumented layer, shape (batch, channels, height', width').
    fn forward_features(&self, xs: &Tensor) -> Result<Tensor>;

    /// Run the classification head on an activation map, returning logits of
    /// shape (batch, num_classes).
    fn forward_head(&self, features: &Tensor) -> Result<Tensor>;

    /// Size of the label set this classifier scores over
    fn num_classes(&self) -> usize;

    /// Plain inference: features then head, no graph retention required.
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let features = self.forward_features(xs)?;
        self.forward_head(&features)
    }
}
