//! Deterministic test fixtures
//!
//! A tiny, fixed-weight classifier so engine and server tests run in
//! milliseconds without downloading anything. The network is real enough for
//! the full pipeline: its feature stage is spatial (so Grad-CAM has a map to
//! read) and its head is differentiable back to that stage.

use crate::engine::VisionEngine;
use crate::error::VisionResult;
use crate::labels::Labels;
use crate::model::VisionModel;
use crate::preprocess::Preprocessor;
use candle_core::{Device, Result, Tensor};
use std::sync::Arc;

/// Class count of the test classifier
pub const TEST_CLASSES: usize = 10;

/// Spatial pooling factor of the test feature stage (224 / 16 = 14)
const POOL: usize = 16;

/// Fixed-weight toy classifier.
///
/// Features: 16x16 average pooling of the normalized input, keeping the
/// three color channels as feature channels at 14x14 resolution.
/// Head: global average pool followed by a fixed 3 x [`TEST_CLASSES`]
/// projection. Every weight is a deterministic function of its position.
pub struct TestNet {
    projection: Tensor,
}

impl TestNet {
    /// Build the fixed-weight network on a device
    pub fn new(device: &Device) -> Result<Self> {
        // Positive, distinct weights per (channel, class) pair so class
        // scores differ and gradients toward any class are nonzero.
        let projection = Tensor::arange(1f32, (3 * TEST_CLASSES + 1) as f32, device)?
            .reshape((3, TEST_CLASSES))?;
        let projection = (projection / (3 * TEST_CLASSES) as f64)?;
        Ok(Self { projection })
    }
}

impl VisionModel for TestNet {
    fn forward_features(&self, xs: &Tensor) -> Result<Tensor> {
        xs.avg_pool2d(POOL)
    }

    fn forward_head(&self, features: &Tensor) -> Result<Tensor> {
        let pooled = features.mean(3)?.mean(2)?;
        pooled.matmul(&self.projection)
    }

    fn num_classes(&self) -> usize {
        TEST_CLASSES
    }
}

/// Label table matching [`TestNet`]
#[must_use]
pub fn test_labels() -> Labels {
    Labels::from_names((0..TEST_CLASSES).map(|i| format!("class-{i}")).collect())
}

/// A fully wired engine around [`TestNet`]
pub fn test_engine() -> VisionResult<VisionEngine> {
    let device = Device::Cpu;
    let model = Arc::new(TestNet::new(&device)?);
    VisionEngine::new(model, test_labels(), Preprocessor::imagenet(), device)
}
