//! # Aperture Vision Engine
//!
//! Inference engine for the Aperture classification service: preprocessing,
//! a candle-based MobileNet-v3 classifier, top-K prediction, and a Grad-CAM
//! saliency explainer.
//!
//! ## Design
//!
//! - **Opaque classifier**: everything above the [`VisionModel`] trait treats
//!   the network as a scoring function; the only extra capability is the
//!   feature/head split that instruments one layer for the explainer.
//! - **Call-scoped capture**: Grad-CAM re-enters the graph through a fresh
//!   variable per invocation instead of mutating shared hook state, so
//!   prediction and explanation both run concurrently on one shared model.
//! - **Explicit failures**: invalid `k`, bad class overrides, and undecodable
//!   input surface as typed client errors; a missing gradient capture is a
//!   wiring defect and surfaces as an internal error.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use aperture_vision::{ModelConfig, VisionEngine};
//! use std::sync::Arc;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ModelConfig::from_env()?;
//!     let engine = aperture_vision::load_engine(&config)?;
//!     let img = image::open("cat.png")?;
//!     for p in engine.predict_topk(&img, config.default_topk)? {
//!         println!("{}: {:.3}", p.label, p.prob);
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs, rust_2018_idioms, clippy::all)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

pub mod config;
pub mod engine;
pub mod error;
pub mod gradcam;
pub mod labels;
pub mod mobilenetv3;
pub mod model;
pub mod preprocess;
pub mod testing;
pub mod weights;

pub use config::{ModelConfig, ModelVariant, DEFAULT_MODEL_ID};
pub use engine::{Prediction, VisionEngine};
pub use error::{ErrorResponse, VisionError, VisionResult};
pub use gradcam::{GradCam, Saliency, SaliencyMap};
pub use labels::Labels;
pub use mobilenetv3::MobileNetV3;
pub use model::VisionModel;
pub use preprocess::Preprocessor;

use candle_core::Device;
use std::sync::Arc;
use tracing::info;

/// Current version of the vision engine
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Load the configured classifier and its label table into a ready engine.
///
/// Weights and labels come from local overrides when configured, otherwise
/// from the Hugging Face hub. This is the startup path of the server binary;
/// tests use [`testing::test_engine`] instead.
pub fn load_engine(config: &ModelConfig) -> VisionResult<VisionEngine> {
    let device = Device::Cpu;

    let labels_path = weights::locate_labels(config)?;
    let labels = Labels::from_id2label_file(&labels_path)?;

    let weights_path = weights::locate_weights(config)?;
    let network_config = match config.variant {
        ModelVariant::Small => mobilenetv3::Config::small(),
        ModelVariant::Large => mobilenetv3::Config::large(),
    };
    let model = MobileNetV3::from_safetensors(
        &weights_path,
        &network_config,
        labels.len(),
        &device,
    )?;

    info!(
        model_id = %config.model_id,
        variant = %config.variant,
        classes = labels.len(),
        "classifier loaded"
    );

    VisionEngine::new(Arc::new(model), labels, Preprocessor::imagenet(), device)
}
