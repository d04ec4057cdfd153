//! # Aperture HTTP Service
//!
//! The HTTP layer over the Aperture vision engine: request routing, upload
//! handling, saliency overlay rendering, request metrics, and the browser UI.
//!
//! ## Endpoints
//!
//! - `POST /predict` - top-K classification, optional Grad-CAM overlay
//! - `GET /labels` - the full ordered label list
//! - `GET /health` - liveness indicator
//! - `GET /metrics` - request counter snapshot
//! - `GET /ui` - browser UI
//!
//! ## Usage
//!
//! ```rust,no_run
//! use aperture_server::{ApertureServer, ServerConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let model_config = aperture_vision::ModelConfig::from_env()?;
//!     let engine = Arc::new(aperture_vision::load_engine(&model_config)?);
//!     let server = ApertureServer::new(engine, ServerConfig::from_env()?, 5);
//!     server.start(async { tokio::signal::ctrl_c().await.ok(); }).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs, rust_2018_idioms, clippy::all)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

pub mod config;
pub mod metrics;
pub mod overlay;
pub mod server;

pub use config::ServerConfig;
pub use metrics::{MetricsCollector, MetricsSnapshot};
pub use overlay::render_overlay;
pub use server::ApertureServer;

/// Current version of the HTTP service
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
