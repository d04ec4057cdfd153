//! # Aperture - Main Entry Point
//!
//! Image classification service with Grad-CAM saliency explanations.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default configuration (downloads MobileNetV3-small weights
//! # from the Hugging Face hub on first start)
//! cargo run --release
//!
//! # Run against local weights on a custom port
//! APERTURE_LISTEN_ADDR=0.0.0.0:8080 \
//! APERTURE_WEIGHTS_FILE=./model.safetensors \
//! APERTURE_LABELS_FILE=./imagenet-1k-id2label.json \
//! cargo run --release
//! ```
//!
//! The browser UI is served at `http://<listen_addr>/ui`; the API surface is
//! `POST /predict`, `GET /labels`, `GET /health` and `GET /metrics`.

mod cli_options;

use aperture_server::ApertureServer;
use clap::Parser;
use cli_options::CliOptions;
use std::process;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() {
    let options = CliOptions::parse();
    init_logging(&options.log_level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting Aperture server"
    );

    let (model_config, server_config) =
        match (options.model_config(), options.server_config()) {
            (Ok(model), Ok(server)) => (model, server),
            (Err(e), _) | (_, Err(e)) => {
                error!(error = %e, "invalid configuration");
                eprintln!("Configuration error: {e}");
                process::exit(1);
            }
        };

    // Loading can download weights on first start; everything afterwards is
    // served from the shared engine.
    let engine = match aperture_vision::load_engine(&model_config) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            error!(error = %e, "failed to load the classifier");
            eprintln!("Model load error: {e}");
            process::exit(2);
        }
    };

    info!(
        classes = engine.num_classes(),
        listen_addr = %server_config.listen_addr,
        "engine ready"
    );

    let server = ApertureServer::new(engine, server_config, model_config.default_topk);
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("interrupt received");
    };

    if let Err(e) = server.start(shutdown).await {
        error!(error = %e, "server error");
        eprintln!("Runtime error: {e}");
        process::exit(3);
    }
}

fn init_logging(log_level: &str) {
    let level = match log_level.to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" => Level::WARN,
        "info" => Level::INFO,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        other => {
            eprintln!("Warning: invalid log level '{other}', using 'info'");
            Level::INFO
        }
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Warning: failed to initialize logging: {e}");
    }
}
