//! CLI options for the Aperture server binary

use aperture_server::ServerConfig;
use aperture_vision::{ModelConfig, ModelVariant, VisionResult, DEFAULT_MODEL_ID};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Aperture - image classification service with Grad-CAM explanations
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct CliOptions {
    /// Address to listen on
    #[arg(
        short,
        long,
        default_value = "127.0.0.1:8000",
        env = "APERTURE_LISTEN_ADDR"
    )]
    pub listen_addr: SocketAddr,

    /// Hugging Face repository for the classifier weights
    #[arg(long, default_value = DEFAULT_MODEL_ID, env = "APERTURE_MODEL_ID")]
    pub model_id: String,

    /// Classifier variant (small or large)
    #[arg(long, default_value = "small", env = "APERTURE_MODEL_VARIANT")]
    pub variant: ModelVariant,

    /// Local safetensors file overriding the hub download
    #[arg(long, env = "APERTURE_WEIGHTS_FILE")]
    pub weights_file: Option<PathBuf>,

    /// Local id2label JSON file overriding the hub download
    #[arg(long, env = "APERTURE_LABELS_FILE")]
    pub labels_file: Option<PathBuf>,

    /// Number of predictions returned by default
    #[arg(long, default_value_t = 5, env = "APERTURE_DEFAULT_TOPK")]
    pub default_topk: usize,

    /// Upper bound on uploaded image size in bytes
    #[arg(long, default_value_t = 16 * 1024 * 1024, env = "APERTURE_MAX_UPLOAD_BYTES")]
    pub max_upload_bytes: usize,

    /// Disable the browser UI at /ui
    #[arg(long, env = "APERTURE_DISABLE_UI")]
    pub disable_ui: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", env = "APERTURE_LOG_LEVEL")]
    pub log_level: String,
}

impl CliOptions {
    /// Model-loading configuration derived from the CLI options
    pub fn model_config(&self) -> VisionResult<ModelConfig> {
        use validator::Validate;

        let config = ModelConfig {
            model_id: self.model_id.clone(),
            variant: self.variant,
            weights_file: self.weights_file.clone(),
            labels_file: self.labels_file.clone(),
            default_topk: self.default_topk,
        };
        config.validate()?;
        Ok(config)
    }

    /// HTTP server configuration derived from the CLI options
    pub fn server_config(&self) -> VisionResult<ServerConfig> {
        use validator::Validate;

        let config = ServerConfig {
            listen_addr: self.listen_addr,
            max_upload_bytes: self.max_upload_bytes,
            serve_ui: !self.disable_ui,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_produce_valid_configs() {
        let options = CliOptions::parse_from(["aperture"]);
        let model = options.model_config().unwrap();
        let server = options.server_config().unwrap();

        assert_eq!(model.model_id, DEFAULT_MODEL_ID);
        assert_eq!(model.default_topk, 5);
        assert_eq!(server.listen_addr.port(), 8000);
        assert!(server.serve_ui);
    }

    #[test]
    fn test_invalid_topk_rejected() {
        let options = CliOptions::parse_from(["aperture", "--default-topk", "0"]);
        assert!(options.model_config().is_err());
    }
}
