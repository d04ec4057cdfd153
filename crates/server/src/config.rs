//! HTTP server configuration

use aperture_vision::{VisionError, VisionResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use validator::Validate;

/// Default address the server binds to
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8000";

/// Configuration for the HTTP service
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    /// Address to bind the HTTP server
    pub listen_addr: SocketAddr,

    /// Upper bound on uploaded image size in bytes
    #[validate(range(
        min = 1024,
        max = 104_857_600,
        message = "Max upload size must be between 1KiB and 100MiB"
    ))]
    pub max_upload_bytes: usize,

    /// Whether to serve the browser UI at /ui
    pub serve_ui: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.parse().expect("valid default address"),
            max_upload_bytes: 16 * 1024 * 1024,
            serve_ui: true,
        }
    }
}

impl ServerConfig {
    /// Load configuration from `APERTURE_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> VisionResult<Self> {
        let mut config = Self::default();

        if let Ok(addr) = env::var("APERTURE_LISTEN_ADDR") {
            config.listen_addr = addr.parse().map_err(|_| {
                VisionError::Configuration(format!("invalid APERTURE_LISTEN_ADDR '{addr}'"))
            })?;
        }
        if let Ok(bytes) = env::var("APERTURE_MAX_UPLOAD_BYTES") {
            config.max_upload_bytes = bytes.parse().map_err(|_| {
                VisionError::Configuration(format!("invalid APERTURE_MAX_UPLOAD_BYTES '{bytes}'"))
            })?;
        }
        if let Ok(ui) = env::var("APERTURE_SERVE_UI") {
            config.serve_ui = matches!(ui.to_lowercase().as_str(), "1" | "true" | "yes");
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
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.listen_addr.port(), 8000);
        assert!(config.serve_ui);
    }

    #[test]
    fn test_upload_bound_validated() {
        let config = ServerConfig {
            max_upload_bytes: 16,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
