//! Error types for the Aperture vision engine

use thiserror::Error;

/// Result type for Aperture vision operations
pub type VisionResult<T> = Result<T, VisionError>;

/// Main error type for the vision engine
#[derive(Error, Debug)]
pub enum VisionError {
    /// Uploaded bytes could not be decoded as an image
    #[error("Input decode error: {0}")]
    InputDecode(String),

    /// Invalid argument provided by the caller
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The instrumented layer produced no gradient during the backward pass.
    /// This indicates a wiring defect (wrong layer split), not bad input.
    #[error("Capture missing: no gradient reached the instrumented layer")]
    CaptureMissing,

    /// Model weights or labels could not be loaded
    #[error("Model load failed: {0}")]
    ModelLoad(String),

    /// Tensor computation failed
    #[error("Inference error: {0}")]
    Inference(#[from] candle_core::Error),

    /// Image encoding failed while rendering an overlay
    #[error("Image encode error: {0}")]
    Encode(#[from] image::ImageError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convert from validator errors
impl From<validator::ValidationErrors> for VisionError {
    fn from(err: validator::ValidationErrors) -> Self {
        let messages: Vec<String> = err
            .field_errors()
            .iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |error| {
                    format!(
                        "{}: {}",
                        field,
                        error
                            .message
                            .as_ref()
                            .unwrap_or(&std::borrow::Cow::Borrowed("validation error"))
                    )
                })
            })
            .collect();

        Self::Configuration(messages.join(", "))
    }
}

/// HTTP status code mapping for API responses
impl VisionError {
    /// Convert error to the appropriate HTTP status code
    #[must_use]
    pub const fn to_status_code(&self) -> u16 {
        match self {
            Self::InputDecode(_) | Self::InvalidArgument(_) | Self::Configuration(_) => 400,
            Self::ModelLoad(_) => 503,
            _ => 500,
        }
    }

    /// Get user-friendly error message
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::InputDecode(_) => "Uploaded data is not a valid image.".to_string(),
            Self::InvalidArgument(msg) => format!("Invalid request: {msg}"),
            Self::ModelLoad(_) => "Model is not available.".to_string(),
            _ => "An internal error occurred.".to_string(),
        }
    }
}

/// Structured error response for HTTP APIs
#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    /// Error details for API consumers
    pub error: ErrorDetails,
}

/// Detailed error information for structured API responses
#[derive(Debug, serde::Serialize)]
pub struct ErrorDetails {
    /// Error type identifier
    pub r#type: String,
    /// Human-readable error message
    pub message: String,
}

impl From<&VisionError> for ErrorResponse {
    fn from(err: &VisionError) -> Self {
        let error_type = match err {
            VisionError::InputDecode(_) => "input_decode_error",
            VisionError::InvalidArgument(_) => "validation_error",
            VisionError::CaptureMissing => "capture_error",
            VisionError::ModelLoad(_) => "model_error",
            VisionError::Inference(_) => "inference_error",
            VisionError::Encode(_) => "encode_error",
            VisionError::Configuration(_) => "configuration_error",
            _ => "internal_error",
        };

        Self {
            error: ErrorDetails {
                r#type: error_type.to_string(),
                message: err.user_message(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            VisionError::InputDecode("bad magic".to_string()).to_status_code(),
            400
        );
        assert_eq!(
            VisionError::InvalidArgument("k out of range".to_string()).to_status_code(),
            400
        );
        assert_eq!(VisionError::CaptureMissing.to_status_code(), 500);
        assert_eq!(
            VisionError::ModelLoad("missing file".to_string()).to_status_code(),
            503
        );
    }

    #[test]
    fn test_user_messages() {
        let err = VisionError::InvalidArgument("k must be at least 1".to_string());
        assert_eq!(err.user_message(), "Invalid request: k must be at least 1");

        let err = VisionError::CaptureMissing;
        assert_eq!(err.user_message(), "An internal error occurred.");
    }

    #[test]
    fn test_error_response_conversion() {
        let err = VisionError::InputDecode("truncated".to_string());
        let response = ErrorResponse::from(&err);

        assert_eq!(response.error.r#type, "input_decode_error");
        assert!(!response.error.message.is_empty());
    }
}
