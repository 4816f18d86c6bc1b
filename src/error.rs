use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum PreviewError {
    #[error("Failed to parse URL: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("Failed to fetch content: {0}")]
    FetchError(String),

    #[error("Failed to extract content: {0}")]
    ExtractError(String),

    #[error("Proxy operation {op} failed: {message}")]
    ProxyError { op: String, message: String },

    #[error("Request timeout: {0}")]
    TimeoutError(String),

    #[error("Invalid policy: {0}")]
    PolicyError(String),

    #[error("Invalid pattern: {0}")]
    PatternError(#[from] regex::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Logging setup failed: {0}")]
    LoggingError(String),
}

impl PreviewError {
    pub fn proxy(op: &str, message: impl Into<String>) -> Self {
        PreviewError::ProxyError {
            op: op.to_string(),
            message: message.into(),
        }
    }

    pub fn log(&self) {
        match self {
            PreviewError::UrlParseError(e) => {
                warn!(error = %e, "URL parsing failed");
            }
            PreviewError::FetchError(e) => {
                warn!(error = %e, "Content fetch failed");
            }
            PreviewError::ExtractError(e) => {
                warn!(error = %e, "Content extraction failed");
            }
            PreviewError::ProxyError { op, message } => {
                warn!(op = %op, error = %message, "Proxy operation failed");
            }
            PreviewError::TimeoutError(e) => {
                warn!(error = %e, "Request timed out");
            }
            PreviewError::PolicyError(e) => {
                error!(error = %e, "Policy compilation failed");
            }
            PreviewError::PatternError(e) => {
                error!(error = %e, "Invalid regular expression");
            }
            PreviewError::SerializationError(e) => {
                error!(error = %e, "Serialization failed");
            }
            PreviewError::LoggingError(e) => {
                eprintln!("Logging setup failed: {e}");
            }
        }
    }
}
