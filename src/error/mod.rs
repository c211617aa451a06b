use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type for rate limiting operations
pub type Result<T> = std::result::Result<T, RateLimitError>;

/// Rate limiting error types
///
/// A denied request is never an error: the limiter reports it as
/// `Ok(false)`. These variants describe failures of the limiter itself.
#[derive(Error, Debug)]
pub enum RateLimitError {
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation timed out")]
    Timeout,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RateLimitError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            RateLimitError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            RateLimitError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            RateLimitError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RateLimitError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RateLimitError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RateLimitError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable error code used in JSON bodies
    pub fn code(&self) -> &'static str {
        match self {
            RateLimitError::Cancelled => "REQUEST_CANCELLED",
            RateLimitError::Timeout => "REQUEST_TIMEOUT",
            RateLimitError::Storage(_) => "STORAGE_ERROR",
            RateLimitError::Config(_) => "CONFIG_ERROR",
            RateLimitError::Internal(_) | RateLimitError::Io(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether this error came from the caller's context rather than the store
    pub fn is_context_error(&self) -> bool {
        matches!(self, RateLimitError::Cancelled | RateLimitError::Timeout)
    }
}

impl IntoResponse for RateLimitError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "success": false,
            "error": {
                "code": self.code(),
                "message": self.to_string(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            },
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            RateLimitError::Timeout.status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            RateLimitError::Storage("boom".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            RateLimitError::Cancelled.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_error_display() {
        let err = RateLimitError::Config("window must be > 0".to_string());
        assert_eq!(err.to_string(), "Configuration error: window must be > 0");
        assert_eq!(RateLimitError::Cancelled.to_string(), "Operation cancelled");
    }

    #[test]
    fn test_context_errors() {
        assert!(RateLimitError::Cancelled.is_context_error());
        assert!(RateLimitError::Timeout.is_context_error());
        assert!(!RateLimitError::Storage("x".to_string()).is_context_error());
    }
}
