use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use thiserror::Error;

use crate::core::validation::ValidationError;
use crate::download::process::TerminationStatus;

/// Centralized error types for the gateway
///
/// Every failure that can still become an HTTP response is one of these.
/// A client disconnect is not an error; relays report it as
/// [`LifecycleState::ClientAborted`](crate::download::coordinator::LifecycleState).
///
/// # Example
///
/// ```
/// use axum::http::StatusCode;
/// use fetchgate::core::error::AppError;
///
/// let err = AppError::Parse("missing thumbnail".to_string());
/// assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
/// assert_eq!(err.public_message(), "Failed to extract metadata");
/// ```
#[derive(Error, Debug)]
pub enum AppError {
    /// Malformed or disallowed input
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The extractor could not be started (not found, permission denied)
    #[error("Failed to start extractor `{program}`: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The extractor ran but did not exit cleanly
    #[error("Extractor exited unsuccessfully ({status})")]
    UpstreamExit {
        status: TerminationStatus,
        diagnostics: String,
    },

    /// Extractor output did not contain a valid, complete record
    #[error("Failed to parse extractor output: {0}")]
    Parse(String),

    /// The extractor did not finish within its deadline
    #[error("Extractor timed out after {0}s")]
    Timeout(u64),

    /// IO errors while talking to the extractor
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for Result with AppError
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Launch { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::UpstreamExit { .. } => StatusCode::BAD_GATEWAY,
            AppError::Parse(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message sent to the client. Never includes extractor or parser details.
    pub fn public_message(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "provide valid video url",
            AppError::Launch { .. } => "yt-dlp failed to start",
            AppError::UpstreamExit { .. } | AppError::Parse(_) | AppError::Io(_) => "Failed to extract metadata",
            AppError::Timeout(_) => "Metadata extraction timed out",
        }
    }

    /// Returns category for metrics
    pub fn category(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation",
            AppError::Launch { .. } => "launch",
            AppError::UpstreamExit { .. } => "upstream_exit",
            AppError::Parse(_) => "parse",
            AppError::Timeout(_) => "timeout",
            AppError::Io(_) => "io",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(json!({ "msg": self.public_message() }))).into_response()
    }
}
