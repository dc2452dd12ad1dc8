//! # Error Handling
//!
//! Three layers of errors live here:
//!
//! - **AppError**: returned by HTTP handlers and converted into JSON responses
//! - **ServiceError**: failures talking to the transcription, completion and synthesis services
//! - **CallError**: failures inside a single call that end or degrade that call
//!
//! ## Propagation policy:
//! A `ServiceError` raised inside a turn never reaches the call's real-time loop as a
//! fault. The turn pipeline turns it into an error event on the session channel, and
//! the caller hears nothing but gets a JSON notification on the socket.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;
use thiserror::Error;

/// Custom error types for the HTTP surface.
///
/// ## Error Categories:
/// - **Internal**: Server-side problems (500 errors)
/// - **BadRequest**: Client sent invalid data (400 errors)
/// - **ConfigError**: Configuration problems (500 errors)
/// - **ServiceUnavailable**: Call capacity reached (503 errors)
#[derive(Debug)]
pub enum AppError {
    Internal(String),
    BadRequest(String),
    ConfigError(String),
    ServiceUnavailable(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
        }
    }
}

/// Converts errors into HTTP responses.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "service_unavailable",
///     "message": "Maximum concurrent calls (10) reached",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        use actix_web::http::StatusCode;

        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            AppError::ConfigError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error", msg),
            AppError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", msg)
            }
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parsing errors are almost always the client's fault, so they map to 400.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Failures of the remote speech and language services.
///
/// The `Display` output is what the caller's socket receives in the error
/// notification, so messages stay short and human-readable.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{service} request failed: {source}")]
    Http {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{service} returned HTTP {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("{service} response could not be decoded: {message}")]
    Decode {
        service: &'static str,
        message: String,
    },

    #[error("{service} stream interrupted: {message}")]
    Stream {
        service: &'static str,
        message: String,
    },

    #[error("call session is no longer listening")]
    SessionClosed,
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Failures inside a single call.
#[derive(Error, Debug)]
pub enum CallError {
    #[error("malformed audio frame: {0}")]
    MalformedFrame(String),

    #[error("recording could not be written to {path}: {source}")]
    Recording {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}
