//! HTTP error taxonomy.
//!
//! Typed errors for the ingestion surface. Each error carries a
//! machine-readable code and maps to a stable HTTP status, so producers
//! can branch on the code instead of parsing messages.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use relay_core::EventError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Centralized error codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Request body is not well-formed JSON.
    #[serde(rename = "INVALID_PAYLOAD")]
    InvalidPayload,
    /// Unexpected server-side failure.
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    /// Subscriber limit reached.
    #[serde(rename = "TOO_MANY_CONNECTIONS")]
    TooManyConnections,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InvalidPayload => "INVALID_PAYLOAD",
            Self::InternalError => "INTERNAL_ERROR",
            Self::TooManyConnections => "TOO_MANY_CONNECTIONS",
        };
        f.write_str(s)
    }
}

/// Error returned by the ingestion endpoint.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// The request body could not be parsed as JSON. Nothing was
    /// broadcast.
    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] EventError),
    /// Unexpected failure while handling the request.
    #[error("internal error: {message}")]
    Internal {
        /// What went wrong.
        message: String,
    },
}

impl IngestError {
    /// The machine-readable code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidPayload(_) => ErrorCode::InvalidPayload,
            Self::Internal { .. } => ErrorCode::InternalError,
        }
    }

    /// The HTTP status this error maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// JSON body for error responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Always `"error"`.
    pub status: String,
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

impl ErrorBody {
    /// Build an error body from a code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: "error".into(),
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let body = ErrorBody::new(self.code(), self.to_string());
        (self.status(), Json(body)).into_response()
    }
}
