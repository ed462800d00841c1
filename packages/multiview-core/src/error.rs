//! Centralized error types for the multiview core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to appropriate HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Trait for error types that provide machine-readable error codes.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

/// Application-wide error type for the multiview server.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum MultiviewError {
    /// Layout failed compiler validation (unknown kind, missing slot, bad custom geometry).
    #[error("Invalid layout: {0}")]
    InvalidLayout(String),

    /// A channel id referenced by a layout or request does not exist in the catalog.
    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    /// A slot id referenced by a volume update is not part of the current layout.
    #[error("Unknown slot: {0}")]
    UnknownSlot(String),

    /// The transcoder process failed to spawn.
    #[error("Failed to spawn encoder: {0}")]
    SpawnFailed(String),

    /// The transcoder died during the cold-start warm-up window.
    #[error("Cold start failed: {0}")]
    ColdStartFailed(String),

    /// A volume or swap request arrived with no active layout and no last-layout to fall back on.
    #[error("No active layout")]
    NoActiveLayout,

    /// Internal error with no narrower classification (catalog fetch, port bind, I/O).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MultiviewError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidLayout(_) => "invalid_layout",
            Self::UnknownChannel(_) => "unknown_channel",
            Self::UnknownSlot(_) => "unknown_slot",
            Self::SpawnFailed(_) => "spawn_failed",
            Self::ColdStartFailed(_) => "cold_start_failed",
            Self::NoActiveLayout => "no_active_layout",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidLayout(_) | Self::NoActiveLayout => StatusCode::BAD_REQUEST,
            Self::UnknownChannel(_) | Self::UnknownSlot(_) => StatusCode::NOT_FOUND,
            Self::SpawnFailed(_) | Self::ColdStartFailed(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Convenient Result alias for application-wide operations.
pub type MultiviewResult<T> = Result<T, MultiviewError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for MultiviewError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_layout_returns_bad_request() {
        let err = MultiviewError::InvalidLayout("missing slot".into());
        assert_eq!(err.code(), "invalid_layout");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn unknown_channel_returns_not_found() {
        let err = MultiviewError::UnknownChannel("xyz".into());
        assert_eq!(err.code(), "unknown_channel");
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn no_active_layout_returns_bad_request() {
        let err = MultiviewError::NoActiveLayout;
        assert_eq!(err.code(), "no_active_layout");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }
}
