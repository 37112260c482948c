//! Centralized error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Maps an error variant to a stable machine-readable code.
pub trait ErrorCode {
    fn code(&self) -> &'static str;
}

/// Errors raised by the session, device, and streaming subsystems.
#[derive(Debug, Error)]
pub enum CastError {
    #[error("no device selected")]
    NoDevice,

    #[error("device does not support this action")]
    ActionNotSupported,

    #[error("unrecognized control callback")]
    UnknownCallback,

    #[error("config error: {0}")]
    Config(String),

    #[error("document not found")]
    NotFound,

    #[error("malformed range request")]
    BadRange,

    #[error("malformed request")]
    MalformedRequest,

    #[error("token not admitted")]
    Forbidden,

    #[error("non-numeric path component")]
    Unauthorized,

    #[error("remote message store unreachable: {0}")]
    Connection(String),

    #[error("device command failed: {0}")]
    DeviceCommandFailure(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ErrorCode for CastError {
    fn code(&self) -> &'static str {
        match self {
            CastError::NoDevice => "no_device",
            CastError::ActionNotSupported => "action_not_supported",
            CastError::UnknownCallback => "unknown_callback",
            CastError::Config(_) => "config_error",
            CastError::NotFound => "not_found",
            CastError::BadRange => "bad_range",
            CastError::MalformedRequest => "malformed_request",
            CastError::Forbidden => "forbidden",
            CastError::Unauthorized => "unauthorized",
            CastError::Connection(_) => "connection_error",
            CastError::DeviceCommandFailure(_) => "device_command_failure",
            CastError::Internal(_) => "internal_error",
        }
    }
}

impl CastError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            CastError::NotFound => StatusCode::NOT_FOUND,
            CastError::BadRange | CastError::MalformedRequest | CastError::Config(_) => {
                StatusCode::BAD_REQUEST
            }
            CastError::Forbidden => StatusCode::FORBIDDEN,
            CastError::Unauthorized => StatusCode::UNAUTHORIZED,
            CastError::Connection(_) => StatusCode::BAD_GATEWAY,
            CastError::NoDevice | CastError::ActionNotSupported | CastError::UnknownCallback => {
                StatusCode::CONFLICT
            }
            CastError::DeviceCommandFailure(_) | CastError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub message: String,
    pub status: u16,
}

impl IntoResponse for CastError {
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

pub type CastResult<T> = Result<T, CastError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forbidden_maps_to_403() {
        assert_eq!(CastError::Forbidden.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(CastError::Forbidden.code(), "forbidden");
    }

    #[test]
    fn unauthorized_maps_to_401() {
        assert_eq!(
            CastError::Unauthorized.status_code(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn no_device_maps_to_409_not_fatal() {
        assert_eq!(CastError::NoDevice.status_code(), StatusCode::CONFLICT);
    }
}
