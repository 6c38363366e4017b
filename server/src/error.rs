use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use log::error;
use thiserror::Error;

use toll_shared::messages::{ErrorCode, ErrorEnvelope, RequestError};

/// Failures raised by the engine. Every variant maps to one envelope code.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    InvalidId(String),
    #[error("storage failure: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("{0}")]
    Internal(String),
}

impl EngineError {
    pub fn not_found(what: &str, key: impl std::fmt::Display) -> Self {
        EngineError::NotFound(format!("{what} {key} not found"))
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            EngineError::NotFound(_) => ErrorCode::NotFound,
            EngineError::BadRequest(_) => ErrorCode::BadRequest,
            EngineError::Forbidden(_) => ErrorCode::Forbidden,
            EngineError::Unauthorized(_) => ErrorCode::Unauthorized,
            EngineError::InvalidId(_) => ErrorCode::InvalidId,
            EngineError::Storage(_) | EngineError::Internal(_) => ErrorCode::InternalServerError,
        }
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        match self.code() {
            ErrorCode::InternalServerError => {
                ErrorEnvelope::new(ErrorCode::InternalServerError, "internal server error")
            }
            code => ErrorEnvelope::new(code, self.to_string()),
        }
    }
}

impl From<RequestError> for EngineError {
    fn from(e: RequestError) -> Self {
        EngineError::BadRequest(e.to_string())
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        if self.code() == ErrorCode::InternalServerError {
            error!("Request failed: {}", self);
        }
        let envelope = self.envelope();
        let status = StatusCode::from_u16(envelope.error.status_code)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(envelope)).into_response()
    }
}

/// Failures that stop the server from starting.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid seed file: {0}")]
    Seed(#[from] serde_json::Error),
    #[error(transparent)]
    Engine(#[from] EngineError),
}
