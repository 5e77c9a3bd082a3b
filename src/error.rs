use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::{permission::RegistryError, store::StoreError};

/// Message of the `NotFound` produced from the store's not-found sentinel.
pub const RECORD_NOT_FOUND: &str = "record not found";

/// AppError
///
/// Every failure the engine surfaces. Each variant maps to exactly one HTTP
/// status and one `{ code, msg }` body, so the transport never has to inspect
/// error text.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Missing hook, unknown operation, duplicate route. Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A business rule reported by a hook (e.g. a duplicate unique field).
    #[error("{0}")]
    Validation(String),

    /// The request itself could not be bound (bad id, malformed body).
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Unauthenticated(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("store error: {0}")]
    Store(StoreError),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Configuration(_) | AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::RecordNotFound => AppError::NotFound(RECORD_NOT_FOUND.to_string()),
            other => AppError::Store(other),
        }
    }
}

impl From<RegistryError> for AppError {
    fn from(err: RegistryError) -> Self {
        AppError::Configuration(err.to_string())
    }
}

/// ErrorBody
///
/// The single error shape: `code` repeats the HTTP status.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorBody {
    pub code: u16,
    pub msg: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let msg = match &self {
            AppError::Store(e) => {
                tracing::error!("store error: {:?}", e);
                "database operation failed".to_string()
            }
            AppError::Configuration(e) => {
                tracing::error!("configuration error reached a request: {}", e);
                self.to_string()
            }
            other => other.to_string(),
        };
        let body = ErrorBody {
            code: status.as_u16(),
            msg,
        };
        (status, Json(body)).into_response()
    }
}
