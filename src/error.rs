use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;

use crate::{dao::storage::StorageError, state::room::UserState};

/// Errors surfaced across the hub boundary by the coordinator and the
/// entity/connection layers beneath it.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("invalid state change: {from:?} -> {to:?}")]
    InvalidStateChange { from: UserState, to: UserState },
    #[error("incorrect password")]
    InvalidPassword,
    #[error("operation requires the room host")]
    NotHost,
    #[error("user is not joined to a room")]
    NotJoinedRoom,
    #[error("cannot perform this action on a blocked user")]
    UserBlocked,
    #[error("user only accepts private messages from friends")]
    UserBlocksPMs,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("entity is not tracked")]
    NotTracked,
    #[error("timed out acquiring entity lock")]
    LockTimeout,
    #[error("connection state is stale")]
    StaleConnection,
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Unavailable(err)
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
            ServiceError::NotFound(message) => AppError::NotFound(message),
            ServiceError::NotTracked => AppError::NotFound(err.to_string()),
            ServiceError::InvalidPassword
            | ServiceError::NotHost
            | ServiceError::UserBlocked
            | ServiceError::UserBlocksPMs
            | ServiceError::StaleConnection => AppError::Forbidden(err.to_string()),
            ServiceError::LockTimeout | ServiceError::Unavailable(_) => {
                AppError::ServiceUnavailable(err.to_string())
            }
            ServiceError::InvalidState(_)
            | ServiceError::InvalidStateChange { .. }
            | ServiceError::NotJoinedRoom => AppError::Conflict(err.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}
