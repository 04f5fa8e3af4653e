//! Application-level error taxonomy
//!
//! Validation and not-found errors surface to HTTP callers; gateway and
//! database errors are recovered locally by the workers and only reach a
//! caller on the synchronous initiate path.

use crate::database::error::DatabaseError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("gateway error: {message}")]
    Gateway { message: String, retryable: bool },

    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("configuration error: {0}")]
    Config(String),
}

impl AppError {
    pub fn validation<S: Into<String>>(message: S) -> Self {
        AppError::Validation(message.into())
    }

    pub fn gateway<S: Into<String>>(message: S, retryable: bool) -> Self {
        AppError::Gateway { message: message.into(), retryable }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Gateway { retryable, .. } => *retryable,
            AppError::Database(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Validation(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            AppError::NotFound { entity, id } => {
                (StatusCode::NOT_FOUND, format!("{} {} not found", entity, id))
            }
            AppError::Gateway { .. } => {
                (StatusCode::BAD_GATEWAY, "payment gateway unavailable".to_string())
            }
            AppError::Database(_) | AppError::Config(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
            }
        };

        let body = Json(serde_json::json!({ "error": message }));
        (status, body).into_response()
    }
}
