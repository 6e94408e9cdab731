use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use drillbit_core::{EngineError, StoreKind};

/// Application-level errors that map directly to HTTP responses.
///
/// Every variant implements [`IntoResponse`] so Axum handlers can use
/// `Result<impl IntoResponse, AppError>` as their return type.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("bad request: {message}")]
    BadRequest {
        message: String,
        field: Option<String>,
    },

    #[error("{store} store unavailable: {reason}")]
    Unavailable { store: StoreKind, reason: String },

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        AppError::BadRequest {
            message: message.into(),
            field: None,
        }
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::InvalidRequest { field, message } => AppError::BadRequest {
                message,
                field: Some(field),
            },
            EngineError::DownstreamUnavailable { store, reason } => {
                AppError::Unavailable { store, reason }
            }
            EngineError::Internal(e) => AppError::Internal(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message, field) = match &self {
            AppError::BadRequest { message, field } => (
                StatusCode::BAD_REQUEST,
                "validation_error",
                message.as_str(),
                field.as_deref(),
            ),
            AppError::Unavailable { store, reason } => {
                tracing::warn!(%store, %reason, "Report store unavailable");
                (
                    StatusCode::BAD_GATEWAY,
                    "downstream_unavailable",
                    "Report data is temporarily unavailable, try again shortly",
                    None,
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error",
                    None,
                )
            }
        };

        (
            status,
            Json(json!({
                "error": {
                    "code": code,
                    "message": message,
                    "field": field
                }
            })),
        )
            .into_response()
    }
}
