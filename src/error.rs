use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("bad gateway: {0}")]
    BadGateway(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Failures of the live synchronization layer. None of these are fatal: they
/// surface as state while the last good snapshot stays visible.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SyncError {
    #[error("failed to fetch {entity}: {reason}")]
    FetchFailure { entity: &'static str, reason: String },

    #[error("driver change feed dropped: {0}")]
    SubscriptionDropped(String),

    #[error("malformed {entity} row: {reason}")]
    MalformedEntity { entity: &'static str, reason: String },

    #[error("dispatch console is detached")]
    Detached,
}

impl From<SyncError> for AppError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Detached => AppError::Unavailable(err.to_string()),
            SyncError::FetchFailure { .. } | SyncError::SubscriptionDropped(_) => {
                AppError::BadGateway(err.to_string())
            }
            SyncError::MalformedEntity { .. } => AppError::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}
