use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::db::StoreError;
use crate::service::SyncError;

/// Failures of the trigger surface. Every variant renders a JSON body.
#[derive(Debug)]
pub enum ApiError {
    MissingBearer,
    Forbidden,
    BearerNotConfigured,
    BadRequest(String),
    NotFound(String),
    Busy,
    Internal(String),
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Busy => Self::Busy,
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::MissingBearer => (StatusCode::UNAUTHORIZED, "Missing Bearer token".to_string()),
            Self::Forbidden => (StatusCode::FORBIDDEN, "Forbidden".to_string()),
            Self::BearerNotConfigured => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Missing env: SYNC_INTERNAL_BEARER".to_string(),
            ),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::Busy => {
                let body = serde_json::json!({ "ok": false, "stage": "busy", "error": "Busy" });
                return (StatusCode::CONFLICT, Json(body)).into_response();
            }
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = serde_json::json!({ "ok": false, "error": message });
        (status, Json(body)).into_response()
    }
}
