//! API error type. Every failure leaves the hub as `{status:"error", message}`.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed or incomplete input. Never retried.
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    UnsupportedMediaType(String),

    /// The reading store is unavailable. The client may retry.
    #[error("storage failure: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::MissingJsonContentType(r) => Self::UnsupportedMediaType(r.body_text()),
            other => Self::Validation(other.body_text()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.status_code();
        match &self {
            Self::Storage(_) => error!("{self}"),
            _ => warn!(status = code.as_u16(), "rejected request: {self}"),
        }
        let body = json!({ "status": "error", "message": self.to_string() });
        (code, Json(body)).into_response()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
