//! HTTP error responses
//!
//! Every handler failure becomes `{"error": "..."}` with a status that tells
//! the viewer whether retrying can help.

use axum::extract::multipart::MultipartError;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::error::{BatchError, SignalingError, SourceError};
use crate::registry::RegistryError;

/// Error returned by HTTP handlers
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request itself is wrong
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    /// Session limit reached or device busy; retrying later can succeed
    #[error("{0}")]
    Unavailable(String),

    /// Transport or media failure on the server side
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::CapacityReached { .. } => ApiError::Unavailable(e.to_string()),
            RegistryError::SessionNotFound(_) => ApiError::NotFound(e.to_string()),
        }
    }
}

impl From<SourceError> for ApiError {
    fn from(e: SourceError) -> Self {
        match e {
            SourceError::Busy(_) => ApiError::Unavailable(e.to_string()),
            SourceError::Unsupported(_) => ApiError::BadRequest(e.to_string()),
            _ => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<SignalingError> for ApiError {
    fn from(e: SignalingError) -> Self {
        match e {
            SignalingError::InvalidOffer(_) | SignalingError::UnknownCamera(_) => {
                ApiError::BadRequest(e.to_string())
            }
            SignalingError::Registry(inner) => inner.into(),
            SignalingError::Source(inner) => inner.into(),
            SignalingError::Peer(_) | SignalingError::Codec(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<BatchError> for ApiError {
    fn from(e: BatchError) -> Self {
        match e {
            BatchError::Decode(_) | BatchError::Empty => ApiError::BadRequest(e.to_string()),
            _ => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(status = %status, error = %self, "Request failed");
        } else {
            tracing::debug!(status = %status, error = %self, "Request rejected");
        }

        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
