//! API error type mapped to HTTP status codes.
//!
//! Error bodies keep the shape of a normal match response
//! (`match_found: false`, empty candidates) plus an `error` field, so
//! clients can handle every reply with one decoder.

use crate::api::models::MatchResponse;
use crate::backend::IdentifyError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

#[derive(Debug)]
pub enum ApiError {
    /// Malformed request or no usable face (400).
    BadRequest { kind: &'static str, message: String },
    /// Store, matcher or upstream failure (500).
    Internal { kind: &'static str, message: String },
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest {
            kind: "invalid_request",
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Attach the method and threshold the request was judged with.
    pub fn with_context(self, method: &str, threshold: f32) -> ContextualError {
        ContextualError {
            error: self,
            method: method.to_string(),
            threshold,
        }
    }
}

impl From<IdentifyError> for ApiError {
    fn from(e: IdentifyError) -> Self {
        let message = e.to_string();
        match e {
            IdentifyError::InvalidInput(_) => ApiError::BadRequest {
                kind: "invalid_request",
                message,
            },
            IdentifyError::DimensionMismatch(_) => ApiError::BadRequest {
                kind: "dimension_mismatch",
                message,
            },
            IdentifyError::NoFaceDetected(_) => ApiError::BadRequest {
                kind: "no_face_detected",
                message,
            },
            IdentifyError::UpstreamUnavailable(_) => ApiError::Internal {
                kind: "upstream_unavailable",
                message,
            },
            IdentifyError::Store(_) => ApiError::Internal {
                kind: "store_error",
                message,
            },
            IdentifyError::Engine(_) => ApiError::Internal {
                kind: "internal_error",
                message,
            },
        }
    }
}

/// An [`ApiError`] with enough request context to render a full body.
#[derive(Debug)]
pub struct ContextualError {
    pub error: ApiError,
    pub method: String,
    pub threshold: f32,
}

impl IntoResponse for ContextualError {
    fn into_response(self) -> Response {
        let status = self.error.status();
        let (kind, message) = match self.error {
            ApiError::BadRequest { kind, message } | ApiError::Internal { kind, message } => {
                (kind, message)
            }
        };
        if status.is_server_error() {
            tracing::error!(kind, %message, method = %self.method, "match request failed");
        } else {
            tracing::info!(kind, %message, method = %self.method, "match request rejected");
        }
        let body = MatchResponse::failure(&self.method, self.threshold, kind, message);
        (status, Json(body)).into_response()
    }
}
