//! Request-level error taxonomy and its HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Every way a caption request can fail. Each variant carries the message the
/// client sees; full diagnostics are logged server-side before construction.
#[derive(Error, Debug)]
pub enum ApiError {
    /// The model never loaded; checked before any input resolution.
    #[error("AI service is not available on the server.")]
    ModelUnavailable,

    /// Neither `imageFile` nor `imageUrl` was provided.
    #[error("No image data received")]
    NoImageData,

    /// Transport error, timeout, or non-2xx status while fetching `imageUrl`.
    #[error("Could not fetch image from URL: {0}")]
    FetchFailed(String),

    /// The multipart body itself could not be parsed.
    #[error("Invalid request body: {0}")]
    BadRequest(String),

    /// A source was present but resolved to zero bytes.
    #[error("Failed to process image input.")]
    EmptyImageInput,

    /// Image decoding or model generation failed.
    #[error("Error during AI processing on server: {0}")]
    Inference(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::ModelUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::NoImageData | ApiError::FetchFailed(_) | ApiError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::EmptyImageInput | ApiError::Inference(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            ApiError::ModelUnavailable.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(ApiError::NoImageData.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::FetchFailed("connection refused".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::BadRequest("missing boundary".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::EmptyImageInput.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::Inference("shape mismatch".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn messages_match_the_api_contract() {
        assert_eq!(
            ApiError::ModelUnavailable.to_string(),
            "AI service is not available on the server."
        );
        assert_eq!(ApiError::NoImageData.to_string(), "No image data received");
        assert_eq!(
            ApiError::FetchFailed("404 Not Found".into()).to_string(),
            "Could not fetch image from URL: 404 Not Found"
        );
        assert_eq!(
            ApiError::EmptyImageInput.to_string(),
            "Failed to process image input."
        );
    }
}
