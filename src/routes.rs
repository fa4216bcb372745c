//! HTTP surface: the upload page and the caption endpoint.

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::response::Html;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::error::ApiError;
use crate::state::{AppState, ModelState};

#[derive(Serialize)]
pub struct CaptionResponse {
    pub ai_caption: String,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/analyze-image", post(analyze_image))
        .layer(DefaultBodyLimit::max(state.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(include_str!("../static/index.html"))
}

/// Resolve one image from the request (upload wins over URL), run it through
/// the model, and answer with the caption. Every failure is terminal for the
/// request and reported synchronously; nothing is retried.
async fn analyze_image(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<CaptionResponse>, ApiError> {
    // Fail fast before touching the body if the model never loaded.
    let model = match &state.model {
        ModelState::Ready(model) => model.clone(),
        ModelState::Unavailable => return Err(ApiError::ModelUnavailable),
    };

    let mut file_bytes: Option<Bytes> = None;
    let mut image_url: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        match field.name() {
            Some("imageFile") => {
                file_bytes = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| ApiError::BadRequest(e.to_string()))?,
                );
            }
            Some("imageUrl") => {
                let url = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.to_string()))?;
                if !url.trim().is_empty() {
                    image_url = Some(url);
                }
            }
            _ => {}
        }
    }

    let image_bytes = if let Some(bytes) = file_bytes {
        bytes
    } else if let Some(url) = image_url {
        fetch_image(&state, &url).await?
    } else {
        return Err(ApiError::NoImageData);
    };

    if image_bytes.is_empty() {
        return Err(ApiError::EmptyImageInput);
    }

    // The candle decoder mutates its KV cache, so generation is serialized on
    // the model and runs off the async workers.
    let caption = tokio::task::spawn_blocking(move || model.blocking_lock().caption(&image_bytes))
        .await
        .map_err(|e| ApiError::Inference(e.to_string()))?
        .map_err(|e| {
            error!("caption generation failed: {e:#}");
            ApiError::Inference(e.to_string())
        })?;

    Ok(Json(CaptionResponse {
        ai_caption: caption,
    }))
}

/// Bounded-timeout GET of a remote image. Any transport error, timeout, or
/// non-2xx status is a fetch failure; inference is never attempted.
async fn fetch_image(state: &AppState, url: &str) -> Result<Bytes, ApiError> {
    let fetch_failed = |e: reqwest::Error| {
        warn!(%url, "image fetch failed: {e}");
        ApiError::FetchFailed(e.to_string())
    };

    let response = state
        .http
        .get(url)
        .timeout(state.fetch_timeout)
        .send()
        .await
        .map_err(fetch_failed)?
        .error_for_status()
        .map_err(fetch_failed)?;

    response.bytes().await.map_err(fetch_failed)
}
