//! HTTP service that captions images with a locally loaded BLIP model.
//!
//! `POST /analyze-image` takes an uploaded file or an image URL and answers
//! with `{"ai_caption": "..."}`. The model is loaded once at startup; if the
//! load fails the server still comes up and answers 503 on the endpoint.

mod captioner;
mod config;
mod error;
mod routes;
mod state;

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::captioner::Captioner;
use crate::config::Config;
use crate::state::{AppState, CaptionModel, ModelState};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;

    // A failed load degrades the service instead of aborting it; every caption
    // request then answers 503 until the process is restarted.
    let model = match Captioner::load(&config.model).await {
        Ok(captioner) => {
            info!("caption model ready");
            let captioner: Box<dyn CaptionModel> = Box::new(captioner);
            ModelState::Ready(Arc::new(Mutex::new(captioner)))
        }
        Err(e) => {
            error!("failed to load caption model, serving degraded: {e:#}");
            ModelState::Unavailable
        }
    };

    let state = Arc::new(AppState::new(
        model,
        config.fetch_timeout,
        config.max_upload_bytes,
    ));
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    info!("listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
