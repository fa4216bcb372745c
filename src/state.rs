//! Shared application state and the seam between handlers and the model.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Anything that can turn encoded image bytes into a caption. The production
/// implementation is [`crate::captioner::Captioner`]; tests substitute stubs.
///
/// Takes `&mut self` because generation mutates decoder state (KV cache).
pub trait CaptionModel: Send {
    fn caption(&mut self, image_bytes: &[u8]) -> anyhow::Result<String>;
}

/// Decided once at startup and never changed: either the whole model bundle
/// (weights, tokenizer, device) loaded, or the service runs degraded and
/// answers 503. Partial initialization is not representable.
#[derive(Clone)]
pub enum ModelState {
    Ready(Arc<Mutex<Box<dyn CaptionModel>>>),
    Unavailable,
}

pub struct AppState {
    pub model: ModelState,
    pub http: reqwest::Client,
    pub fetch_timeout: Duration,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(model: ModelState, fetch_timeout: Duration, max_upload_bytes: usize) -> Self {
        Self {
            model,
            http: reqwest::Client::new(),
            fetch_timeout,
            max_upload_bytes,
        }
    }
}
