//! Environment-driven configuration, read once at startup.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::time::Duration;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_WEIGHTS_REPO: &str = "lmz/candle-blip";
const DEFAULT_WEIGHTS_FILE: &str = "blip-image-captioning-large-q4k.gguf";
const DEFAULT_TOKENIZER_REPO: &str = "Salesforce/blip-image-captioning-large";
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Where the model artifacts come from on the Hugging Face Hub.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Hub repo holding the quantized GGUF weights.
    pub weights_repo: String,
    /// Filename of the GGUF weights inside `weights_repo`.
    pub weights_file: String,
    /// Hub repo holding `tokenizer.json`.
    pub tokenizer_repo: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub model: ModelConfig,
    /// Bound on the remote image fetch; there is no timeout on inference.
    pub fetch_timeout: Duration,
    /// Cap on the request body, sized for ordinary photo uploads.
    pub max_upload_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.parse().expect("default addr is valid"),
            model: ModelConfig {
                weights_repo: DEFAULT_WEIGHTS_REPO.to_string(),
                weights_file: DEFAULT_WEIGHTS_FILE.to_string(),
                tokenizer_repo: DEFAULT_TOKENIZER_REPO.to_string(),
            },
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl Config {
    /// Build a config from `CAPTION_*` environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();

        let listen_addr = match std::env::var("CAPTION_LISTEN_ADDR") {
            Ok(raw) => raw
                .parse()
                .with_context(|| format!("invalid CAPTION_LISTEN_ADDR: {raw}"))?,
            Err(_) => defaults.listen_addr,
        };

        let fetch_timeout = match std::env::var("CAPTION_FETCH_TIMEOUT_SECS") {
            Ok(raw) => {
                let secs: u64 = raw
                    .parse()
                    .with_context(|| format!("invalid CAPTION_FETCH_TIMEOUT_SECS: {raw}"))?;
                Duration::from_secs(secs)
            }
            Err(_) => defaults.fetch_timeout,
        };

        let max_upload_bytes = match std::env::var("CAPTION_MAX_UPLOAD_BYTES") {
            Ok(raw) => raw
                .parse()
                .with_context(|| format!("invalid CAPTION_MAX_UPLOAD_BYTES: {raw}"))?,
            Err(_) => defaults.max_upload_bytes,
        };

        Ok(Self {
            listen_addr,
            model: ModelConfig {
                weights_repo: env_or("CAPTION_WEIGHTS_REPO", defaults.model.weights_repo),
                weights_file: env_or("CAPTION_WEIGHTS_FILE", defaults.model.weights_file),
                tokenizer_repo: env_or("CAPTION_TOKENIZER_REPO", defaults.model.tokenizer_repo),
            },
            fetch_timeout,
            max_upload_bytes,
        })
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}
