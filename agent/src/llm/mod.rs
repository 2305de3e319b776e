//! Model backend abstraction layer
//!
//! Every provider sits behind [`ModelBackend`] so agents never know whether
//! they talk to a local Ollama server, an OpenAI-compatible API or the
//! deterministic mock.

mod mock;
mod ollama;
mod openai;

pub use mock::MockBackend;
pub use ollama::{list_models, ModelInfo, OllamaBackend};
pub use openai::OpenAiBackend;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;

/// Sampling options for one generation call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateOptions {
    pub model_name: String,
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

/// Text produced by a backend plus whatever usage it reported
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
    /// Model that actually served the request
    pub model: String,
    #[serde(default)]
    pub tokens_used: Option<u32>,
    #[serde(default)]
    pub tokens_per_second: Option<f64>,
}

/// Failures reported by a model provider
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The bound is known when the agent enforced it, not when the HTTP
    /// client gave up on its own
    #[error("model call timed out{}", timeout_suffix(.0))]
    Timeout(Option<Duration>),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("could not decode provider response: {0}")]
    Decode(String),

    #[error("provider misconfigured: {0}")]
    Config(String),

    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

fn timeout_suffix(bound: &Option<Duration>) -> String {
    bound.map(|d| format!(" after {d:?}")).unwrap_or_default()
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            tracing::debug!("provider request timed out: {}", err);
            ProviderError::Timeout(None)
        } else if err.is_decode() {
            ProviderError::Decode(err.to_string())
        } else {
            ProviderError::Http(err.to_string())
        }
    }
}

/// Trait for model backends
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Generate a completion for `prompt`
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<Generation, ProviderError>;

    /// Provider name for logs and metadata
    fn name(&self) -> &str;
}

/// Default Ollama endpoint
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Default OpenAI-compatible endpoint
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";

/// Build the backend selected by `[llm] provider`
///
/// Unknown provider names fall back to the mock backend.
pub fn backend_from_config(config: &LlmConfig) -> Result<Arc<dyn ModelBackend>, ProviderError> {
    match config.provider.to_lowercase().as_str() {
        "ollama" => {
            let url = config.url.as_deref().unwrap_or(DEFAULT_OLLAMA_URL);
            Ok(Arc::new(OllamaBackend::new(url)?))
        }
        "openai" => {
            let url = config.url.as_deref().unwrap_or(DEFAULT_OPENAI_URL);
            let api_key = std::env::var(&config.api_key_env).map_err(|_| {
                ProviderError::Config(format!("environment variable {} is not set", config.api_key_env))
            })?;
            Ok(Arc::new(OpenAiBackend::new(url, api_key)?))
        }
        "mock" => Ok(Arc::new(MockBackend::new())),
        other => {
            tracing::warn!(provider = other, "unknown model provider, using mock backend");
            Ok(Arc::new(MockBackend::new()))
        }
    }
}

/// Parse a base URL and make sure it ends with a slash so `join` appends
pub(crate) fn base_url(raw: &str) -> Result<url::Url, ProviderError> {
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    };
    url::Url::parse(&normalized).map_err(|e| ProviderError::Config(format!("invalid URL {raw}: {e}")))
}
