//! Ollama backend over the HTTP API

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{base_url, GenerateOptions, Generation, ModelBackend, ProviderError};

/// Information about an available model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub modified_at: String,
}

#[derive(Debug, Deserialize)]
struct OllamaTagsResponse {
    models: Vec<ModelInfo>,
}

/// List available models from Ollama
pub async fn list_models(ollama_url: &str) -> Result<Vec<ModelInfo>, ProviderError> {
    let api_url = base_url(ollama_url)?
        .join("api/tags")
        .map_err(|e| ProviderError::Config(e.to_string()))?;

    let response = reqwest::Client::new().get(api_url).send().await?;
    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::Status { status, body });
    }
    let tags: OllamaTagsResponse = response.json().await?;
    Ok(tags.models)
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateRequestOptions,
}

#[derive(Debug, Serialize)]
struct GenerateRequestOptions {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    model: Option<String>,
    response: String,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
    /// Nanoseconds spent generating `eval_count` tokens
    #[serde(default)]
    eval_duration: Option<u64>,
}

impl GenerateResponse {
    fn tokens_used(&self) -> Option<u32> {
        match (self.prompt_eval_count, self.eval_count) {
            (None, None) => None,
            (prompt, eval) => Some(prompt.unwrap_or(0) + eval.unwrap_or(0)),
        }
    }

    fn tokens_per_second(&self) -> Option<f64> {
        let count = self.eval_count?;
        let nanos = self.eval_duration.filter(|d| *d > 0)?;
        Some(count as f64 / (nanos as f64 / 1_000_000_000.0))
    }
}

/// Ollama client using `/api/generate`
pub struct OllamaBackend {
    endpoint: url::Url,
    http_client: reqwest::Client,
}

impl OllamaBackend {
    pub fn new(ollama_url: &str) -> Result<Self, ProviderError> {
        let endpoint = base_url(ollama_url)?
            .join("api/generate")
            .map_err(|e| ProviderError::Config(e.to_string()))?;
        Ok(Self {
            endpoint,
            http_client: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl ModelBackend for OllamaBackend {
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<Generation, ProviderError> {
        let request = GenerateRequest {
            model: &options.model_name,
            prompt,
            stream: false,
            options: GenerateRequestOptions {
                temperature: options.temperature,
                num_predict: options.max_tokens,
            },
        };

        tracing::debug!(model = %options.model_name, prompt_chars = prompt.len(), "ollama generate");

        let response = self
            .http_client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status { status, body });
        }

        let body: GenerateResponse = response.json().await?;
        Ok(Generation {
            tokens_used: body.tokens_used(),
            tokens_per_second: body.tokens_per_second(),
            model: body.model.unwrap_or_else(|| options.model_name.clone()),
            text: body.response,
        })
    }

    fn name(&self) -> &str {
        "ollama"
    }
}
