//! OpenAI-compatible chat completions backend

use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{base_url, GenerateOptions, Generation, ModelBackend, ProviderError};

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    completion_tokens: Option<u32>,
    #[serde(default)]
    total_tokens: Option<u32>,
}

pub struct OpenAiBackend {
    endpoint: url::Url,
    api_key: String,
    http_client: reqwest::Client,
}

impl OpenAiBackend {
    pub fn new(api_url: &str, api_key: impl Into<String>) -> Result<Self, ProviderError> {
        let endpoint = base_url(api_url)?
            .join("chat/completions")
            .map_err(|e| ProviderError::Config(e.to_string()))?;
        Ok(Self {
            endpoint,
            api_key: api_key.into(),
            http_client: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl ModelBackend for OpenAiBackend {
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<Generation, ProviderError> {
        let request = ChatRequest {
            model: &options.model_name,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        };

        let started = Instant::now();
        let response = self
            .http_client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status { status, body });
        }

        let body: ChatResponse = response.json().await?;
        let elapsed = started.elapsed().as_secs_f64();

        let text = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::Decode("response contained no choices".to_string()))?;

        let tokens_per_second = body
            .usage
            .as_ref()
            .and_then(|u| u.completion_tokens)
            .filter(|_| elapsed > 0.0)
            .map(|n| n as f64 / elapsed);

        Ok(Generation {
            text,
            model: body.model.unwrap_or_else(|| options.model_name.clone()),
            tokens_used: body.usage.and_then(|u| u.total_tokens),
            tokens_per_second,
        })
    }

    fn name(&self) -> &str {
        "openai"
    }
}
