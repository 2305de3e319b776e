//! Agent module - a persona bound to a model backend
//!
//! One call to [`Agent::execute`] is one conversational turn:
//! 1. Validate the input (nothing is written for bad input)
//! 2. Read the agent's current conversation and its top memories
//! 3. Append the human turn
//! 4. Call the model backend under the per-call timeout
//! 5. On success append the AI turn and return the response

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::db::{Message, MessageMetadata, MessageRole};
use crate::error::AgentError;
use crate::llm::{GenerateOptions, ModelBackend, ProviderError};
use crate::store::{ConversationStore, HistoryScope};

mod identity;
mod input;
pub mod prompt;

pub use identity::{default_model, AgentIdentity, Capability, ModelSettings};
pub use input::{FileAttachment, TaskInput};

/// Default bound on a single backend call
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Memories recalled into each prompt
pub const PROMPT_MEMORY_LIMIT: u32 = 3;

/// Workflow run a turn is executed for
///
/// Stored in the `extra` metadata of both messages of the turn, and on the
/// conversation when the turn has to create one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunLink {
    pub workflow_id: String,
    pub execution_id: String,
    pub task: String,
}

/// Timing and usage for one turn
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseMeta {
    pub model_used: String,
    pub duration_seconds: f64,
    #[serde(default)]
    pub tokens_per_second: Option<f64>,
    pub tokens_used: u32,
}

/// Result of a successful turn
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentResponse {
    pub result: String,
    pub conversation_id: String,
    /// Current conversation turns, separators excluded
    pub conversation_history: Vec<Message>,
    pub meta: ResponseMeta,
}

/// Rough token estimate for backends that report no usage
pub fn estimate_tokens(text: &str) -> u32 {
    (text.split_whitespace().count() as f64 * 1.3).round() as u32
}

/// A persona ready to execute turns
#[derive(Clone)]
pub struct Agent {
    identity: Arc<AgentIdentity>,
    backend: Arc<dyn ModelBackend>,
    store: ConversationStore,
    call_timeout: Duration,
    run: Option<RunLink>,
}

impl Agent {
    pub fn new(
        identity: impl Into<Arc<AgentIdentity>>,
        backend: Arc<dyn ModelBackend>,
        store: ConversationStore,
    ) -> Self {
        Self {
            identity: identity.into(),
            backend,
            store,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            run: None,
        }
    }

    /// Bound each backend call
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Tag this agent's turns with the workflow run they belong to
    pub fn with_run(mut self, run: RunLink) -> Self {
        self.run = Some(run);
        self
    }

    pub fn id(&self) -> &str {
        &self.identity.id
    }

    pub fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    /// Run one turn
    pub async fn execute(&self, input: TaskInput) -> Result<AgentResponse, AgentError> {
        input.validate()?;

        let agent_id = self.identity.id.as_str();
        let turn_lock = self.store.turn_lock(agent_id);
        let _turn = turn_lock.lock().await;

        let link = self
            .run
            .as_ref()
            .and_then(|run| serde_json::to_value(run).ok());

        let conversation_id = self
            .store
            .current_conversation_with(agent_id, link.clone())
            .await?;
        let history = self
            .store
            .get_history(agent_id, HistoryScope::CurrentOnly)
            .await?;
        let memories = self.store.top_memories(agent_id, PROMPT_MEMORY_LIMIT).await?;

        let prompt_text = prompt::build(&self.identity, &memories, &history, &input);
        let request_text = prompt::render_request(&input);

        self.store
            .append(
                agent_id,
                &conversation_id,
                MessageRole::Human,
                &request_text,
                MessageMetadata {
                    token_count: Some(estimate_tokens(&request_text)),
                    extra: link.clone(),
                    ..Default::default()
                },
            )
            .await?;

        let options = GenerateOptions::from(&self.identity.model);
        tracing::debug!(
            agent_id,
            backend = self.backend.name(),
            model = %options.model_name,
            prompt_chars = prompt_text.len(),
            history_len = history.len(),
            memories = memories.len(),
            "invoking model"
        );

        let started = Instant::now();
        let outcome =
            tokio::time::timeout(self.call_timeout, self.backend.generate(&prompt_text, &options))
                .await;
        let duration = started.elapsed().as_secs_f64();

        let generation = match outcome {
            Ok(Ok(generation)) => generation,
            Ok(Err(source)) => return Err(self.invocation_failed(source)),
            Err(_) => {
                return Err(self.invocation_failed(ProviderError::Timeout(Some(self.call_timeout))))
            }
        };

        let tokens_used = generation
            .tokens_used
            .unwrap_or_else(|| estimate_tokens(&generation.text));

        self.store
            .append(
                agent_id,
                &conversation_id,
                MessageRole::Ai,
                &generation.text,
                MessageMetadata {
                    model_used: Some(generation.model.clone()),
                    token_count: Some(tokens_used),
                    tokens_per_second: generation.tokens_per_second,
                    processing_duration: Some(duration),
                    extra: link,
                },
            )
            .await?;

        let conversation_history = self
            .store
            .get_history(agent_id, HistoryScope::CurrentOnly)
            .await?
            .into_iter()
            .filter(|m| m.role != MessageRole::Separator)
            .collect();

        tracing::info!(agent_id, duration_seconds = duration, tokens_used, "turn completed");

        Ok(AgentResponse {
            result: generation.text,
            conversation_id,
            conversation_history,
            meta: ResponseMeta {
                model_used: generation.model,
                duration_seconds: duration,
                tokens_per_second: generation.tokens_per_second,
                tokens_used,
            },
        })
    }

    fn invocation_failed(&self, source: ProviderError) -> AgentError {
        tracing::warn!(agent_id = %self.identity.id, error = %source, "model invocation failed");
        AgentError::ModelInvocation {
            agent_id: self.identity.id.clone(),
            source,
        }
    }
}
