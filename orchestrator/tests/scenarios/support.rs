//! Shared fixtures

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agentflow_agent::llm::MockBackend;
use agentflow_agent::{ConversationStore, GenerateOptions, Generation, ModelBackend, ProviderError};
use async_trait::async_trait;
use orchestrator::{AgentRegistry, EngineConfig, WorkflowEngine};

/// Backend that always fails
pub struct FailingBackend;

#[async_trait]
impl ModelBackend for FailingBackend {
    async fn generate(
        &self,
        _prompt: &str,
        _options: &GenerateOptions,
    ) -> Result<Generation, ProviderError> {
        Err(ProviderError::Unavailable("model server unreachable".to_string()))
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// Mock backend that sleeps first and counts calls
pub struct SlowBackend {
    pub delay: Duration,
    pub calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ModelBackend for SlowBackend {
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<Generation, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        MockBackend::new().generate(prompt, options).await
    }

    fn name(&self) -> &str {
        "slow"
    }
}

pub fn engine_with(store: ConversationStore) -> WorkflowEngine {
    WorkflowEngine::new(
        AgentRegistry::with_defaults(),
        store,
        Arc::new(MockBackend::new()),
        EngineConfig::default(),
    )
}

pub fn engine() -> (WorkflowEngine, ConversationStore) {
    let store = ConversationStore::in_memory().expect("in-memory store");
    (engine_with(store.clone()), store)
}
