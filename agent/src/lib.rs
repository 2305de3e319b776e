//! agentflow agent library
//!
//! Leaf layer of the workspace:
//! - [`store`]: per-agent conversation log and long-term memory on SQLite
//! - [`llm`]: model backends (mock, Ollama, OpenAI-compatible)
//! - [`agent`]: personas and the single-turn `execute` operation
//! - [`config`]: `.agentflow.toml` loading

pub mod agent;
pub mod config;
pub mod db;
pub mod error;
pub mod llm;
pub mod store;

pub use agent::{
    Agent, AgentIdentity, AgentResponse, Capability, FileAttachment, RunLink, TaskInput,
};
pub use db::{AgentMemory, Message, MessageRole, NewMemory, StorageError};
pub use error::AgentError;
pub use llm::{GenerateOptions, Generation, ModelBackend, ProviderError};
pub use store::{CleanupReport, ConversationStore, HistoryScope};
