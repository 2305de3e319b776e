//! Agent error taxonomy

use crate::db::StorageError;
use crate::llm::ProviderError;

/// Errors returned by [`Agent::execute`](crate::agent::Agent::execute)
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Caller input is unusable. Raised before anything is written.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The backend failed or timed out. The human turn is already stored.
    #[error("model invocation failed for agent '{agent_id}': {source}")]
    ModelInvocation {
        agent_id: String,
        #[source]
        source: ProviderError,
    },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl AgentError {
    /// Stable label used in task error entries
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::InvalidInput(_) => "invalid_input_error",
            AgentError::ModelInvocation { .. } => "model_invocation_error",
            AgentError::Storage(_) => "storage_error",
        }
    }

    /// HTTP-equivalent status for outer layers
    pub fn http_status(&self) -> u16 {
        match self {
            AgentError::InvalidInput(_) => 400,
            AgentError::ModelInvocation { .. } => 502,
            AgentError::Storage(_) => 500,
        }
    }
}
