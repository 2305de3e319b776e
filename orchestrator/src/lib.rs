//! Multi-agent workflow orchestration layer for agentflow
//!
//! This crate provides:
//! - The built-in agent catalogue with per-agent model selection
//! - Workflow definitions with execution groups and typed input mappings
//! - Workflow engine for executing multi-agent flows
//! - One execution result shape for agent and workflow runs
//!
//! # Example
//!
//! ```rust,ignore
//! use orchestrator::{AgentRegistry, EngineConfig, WorkflowEngine};
//!
//! let engine = WorkflowEngine::new(
//!     AgentRegistry::with_defaults(),
//!     ConversationStore::in_memory()?,
//!     Arc::new(MockBackend::new()),
//!     EngineConfig::default(),
//! );
//!
//! let result = engine
//!     .run("purchase_approval", TaskInput::from_task("3 laptops for the design team"))
//!     .await?;
//! ```

pub mod agent_config;
pub mod engine;
pub mod mapping;
pub mod prompts;
pub mod result;
pub mod workflow;

pub use agent_config::AgentRegistry;
pub use engine::{EngineConfig, WorkflowEngine};
pub use mapping::{InputMapping, ValueSource};
pub use result::{ExecutionResult, ExecutionStatus, TaskReport, TaskStatus};
pub use workflow::{TaskDescriptor, WorkflowDefinition, WorkflowError};

/// Re-export commonly used types from the agent crate
pub use agentflow_agent::{ConversationStore, TaskInput};
