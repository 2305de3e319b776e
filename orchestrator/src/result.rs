//! Execution results
//!
//! One shape for both call paths: a single agent run reports exactly one
//! `by_task` entry named after the agent, a workflow run reports one entry
//! per task in execution order. Overall status is derived from the task
//! statuses and nothing else.

use std::fmt;
use std::marker::PhantomData;
use std::time::Instant;

use agentflow_agent::{AgentError, AgentResponse, Message};
use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Overall outcome of an invocation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// Every task succeeded
    Completed,
    /// At least one task succeeded and at least one did not
    Partial,
    /// No task produced output
    Failed,
}

impl ExecutionStatus {
    /// Derive the overall status from task statuses
    pub fn from_tasks<'a>(statuses: impl IntoIterator<Item = &'a TaskStatus>) -> Self {
        let (mut total, mut succeeded) = (0usize, 0usize);
        for status in statuses {
            total += 1;
            if *status == TaskStatus::Succeeded {
                succeeded += 1;
            }
        }

        match succeeded {
            0 => ExecutionStatus::Failed,
            n if n == total => ExecutionStatus::Completed,
            _ => ExecutionStatus::Partial,
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Completed => write!(f, "completed"),
            ExecutionStatus::Partial => write!(f, "partial"),
            ExecutionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// What was invoked
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionKind {
    Agent,
    Workflow,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// Error attached to a failed task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskError {
    /// Stable label, e.g. `model_invocation_error`
    pub kind: String,
    pub message: String,
}

impl TaskError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn input_resolution(message: impl Into<String>) -> Self {
        Self::new("input_resolution_error", message)
    }
}

impl From<&AgentError> for TaskError {
    fn from(err: &AgentError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

/// Per-task entry in `output.by_task`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskReport {
    pub status: TaskStatus,
    pub agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

impl TaskReport {
    pub fn pending(agent: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Pending,
            agent: agent.into(),
            output: None,
            error: None,
            conversation_id: None,
        }
    }
}

/// String-keyed map that keeps insertion order through serde
#[derive(Debug, Clone, PartialEq)]
pub struct TaskMap<V> {
    entries: Vec<(String, V)>,
}

impl<V> Default for TaskMap<V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<V> TaskMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace in place, keeping the original position
    pub fn insert(&mut self, key: impl Into<String>, value: V) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        self.entries
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.iter().map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V> std::ops::Index<&str> for TaskMap<V> {
    type Output = V;

    fn index(&self, key: &str) -> &V {
        match self.get(key) {
            Some(value) => value,
            None => panic!("no entry for task '{key}'"),
        }
    }
}

impl<V: Serialize> Serialize for TaskMap<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

struct TaskMapVisitor<V>(PhantomData<V>);

impl<'de, V: Deserialize<'de>> Visitor<'de> for TaskMapVisitor<V> {
    type Value = TaskMap<V>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map keyed by task name")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut map = TaskMap::new();
        while let Some((key, value)) = access.next_entry::<String, V>()? {
            map.insert(key, value);
        }
        Ok(map)
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for TaskMap<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(TaskMapVisitor(PhantomData))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionOutput {
    /// Output of the last succeeded task in execution order
    #[serde(rename = "final")]
    pub final_output: Option<String>,

    pub by_task: TaskMap<TaskReport>,

    /// Single-agent runs only: the agent's current conversation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_history: Option<Vec<Message>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionMetrics {
    /// Wall-clock time of the whole invocation
    pub duration_seconds: f64,
    /// Seconds per finished task
    pub per_task: TaskMap<f64>,
    pub tokens_used: u32,
}

/// Unified result of an agent or workflow invocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionResult {
    pub execution_id: Uuid,
    pub kind: ExecutionKind,
    /// Agent id or workflow id
    pub target: String,
    pub status: ExecutionStatus,
    /// Set when cancellation stopped the run before every group started
    #[serde(default)]
    pub cancelled: bool,
    pub output: ExecutionOutput,
    pub metrics: ExecutionMetrics,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl ExecutionResult {
    /// Single-agent success
    pub fn agent_success(agent_id: &str, response: AgentResponse, builder: ExecutionBuilder) -> Self {
        let mut builder = builder;
        let duration = response.meta.duration_seconds;
        builder.register(agent_id, agent_id);
        builder.succeed(agent_id, &response, duration);
        builder.conversation_history = Some(response.conversation_history);
        builder.finish()
    }

    /// Single-agent model failure
    pub fn agent_failure(agent_id: &str, error: &AgentError, builder: ExecutionBuilder) -> Self {
        let mut builder = builder;
        let duration = builder.elapsed();
        builder.register(agent_id, agent_id);
        builder.fail(agent_id, TaskError::from(error), duration);
        builder.finish()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// Accumulates task outcomes while a run is in progress
#[derive(Debug)]
pub struct ExecutionBuilder {
    execution_id: Uuid,
    kind: ExecutionKind,
    target: String,
    started_at: DateTime<Utc>,
    started: Instant,
    tasks: TaskMap<TaskReport>,
    per_task: TaskMap<f64>,
    tokens_used: u32,
    cancelled: bool,
    conversation_history: Option<Vec<Message>>,
}

impl ExecutionBuilder {
    pub fn new(kind: ExecutionKind, target: impl Into<String>) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            kind,
            target: target.into(),
            started_at: Utc::now(),
            started: Instant::now(),
            tasks: TaskMap::new(),
            per_task: TaskMap::new(),
            tokens_used: 0,
            cancelled: false,
            conversation_history: None,
        }
    }

    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    pub fn elapsed(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Add a task as pending; registration order is report order
    pub fn register(&mut self, task: &str, agent: &str) {
        self.tasks.insert(task, TaskReport::pending(agent));
    }

    pub fn mark_running(&mut self, task: &str) {
        if let Some(report) = self.tasks.get_mut(task) {
            report.status = TaskStatus::Running;
        }
    }

    pub fn succeed(&mut self, task: &str, response: &AgentResponse, duration: f64) {
        if let Some(report) = self.tasks.get_mut(task) {
            report.status = TaskStatus::Succeeded;
            report.output = Some(response.result.clone());
            report.error = None;
            report.conversation_id = Some(response.conversation_id.clone());
        }
        self.per_task.insert(task, duration);
        self.tokens_used = self.tokens_used.saturating_add(response.meta.tokens_used);
    }

    pub fn fail(&mut self, task: &str, error: TaskError, duration: f64) {
        if let Some(report) = self.tasks.get_mut(task) {
            report.status = TaskStatus::Failed;
            report.output = None;
            report.error = Some(error);
        }
        self.per_task.insert(task, duration);
    }

    pub fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }

    pub fn finish(self) -> ExecutionResult {
        let status = ExecutionStatus::from_tasks(self.tasks.values().map(|r| &r.status));
        let final_output = self
            .tasks
            .values()
            .filter(|r| r.status == TaskStatus::Succeeded)
            .filter_map(|r| r.output.clone())
            .last();

        ExecutionResult {
            execution_id: self.execution_id,
            kind: self.kind,
            target: self.target,
            status,
            cancelled: self.cancelled,
            output: ExecutionOutput {
                final_output,
                by_task: self.tasks,
                conversation_history: self.conversation_history,
            },
            metrics: ExecutionMetrics {
                duration_seconds: self.started.elapsed().as_secs_f64(),
                per_task: self.per_task,
                tokens_used: self.tokens_used,
            },
            started_at: self.started_at,
            completed_at: Utc::now(),
        }
    }
}
