//! Task input accepted by [`Agent::execute`](super::Agent::execute)

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AgentError;

/// Already-decoded file content supplied alongside a task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileAttachment {
    pub name: String,
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
    pub content: String,
}

fn default_mime_type() -> String {
    "text/plain".to_string()
}

/// Structured request for one agent turn
///
/// Fields are kept in a `BTreeMap` so prompt rendering is independent of
/// insertion order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskInput {
    pub task: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileAttachment>,
}

impl TaskInput {
    pub fn from_task(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            ..Default::default()
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn with_file(mut self, file: FileAttachment) -> Self {
        self.files.push(file);
        self
    }

    /// Coerce a caller payload into a task input
    ///
    /// Accepts a bare string, or an object carrying `task` (falling back to
    /// `question`). `files` must be a list of attachments; every other key
    /// becomes a field.
    pub fn from_value(value: &Value) -> Result<Self, AgentError> {
        let input = match value {
            Value::String(task) => Self::from_task(task.clone()),
            Value::Object(map) => {
                let task = map
                    .get("task")
                    .or_else(|| map.get("question"))
                    .and_then(coerce_text)
                    .ok_or_else(|| {
                        AgentError::InvalidInput(
                            "input must contain a textual `task` or `question`".to_string(),
                        )
                    })?;

                let files = match map.get("files") {
                    None | Some(Value::Null) => Vec::new(),
                    Some(files) => serde_json::from_value(files.clone()).map_err(|e| {
                        AgentError::InvalidInput(format!("invalid `files`: {e}"))
                    })?,
                };

                let fields = map
                    .iter()
                    .filter(|(key, _)| !matches!(key.as_str(), "task" | "question" | "files"))
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect();

                Self { task, fields, files }
            }
            other => {
                return Err(AgentError::InvalidInput(format!(
                    "expected a string or object, got {}",
                    json_type(other)
                )))
            }
        };

        input.validate()?;
        Ok(input)
    }

    /// Reject inputs with no usable task text
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.task.trim().is_empty() {
            return Err(AgentError::InvalidInput("task must not be empty".to_string()));
        }
        Ok(())
    }
}

fn coerce_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
