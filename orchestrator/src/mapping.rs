//! Input mappings
//!
//! Each task declares how its input is derived from the workflow's original
//! input and the outputs of earlier tasks. Sources are typed rules rather
//! than naming conventions:
//!
//! ```toml
//! [tasks.input]
//! task = { from = "template", template = "Decide on: {input}\n\n{tasks.analyze}" }
//!
//! [tasks.input.fields]
//! analysis = { from = "output", key = "analysis" }
//! amount = { from = "input", field = "amount" }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use agentflow_agent::TaskInput;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where a value comes from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "from", rename_all = "snake_case")]
pub enum ValueSource {
    /// A fixed value
    Literal { value: Value },
    /// The original task text, or one of the original input fields
    Input {
        #[serde(default)]
        field: Option<String>,
    },
    /// The output of a named earlier task
    Task { task: String },
    /// The output published under `output_key` by an earlier task
    Output { key: String },
    /// Text with `{input}`, `{input.<field>}`, `{tasks.<name>}` and `{outputs.<key>}` placeholders
    Template { template: String },
}

/// A dependency on an earlier task, as seen by validation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reference {
    Task(String),
    Output(String),
    /// A placeholder that names nothing (e.g. `{tasks}`)
    Malformed(String),
}

impl ValueSource {
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal { value: value.into() }
    }

    pub fn input() -> Self {
        Self::Input { field: None }
    }

    pub fn input_field(field: impl Into<String>) -> Self {
        Self::Input {
            field: Some(field.into()),
        }
    }

    pub fn task(name: impl Into<String>) -> Self {
        Self::Task { task: name.into() }
    }

    pub fn output(key: impl Into<String>) -> Self {
        Self::Output { key: key.into() }
    }

    pub fn template(template: impl Into<String>) -> Self {
        Self::Template {
            template: template.into(),
        }
    }

    /// Earlier tasks or output keys this source depends on
    pub fn references(&self) -> Vec<Reference> {
        match self {
            ValueSource::Literal { .. } | ValueSource::Input { .. } => Vec::new(),
            ValueSource::Task { task } => vec![Reference::Task(task.clone())],
            ValueSource::Output { key } => vec![Reference::Output(key.clone())],
            ValueSource::Template { template } => placeholders(template)
                .filter_map(|p| match p {
                    Placeholder::Input(_) => None,
                    Placeholder::Task(name) => Some(Reference::Task(name.to_string())),
                    Placeholder::Output(key) => Some(Reference::Output(key.to_string())),
                    Placeholder::Malformed(raw) => Some(Reference::Malformed(raw.to_string())),
                })
                .collect(),
        }
    }
}

/// How a task's input is built
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InputMapping {
    /// Source of the task text
    #[serde(default = "ValueSource::input")]
    pub task: ValueSource,

    /// Extra structured fields, rendered in key order
    #[serde(default)]
    pub fields: BTreeMap<String, ValueSource>,

    /// Start from the original input's fields and files
    #[serde(default)]
    pub inherit: bool,
}

impl Default for InputMapping {
    fn default() -> Self {
        Self {
            task: ValueSource::input(),
            fields: BTreeMap::new(),
            inherit: false,
        }
    }
}

impl InputMapping {
    pub fn references(&self) -> Vec<Reference> {
        std::iter::once(&self.task)
            .chain(self.fields.values())
            .flat_map(ValueSource::references)
            .collect()
    }
}

/// Outputs available to a group, built from every earlier group
#[derive(Debug, Default)]
pub struct ResolutionContext {
    /// task name -> output text of succeeded tasks
    pub task_outputs: HashMap<String, String>,
    /// output_key -> output text of the latest succeeded producer
    pub keyed_outputs: HashMap<String, String>,
}

/// Why a mapping could not be applied
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{0}")]
pub struct ResolveError(pub String);

impl ResolutionContext {
    /// Build the input for one task
    pub fn resolve(
        &self,
        mapping: &InputMapping,
        original: &TaskInput,
    ) -> Result<TaskInput, ResolveError> {
        let task = value_text(self.value(&mapping.task, original)?);

        let mut resolved = if mapping.inherit {
            TaskInput {
                task,
                fields: original.fields.clone(),
                files: original.files.clone(),
            }
        } else {
            TaskInput::from_task(task)
        };

        for (key, source) in &mapping.fields {
            resolved.fields.insert(key.clone(), self.value(source, original)?);
        }

        if resolved.task.trim().is_empty() {
            return Err(ResolveError("resolved task text is empty".to_string()));
        }
        Ok(resolved)
    }

    fn value(&self, source: &ValueSource, original: &TaskInput) -> Result<Value, ResolveError> {
        match source {
            ValueSource::Literal { value } => Ok(value.clone()),
            ValueSource::Input { field: None } => Ok(Value::String(original.task.clone())),
            ValueSource::Input { field: Some(field) } => input_field(original, field).cloned(),
            ValueSource::Task { task } => self.task_output(task).map(|s| Value::String(s.to_string())),
            ValueSource::Output { key } => self.keyed_output(key).map(|s| Value::String(s.to_string())),
            ValueSource::Template { template } => {
                self.render(template, original).map(Value::String)
            }
        }
    }

    fn task_output(&self, task: &str) -> Result<&str, ResolveError> {
        self.task_outputs
            .get(task)
            .map(String::as_str)
            .ok_or_else(|| ResolveError(format!("task '{task}' did not produce an output")))
    }

    fn keyed_output(&self, key: &str) -> Result<&str, ResolveError> {
        self.keyed_outputs
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| ResolveError(format!("no output was published under '{key}'")))
    }

    fn render(&self, template: &str, original: &TaskInput) -> Result<String, ResolveError> {
        let mut out = String::with_capacity(template.len());
        let mut last = 0;

        for captures in PLACEHOLDER_RE.captures_iter(template) {
            let Some(whole) = captures.get(0) else { continue };
            out.push_str(&template[last..whole.start()]);
            last = whole.end();

            let text = match classify(&captures) {
                Placeholder::Input(None) => original.task.clone(),
                Placeholder::Input(Some(field)) => value_text(input_field(original, field)?.clone()),
                Placeholder::Task(name) => self.task_output(name)?.to_string(),
                Placeholder::Output(key) => self.keyed_output(key)?.to_string(),
                Placeholder::Malformed(raw) => {
                    return Err(ResolveError(format!("malformed placeholder {raw}")))
                }
            };
            out.push_str(&text);
        }

        out.push_str(&template[last..]);
        Ok(out)
    }
}

fn input_field<'a>(original: &'a TaskInput, field: &str) -> Result<&'a Value, ResolveError> {
    original
        .fields
        .get(field)
        .ok_or_else(|| ResolveError(format!("input field '{field}' is missing")))
}

fn value_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

enum Placeholder<'t> {
    Input(Option<&'t str>),
    Task(&'t str),
    Output(&'t str),
    Malformed(&'t str),
}

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{(input|tasks|outputs)(?:\.([A-Za-z0-9_\-]+))?\}").expect("Invalid placeholder regex")
});

fn classify<'t>(captures: &regex::Captures<'t>) -> Placeholder<'t> {
    let raw = captures.get(0).map_or("", |m| m.as_str());
    let kind = captures.get(1).map_or("", |m| m.as_str());
    let name = captures.get(2).map(|m| m.as_str());

    match (kind, name) {
        ("input", name) => Placeholder::Input(name),
        ("tasks", Some(name)) => Placeholder::Task(name),
        ("outputs", Some(key)) => Placeholder::Output(key),
        _ => Placeholder::Malformed(raw),
    }
}

fn placeholders(template: &str) -> impl Iterator<Item = Placeholder<'_>> {
    PLACEHOLDER_RE
        .captures_iter(template)
        .map(|captures| classify(&captures))
}
