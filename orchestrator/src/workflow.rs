//! Workflow definitions
//!
//! A workflow is a static list of tasks. Each task is bound to one agent and
//! an execution group; tasks sharing a group run concurrently and groups run
//! in ascending order. Definitions are validated when they enter the engine
//! and never change afterwards.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use agentflow_agent::{AgentError, StorageError};
use serde::{Deserialize, Serialize};

use crate::agent_config::AgentRegistry;
use crate::mapping::{InputMapping, Reference, ValueSource};

/// One step of a workflow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskDescriptor {
    /// Unique within the workflow
    pub name: String,

    /// Agent id (must exist in the registry)
    pub agent: String,

    /// Execution group; lower groups finish before higher ones start
    #[serde(default)]
    pub group: u32,

    /// Publish this task's output under a shared key
    #[serde(default)]
    pub output_key: Option<String>,

    #[serde(default)]
    pub input: InputMapping,
}

impl TaskDescriptor {
    pub fn new(name: impl Into<String>, agent: impl Into<String>, group: u32) -> Self {
        Self {
            name: name.into(),
            agent: agent.into(),
            group,
            output_key: None,
            input: InputMapping::default(),
        }
    }

    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    /// Set the source of the task text
    pub fn with_task(mut self, source: ValueSource) -> Self {
        self.input.task = source;
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, source: ValueSource) -> Self {
        self.input.fields.insert(key.into(), source);
        self
    }

    /// Carry the original input's fields and files into this task
    pub fn inheriting_input(mut self) -> Self {
        self.input.inherit = true;
        self
    }
}

/// A complete workflow definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowDefinition {
    /// Unique identifier for this workflow
    pub id: String,

    /// Display name
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub tasks: Vec<TaskDescriptor>,
}

impl WorkflowDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            tasks: Vec::new(),
        }
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    pub fn with_task(mut self, task: TaskDescriptor) -> Self {
        self.tasks.push(task);
        self
    }

    /// Load workflow from TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self, WorkflowError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| WorkflowError::Io(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Load workflow from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, WorkflowError> {
        toml::from_str(toml_str).map_err(|e| WorkflowError::Parse(e.to_string()))
    }

    /// Tasks grouped by execution group, ascending; declaration order within a group
    pub fn groups(&self) -> BTreeMap<u32, Vec<&TaskDescriptor>> {
        let mut groups: BTreeMap<u32, Vec<&TaskDescriptor>> = BTreeMap::new();
        for task in &self.tasks {
            groups.entry(task.group).or_default().push(task);
        }
        groups
    }

    /// Task names in execution order
    pub fn execution_order(&self) -> Vec<&TaskDescriptor> {
        self.groups().into_values().flatten().collect()
    }

    /// Check the definition against the agent catalogue
    ///
    /// Every reference must point at a task in a strictly earlier group,
    /// which also rules out cycles. An output key referenced by a later task
    /// may not be produced by two tasks of the same group.
    pub fn validate(&self, registry: &AgentRegistry) -> Result<(), WorkflowError> {
        if self.tasks.is_empty() {
            return Err(WorkflowError::EmptyWorkflow(self.id.clone()));
        }

        let mut by_name: HashMap<&str, &TaskDescriptor> = HashMap::new();
        for task in &self.tasks {
            if by_name.insert(task.name.as_str(), task).is_some() {
                return Err(WorkflowError::DuplicateTask {
                    workflow: self.id.clone(),
                    task: task.name.clone(),
                });
            }
            if !registry.contains(&task.agent) {
                return Err(WorkflowError::UnknownAgent(task.agent.clone()));
            }
        }

        for task in &self.tasks {
            for reference in task.input.references() {
                match reference {
                    Reference::Task(name) => match by_name.get(name.as_str()) {
                        None => {
                            return Err(invalid(task, format!("references unknown task '{name}'")))
                        }
                        Some(dep) if dep.group >= task.group => {
                            return Err(invalid(
                                task,
                                format!(
                                    "references task '{name}' in group {} but runs in group {}",
                                    dep.group, task.group
                                ),
                            ))
                        }
                        Some(_) => {}
                    },
                    Reference::Output(key) => self.check_output_reference(task, &key)?,
                    Reference::Malformed(raw) => {
                        return Err(invalid(task, format!("malformed placeholder {raw}")))
                    }
                }
            }
        }

        Ok(())
    }

    fn check_output_reference(&self, task: &TaskDescriptor, key: &str) -> Result<(), WorkflowError> {
        let mut producers_per_group: BTreeMap<u32, usize> = BTreeMap::new();
        for producer in self
            .tasks
            .iter()
            .filter(|t| t.output_key.as_deref() == Some(key) && t.group < task.group)
        {
            *producers_per_group.entry(producer.group).or_default() += 1;
        }

        if producers_per_group.is_empty() {
            return Err(invalid(
                task,
                format!("no earlier task publishes output key '{key}'"),
            ));
        }
        if producers_per_group.values().any(|count| *count > 1) {
            return Err(WorkflowError::AmbiguousMapping {
                task: task.name.clone(),
                key: key.to_string(),
            });
        }
        Ok(())
    }
}

fn invalid(task: &TaskDescriptor, reason: String) -> WorkflowError {
    WorkflowError::InvalidReference {
        task: task.name.clone(),
        reason,
    }
}

/// Errors that can occur with workflows
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Workflow not found: {0}")]
    NotFound(String),

    #[error("Workflow '{0}' has no tasks")]
    EmptyWorkflow(String),

    #[error("Workflow '{workflow}' defines task '{task}' more than once")]
    DuplicateTask { workflow: String, task: String },

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Task '{task}' {reason}")]
    InvalidReference { task: String, reason: String },

    #[error("Task '{task}' reads output key '{key}', which several tasks of one group publish")]
    AmbiguousMapping { task: String, key: String },

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl WorkflowError {
    /// Stable label for error payloads
    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowError::Io(_) => "io_error",
            WorkflowError::Parse(_) => "parse_error",
            WorkflowError::NotFound(_) => "not_found_error",
            WorkflowError::EmptyWorkflow(_)
            | WorkflowError::DuplicateTask { .. }
            | WorkflowError::InvalidReference { .. }
            | WorkflowError::AmbiguousMapping { .. } => "validation_error",
            WorkflowError::UnknownAgent(_) => "unknown_agent_error",
            WorkflowError::Agent(e) => e.kind(),
            WorkflowError::Storage(_) => "storage_error",
        }
    }

    /// HTTP-equivalent status: 4xx for caller mistakes, 5xx for faults
    pub fn http_status(&self) -> u16 {
        match self {
            WorkflowError::NotFound(_) => 404,
            WorkflowError::Parse(_)
            | WorkflowError::EmptyWorkflow(_)
            | WorkflowError::DuplicateTask { .. }
            | WorkflowError::UnknownAgent(_)
            | WorkflowError::InvalidReference { .. }
            | WorkflowError::AmbiguousMapping { .. } => 400,
            WorkflowError::Agent(e) => e.http_status(),
            WorkflowError::Io(_) | WorkflowError::Storage(_) => 500,
        }
    }
}

/// Collection of built-in workflows
pub fn builtin_workflows() -> BTreeMap<String, WorkflowDefinition> {
    let workflows = [
        WorkflowDefinition::new("purchase_approval", "Purchase Approval")
            .with_description("Analyze a purchase request, decide on it, then route the outcome")
            .with_task(
                TaskDescriptor::new("analyze", "process_automation", 0)
                    .inheriting_input()
                    .with_output_key("analysis")
                    .with_task(ValueSource::template(
                        "Analyze this purchase approval request against budget and policy: {input}",
                    )),
            )
            .with_task(
                TaskDescriptor::new("decide", "decision_maker", 1)
                    .with_output_key("decision")
                    .with_task(ValueSource::template(
                        "Decide whether to approve this purchase request: {input}",
                    ))
                    .with_field("analysis", ValueSource::output("analysis")),
            )
            .with_task(
                TaskDescriptor::new("automate", "process_automation", 2)
                    .with_task(ValueSource::literal(
                        "Route the approval decision and automate the follow-up actions.",
                    ))
                    .with_field("request", ValueSource::input())
                    .with_field("decision", ValueSource::task("decide")),
            ),
        WorkflowDefinition::new("customer_complaint", "Customer Complaint Resolution")
            .with_description("Analyze a complaint, check compliance and patterns, then respond")
            .with_task(
                TaskDescriptor::new("analyze_complaint", "customer_service", 0)
                    .inheriting_input()
                    .with_task(ValueSource::template(
                        "Analyze this customer complaint, including sentiment and urgency: {input}",
                    )),
            )
            .with_task(
                TaskDescriptor::new("check_compliance", "compliance_officer", 1).with_task(
                    ValueSource::template(
                        "Check if this complaint involves regulatory issues.\n\n{tasks.analyze_complaint}",
                    ),
                ),
            )
            .with_task(
                TaskDescriptor::new("analyze_patterns", "data_analyst", 1).with_task(
                    ValueSource::template(
                        "Analyze if this complaint is part of a larger pattern.\n\n{tasks.analyze_complaint}",
                    ),
                ),
            )
            .with_task(
                TaskDescriptor::new("respond", "customer_service", 2)
                    .with_task(ValueSource::template(
                        "Draft the response to the customer. Escalate with a compensation offer \
                         if the findings warrant it.\n\nComplaint: {input}",
                    ))
                    .with_field("compliance", ValueSource::task("check_compliance"))
                    .with_field("patterns", ValueSource::task("analyze_patterns")),
            ),
        WorkflowDefinition::new("financial_reporting", "Financial Reporting")
            .with_description("Gather period data, analyze it in parallel, then compile a report")
            .with_task(
                TaskDescriptor::new("gather_data", "financial_analyst", 0)
                    .inheriting_input()
                    .with_task(ValueSource::template(
                        "Gather financial data for the reporting period: {input}",
                    )),
            )
            .with_task(
                TaskDescriptor::new("analyze_trends", "data_analyst", 1)
                    .with_output_key("trends")
                    .with_task(ValueSource::template(
                        "Analyze YoY and QoQ trends in this financial data.\n\n{tasks.gather_data}",
                    )),
            )
            .with_task(
                TaskDescriptor::new("check_compliance", "compliance_officer", 1)
                    .with_output_key("compliance")
                    .with_task(ValueSource::template(
                        "Check financial reporting compliance.\n\n{tasks.gather_data}",
                    )),
            )
            .with_task(
                TaskDescriptor::new("calculate_metrics", "financial_analyst", 1)
                    .with_output_key("metrics")
                    .with_task(ValueSource::template(
                        "Calculate KPIs and financial ratios.\n\n{tasks.gather_data}",
                    )),
            )
            .with_task(
                TaskDescriptor::new("generate_report", "financial_analyst", 2)
                    .with_task(ValueSource::template(
                        "Generate a comprehensive financial report for: {input}",
                    ))
                    .with_field("trends", ValueSource::output("trends"))
                    .with_field("compliance", ValueSource::output("compliance"))
                    .with_field("metrics", ValueSource::output("metrics")),
            ),
        WorkflowDefinition::new("recruitment", "Recruitment")
            .with_description("Screen resumes, analyze and rank candidates, schedule interviews")
            .with_task(
                TaskDescriptor::new("screen_resumes", "hr_recruitment", 0)
                    .inheriting_input()
                    .with_task(ValueSource::template(
                        "Screen resumes against the job requirements: {input}",
                    )),
            )
            .with_task(
                TaskDescriptor::new("analyze_candidates", "data_analyst", 1).with_task(
                    ValueSource::template(
                        "Analyze diversity, skills distribution, and candidate quality.\n\n{tasks.screen_resumes}",
                    ),
                ),
            )
            .with_task(
                TaskDescriptor::new("rank_candidates", "decision_maker", 2)
                    .with_output_key("shortlist")
                    .with_task(ValueSource::template(
                        "Rank candidates and select the top 5 for interviews.\n\n{tasks.analyze_candidates}",
                    )),
            )
            .with_task(
                TaskDescriptor::new("schedule_interviews", "hr_recruitment", 3)
                    .with_task(ValueSource::template(
                        "Create an interview schedule and draft invitations.\n\n{outputs.shortlist}",
                    )),
            ),
        WorkflowDefinition::new("risk_assessment", "Risk Assessment")
            .with_description("Identify risks, assess each dimension in parallel, plan mitigation")
            .with_task(
                TaskDescriptor::new("identify_risks", "compliance_officer", 0)
                    .inheriting_input()
                    .with_task(ValueSource::template(
                        "Identify all potential risk factors: {input}",
                    )),
            )
            .with_task(
                TaskDescriptor::new("analyze_operational", "data_analyst", 1).with_task(
                    ValueSource::template(
                        "Analyze operational risk exposure.\n\n{tasks.identify_risks}",
                    ),
                ),
            )
            .with_task(
                TaskDescriptor::new("analyze_financial", "financial_analyst", 1).with_task(
                    ValueSource::template(
                        "Analyze financial risk exposure and impact.\n\n{tasks.identify_risks}",
                    ),
                ),
            )
            .with_task(
                TaskDescriptor::new("analyze_compliance", "compliance_officer", 1).with_task(
                    ValueSource::template(
                        "Analyze regulatory and compliance risks.\n\n{tasks.identify_risks}",
                    ),
                ),
            )
            .with_task(
                TaskDescriptor::new("create_mitigation", "decision_maker", 2)
                    .with_task(ValueSource::template(
                        "Create a comprehensive risk mitigation strategy for: {input}",
                    ))
                    .with_field("operational", ValueSource::task("analyze_operational"))
                    .with_field("financial", ValueSource::task("analyze_financial"))
                    .with_field("compliance", ValueSource::task("analyze_compliance")),
            ),
    ];

    workflows
        .into_iter()
        .map(|workflow| (workflow.id.clone(), workflow))
        .collect()
}

/// Load custom workflows from a directory
///
/// Files that fail to parse are skipped with a warning.
pub fn load_custom_workflows(
    dir: &Path,
) -> Result<BTreeMap<String, WorkflowDefinition>, WorkflowError> {
    let mut workflows = BTreeMap::new();

    if !dir.exists() {
        return Ok(workflows);
    }

    let entries = std::fs::read_dir(dir).map_err(|e| WorkflowError::Io(e.to_string()))?;

    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "toml") {
            match WorkflowDefinition::from_toml_file(&path) {
                Ok(workflow) => {
                    workflows.insert(workflow.id.clone(), workflow);
                }
                Err(e) => {
                    tracing::warn!("Failed to load workflow from {:?}: {}", path, e);
                }
            }
        }
    }

    Ok(workflows)
}

/// Output keys published by more than one task; later groups replace earlier values
pub fn shared_output_keys(workflow: &WorkflowDefinition) -> HashSet<&str> {
    let mut seen = HashSet::new();
    let mut shared = HashSet::new();
    for key in workflow.tasks.iter().filter_map(|t| t.output_key.as_deref()) {
        if !seen.insert(key) {
            shared.insert(key);
        }
    }
    shared
}
