//! Workflow execution engine
//!
//! Executes multi-agent workflows with:
//! - Execution groups run in ascending order, each one a barrier
//! - Every task of a group spawned before any is awaited
//! - Typed input mappings between tasks
//! - Per-agent model backends
//! - Cooperative cancellation between groups

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use agentflow_agent::agent::DEFAULT_CALL_TIMEOUT;
use agentflow_agent::config::AgentFlowConfig;
use agentflow_agent::{
    Agent, AgentError, AgentResponse, ConversationStore, ModelBackend, RunLink, StorageError,
    TaskInput,
};
use futures_util::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::agent_config::AgentRegistry;
use crate::mapping::ResolutionContext;
use crate::result::{ExecutionBuilder, ExecutionKind, ExecutionResult, TaskError};
use crate::workflow::{builtin_workflows, load_custom_workflows, TaskDescriptor, WorkflowDefinition, WorkflowError};

/// Configuration for the workflow engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bound on each model backend call
    pub call_timeout: Duration,

    /// Whole-run deadline; no further groups start once it passes
    pub run_timeout: Option<Duration>,

    /// Directory for custom workflows
    pub custom_workflows_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            run_timeout: None,
            custom_workflows_dir: None,
        }
    }
}

impl EngineConfig {
    /// Create from the loaded `.agentflow.toml`
    pub fn from_config(config: &AgentFlowConfig) -> Self {
        Self {
            call_timeout: config.llm.timeout(),
            run_timeout: config.engine.run_timeout(),
            custom_workflows_dir: config.engine.resolved_workflows_dir(),
        }
    }
}

type TaskOutcome = (Result<AgentResponse, AgentError>, f64);

/// Workflow execution engine
pub struct WorkflowEngine {
    /// Agent catalogue
    registry: AgentRegistry,

    store: ConversationStore,

    /// Backend used by agents without an override
    backend: Arc<dyn ModelBackend>,

    agent_backends: HashMap<String, Arc<dyn ModelBackend>>,

    config: EngineConfig,

    builtin_workflows: BTreeMap<String, WorkflowDefinition>,

    /// Custom workflows loaded from files
    custom_workflows: BTreeMap<String, WorkflowDefinition>,
}

impl WorkflowEngine {
    /// Create a new workflow engine
    ///
    /// Custom workflows are read from `~/.config/agentflow/workflows`,
    /// `./.agentflow/workflows` and the configured directory, later ones
    /// winning. Definitions that fail validation are skipped.
    pub fn new(
        registry: AgentRegistry,
        store: ConversationStore,
        backend: Arc<dyn ModelBackend>,
        config: EngineConfig,
    ) -> Self {
        let mut dirs_to_scan = Vec::new();
        if let Some(config_dir) = dirs::config_dir() {
            dirs_to_scan.push(config_dir.join("agentflow").join("workflows"));
        }
        if let Ok(cwd) = std::env::current_dir() {
            dirs_to_scan.push(cwd.join(".agentflow").join("workflows"));
        }
        if let Some(ref dir) = config.custom_workflows_dir {
            dirs_to_scan.push(dir.clone());
        }

        let mut custom_workflows = BTreeMap::new();
        for dir in dirs_to_scan {
            match load_custom_workflows(&dir) {
                Ok(workflows) => custom_workflows.extend(workflows),
                Err(e) => tracing::warn!("Failed to load custom workflows from {:?}: {}", dir, e),
            }
        }

        custom_workflows.retain(|id, workflow| {
            match workflow.validate(&registry) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(workflow = %id, "skipping invalid workflow: {}", e);
                    false
                }
            }
        });

        Self {
            registry,
            store,
            backend,
            agent_backends: HashMap::new(),
            config,
            builtin_workflows: builtin_workflows(),
            custom_workflows,
        }
    }

    /// Bind one agent to its own backend
    pub fn with_agent_backend(mut self, agent_id: impl Into<String>, backend: Arc<dyn ModelBackend>) -> Self {
        self.agent_backends.insert(agent_id.into(), backend);
        self
    }

    /// Add a workflow to the catalogue after validating it
    pub fn with_workflow(mut self, workflow: WorkflowDefinition) -> Result<Self, WorkflowError> {
        workflow.validate(&self.registry)?;
        self.custom_workflows.insert(workflow.id.clone(), workflow);
        Ok(self)
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// Get a workflow by id (checks custom first, then built-in)
    pub fn get_workflow(&self, id: &str) -> Option<&WorkflowDefinition> {
        self.custom_workflows
            .get(id)
            .or_else(|| self.builtin_workflows.get(id))
    }

    /// List all workflows as (definition, is_custom), sorted by id
    pub fn list_workflows(&self) -> Vec<(&WorkflowDefinition, bool)> {
        let mut workflows: Vec<_> = self
            .builtin_workflows
            .iter()
            .filter(|(id, _)| !self.custom_workflows.contains_key(*id))
            .map(|(_, w)| (w, false))
            .collect();

        workflows.extend(self.custom_workflows.values().map(|w| (w, true)));

        workflows.sort_by(|(a, _), (b, _)| a.id.cmp(&b.id));
        workflows
    }

    /// Build a runnable agent for a catalogue id
    pub fn agent(&self, agent_id: &str) -> Result<Agent, WorkflowError> {
        let identity = self
            .registry
            .get(agent_id)
            .ok_or_else(|| WorkflowError::UnknownAgent(agent_id.to_string()))?;

        let backend = self
            .agent_backends
            .get(agent_id)
            .cloned()
            .unwrap_or_else(|| self.backend.clone());

        Ok(Agent::new(identity.clone(), backend, self.store.clone())
            .with_timeout(self.config.call_timeout))
    }

    /// Run a single agent
    ///
    /// Model failures come back as a `failed` result; bad input, unknown
    /// agents and storage faults are errors.
    pub async fn execute_agent(
        &self,
        agent_id: &str,
        input: TaskInput,
    ) -> Result<ExecutionResult, WorkflowError> {
        let agent = self.agent(agent_id)?;
        let builder = ExecutionBuilder::new(ExecutionKind::Agent, agent_id);

        tracing::info!(agent_id, execution_id = %builder.execution_id(), "running agent");

        match agent.execute(input).await {
            Ok(response) => Ok(ExecutionResult::agent_success(agent_id, response, builder)),
            Err(err @ AgentError::ModelInvocation { .. }) => {
                Ok(ExecutionResult::agent_failure(agent_id, &err, builder))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Run a workflow by id
    pub async fn run(&self, workflow_id: &str, input: TaskInput) -> Result<ExecutionResult, WorkflowError> {
        self.run_with_cancel(workflow_id, input, CancellationToken::new())
            .await
    }

    /// Run a workflow by id, stopping before the next group once `cancel` fires
    pub async fn run_with_cancel(
        &self,
        workflow_id: &str,
        input: TaskInput,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult, WorkflowError> {
        let workflow = self
            .get_workflow(workflow_id)
            .ok_or_else(|| WorkflowError::NotFound(workflow_id.to_string()))?
            .clone();

        self.execute(&workflow, input, cancel).await
    }

    /// Execute a workflow
    pub async fn execute(
        &self,
        workflow: &WorkflowDefinition,
        input: TaskInput,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult, WorkflowError> {
        workflow.validate(&self.registry)?;
        input.validate()?;

        let cancel = cancel.child_token();
        let _deadline = self.config.run_timeout.map(|timeout| {
            let stop = CancellationToken::new();
            let (timer_stop, run_cancel) = (stop.clone(), cancel.clone());
            tokio::spawn(async move {
                tokio::select! {
                    _ = timer_stop.cancelled() => {}
                    _ = tokio::time::sleep(timeout) => {
                        tracing::warn!("run deadline of {:?} reached", timeout);
                        run_cancel.cancel();
                    }
                }
            });
            stop.drop_guard()
        });

        let mut builder = ExecutionBuilder::new(ExecutionKind::Workflow, &workflow.id);
        for task in workflow.execution_order() {
            builder.register(&task.name, &task.agent);
        }

        tracing::info!(
            workflow = %workflow.id,
            execution_id = %builder.execution_id(),
            tasks = workflow.tasks.len(),
            "starting workflow"
        );

        let mut context = ResolutionContext::default();

        for (group, tasks) in workflow.groups() {
            if cancel.is_cancelled() {
                tracing::warn!(workflow = %workflow.id, group, "cancelled before group started");
                builder.mark_cancelled();
                break;
            }

            tracing::debug!(workflow = %workflow.id, group, tasks = tasks.len(), "starting group");

            let mut started: Vec<&TaskDescriptor> = Vec::new();
            let mut handles: Vec<JoinHandle<TaskOutcome>> = Vec::new();

            for task in tasks {
                let task_input = match context.resolve(&task.input, &input) {
                    Ok(task_input) => task_input,
                    Err(e) => {
                        tracing::warn!(task = %task.name, "input resolution failed: {}", e);
                        builder.fail(&task.name, TaskError::input_resolution(e.0), 0.0);
                        if let Some(key) = &task.output_key {
                            context.keyed_outputs.remove(key);
                        }
                        continue;
                    }
                };

                let agent = self.agent(&task.agent)?.with_run(RunLink {
                    workflow_id: workflow.id.clone(),
                    execution_id: builder.execution_id().to_string(),
                    task: task.name.clone(),
                });
                builder.mark_running(&task.name);
                started.push(task);
                handles.push(tokio::spawn(async move {
                    let task_started = Instant::now();
                    let outcome = agent.execute(task_input).await;
                    (outcome, task_started.elapsed().as_secs_f64())
                }));
            }

            let mut storage_failure: Option<StorageError> = None;

            for (task, joined) in started.into_iter().zip(join_all(handles).await) {
                match joined {
                    Ok((Ok(response), duration)) => {
                        tracing::info!(task = %task.name, agent = %task.agent, duration, "task succeeded");
                        context
                            .task_outputs
                            .insert(task.name.clone(), response.result.clone());
                        if let Some(key) = &task.output_key {
                            context.keyed_outputs.insert(key.clone(), response.result.clone());
                        }
                        builder.succeed(&task.name, &response, duration);
                    }
                    Ok((Err(err), duration)) => {
                        tracing::warn!(task = %task.name, agent = %task.agent, "task failed: {}", err);
                        builder.fail(&task.name, TaskError::from(&err), duration);
                        if let Some(key) = &task.output_key {
                            context.keyed_outputs.remove(key);
                        }
                        if let AgentError::Storage(e) = err {
                            storage_failure.get_or_insert(e);
                        }
                    }
                    Err(join_err) => {
                        tracing::error!(task = %task.name, "task panicked: {}", join_err);
                        builder.fail(&task.name, TaskError::new("internal_error", join_err.to_string()), 0.0);
                        if let Some(key) = &task.output_key {
                            context.keyed_outputs.remove(key);
                        }
                    }
                }
            }

            if let Some(e) = storage_failure {
                tracing::error!(workflow = %workflow.id, group, "storage failure, aborting run: {}", e);
                return Err(WorkflowError::Storage(e));
            }
        }

        let result = builder.finish();
        tracing::info!(
            workflow = %workflow.id,
            status = %result.status,
            duration_seconds = result.metrics.duration_seconds,
            "workflow finished"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::ValueSource;
    use crate::result::{ExecutionStatus, TaskStatus};
    use crate::workflow::TaskDescriptor;
    use agentflow_agent::llm::MockBackend;

    fn engine() -> WorkflowEngine {
        WorkflowEngine::new(
            AgentRegistry::with_defaults(),
            ConversationStore::in_memory().unwrap(),
            Arc::new(MockBackend::new()),
            EngineConfig::default(),
        )
    }

    #[test]
    fn test_list_workflows() {
        let engine = engine();
        let ids: Vec<_> = engine.list_workflows().iter().map(|(w, _)| w.id.clone()).collect();

        for id in [
            "customer_complaint",
            "financial_reporting",
            "purchase_approval",
            "recruitment",
            "risk_assessment",
        ] {
            assert!(ids.iter().any(|i| i == id), "missing {id}");
        }
    }

    #[test]
    fn test_with_workflow_validates() {
        let bad = WorkflowDefinition::new("bad", "Bad")
            .with_task(TaskDescriptor::new("t", "astrologer", 0));
        assert!(matches!(
            engine().with_workflow(bad),
            Err(WorkflowError::UnknownAgent(_))
        ));
    }

    #[tokio::test]
    async fn test_execute_agent_unknown_agent() {
        let err = engine()
            .execute_agent("astrologer", TaskInput::from_task("hello"))
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 400);
    }

    #[tokio::test]
    async fn test_execute_agent_invalid_input_is_error() {
        let err = engine()
            .execute_agent("data_analyst", TaskInput::from_task(""))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_input_error");
        assert_eq!(err.http_status(), 400);
    }

    #[tokio::test]
    async fn test_run_unknown_workflow() {
        let err = engine()
            .run("nope", TaskInput::from_task("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_run_builtin_workflow_completes() {
        let result = engine()
            .run("risk_assessment", TaskInput::from_task("New supplier in a volatile market"))
            .await
            .unwrap();

        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(result.output.by_task.len(), 5);
        assert_eq!(
            result.output.by_task.keys().last(),
            Some("create_mitigation")
        );
        assert!(result
            .output
            .final_output
            .as_deref()
            .is_some_and(|o| o.starts_with("[Decision Maker]")));
        assert_eq!(result.metrics.per_task.len(), 5);
        assert!(result.metrics.tokens_used > 0);
    }

    #[tokio::test]
    async fn test_output_keys_flow_between_groups() {
        let workflow = WorkflowDefinition::new("keys", "Keys")
            .with_task(
                TaskDescriptor::new("first", "data_analyst", 0)
                    .with_output_key("summary"),
            )
            .with_task(
                TaskDescriptor::new("second", "decision_maker", 1)
                    .with_task(ValueSource::template("Decide using {outputs.summary}")),
            );

        let engine = engine().with_workflow(workflow).unwrap();
        let result = engine.run("keys", TaskInput::from_task("quarterly numbers")).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Completed);

        let history = engine
            .store()
            .get_history("decision_maker", agentflow_agent::HistoryScope::All)
            .await
            .unwrap();
        assert!(history[0].content.contains("[Data Analyst]"));
    }

    #[tokio::test]
    async fn test_precancelled_run_starts_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let engine = engine();
        let result = engine
            .run_with_cancel("purchase_approval", TaskInput::from_task("laptops"), cancel)
            .await
            .unwrap();

        assert!(result.cancelled);
        assert_eq!(result.status, ExecutionStatus::Failed);
        assert!(result
            .output
            .by_task
            .values()
            .all(|r| r.status == TaskStatus::Pending));
        assert!(engine
            .store()
            .get_history("process_automation", agentflow_agent::HistoryScope::All)
            .await
            .unwrap()
            .is_empty());
    }
}
