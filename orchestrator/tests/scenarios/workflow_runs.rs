//! Workflow execution: groups, propagation, partial failure, cancellation

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agentflow_agent::db::Database;
use agentflow_agent::{ConversationStore, HistoryScope, MessageRole, TaskInput};
use orchestrator::mapping::ValueSource;
use orchestrator::result::ExecutionKind;
use orchestrator::{
    ExecutionResult, ExecutionStatus, TaskDescriptor, TaskStatus, WorkflowDefinition, WorkflowError,
};
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

use crate::support::{engine, engine_with, FailingBackend, SlowBackend};

fn error_kind<'a>(result: &'a ExecutionResult, task: &str) -> Option<&'a str> {
    result.output.by_task[task]
        .error
        .as_ref()
        .map(|e| e.kind.as_str())
}

// =============================================================================
// Built-in workflows
// =============================================================================

#[tokio::test]
async fn test_purchase_approval_completes() {
    let (engine, _store) = engine();

    let result = assert_ok!(
        engine
            .run(
                "purchase_approval",
                TaskInput::from_task("Purchase approval for 3 laptops")
                    .with_field("amount", 3600)
                    .with_field("department", "design"),
            )
            .await
    );

    assert_eq!(result.kind, ExecutionKind::Workflow);
    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_eq!(
        result.output.by_task.keys().collect::<Vec<_>>(),
        vec!["analyze", "decide", "automate"]
    );
    assert_eq!(
        result.output.final_output.as_deref(),
        result.output.by_task["automate"].output.as_deref()
    );
}

#[tokio::test]
async fn test_purchase_approval_decision_failure_is_partial() {
    let (engine, _store) = engine();
    let engine = engine.with_agent_backend("decision_maker", Arc::new(FailingBackend));

    let result = assert_ok!(
        engine
            .run("purchase_approval", TaskInput::from_task("Purchase approval for 3 laptops"))
            .await
    );

    assert_eq!(result.status, ExecutionStatus::Partial);
    assert_eq!(result.output.by_task["analyze"].status, TaskStatus::Succeeded);
    assert_eq!(result.output.by_task["decide"].status, TaskStatus::Failed);
    assert_eq!(error_kind(&result, "decide"), Some("model_invocation_error"));
    assert_eq!(result.output.by_task["automate"].status, TaskStatus::Failed);
    assert_eq!(error_kind(&result, "automate"), Some("input_resolution_error"));
    assert_eq!(
        result.output.final_output.as_deref(),
        result.output.by_task["analyze"].output.as_deref()
    );
}

#[tokio::test]
async fn test_all_tasks_failing_is_failed() {
    let (engine, _store) = engine();
    let engine = engine
        .with_agent_backend("process_automation", Arc::new(FailingBackend))
        .with_agent_backend("decision_maker", Arc::new(FailingBackend));

    let result = assert_ok!(
        engine
            .run("purchase_approval", TaskInput::from_task("Purchase approval"))
            .await
    );
    assert_eq!(result.status, ExecutionStatus::Failed);
    assert!(result.output.final_output.is_none());
}

// =============================================================================
// Propagation between groups
// =============================================================================

fn fan_in_workflow() -> WorkflowDefinition {
    WorkflowDefinition::new("fan_in", "Fan In")
        .with_task(TaskDescriptor::new("financials", "financial_analyst", 0))
        .with_task(TaskDescriptor::new("compliance", "compliance_officer", 0))
        .with_task(TaskDescriptor::new("independent", "data_analyst", 1))
        .with_task(
            TaskDescriptor::new("summary", "decision_maker", 1)
                .with_task(ValueSource::template(
                    "Summarize:\n{tasks.financials}\n{tasks.compliance}",
                )),
        )
}

#[tokio::test]
async fn test_group0_failure_fails_dependant_only() {
    let (engine, _store) = engine();
    let engine = assert_ok!(engine
        .with_agent_backend("compliance_officer", Arc::new(FailingBackend))
        .with_workflow(fan_in_workflow()));

    let result = assert_ok!(engine.run("fan_in", TaskInput::from_task("Vendor onboarding")).await);

    assert_eq!(result.status, ExecutionStatus::Partial);
    assert_eq!(result.output.by_task["financials"].status, TaskStatus::Succeeded);
    assert!(result.output.by_task["financials"].output.is_some());
    assert_eq!(result.output.by_task["compliance"].status, TaskStatus::Failed);
    assert_eq!(error_kind(&result, "summary"), Some("input_resolution_error"));
    assert_eq!(result.output.by_task["independent"].status, TaskStatus::Succeeded);
}

#[tokio::test]
async fn test_group_tasks_run_concurrently() {
    let calls = Arc::new(AtomicUsize::new(0));
    let store = ConversationStore::in_memory().expect("store");
    let engine = engine_with(store).with_agent_backend(
        "financial_analyst",
        Arc::new(SlowBackend {
            delay: Duration::from_millis(300),
            calls: calls.clone(),
        }),
    );
    let engine = engine.with_agent_backend(
        "compliance_officer",
        Arc::new(SlowBackend {
            delay: Duration::from_millis(300),
            calls: calls.clone(),
        }),
    );
    let engine = assert_ok!(engine.with_workflow(fan_in_workflow()));

    let result = assert_ok!(engine.run("fan_in", TaskInput::from_task("Vendor onboarding")).await);

    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(result.metrics.duration_seconds < 0.55);
}

#[tokio::test]
async fn test_same_agent_in_one_group_does_not_interleave() {
    let (engine, store) = engine();
    let workflow = WorkflowDefinition::new("twice", "Twice")
        .with_task(TaskDescriptor::new("a", "data_analyst", 0))
        .with_task(TaskDescriptor::new("b", "data_analyst", 0))
        .with_task(TaskDescriptor::new("c", "data_analyst", 0));
    let engine = assert_ok!(engine.with_workflow(workflow));

    let result = assert_ok!(engine.run("twice", TaskInput::from_task("churn by cohort")).await);
    assert_eq!(result.status, ExecutionStatus::Completed);

    let roles: Vec<_> = assert_ok!(store.get_history("data_analyst", HistoryScope::All).await)
        .into_iter()
        .map(|m| m.role)
        .collect();
    assert_eq!(roles.len(), 6);
    for pair in roles.chunks(2) {
        assert_eq!(pair, [MessageRole::Human, MessageRole::Ai]);
    }
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn test_cancel_stops_before_next_group() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (engine, store) = engine();
    let engine = engine.with_agent_backend(
        "process_automation",
        Arc::new(SlowBackend {
            delay: Duration::from_millis(200),
            calls: calls.clone(),
        }),
    );

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let result = assert_ok!(
        engine
            .run_with_cancel("purchase_approval", TaskInput::from_task("Purchase approval"), cancel)
            .await
    );

    assert!(result.cancelled);
    assert_eq!(result.status, ExecutionStatus::Partial);
    // the in-flight group finished and wrote both turns
    assert_eq!(result.output.by_task["analyze"].status, TaskStatus::Succeeded);
    assert_eq!(result.output.by_task["decide"].status, TaskStatus::Pending);
    assert_eq!(result.output.by_task["automate"].status, TaskStatus::Pending);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let decision_history = assert_ok!(store.get_history("decision_maker", HistoryScope::All).await);
    assert!(decision_history.is_empty());
}

#[tokio::test]
async fn test_run_deadline_cancels() {
    let calls = Arc::new(AtomicUsize::new(0));
    let store = ConversationStore::in_memory().expect("store");
    let engine = orchestrator::WorkflowEngine::new(
        orchestrator::AgentRegistry::with_defaults(),
        store,
        Arc::new(SlowBackend {
            delay: Duration::from_millis(200),
            calls: calls.clone(),
        }),
        orchestrator::EngineConfig {
            run_timeout: Some(Duration::from_millis(50)),
            ..Default::default()
        },
    );

    let result = assert_ok!(
        engine
            .run("purchase_approval", TaskInput::from_task("Purchase approval"))
            .await
    );
    assert!(result.cancelled);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Storage failures
// =============================================================================

async fn roles(store: &ConversationStore, agent: &str) -> Vec<MessageRole> {
    assert_ok!(store.get_history(agent, HistoryScope::All).await)
        .into_iter()
        .map(|m| m.role)
        .collect()
}

#[tokio::test]
async fn test_storage_failure_aborts_run() {
    let db = assert_ok!(Database::open_in_memory());
    let engine = engine_with(ConversationStore::new(db.clone()));
    assert_ok!(db.with_conn(|conn| Ok(conn.execute_batch("DROP TABLE messages;")?)));

    let err = assert_err!(
        engine
            .run("purchase_approval", TaskInput::from_task("Purchase approval for 3 laptops"))
            .await
    );

    assert!(matches!(err, WorkflowError::Storage(_)));
    assert_eq!(err.kind(), "storage_error");
    assert_eq!(err.http_status(), 500);
}

#[tokio::test]
async fn test_storage_failure_lets_group_finish() {
    let db = assert_ok!(Database::open_in_memory());
    let store = ConversationStore::new(db.clone());
    let workflow = WorkflowDefinition::new("storage", "Storage")
        .with_task(TaskDescriptor::new("financials", "financial_analyst", 0))
        .with_task(TaskDescriptor::new("compliance", "compliance_officer", 0))
        .with_task(TaskDescriptor::new("metrics", "data_analyst", 0))
        .with_task(TaskDescriptor::new("summary", "decision_maker", 1));
    let engine = assert_ok!(engine_with(store.clone()).with_workflow(workflow));

    // Writes for one agent fail; everyone else can still append
    assert_ok!(db.with_conn(|conn| Ok(conn.execute_batch(
        r#"
        CREATE TRIGGER reject_data_analyst BEFORE INSERT ON messages
        WHEN NEW.agent_id = 'data_analyst'
        BEGIN
            SELECT RAISE(ABORT, 'disk full');
        END;
        "#,
    )?)));

    let err = assert_err!(engine.run("storage", TaskInput::from_task("Quarter close")).await);
    assert!(matches!(err, WorkflowError::Storage(_)));

    assert_eq!(roles(&store, "financial_analyst").await, [MessageRole::Human, MessageRole::Ai]);
    assert_eq!(roles(&store, "compliance_officer").await, [MessageRole::Human, MessageRole::Ai]);
    assert!(roles(&store, "data_analyst").await.is_empty());
    assert!(roles(&store, "decision_maker").await.is_empty());
}

// =============================================================================
// Run links
// =============================================================================

#[tokio::test]
async fn test_task_turns_link_to_their_run() {
    let (engine, store) = engine();

    let result = assert_ok!(
        engine
            .run("purchase_approval", TaskInput::from_task("Purchase approval for 3 laptops"))
            .await
    );

    let history = assert_ok!(store.get_history("decision_maker", HistoryScope::All).await);
    assert_eq!(history.len(), 2);
    for message in &history {
        let extra = message.metadata.extra.as_ref().expect("run link");
        assert_eq!(extra["workflow_id"], "purchase_approval");
        assert_eq!(extra["execution_id"], result.execution_id.to_string());
        assert_eq!(extra["task"], "decide");
    }

    let conversation = assert_ok!(store.get_conversation(&history[0].conversation_id).await)
        .expect("conversation");
    assert_eq!(
        conversation.metadata.as_ref().map(|m| &m["workflow_id"]),
        Some(&serde_json::json!("purchase_approval"))
    );
}

// =============================================================================
// Validation and serialization
// =============================================================================

#[tokio::test]
async fn test_invalid_workflows_rejected() {
    let (engine, _store) = engine();

    let empty = WorkflowDefinition::new("empty", "Empty");
    assert!(matches!(
        engine.execute(&empty, TaskInput::from_task("x"), CancellationToken::new()).await,
        Err(WorkflowError::EmptyWorkflow(_))
    ));

    let forward = WorkflowDefinition::new("forward", "Forward")
        .with_task(TaskDescriptor::new("a", "data_analyst", 0).with_task(ValueSource::task("b")))
        .with_task(TaskDescriptor::new("b", "data_analyst", 1));
    let err = assert_err!(
        engine
            .execute(&forward, TaskInput::from_task("x"), CancellationToken::new())
            .await
    );
    assert_eq!(err.http_status(), 400);

    let bad_input = assert_err!(engine.run("recruitment", TaskInput::from_task("  ")).await);
    assert_eq!(bad_input.kind(), "invalid_input_error");
}

#[tokio::test]
async fn test_result_json_round_trip() {
    let (engine, _store) = engine();
    let engine = engine.with_agent_backend("data_analyst", Arc::new(FailingBackend));

    let result = assert_ok!(
        engine
            .run("customer_complaint", TaskInput::from_task("Customer complaint: broken item"))
            .await
    );
    assert_eq!(result.status, ExecutionStatus::Partial);

    let json = assert_ok!(result.to_json());
    let parsed = assert_ok!(ExecutionResult::from_json(&json));

    assert_eq!(parsed.status, result.status);
    assert_eq!(
        parsed.output.by_task.keys().collect::<Vec<_>>(),
        result.output.by_task.keys().collect::<Vec<_>>()
    );
    assert_eq!(parsed.execution_id, result.execution_id);
    assert_eq!(parsed.output.final_output, result.output.final_output);
}
