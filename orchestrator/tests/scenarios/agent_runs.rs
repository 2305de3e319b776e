//! Single-agent runs and conversation memory

use std::sync::Arc;

use agentflow_agent::{HistoryScope, MessageRole, TaskInput};
use orchestrator::result::ExecutionKind;
use orchestrator::{ExecutionStatus, TaskStatus};
use tokio_test::{assert_err, assert_ok};

use crate::support::{engine, FailingBackend};

// =============================================================================
// Agent execution
// =============================================================================

#[tokio::test]
async fn test_customer_service_fresh_history() {
    let (engine, _store) = engine();

    let result = assert_ok!(
        engine
            .execute_agent(
                "customer_service",
                TaskInput::from_task("Customer complaint about late delivery"),
            )
            .await
    );

    assert_eq!(result.kind, ExecutionKind::Agent);
    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_eq!(result.output.by_task.len(), 1);
    assert_eq!(
        result.output.by_task["customer_service"].status,
        TaskStatus::Succeeded
    );

    let history = result.output.conversation_history.expect("agent runs carry history");
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, MessageRole::Human);
    assert_eq!(history[1].role, MessageRole::Ai);
    assert_eq!(history[0].conversation_id, history[1].conversation_id);
}

#[tokio::test]
async fn test_failed_backend_appends_only_human_turn() {
    let (engine, store) = engine();
    let engine = engine.with_agent_backend("data_analyst", Arc::new(FailingBackend));

    let result = assert_ok!(
        engine
            .execute_agent("data_analyst", TaskInput::from_task("Q3 revenue by region"))
            .await
    );
    assert_eq!(result.status, ExecutionStatus::Failed);
    let report = &result.output.by_task["data_analyst"];
    assert_eq!(report.status, TaskStatus::Failed);
    assert_eq!(
        report.error.as_ref().map(|e| e.kind.as_str()),
        Some("model_invocation_error")
    );

    let history = assert_ok!(store.get_history("data_analyst", HistoryScope::All).await);
    let humans = history.iter().filter(|m| m.role == MessageRole::Human).count();
    let ais = history.iter().filter(|m| m.role == MessageRole::Ai).count();
    assert_eq!((humans, ais), (1, 0));
}

#[tokio::test]
async fn test_unknown_agent_is_client_error() {
    let (engine, _store) = engine();
    let err = assert_err!(
        engine
            .execute_agent("astrologer", TaskInput::from_task("hello"))
            .await
    );
    assert_eq!(err.kind(), "unknown_agent_error");
    assert_eq!(err.http_status(), 400);
}

// =============================================================================
// Conversation memory
// =============================================================================

#[tokio::test]
async fn test_new_conversations_have_distinct_ids() {
    let (_engine, store) = engine();

    let first = assert_ok!(store.start_new_conversation("hr_recruitment").await);
    let second = assert_ok!(store.start_new_conversation("hr_recruitment").await);
    assert_ne!(first, second);

    assert!(assert_ok!(store.get_conversation(&first).await).is_some());
    assert!(assert_ok!(store.get_conversation(&second).await).is_some());
}

#[tokio::test]
async fn test_current_history_is_suffix_of_all() {
    let (engine, store) = engine();

    for task in ["first question", "second question"] {
        assert_ok!(
            engine
                .execute_agent("financial_analyst", TaskInput::from_task(task))
                .await
        );
    }
    assert_ok!(store.start_new_conversation("financial_analyst").await);
    assert_ok!(
        engine
            .execute_agent("financial_analyst", TaskInput::from_task("third question"))
            .await
    );

    let all = assert_ok!(store.get_history("financial_analyst", HistoryScope::All).await);
    let current = assert_ok!(
        store
            .get_history("financial_analyst", HistoryScope::CurrentOnly)
            .await
    );

    assert!(current.len() < all.len());
    assert_eq!(&all[all.len() - current.len()..], current.as_slice());
    assert!(all.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    assert!(all.windows(2).all(|w| w[0].sequence < w[1].sequence));

    let turns: Vec<_> = current
        .iter()
        .filter(|m| m.role != MessageRole::Separator)
        .map(|m| m.content.as_str())
        .collect();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0], "third question");
}
