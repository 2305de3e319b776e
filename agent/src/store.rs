//! Conversation Store
//!
//! The single owner of message lifecycle. Agents append turns through it;
//! everything else only reads. Writes go through one SQLite connection so
//! appends are totally ordered, and each agent additionally gets an async
//! turn lock so a human/AI pair is never interleaved with another call for
//! the same agent.
//!
//! Long-term memories (facts and preferences that outlive a conversation)
//! live alongside the log and are keyed by `(agent, type, key)`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::db::{
    conversations, memory, messages, AgentMemory, Conversation, ConversationStatus, Database,
    Message, MessageMetadata, MessageRole, NewMemory, NewMessage, StorageError,
};

/// Content of the separator that opens the current conversation
pub const CURRENT_CONVERSATION_MARKER: &str = "--- Current conversation ---";

/// History scoping modes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum HistoryScope {
    /// Messages from the last current-conversation separator onward
    #[default]
    CurrentOnly,
    /// The complete log, separators included
    All,
}

/// What [`ConversationStore::cleanup_older_than`] removed
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CleanupReport {
    pub conversations_deleted: usize,
    pub memories_deleted: usize,
}

/// Async handle to the conversation log
#[derive(Clone)]
pub struct ConversationStore {
    db: Database,
    turn_locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl ConversationStore {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            turn_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Store backed by a private in-memory database
    pub fn in_memory() -> Result<Self, StorageError> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    /// The per-agent lock that serializes a human/AI turn pair
    pub fn turn_lock(&self, agent_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.turn_locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(agent_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Append one message to an agent's log
    pub async fn append(
        &self,
        agent_id: &str,
        conversation_id: &str,
        role: MessageRole,
        content: &str,
        metadata: MessageMetadata,
    ) -> Result<Message, StorageError> {
        let params = NewMessage {
            agent_id: agent_id.to_string(),
            conversation_id: conversation_id.to_string(),
            role,
            content: content.to_string(),
            metadata,
        };
        let message = self
            .db
            .with_conn_async(move |conn| messages::insert(conn, params))
            .await?;
        tracing::debug!(
            agent_id,
            conversation_id,
            role = %message.role,
            sequence = message.sequence,
            "message appended"
        );
        Ok(message)
    }

    /// Ordered history for an agent
    ///
    /// `CurrentOnly` starts at the last current-conversation separator. When
    /// the agent has no such separator every non-separator message counts as
    /// current.
    pub async fn get_history(
        &self,
        agent_id: &str,
        scope: HistoryScope,
    ) -> Result<Vec<Message>, StorageError> {
        let agent = agent_id.to_string();
        let all = self
            .db
            .with_conn_async(move |conn| messages::for_agent(conn, &agent))
            .await?;

        Ok(match scope {
            HistoryScope::All => all,
            HistoryScope::CurrentOnly => current_suffix(all),
        })
    }

    /// Open a fresh conversation and mark the boundary with a separator
    pub async fn start_new_conversation(&self, agent_id: &str) -> Result<String, StorageError> {
        let agent = agent_id.to_string();
        let conversation = self
            .db
            .with_conn_async(move |conn| {
                let tx = conn.unchecked_transaction()?;
                let conversation = conversations::create(&tx, &agent, None)?;
                messages::insert(
                    &tx,
                    NewMessage {
                        agent_id: agent,
                        conversation_id: conversation.id.clone(),
                        role: MessageRole::Separator,
                        content: CURRENT_CONVERSATION_MARKER.to_string(),
                        metadata: MessageMetadata::default(),
                    },
                )?;
                tx.commit()?;
                Ok(conversation)
            })
            .await?;

        tracing::info!(agent_id, conversation_id = %conversation.id, "new conversation started");
        Ok(conversation.id)
    }

    /// The agent's active conversation, created without a separator if the
    /// agent has never had one
    pub async fn current_conversation(&self, agent_id: &str) -> Result<String, StorageError> {
        self.current_conversation_with(agent_id, None).await
    }

    /// Like [`current_conversation`](Self::current_conversation), recording
    /// `metadata` on the conversation if one has to be created
    pub async fn current_conversation_with(
        &self,
        agent_id: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<String, StorageError> {
        let agent = agent_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                if let Some(existing) = conversations::latest(conn, &agent)? {
                    return Ok(existing.id);
                }
                Ok(conversations::create(conn, &agent, metadata)?.id)
            })
            .await
    }

    pub async fn get_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<Conversation>, StorageError> {
        let id = conversation_id.to_string();
        self.db
            .with_conn_async(move |conn| conversations::get(conn, &id))
            .await
    }

    pub async fn conversation_messages(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<Message>, StorageError> {
        let id = conversation_id.to_string();
        self.db
            .with_conn_async(move |conn| messages::for_conversation(conn, &id))
            .await
    }

    /// Most recent conversations for an agent
    pub async fn list_conversations(
        &self,
        agent_id: &str,
        limit: u32,
    ) -> Result<Vec<Conversation>, StorageError> {
        let agent = agent_id.to_string();
        self.db
            .with_conn_async(move |conn| conversations::list(conn, &agent, limit))
            .await
    }

    pub async fn end_conversation(
        &self,
        conversation_id: &str,
        status: ConversationStatus,
    ) -> Result<bool, StorageError> {
        let id = conversation_id.to_string();
        self.db
            .with_conn_async(move |conn| conversations::end(conn, &id, status))
            .await
    }

    pub async fn search(
        &self,
        agent_id: &str,
        query: &str,
        limit: u32,
    ) -> Result<Vec<Message>, StorageError> {
        let agent = agent_id.to_string();
        let query = query.to_string();
        self.db
            .with_conn_async(move |conn| messages::search(conn, &agent, &query, limit))
            .await
    }

    /// Drop ended conversations older than `days` and every expired memory
    pub async fn cleanup_older_than(
        &self,
        agent_id: &str,
        days: i64,
    ) -> Result<CleanupReport, StorageError> {
        let agent = agent_id.to_string();
        let now = Utc::now();
        let cutoff = now - Duration::days(days);
        let report = self
            .db
            .with_conn_async(move |conn| {
                Ok(CleanupReport {
                    conversations_deleted: conversations::delete_ended_before(conn, &agent, cutoff)?,
                    memories_deleted: memory::delete_expired(conn, &agent, now)?,
                })
            })
            .await?;
        tracing::info!(
            agent_id,
            conversations = report.conversations_deleted,
            memories = report.memories_deleted,
            "old conversations cleaned up"
        );
        Ok(report)
    }

    /// Store or update a long-term memory
    ///
    /// A new memory remembers the agent's active conversation as its source.
    pub async fn store_memory(
        &self,
        agent_id: &str,
        entry: NewMemory,
    ) -> Result<AgentMemory, StorageError> {
        let agent = agent_id.to_string();
        let stored = self
            .db
            .with_conn_async(move |conn| {
                let source = conversations::latest(conn, &agent)?.map(|c| c.id);
                memory::upsert(conn, &agent, &entry, source.as_deref())
            })
            .await?;
        tracing::debug!(
            agent_id,
            memory_type = %stored.memory_type,
            key = %stored.key,
            "memory stored"
        );
        Ok(stored)
    }

    /// Unexpired memories, most confident first
    pub async fn recall_memory(
        &self,
        agent_id: &str,
        memory_type: Option<&str>,
        key: Option<&str>,
    ) -> Result<Vec<AgentMemory>, StorageError> {
        let agent = agent_id.to_string();
        let memory_type = memory_type.map(str::to_string);
        let key = key.map(str::to_string);
        self.db
            .with_conn_async(move |conn| {
                memory::recall(conn, &agent, memory_type.as_deref(), key.as_deref(), None)
            })
            .await
    }

    /// The `limit` most confident unexpired memories
    pub async fn top_memories(
        &self,
        agent_id: &str,
        limit: u32,
    ) -> Result<Vec<AgentMemory>, StorageError> {
        let agent = agent_id.to_string();
        self.db
            .with_conn_async(move |conn| memory::recall(conn, &agent, None, None, Some(limit)))
            .await
    }

    #[cfg(test)]
    pub(crate) fn database(&self) -> &Database {
        &self.db
    }
}

fn current_suffix(all: Vec<Message>) -> Vec<Message> {
    let boundary = all.iter().rposition(|m| {
        m.role == MessageRole::Separator && m.content == CURRENT_CONVERSATION_MARKER
    });

    match boundary {
        Some(start) => all.into_iter().skip(start).collect(),
        None => all
            .into_iter()
            .filter(|m| m.role != MessageRole::Separator)
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ConversationStore {
        ConversationStore::in_memory().unwrap()
    }

    async fn turn(store: &ConversationStore, agent: &str, conv: &str, text: &str) {
        store
            .append(agent, conv, MessageRole::Human, text, MessageMetadata::default())
            .await
            .unwrap();
        store
            .append(agent, conv, MessageRole::Ai, "ok", MessageMetadata::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_empty_history_is_ok_and_empty() {
        let store = store();
        assert!(store.get_history("nobody", HistoryScope::All).await.unwrap().is_empty());
        assert!(store
            .get_history("nobody", HistoryScope::CurrentOnly)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_current_only_starts_at_last_separator() {
        let store = store();
        let first = store.start_new_conversation("a").await.unwrap();
        turn(&store, "a", &first, "old question").await;
        let second = store.start_new_conversation("a").await.unwrap();
        turn(&store, "a", &second, "new question").await;

        let all = store.get_history("a", HistoryScope::All).await.unwrap();
        let current = store.get_history("a", HistoryScope::CurrentOnly).await.unwrap();

        assert_eq!(all.len(), 6);
        assert_eq!(current.len(), 3);
        assert_eq!(current[0].role, MessageRole::Separator);
        assert_eq!(current[1].content, "new question");
        assert!(all.ends_with(&current));
        assert!(all.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[tokio::test]
    async fn test_current_only_without_separator_keeps_all_turns() {
        let store = store();
        let conv = store.current_conversation("a").await.unwrap();
        turn(&store, "a", &conv, "one").await;
        turn(&store, "a", &conv, "two").await;

        let current = store.get_history("a", HistoryScope::CurrentOnly).await.unwrap();
        assert_eq!(current.len(), 4);
        assert!(current.iter().all(|m| m.role != MessageRole::Separator));
    }

    #[tokio::test]
    async fn test_start_new_conversation_twice_gives_distinct_ids() {
        let store = store();
        let first = store.start_new_conversation("a").await.unwrap();
        let second = store.start_new_conversation("a").await.unwrap();
        assert_ne!(first, second);

        let first_msgs = store.conversation_messages(&first).await.unwrap();
        let second_msgs = store.conversation_messages(&second).await.unwrap();
        assert_eq!(first_msgs.len(), 1);
        assert_eq!(second_msgs.len(), 1);
        assert_eq!(first_msgs[0].role, MessageRole::Separator);
        assert!(store.get_conversation(&first).await.unwrap().is_some());
        assert_eq!(store.current_conversation("a").await.unwrap(), second);
    }

    #[tokio::test]
    async fn test_agents_are_isolated() {
        let store = store();
        let a = store.start_new_conversation("a").await.unwrap();
        turn(&store, "a", &a, "for a").await;
        let b = store.current_conversation("b").await.unwrap();
        turn(&store, "b", &b, "for b").await;

        let history = store.get_history("b", HistoryScope::All).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|m| m.agent_id == "b"));
    }

    #[tokio::test]
    async fn test_read_failure_is_storage_error() {
        let store = store();
        store
            .database()
            .with_conn(|conn| Ok(conn.execute_batch("DROP TABLE messages;")?))
            .unwrap();

        let result = store.get_history("a", HistoryScope::CurrentOnly).await;
        assert!(matches!(result, Err(StorageError::Sqlite(_))));
    }

    #[tokio::test]
    async fn test_end_and_list_conversations() {
        let store = store();
        let first = store.start_new_conversation("a").await.unwrap();
        store.start_new_conversation("a").await.unwrap();
        assert!(store
            .end_conversation(&first, ConversationStatus::Completed)
            .await
            .unwrap());

        let listed = store.list_conversations("a", 10).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[1].id, first);
        assert_eq!(listed[1].status, ConversationStatus::Completed);

        assert_eq!(
            store.cleanup_older_than("a", 30).await.unwrap(),
            CleanupReport::default()
        );
    }

    #[tokio::test]
    async fn test_memory_survives_new_conversation() {
        let store = store();
        let first = store.start_new_conversation("a").await.unwrap();
        store
            .store_memory("a", NewMemory::new("fact", "preferred_vendor", "Acme").with_confidence(0.6))
            .await
            .unwrap();
        store.start_new_conversation("a").await.unwrap();
        store
            .store_memory("a", NewMemory::new("preference", "tone", "formal"))
            .await
            .unwrap();

        let recalled = store.recall_memory("a", None, None).await.unwrap();
        assert_eq!(recalled.len(), 2);
        assert_eq!(recalled[0].key, "tone");
        assert_eq!(recalled[1].source_conversation_id.as_deref(), Some(first.as_str()));

        let vendor = store.recall_memory("a", Some("fact"), Some("vendor")).await.unwrap();
        assert_eq!(vendor.len(), 1);
        assert_eq!(vendor[0].value, serde_json::json!("Acme"));

        assert!(store.recall_memory("b", None, None).await.unwrap().is_empty());
        assert_eq!(store.top_memories("a", 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_purges_expired_memories() {
        let store = store();
        store
            .store_memory("a", NewMemory::new("insight", "q3_dip", "seasonal").expires_in_days(-1))
            .await
            .unwrap();
        store
            .store_memory("a", NewMemory::new("insight", "q4_peak", "holidays"))
            .await
            .unwrap();
        store
            .store_memory("b", NewMemory::new("insight", "old", "x").expires_in_days(-1))
            .await
            .unwrap();

        let report = store.cleanup_older_than("a", 30).await.unwrap();
        assert_eq!(report.memories_deleted, 1);
        assert_eq!(report.conversations_deleted, 0);

        let remaining = store.recall_memory("a", None, None).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].key, "q4_peak");
    }

    #[tokio::test]
    async fn test_current_conversation_with_records_metadata_once() {
        let store = store();
        let link = serde_json::json!({"workflow_id": "purchase_approval"});
        let id = store
            .current_conversation_with("a", Some(link.clone()))
            .await
            .unwrap();
        let again = store
            .current_conversation_with("a", Some(serde_json::json!({"workflow_id": "other"})))
            .await
            .unwrap();
        assert_eq!(id, again);

        let conversation = store.get_conversation(&id).await.unwrap().unwrap();
        assert_eq!(conversation.metadata, Some(link));
    }

    #[tokio::test]
    async fn test_turn_lock_is_shared_per_agent() {
        let store = store();
        let a1 = store.turn_lock("a");
        let a2 = store.turn_lock("a");
        let b = store.turn_lock("b");
        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));
    }
}
