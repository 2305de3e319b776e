//! Message rows
//!
//! Messages are append-only. `sequence` is assigned by SQLite and gives the
//! total order of an agent's log; timestamps are clamped so they never go
//! backwards in sequence order for the same agent.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::conversations::{format_timestamp, parse_timestamp};
use super::{conversion_error, StorageError};

/// Message role
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    Human,
    Ai,
    /// Synthetic conversation boundary, not a real turn
    Separator,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::Human => write!(f, "human"),
            MessageRole::Ai => write!(f, "ai"),
            MessageRole::Separator => write!(f, "separator"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown message role: {0}")]
pub struct ParseRoleError(String);

impl std::str::FromStr for MessageRole {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "human" => Ok(MessageRole::Human),
            "ai" => Ok(MessageRole::Ai),
            "separator" => Ok(MessageRole::Separator),
            _ => Err(ParseRoleError(s.to_string())),
        }
    }
}

/// Per-message generation details. All fields are optional; human turns
/// and separators usually carry none.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_per_second: Option<f64>,
    /// Seconds spent producing this message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

/// Message record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: String,
    pub agent_id: String,
    pub conversation_id: String,
    pub sequence: i64,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub metadata: MessageMetadata,
}

/// Parameters for appending a message
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub agent_id: String,
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    pub metadata: MessageMetadata,
}

const SELECT_COLUMNS: &str = "sequence, id, agent_id, conversation_id, role, content, created_at, \
     model_used, token_count, tokens_per_second, processing_duration, metadata";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let role: String = row.get(4)?;
    let created_at: String = row.get(6)?;
    let extra: Option<String> = row.get(11)?;

    Ok(Message {
        sequence: row.get(0)?,
        id: row.get(1)?,
        agent_id: row.get(2)?,
        conversation_id: row.get(3)?,
        role: role.parse().map_err(|e| conversion_error(4, e))?,
        content: row.get(5)?,
        timestamp: parse_timestamp(6, &created_at)?,
        metadata: MessageMetadata {
            model_used: row.get(7)?,
            token_count: row.get(8)?,
            tokens_per_second: row.get(9)?,
            processing_duration: row.get(10)?,
            extra: extra.and_then(|s| serde_json::from_str(&s).ok()),
        },
    })
}

/// Append a message. Must be called with the connection lock held so the
/// timestamp read and the insert are not interleaved with another writer.
pub fn insert(conn: &Connection, params: NewMessage) -> Result<Message, StorageError> {
    let id = Uuid::new_v4().to_string();

    let previous: Option<String> = conn
        .query_row(
            "SELECT created_at FROM messages WHERE agent_id = ?1 ORDER BY sequence DESC LIMIT 1",
            [&params.agent_id],
            |row| row.get(0),
        )
        .optional()?;
    let mut timestamp = Utc::now();
    if let Some(previous) = previous {
        timestamp = timestamp.max(parse_timestamp(0, &previous)?);
    }

    let extra_json = params.metadata.extra.as_ref().map(|v| v.to_string());

    conn.execute(
        r#"
        INSERT INTO messages (id, agent_id, conversation_id, role, content, created_at,
                              model_used, token_count, tokens_per_second, processing_duration, metadata)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
        (
            &id,
            &params.agent_id,
            &params.conversation_id,
            params.role.to_string(),
            &params.content,
            format_timestamp(timestamp),
            &params.metadata.model_used,
            params.metadata.token_count,
            params.metadata.tokens_per_second,
            params.metadata.processing_duration,
            &extra_json,
        ),
    )?;
    let sequence = conn.last_insert_rowid();

    Ok(Message {
        id,
        agent_id: params.agent_id,
        conversation_id: params.conversation_id,
        sequence,
        role: params.role,
        content: params.content,
        // Round-trip through storage precision so callers see what reads return
        timestamp: parse_timestamp(0, &format_timestamp(timestamp))?,
        metadata: params.metadata,
    })
}

/// Every message for an agent, in sequence order
pub fn for_agent(conn: &Connection, agent_id: &str) -> Result<Vec<Message>, StorageError> {
    let sql = format!("SELECT {SELECT_COLUMNS} FROM messages WHERE agent_id = ?1 ORDER BY sequence ASC");
    let mut stmt = conn.prepare(&sql)?;
    let messages = stmt
        .query_map([agent_id], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(messages)
}

/// Every message in one conversation, in sequence order
pub fn for_conversation(
    conn: &Connection,
    conversation_id: &str,
) -> Result<Vec<Message>, StorageError> {
    let sql = format!(
        "SELECT {SELECT_COLUMNS} FROM messages WHERE conversation_id = ?1 ORDER BY sequence ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let messages = stmt
        .query_map([conversation_id], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(messages)
}

/// Case-insensitive substring search over an agent's turns, newest first
pub fn search(
    conn: &Connection,
    agent_id: &str,
    query: &str,
    limit: u32,
) -> Result<Vec<Message>, StorageError> {
    let sql = format!(
        r#"
        SELECT {SELECT_COLUMNS} FROM messages
        WHERE agent_id = ?1 AND role != 'separator' AND instr(lower(content), lower(?2)) > 0
        ORDER BY sequence DESC
        LIMIT ?3
        "#
    );
    let mut stmt = conn.prepare(&sql)?;
    let messages = stmt
        .query_map((agent_id, query, limit), from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{conversations, schema};

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::create_tables(&conn).unwrap();
        conn
    }

    fn new_message(agent: &str, conversation: &str, role: MessageRole, content: &str) -> NewMessage {
        NewMessage {
            agent_id: agent.to_string(),
            conversation_id: conversation.to_string(),
            role,
            content: content.to_string(),
            metadata: MessageMetadata::default(),
        }
    }

    #[test]
    fn test_insert_assigns_increasing_sequence() {
        let conn = test_conn();
        let conv = conversations::create(&conn, "a", None).unwrap();
        let first = insert(&conn, new_message("a", &conv.id, MessageRole::Human, "hi")).unwrap();
        let second = insert(&conn, new_message("a", &conv.id, MessageRole::Ai, "hello")).unwrap();
        assert!(second.sequence > first.sequence);
        assert!(second.timestamp >= first.timestamp);

        let all = for_agent(&conn, "a").unwrap();
        assert_eq!(all, vec![first, second]);
    }

    #[test]
    fn test_metadata_persisted() {
        let conn = test_conn();
        let conv = conversations::create(&conn, "a", None).unwrap();
        let mut params = new_message("a", &conv.id, MessageRole::Ai, "answer");
        params.metadata = MessageMetadata {
            model_used: Some("qwen2.5:7b".to_string()),
            token_count: Some(42),
            tokens_per_second: Some(12.5),
            processing_duration: Some(0.75),
            extra: Some(serde_json::json!({"mock": true})),
        };
        insert(&conn, params.clone()).unwrap();

        let stored = &for_conversation(&conn, &conv.id).unwrap()[0];
        assert_eq!(stored.metadata, params.metadata);
    }

    #[test]
    fn test_search_skips_separators() {
        let conn = test_conn();
        let conv = conversations::create(&conn, "a", None).unwrap();
        insert(&conn, new_message("a", &conv.id, MessageRole::Separator, "Invoice marker")).unwrap();
        insert(&conn, new_message("a", &conv.id, MessageRole::Human, "Process INVOICE 17")).unwrap();
        insert(&conn, new_message("a", &conv.id, MessageRole::Ai, "done")).unwrap();

        let hits = search(&conn, "a", "invoice", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].role, MessageRole::Human);
    }

    #[test]
    fn test_role_round_trip() {
        for role in [MessageRole::Human, MessageRole::Ai, MessageRole::Separator] {
            assert_eq!(role.to_string().parse::<MessageRole>().unwrap(), role);
        }
        assert!("tool".parse::<MessageRole>().is_err());
    }
}
