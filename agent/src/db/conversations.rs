//! Conversation rows
//!
//! A conversation belongs to exactly one agent. The most recently created
//! row for an agent is that agent's active conversation.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{conversion_error, StorageError};

/// Lifecycle state of a conversation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Active,
    Completed,
    Failed,
}

impl std::fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConversationStatus::Active => write!(f, "active"),
            ConversationStatus::Completed => write!(f, "completed"),
            ConversationStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown conversation status: {0}")]
pub struct ParseStatusError(String);

impl std::str::FromStr for ConversationStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(ConversationStatus::Active),
            "completed" => Ok(ConversationStatus::Completed),
            "failed" => Ok(ConversationStatus::Failed),
            _ => Err(ParseStatusError(s.to_string())),
        }
    }
}

/// Conversation record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub agent_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: ConversationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

const SELECT_COLUMNS: &str = "id, agent_id, started_at, ended_at, status, metadata";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    let started_at: String = row.get(2)?;
    let ended_at: Option<String> = row.get(3)?;
    let status: String = row.get(4)?;
    let metadata: Option<String> = row.get(5)?;

    Ok(Conversation {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        started_at: parse_timestamp(2, &started_at)?,
        ended_at: ended_at
            .map(|s| parse_timestamp(3, &s))
            .transpose()?,
        status: status.parse().map_err(|e| conversion_error(4, e))?,
        metadata: metadata.and_then(|s| serde_json::from_str(&s).ok()),
    })
}

/// Fixed-width RFC 3339 so stored timestamps compare correctly as text
pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(column: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(column, e))
}

/// Insert a new active conversation for `agent_id`
pub fn create(
    conn: &Connection,
    agent_id: &str,
    metadata: Option<serde_json::Value>,
) -> Result<Conversation, StorageError> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    let metadata_json = metadata.as_ref().map(|m| m.to_string());

    conn.execute(
        r#"
        INSERT INTO conversations (id, agent_id, started_at, status, metadata)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
        (
            &id,
            agent_id,
            format_timestamp(now),
            ConversationStatus::Active.to_string(),
            &metadata_json,
        ),
    )?;

    tracing::debug!(agent_id, conversation_id = %id, "conversation created");

    Ok(Conversation {
        id,
        agent_id: agent_id.to_string(),
        started_at: now,
        ended_at: None,
        status: ConversationStatus::Active,
        metadata,
    })
}

/// Get a conversation by ID
pub fn get(conn: &Connection, id: &str) -> Result<Option<Conversation>, StorageError> {
    let sql = format!("SELECT {SELECT_COLUMNS} FROM conversations WHERE id = ?1");
    Ok(conn.query_row(&sql, [id], from_row).optional()?)
}

/// The most recently created conversation for an agent
pub fn latest(conn: &Connection, agent_id: &str) -> Result<Option<Conversation>, StorageError> {
    let sql = format!(
        "SELECT {SELECT_COLUMNS} FROM conversations WHERE agent_id = ?1 ORDER BY rowid DESC LIMIT 1"
    );
    Ok(conn.query_row(&sql, [agent_id], from_row).optional()?)
}

/// List an agent's conversations, newest first
pub fn list(
    conn: &Connection,
    agent_id: &str,
    limit: u32,
) -> Result<Vec<Conversation>, StorageError> {
    let sql = format!(
        "SELECT {SELECT_COLUMNS} FROM conversations WHERE agent_id = ?1 ORDER BY rowid DESC LIMIT ?2"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map((agent_id, limit), from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Mark a conversation as ended. Returns false if it does not exist.
pub fn end(
    conn: &Connection,
    id: &str,
    status: ConversationStatus,
) -> Result<bool, StorageError> {
    let updated = conn.execute(
        "UPDATE conversations SET ended_at = ?1, status = ?2 WHERE id = ?3",
        (format_timestamp(Utc::now()), status.to_string(), id),
    )?;
    Ok(updated > 0)
}

/// Delete an agent's ended conversations (and their messages) that ended before `cutoff`
pub fn delete_ended_before(
    conn: &Connection,
    agent_id: &str,
    cutoff: DateTime<Utc>,
) -> Result<usize, StorageError> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        r#"
        DELETE FROM messages WHERE conversation_id IN (
            SELECT id FROM conversations
            WHERE agent_id = ?1 AND ended_at IS NOT NULL AND ended_at < ?2
        )
        "#,
        (agent_id, format_timestamp(cutoff)),
    )?;
    let deleted = tx.execute(
        "DELETE FROM conversations WHERE agent_id = ?1 AND ended_at IS NOT NULL AND ended_at < ?2",
        (agent_id, format_timestamp(cutoff)),
    )?;
    tx.commit()?;
    Ok(deleted)
}
