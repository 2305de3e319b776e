//! Long-term agent memory rows
//!
//! Facts, patterns and preferences an agent keeps across conversations.
//! One row per `(agent_id, memory_type, key)`; storing the same key again
//! updates it in place.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::conversations::{format_timestamp, parse_timestamp};
use super::StorageError;

/// Stored memory
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentMemory {
    pub id: String,
    pub agent_id: String,
    /// fact, pattern, preference, insight, ...
    pub memory_type: String,
    pub key: String,
    pub value: serde_json::Value,
    pub confidence: f64,
    /// Number of updates and recalls since creation
    pub usage_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Conversation that was active when the memory was first stored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_conversation_id: Option<String>,
}

/// Parameters for storing a memory
#[derive(Debug, Clone)]
pub struct NewMemory {
    pub memory_type: String,
    pub key: String,
    pub value: serde_json::Value,
    pub confidence: f64,
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewMemory {
    pub fn new(
        memory_type: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        Self {
            memory_type: memory_type.into(),
            key: key.into(),
            value: value.into(),
            confidence: 1.0,
            expires_at: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    /// Expire `days` days from now
    pub fn expires_in_days(mut self, days: i64) -> Self {
        self.expires_at = Some(Utc::now() + chrono::Duration::days(days));
        self
    }
}

const SELECT_COLUMNS: &str = "id, agent_id, memory_type, key, value, confidence, usage_count, \
     created_at, updated_at, expires_at, source_conversation_id";

fn from_row(row: &Row<'_>) -> rusqlite::Result<AgentMemory> {
    let value: String = row.get(4)?;
    let created_at: String = row.get(7)?;
    let updated_at: String = row.get(8)?;
    let expires_at: Option<String> = row.get(9)?;

    Ok(AgentMemory {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        memory_type: row.get(2)?,
        key: row.get(3)?,
        value: serde_json::from_str(&value).map_err(|e| super::conversion_error(4, e))?,
        confidence: row.get(5)?,
        usage_count: row.get(6)?,
        created_at: parse_timestamp(7, &created_at)?,
        updated_at: parse_timestamp(8, &updated_at)?,
        expires_at: expires_at.map(|s| parse_timestamp(9, &s)).transpose()?,
        source_conversation_id: row.get(10)?,
    })
}

/// Insert or update the memory for `(agent_id, memory_type, key)`
///
/// An update replaces the value, keeps the higher confidence, bumps the
/// usage count and only moves the expiry when a new one is given.
pub fn upsert(
    conn: &Connection,
    agent_id: &str,
    params: &NewMemory,
    source_conversation_id: Option<&str>,
) -> Result<AgentMemory, StorageError> {
    let now = format_timestamp(Utc::now());

    conn.execute(
        r#"
        INSERT INTO agent_memory (id, agent_id, memory_type, key, value, confidence, usage_count,
                                  created_at, updated_at, expires_at, source_conversation_id)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?7, ?8, ?9)
        ON CONFLICT (agent_id, memory_type, key) DO UPDATE SET
            value = excluded.value,
            confidence = MAX(confidence, excluded.confidence),
            usage_count = usage_count + 1,
            updated_at = excluded.updated_at,
            expires_at = COALESCE(excluded.expires_at, expires_at)
        "#,
        (
            Uuid::new_v4().to_string(),
            agent_id,
            &params.memory_type,
            &params.key,
            params.value.to_string(),
            params.confidence,
            &now,
            params.expires_at.map(format_timestamp),
            source_conversation_id,
        ),
    )?;

    let sql = format!(
        "SELECT {SELECT_COLUMNS} FROM agent_memory WHERE agent_id = ?1 AND memory_type = ?2 AND key = ?3"
    );
    Ok(conn.query_row(&sql, (agent_id, &params.memory_type, &params.key), from_row)?)
}

/// Unexpired memories for an agent, most confident first
///
/// `key` matches as a case-insensitive substring. Every returned row has
/// its usage count bumped.
pub fn recall(
    conn: &Connection,
    agent_id: &str,
    memory_type: Option<&str>,
    key: Option<&str>,
    limit: Option<u32>,
) -> Result<Vec<AgentMemory>, StorageError> {
    let sql = format!(
        r#"
        SELECT {SELECT_COLUMNS} FROM agent_memory
        WHERE agent_id = ?1
          AND (?2 IS NULL OR memory_type = ?2)
          AND (?3 IS NULL OR instr(lower(key), lower(?3)) > 0)
          AND (expires_at IS NULL OR expires_at > ?4)
        ORDER BY confidence DESC, updated_at DESC
        LIMIT ?5
        "#
    );

    let tx = conn.unchecked_transaction()?;
    let mut memories = {
        let mut stmt = tx.prepare(&sql)?;
        let rows = stmt
            .query_map(
                (
                    agent_id,
                    memory_type,
                    key,
                    format_timestamp(Utc::now()),
                    limit.map_or(-1, i64::from),
                ),
                from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    for memory in &mut memories {
        tx.execute(
            "UPDATE agent_memory SET usage_count = usage_count + 1 WHERE id = ?1",
            [&memory.id],
        )?;
        memory.usage_count += 1;
    }
    tx.commit()?;

    Ok(memories)
}

/// Delete an agent's memories that expired before `now`
pub fn delete_expired(
    conn: &Connection,
    agent_id: &str,
    now: DateTime<Utc>,
) -> Result<usize, StorageError> {
    Ok(conn.execute(
        "DELETE FROM agent_memory WHERE agent_id = ?1 AND expires_at IS NOT NULL AND expires_at < ?2",
        (agent_id, format_timestamp(now)),
    )?)
}
