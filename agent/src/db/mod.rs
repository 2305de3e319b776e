//! Database module for conversation persistence
//!
//! Uses SQLite to store conversations, messages and agent memories in ~/.agentflow/conversations.db.
//! Blocking rusqlite calls are moved off the async runtime with
//! `tokio::task::spawn_blocking` (see [`Database::with_conn_async`]).

pub mod conversations;
pub mod memory;
pub mod messages;
pub mod schema;

pub use conversations::{Conversation, ConversationStatus};
pub use memory::{AgentMemory, NewMemory};
pub use messages::{Message, MessageMetadata, MessageRole, NewMessage};

use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Errors raised by the persistence layer
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to open database at {path}: {reason}")]
    Open { path: PathBuf, reason: String },

    #[error("database lock poisoned")]
    Poisoned,

    #[error("storage task failed: {0}")]
    Join(String),

    #[error("could not determine home directory")]
    NoHomeDir,
}

/// Database connection wrapper with thread-safe access
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create the database at the default location (~/.agentflow/conversations.db)
    pub fn open() -> Result<Self, StorageError> {
        let path = Self::default_path()?;
        Self::open_at(path)
    }

    /// Open or create the database at a specific path
    pub fn open_at(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Open {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        }

        let conn = Connection::open(path).map_err(|e| StorageError::Open {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")?;

        let db = Self::from_connection(conn)?;
        tracing::info!("Database opened at {:?}", path);
        Ok(db)
    }

    /// Open an in-memory database (tests and throwaway runs)
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Self::from_connection(conn)
    }

    /// Get the default database path
    pub fn default_path() -> Result<PathBuf, StorageError> {
        let home = dirs::home_dir().ok_or(StorageError::NoHomeDir)?;
        Ok(home.join(".agentflow").join("conversations.db"))
    }

    fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        schema::create_tables(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection while holding the lock
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&Connection) -> Result<T, StorageError>,
    {
        let conn = self.conn.lock().map_err(|_| StorageError::Poisoned)?;
        f(&conn)
    }

    /// Async variant of [`with_conn`](Self::with_conn) running on the blocking pool
    pub async fn with_conn_async<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&Connection) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || db.with_conn(f))
            .await
            .map_err(|e| StorageError::Join(e.to_string()))?
    }
}

/// Wrap a column decoding failure as a rusqlite error so row mappers can use `?`
pub(crate) fn conversion_error<E>(column: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(err))
}
