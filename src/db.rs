//! Database module
//!
//! The graph strategy uses two SQLite files: the durable user store (one row
//! per user) and the checkpoint store (session snapshots per thread). The
//! session-scoped strategy keeps everything in a third file.

mod checkpoints;
mod sessions;
mod users;

pub use checkpoints::{Checkpoint, CheckpointDatabase};
pub use sessions::{ManagedSession, SessionDatabase, SessionKey};
pub use users::UserDatabase;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Default file name of the durable user database
pub const USER_DB_FILE: &str = "user_data.db";
/// Default file name of the checkpoint database
pub const CHECKPOINT_DB_FILE: &str = "checkpoints.db";
/// Default file name of the session-scoped store
pub const SESSION_DB_FILE: &str = "agent_session_data.db";

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Checkpoint for thread {thread_id} is corrupt: {reason}")]
    CorruptCheckpoint { thread_id: String, reason: String },
    #[error("Session {0} already exists")]
    SessionExists(String),
    #[error("Session {0} not found")]
    SessionNotFound(String),
    #[error("Database lock poisoned")]
    Poisoned,
}

pub type DbResult<T> = Result<T, DbError>;

/// Shared connection handle
#[derive(Clone)]
struct Handle {
    conn: Arc<Mutex<Connection>>,
}

impl Handle {
    fn open<P: AsRef<Path>>(path: P, schema: &str) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn, schema)
    }

    fn open_in_memory(schema: &str) -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, schema)
    }

    fn init(conn: Connection, schema: &str) -> DbResult<Self> {
        conn.execute_batch(schema)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }
}

/// Remove database files and their WAL/SHM siblings
pub fn remove_database_files<P: AsRef<Path>>(paths: &[P]) -> std::io::Result<()> {
    for path in paths {
        let path = path.as_ref();
        for suffix in ["", "-shm", "-wal"] {
            let mut name = path.as_os_str().to_owned();
            name.push(suffix);
            let candidate = Path::new(&name);
            if candidate.exists() {
                std::fs::remove_file(candidate)?;
            }
        }
    }
    Ok(())
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
