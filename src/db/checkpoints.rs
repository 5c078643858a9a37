//! Checkpoint store: session snapshots keyed by thread id

use super::{parse_datetime, DbError, DbResult, Handle};
use crate::state_machine::{SessionState, TurnPhase};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use std::path::Path;

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS checkpoints (
    thread_id TEXT NOT NULL,
    seq INTEGER NOT NULL,
    phase TEXT NOT NULL,
    user_id TEXT NOT NULL,
    state TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (thread_id, seq)
);

CREATE INDEX IF NOT EXISTS idx_checkpoints_user ON checkpoints(user_id);
";

/// A persisted snapshot of one thread's session state
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub thread_id: String,
    /// Monotonic per thread, starting at 1
    pub seq: i64,
    /// Phase the turn was in when the snapshot was taken
    pub phase: TurnPhase,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
}

/// Thread-safe handle to the checkpoint database
#[derive(Clone)]
pub struct CheckpointDatabase {
    handle: Handle,
}

impl CheckpointDatabase {
    /// Open or create the database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        Ok(Self {
            handle: Handle::open(path, SCHEMA)?,
        })
    }

    /// Open an in-memory database (for testing)
    #[allow(dead_code)] // Used in tests
    pub fn open_in_memory() -> DbResult<Self> {
        Ok(Self {
            handle: Handle::open_in_memory(SCHEMA)?,
        })
    }

    /// Append a snapshot for the thread; returns its sequence number
    pub fn save_checkpoint(
        &self,
        thread_id: &str,
        phase: TurnPhase,
        state: &SessionState,
    ) -> DbResult<i64> {
        let state_json = serde_json::to_string(state)?;
        let mut conn = self.handle.lock()?;
        let tx = conn.transaction()?;

        let seq: i64 = tx.query_row(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM checkpoints WHERE thread_id = ?1",
            params![thread_id],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO checkpoints (thread_id, seq, phase, user_id, state, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                thread_id,
                seq,
                phase.as_str(),
                state.user_id,
                state_json,
                Utc::now().to_rfc3339()
            ],
        )?;
        tx.commit()?;
        Ok(seq)
    }

    /// Latest snapshot for the thread, if any
    pub fn latest_checkpoint(&self, thread_id: &str) -> DbResult<Option<Checkpoint>> {
        let conn = self.handle.lock()?;
        let row = conn
            .query_row(
                "SELECT thread_id, seq, phase, state, created_at FROM checkpoints
                 WHERE thread_id = ?1 ORDER BY seq DESC LIMIT 1",
                params![thread_id],
                read_row,
            )
            .optional()?;
        row.map(parse_checkpoint).transpose()
    }

    /// Full snapshot history for the thread, oldest first
    #[allow(dead_code)] // Used in tests
    pub fn list_checkpoints(&self, thread_id: &str) -> DbResult<Vec<Checkpoint>> {
        let conn = self.handle.lock()?;
        let mut stmt = conn.prepare(
            "SELECT thread_id, seq, phase, state, created_at FROM checkpoints
             WHERE thread_id = ?1 ORDER BY seq ASC",
        )?;
        let rows = stmt
            .query_map(params![thread_id], read_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(parse_checkpoint).collect()
    }

    /// Thread ids that have at least one checkpoint for this user
    #[allow(dead_code)] // API completeness
    pub fn threads_for_user(&self, user_id: &str) -> DbResult<Vec<String>> {
        let conn = self.handle.lock()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT thread_id FROM checkpoints WHERE user_id = ?1 ORDER BY thread_id",
        )?;
        let rows = stmt.query_map(params![user_id], |row| row.get(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }
}

type RawCheckpoint = (String, i64, String, String, String);

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawCheckpoint> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn parse_checkpoint(raw: RawCheckpoint) -> DbResult<Checkpoint> {
    let (thread_id, seq, phase, state_json, created_at) = raw;
    let phase = TurnPhase::parse(&phase).ok_or_else(|| DbError::CorruptCheckpoint {
        thread_id: thread_id.clone(),
        reason: format!("unknown phase {phase:?}"),
    })?;
    let state: SessionState = serde_json::from_str(&state_json)?;
    Ok(Checkpoint {
        thread_id,
        seq,
        phase,
        state,
        created_at: parse_datetime(&created_at),
    })
}
