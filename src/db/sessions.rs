//! Session store for the session-scoped strategy
//!
//! Sessions own their event log and session-scoped state. `user:` keys are
//! stored once per (app, user) and merged into every session of that user.

use super::{parse_datetime, DbError, DbResult, Handle};
use crate::managed::scope::{split_delta, StateDelta};
use crate::state_machine::TurnRecord;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde_json::{Map, Value};
use std::path::Path;

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS sessions (
    app_name TEXT NOT NULL,
    user_id TEXT NOT NULL,
    session_id TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    PRIMARY KEY (app_name, user_id, session_id)
);

CREATE TABLE IF NOT EXISTS session_events (
    app_name TEXT NOT NULL,
    user_id TEXT NOT NULL,
    session_id TEXT NOT NULL,
    seq INTEGER NOT NULL,
    record TEXT NOT NULL,
    PRIMARY KEY (app_name, user_id, session_id, seq)
);

CREATE TABLE IF NOT EXISTS user_state (
    app_name TEXT NOT NULL,
    user_id TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (app_name, user_id, key)
);
";

/// Identifies one session
#[derive(Debug, Clone, Copy)]
pub struct SessionKey<'a> {
    pub app_name: &'a str,
    pub user_id: &'a str,
    pub session_id: &'a str,
}

/// A session as seen by the runner: merged state plus event log
#[derive(Debug, Clone, PartialEq)]
pub struct ManagedSession {
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
    /// Session state with the user's `user:` keys merged in
    pub state: Map<String, Value>,
    pub events: Vec<TurnRecord>,
    #[allow(dead_code)] // API completeness
    pub created_at: DateTime<Utc>,
}

/// Thread-safe handle to the session database
#[derive(Clone)]
pub struct SessionDatabase {
    handle: Handle,
}

impl SessionDatabase {
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

    /// Create an empty session; fails if it already exists
    pub fn create_session(&self, key: SessionKey<'_>) -> DbResult<ManagedSession> {
        {
            let conn = self.handle.lock()?;
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO sessions (app_name, user_id, session_id, state, created_at)
                 VALUES (?1, ?2, ?3, '{}', ?4)",
                params![key.app_name, key.user_id, key.session_id, Utc::now().to_rfc3339()],
            )?;
            if inserted == 0 {
                return Err(DbError::SessionExists(key.session_id.to_string()));
            }
        }
        self.get_session(key)?
            .ok_or_else(|| DbError::SessionNotFound(key.session_id.to_string()))
    }

    /// Load a session with user state merged in
    pub fn get_session(&self, key: SessionKey<'_>) -> DbResult<Option<ManagedSession>> {
        let conn = self.handle.lock()?;
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT state, created_at FROM sessions
                 WHERE app_name = ?1 AND user_id = ?2 AND session_id = ?3",
                params![key.app_name, key.user_id, key.session_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((state_json, created_at)) = row else {
            return Ok(None);
        };

        let mut state: Map<String, Value> = serde_json::from_str(&state_json)?;

        let mut stmt = conn.prepare(
            "SELECT key, value FROM user_state WHERE app_name = ?1 AND user_id = ?2",
        )?;
        let user_rows = stmt
            .query_map(params![key.app_name, key.user_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for (k, v) in user_rows {
            state.insert(k, serde_json::from_str(&v)?);
        }

        let mut stmt = conn.prepare(
            "SELECT record FROM session_events
             WHERE app_name = ?1 AND user_id = ?2 AND session_id = ?3 ORDER BY seq ASC",
        )?;
        let events = stmt
            .query_map(params![key.app_name, key.user_id, key.session_id], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?
            .iter()
            .map(|json| serde_json::from_str(json))
            .collect::<Result<Vec<TurnRecord>, _>>()?;

        Ok(Some(ManagedSession {
            app_name: key.app_name.to_string(),
            user_id: key.user_id.to_string(),
            session_id: key.session_id.to_string(),
            state,
            events,
            created_at: parse_datetime(&created_at),
        }))
    }

    /// Append an event and apply its state delta in one transaction
    pub fn append_event(
        &self,
        key: SessionKey<'_>,
        record: &TurnRecord,
        delta: &StateDelta,
    ) -> DbResult<()> {
        let record_json = serde_json::to_string(record)?;
        let (session_delta, user_delta) = split_delta(delta);

        let mut conn = self.handle.lock()?;
        let tx = conn.transaction()?;

        let state_json: Option<String> = tx
            .query_row(
                "SELECT state FROM sessions
                 WHERE app_name = ?1 AND user_id = ?2 AND session_id = ?3",
                params![key.app_name, key.user_id, key.session_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(state_json) = state_json else {
            return Err(DbError::SessionNotFound(key.session_id.to_string()));
        };

        let seq: i64 = tx.query_row(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM session_events
             WHERE app_name = ?1 AND user_id = ?2 AND session_id = ?3",
            params![key.app_name, key.user_id, key.session_id],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO session_events (app_name, user_id, session_id, seq, record)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![key.app_name, key.user_id, key.session_id, seq, record_json],
        )?;

        if !session_delta.is_empty() {
            let mut state: Map<String, Value> = serde_json::from_str(&state_json)?;
            state.extend(session_delta);
            tx.execute(
                "UPDATE sessions SET state = ?4
                 WHERE app_name = ?1 AND user_id = ?2 AND session_id = ?3",
                params![
                    key.app_name,
                    key.user_id,
                    key.session_id,
                    serde_json::to_string(&state)?
                ],
            )?;
        }

        for (k, v) in &user_delta {
            tx.execute(
                "INSERT OR REPLACE INTO user_state (app_name, user_id, key, value)
                 VALUES (?1, ?2, ?3, ?4)",
                params![key.app_name, key.user_id, k, serde_json::to_string(v)?],
            )?;
        }

        tx.commit()?;
        Ok(())
    }
}
