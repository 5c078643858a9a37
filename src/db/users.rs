//! Durable user store: `user_id` -> remembered name

use super::{DbResult, Handle};
use rusqlite::{params, OptionalExtension};
use std::path::Path;

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS users (
    user_id TEXT PRIMARY KEY,
    name TEXT
);
";

/// Thread-safe handle to the durable user database
#[derive(Clone)]
pub struct UserDatabase {
    handle: Handle,
}

impl UserDatabase {
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

    /// Remembered name for a user; `None` when no row exists
    pub fn get_user_name(&self, user_id: &str) -> DbResult<Option<String>> {
        let conn = self.handle.lock()?;
        let name = conn
            .query_row(
                "SELECT name FROM users WHERE user_id = ?1",
                params![user_id],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(name.flatten())
    }

    /// Insert or overwrite the name for a user (last writer wins)
    pub fn persist_user_name(&self, user_id: &str, name: &str) -> DbResult<()> {
        let conn = self.handle.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO users (user_id, name) VALUES (?1, ?2)",
            params![user_id, name],
        )?;
        Ok(())
    }
}
