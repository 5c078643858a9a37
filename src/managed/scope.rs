//! Scoped session state
//!
//! Keys prefixed with `user:` belong to the user and are visible from every
//! session that user opens. All other keys belong to the session alone.

use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Prefix marking a key as shared across all of a user's sessions
pub const USER_PREFIX: &str = "user:";

/// Pending state writes, keyed like the state itself
pub type StateDelta = Map<String, Value>;

pub fn is_user_key(key: &str) -> bool {
    key.starts_with(USER_PREFIX)
}

/// Split a delta into (session-scoped, user-scoped) halves
pub fn split_delta(delta: &StateDelta) -> (StateDelta, StateDelta) {
    delta
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .partition(|(k, _)| !is_user_key(k))
}

#[derive(Debug, Default)]
struct View {
    base: Map<String, Value>,
    delta: StateDelta,
}

/// State handed to a tool for one call.
///
/// Reads see the merged session and user state plus anything written during
/// the call. Writes are buffered until the caller takes the delta.
#[derive(Debug, Clone, Default)]
pub struct ScopedState {
    view: Arc<Mutex<View>>,
}

impl ScopedState {
    pub fn new(base: Map<String, Value>) -> Self {
        Self {
            view: Arc::new(Mutex::new(View {
                base,
                delta: StateDelta::new(),
            })),
        }
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        let view = self.view.lock().await;
        view.delta.get(key).or_else(|| view.base.get(key)).cloned()
    }

    pub async fn set(&self, key: impl Into<String>, value: Value) {
        self.view.lock().await.delta.insert(key.into(), value);
    }

    /// Drain the buffered writes
    pub async fn take_delta(&self) -> StateDelta {
        std::mem::take(&mut self.view.lock().await.delta)
    }
}
