//! Session state, turn records and the merge reducer

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Name of the single tool that persists a user's name durably
pub const REMEMBER_NAME_TOOL: &str = "remember_user_name_external";

// ============================================================================
// Tool Call Record
// ============================================================================

/// A tool invocation requested by the oracle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Correlation id, echoed by the matching tool result
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: Map<String, Value>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Copy of this call with `user_id` set, overwriting any oracle-supplied value
    #[must_use]
    pub fn with_user_id(&self, user_id: &str) -> Self {
        let mut arguments = self.arguments.clone();
        arguments.insert("user_id".to_string(), Value::String(user_id.to_string()));
        Self {
            id: self.id.clone(),
            name: self.name.clone(),
            arguments,
        }
    }

    /// String argument by key, if present
    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(Value::as_str)
    }

    pub fn is_remember_name(&self) -> bool {
        self.name == REMEMBER_NAME_TOOL
    }
}

// ============================================================================
// Turn Records
// ============================================================================

/// One entry in a thread's message history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum TurnRecord {
    Human {
        id: String,
        text: String,
    },
    System {
        id: String,
        text: String,
    },
    Assistant {
        id: String,
        #[serde(default)]
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_call: Option<ToolCall>,
    },
    ToolResult {
        id: String,
        call_id: String,
        tool_name: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

impl TurnRecord {
    pub fn human(text: impl Into<String>) -> Self {
        TurnRecord::Human {
            id: new_record_id(),
            text: text.into(),
        }
    }

    #[allow(dead_code)] // Constructor for API completeness
    pub fn system(text: impl Into<String>) -> Self {
        TurnRecord::System {
            id: new_record_id(),
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>, tool_call: Option<ToolCall>) -> Self {
        TurnRecord::Assistant {
            id: new_record_id(),
            text: text.into(),
            tool_call,
        }
    }

    pub fn tool_result(call: &ToolCall, content: impl Into<String>, is_error: bool) -> Self {
        TurnRecord::ToolResult {
            id: new_record_id(),
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            content: content.into(),
            is_error,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            TurnRecord::Human { id, .. }
            | TurnRecord::System { id, .. }
            | TurnRecord::Assistant { id, .. }
            | TurnRecord::ToolResult { id, .. } => id,
        }
    }

    /// The tool call carried by an assistant record
    pub fn tool_call(&self) -> Option<&ToolCall> {
        match self {
            TurnRecord::Assistant { tool_call, .. } => tool_call.as_ref(),
            _ => None,
        }
    }
}

fn new_record_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ============================================================================
// Session State
// ============================================================================

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("user_id is write-once: thread belongs to {current:?}, update carried {attempted:?}")]
    UserIdChanged { current: String, attempted: String },
}

/// Per-thread conversation state, owned by the checkpoint store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub messages: Vec<TurnRecord>,
    #[serde(default)]
    pub user_name: Option<String>,
    pub user_id: String,
}

/// Partial state produced by a transition, applied with [`SessionState::merge`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionUpdate {
    pub messages: Vec<TurnRecord>,
    pub user_name: Option<String>,
    pub user_id: Option<String>,
}

impl SessionUpdate {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn append(record: TurnRecord) -> Self {
        Self {
            messages: vec![record],
            ..Self::default()
        }
    }

    pub fn user_name(name: impl Into<String>) -> Self {
        Self {
            user_name: Some(name.into()),
            ..Self::default()
        }
    }

    #[allow(dead_code)] // Used in tests
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.user_name.is_none() && self.user_id.is_none()
    }
}

impl SessionState {
    /// Fresh state for a thread that has never been seen before
    pub fn bootstrap(
        user_id: impl Into<String>,
        user_name: Option<String>,
        message: impl Into<String>,
    ) -> Result<Self, StateError> {
        let mut state = SessionState::default();
        state.merge(SessionUpdate {
            messages: vec![TurnRecord::human(message)],
            user_name,
            user_id: Some(user_id.into()),
        })?;
        Ok(state)
    }

    /// Apply an update.
    ///
    /// Messages whose id is already present replace the record at that
    /// position, everything else is appended in order. `user_name` replaces
    /// when set. `user_id` may be written once.
    pub fn merge(&mut self, update: SessionUpdate) -> Result<(), StateError> {
        if let Some(user_id) = update.user_id {
            if self.user_id.is_empty() {
                self.user_id = user_id;
            } else if self.user_id != user_id {
                return Err(StateError::UserIdChanged {
                    current: self.user_id.clone(),
                    attempted: user_id,
                });
            }
        }

        for record in update.messages {
            match self.messages.iter().position(|m| m.id() == record.id()) {
                Some(idx) => self.messages[idx] = record,
                None => self.messages.push(record),
            }
        }

        if let Some(name) = update.user_name {
            self.user_name = Some(name);
        }

        Ok(())
    }

    pub fn last_message(&self) -> Option<&TurnRecord> {
        self.messages.last()
    }

    /// Text of the latest assistant record
    pub fn latest_reply(&self) -> Option<&str> {
        self.messages.iter().rev().find_map(|m| match m {
            TurnRecord::Assistant { text, .. } => Some(text.as_str()),
            _ => None,
        })
    }

    /// The assistant tool call that produced the latest tool result.
    ///
    /// Walks backward from the newest tool-result record to the assistant
    /// record whose call id matches.
    pub fn call_for_latest_tool_result(&self) -> Option<&ToolCall> {
        let (pos, call_id) = self
            .messages
            .iter()
            .enumerate()
            .rev()
            .find_map(|(i, m)| match m {
                TurnRecord::ToolResult { call_id, .. } => Some((i, call_id)),
                _ => None,
            })?;

        self.messages[..pos]
            .iter()
            .rev()
            .filter_map(TurnRecord::tool_call)
            .find(|call| &call.id == call_id)
    }

    /// Tool call on the last record that never received a result
    pub fn dangling_tool_call(&self) -> Option<&ToolCall> {
        self.last_message().and_then(TurnRecord::tool_call)
    }
}

// ============================================================================
// Turn Phase
// ============================================================================

/// Position of a turn within the orchestration graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    /// Ask the oracle for the next reply
    #[default]
    Reason,
    /// Decide between tool detour and completion
    Route,
    /// Inject the thread's `user_id` into the pending tool call
    Enrich,
    /// Tool call in flight
    Execute,
    /// Reflect the tool's side effect into session state
    Sync,
    /// Turn complete
    Done,
}

impl TurnPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            TurnPhase::Reason => "reason",
            TurnPhase::Route => "route",
            TurnPhase::Enrich => "enrich",
            TurnPhase::Execute => "execute",
            TurnPhase::Sync => "sync",
            TurnPhase::Done => "done",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "reason" => Some(TurnPhase::Reason),
            "route" => Some(TurnPhase::Route),
            "enrich" => Some(TurnPhase::Enrich),
            "execute" => Some(TurnPhase::Execute),
            "sync" => Some(TurnPhase::Sync),
            "done" => Some(TurnPhase::Done),
            _ => None,
        }
    }

    /// Phases that advance without any I/O
    pub fn is_internal(self) -> bool {
        matches!(self, TurnPhase::Route | TurnPhase::Enrich | TurnPhase::Sync)
    }

    pub fn is_terminal(self) -> bool {
        self == TurnPhase::Done
    }
}

impl std::fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
