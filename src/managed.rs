//! Session-scoped strategy
//!
//! The alternative to the graph orchestrator: no phases and no directive
//! built from a durable store. The runner keeps each session's events and
//! state in a `SessionStore`, and the name lives under `user:name`, a key
//! the store shares across all sessions of the same user. The oracle reads
//! it only by calling `get_name`.

pub mod scope;

use crate::db::{ManagedSession, SessionKey};
use crate::llm::LlmError;
use crate::runtime::{ReasoningOracle, SessionStore};
use crate::state_machine::{OracleReply, ToolCall, TurnRecord};
use crate::tools::{ToolContext, ToolRegistry};
use scope::{ScopedState, StateDelta};
use serde_json::Value;
use thiserror::Error;

/// Application namespace for every session the runner creates
pub const APP_NAME: &str = "stateful_session_app";

/// Fixed instruction; unlike the graph directive it never embeds the name
pub const MANAGED_INSTRUCTION: &str = "You are a helpful assistant that remembers the user's \
name. If the user tells you their name, you MUST use the `remember_name` tool. If the user asks \
for their name, check the state. If 'user:name' exists, tell them their name. Otherwise, you \
MUST use the `get_name` tool to retrieve it.";

#[derive(Debug, Error)]
pub enum ManagedError {
    #[error("session store failed: {0}")]
    Session(String),
    #[error("oracle failed: {0}")]
    Oracle(#[from] LlmError),
    #[error("tool {tool} failed: {message}")]
    Tool { tool: String, message: String },
    #[error("no session {session_id}")]
    UnknownSession { session_id: String },
    #[error("turn exceeded {limit} tool rounds")]
    ToolRoundsExceeded { limit: usize },
}

/// Runs turns against sessions held by a `SessionStore`
pub struct ManagedRunner<S: SessionStore, O: ReasoningOracle> {
    sessions: S,
    oracle: O,
    tools: ToolRegistry,
    max_tool_rounds: usize,
}

impl<S: SessionStore, O: ReasoningOracle> ManagedRunner<S, O> {
    pub fn new(sessions: S, oracle: O, max_tool_rounds: usize) -> Self {
        Self {
            sessions,
            oracle,
            tools: ToolRegistry::session_scoped(),
            max_tool_rounds,
        }
    }

    fn key<'a>(user_id: &'a str, session_id: &'a str) -> SessionKey<'a> {
        SessionKey {
            app_name: APP_NAME,
            user_id,
            session_id,
        }
    }

    /// Create an empty session; its state already holds the user's keys
    pub async fn create_session(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<ManagedSession, ManagedError> {
        let session = self
            .sessions
            .create(Self::key(user_id, session_id))
            .await
            .map_err(ManagedError::Session)?;
        tracing::info!(
            user_id = %user_id,
            session_id = %session_id,
            state = ?session.state,
            "Session created"
        );
        Ok(session)
    }

    /// Run one turn on an existing session and return the final text
    pub async fn run_turn(
        &self,
        user_id: &str,
        session_id: &str,
        message: &str,
    ) -> Result<String, ManagedError> {
        let key = Self::key(user_id, session_id);
        let session = self
            .sessions
            .load(key)
            .await
            .map_err(ManagedError::Session)?
            .ok_or_else(|| ManagedError::UnknownSession {
                session_id: session_id.to_string(),
            })?;

        let mut state = session.state;
        let mut history = session.events;
        self.record(key, &mut history, TurnRecord::human(message), &StateDelta::new())
            .await?;

        let mut tool_rounds = 0;
        loop {
            let reply = self.oracle.infer(MANAGED_INSTRUCTION, &history).await?;
            let (text, call) = match reply {
                OracleReply::Text(text) => {
                    self.record(
                        key,
                        &mut history,
                        TurnRecord::assistant(text.clone(), None),
                        &StateDelta::new(),
                    )
                    .await?;
                    tracing::info!(session_id = %session_id, tool_rounds, "Turn complete");
                    return Ok(text);
                }
                OracleReply::ToolCall { text, call } => (text, call),
            };

            if tool_rounds >= self.max_tool_rounds {
                return Err(ManagedError::ToolRoundsExceeded {
                    limit: self.max_tool_rounds,
                });
            }
            tool_rounds += 1;

            self.record(
                key,
                &mut history,
                TurnRecord::assistant(text, Some(call.clone())),
                &StateDelta::new(),
            )
            .await?;
            let delta = self.run_tool(key, &mut history, &state, &call).await?;
            state.extend(delta);
        }
    }

    /// Execute a call against a view of `state` and record its result with
    /// whatever the tool wrote
    async fn run_tool(
        &self,
        key: SessionKey<'_>,
        history: &mut Vec<TurnRecord>,
        state: &serde_json::Map<String, Value>,
        call: &ToolCall,
    ) -> Result<StateDelta, ManagedError> {
        tracing::info!(session_id = %key.session_id, tool = %call.name, "Executing tool");
        let view = ScopedState::new(state.clone());
        let ctx = ToolContext::new(key.session_id).with_state(view.clone());
        let output = self
            .tools
            .execute(&call.name, Value::Object(call.arguments.clone()), ctx)
            .await;

        match output {
            Some(out) if out.success => {
                let delta = view.take_delta().await;
                let record = TurnRecord::tool_result(call, out.output, false);
                self.record(key, history, record, &delta).await?;
                Ok(delta)
            }
            other => {
                let message = other.map_or_else(
                    || format!("unknown tool: {}", call.name),
                    |out| out.output,
                );
                tracing::error!(
                    session_id = %key.session_id,
                    tool = %call.name,
                    error = %message,
                    "Tool failed"
                );
                self.record(
                    key,
                    history,
                    TurnRecord::tool_result(call, &message, true),
                    &StateDelta::new(),
                )
                .await?;
                Err(ManagedError::Tool {
                    tool: call.name.clone(),
                    message,
                })
            }
        }
    }

    async fn record(
        &self,
        key: SessionKey<'_>,
        history: &mut Vec<TurnRecord>,
        record: TurnRecord,
        delta: &StateDelta,
    ) -> Result<(), ManagedError> {
        self.sessions
            .append(key, &record, delta)
            .await
            .map_err(ManagedError::Session)?;
        history.push(record);
        Ok(())
    }
}
