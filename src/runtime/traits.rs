//! Trait abstractions for runtime I/O
//!
//! The orchestrator is generic over these so tests can swap in mocks.

use crate::db::{
    Checkpoint, CheckpointDatabase, ManagedSession, SessionDatabase, SessionKey, UserDatabase,
};
use crate::llm::{
    ContentBlock, LlmError, LlmMessage, LlmRequest, LlmResponse, LlmService, ToolDefinition,
};
use crate::managed::scope::StateDelta;
use crate::state_machine::{OracleReply, SessionState, ToolCall, TurnPhase, TurnRecord};
use crate::tools::{ToolContext, ToolOutput, ToolRegistry};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Durable per-user facts, shared across threads
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Stored name for the user; absence is `None`, not an error
    async fn get_name(&self, user_id: &str) -> Result<Option<String>, String>;

    /// Insert or replace the user's name
    async fn put_name(&self, user_id: &str, name: &str) -> Result<(), String>;
}

/// Per-thread session snapshots
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Latest checkpoint for the thread
    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>, String>;

    /// Snapshot the session at the given phase
    async fn save(&self, thread_id: &str, phase: TurnPhase, state: &SessionState)
        -> Result<(), String>;
}

/// Sessions with user-scoped state, for the session-scoped strategy
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create an empty session; an existing one is an error
    async fn create(&self, key: SessionKey<'_>) -> Result<ManagedSession, String>;

    /// Session with the user's `user:` keys merged into its state
    async fn load(&self, key: SessionKey<'_>) -> Result<Option<ManagedSession>, String>;

    /// Append an event and apply its state delta
    async fn append(
        &self,
        key: SessionKey<'_>,
        record: &TurnRecord,
        delta: &StateDelta,
    ) -> Result<(), String>;
}

/// The reasoning oracle: given a directive and history, reply or request a tool
#[async_trait]
pub trait ReasoningOracle: Send + Sync {
    async fn infer(
        &self,
        directive: &str,
        history: &[TurnRecord],
    ) -> Result<OracleReply, LlmError>;
}

/// Executor for tools
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Execute a tool by name; `None` when the tool is unknown
    async fn execute(&self, name: &str, input: Value, ctx: ToolContext) -> Option<ToolOutput>;

    /// Get tool definitions for the oracle
    fn definitions(&self) -> Vec<ToolDefinition>;
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: UserStore + ?Sized> UserStore for Arc<T> {
    async fn get_name(&self, user_id: &str) -> Result<Option<String>, String> {
        (**self).get_name(user_id).await
    }

    async fn put_name(&self, user_id: &str, name: &str) -> Result<(), String> {
        (**self).put_name(user_id, name).await
    }
}

#[async_trait]
impl<T: CheckpointStore + ?Sized> CheckpointStore for Arc<T> {
    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>, String> {
        (**self).load(thread_id).await
    }

    async fn save(
        &self,
        thread_id: &str,
        phase: TurnPhase,
        state: &SessionState,
    ) -> Result<(), String> {
        (**self).save(thread_id, phase, state).await
    }
}

#[async_trait]
impl<T: SessionStore + ?Sized> SessionStore for Arc<T> {
    async fn create(&self, key: SessionKey<'_>) -> Result<ManagedSession, String> {
        (**self).create(key).await
    }

    async fn load(&self, key: SessionKey<'_>) -> Result<Option<ManagedSession>, String> {
        (**self).load(key).await
    }

    async fn append(
        &self,
        key: SessionKey<'_>,
        record: &TurnRecord,
        delta: &StateDelta,
    ) -> Result<(), String> {
        (**self).append(key, record, delta).await
    }
}

#[async_trait]
impl<T: ReasoningOracle + ?Sized> ReasoningOracle for Arc<T> {
    async fn infer(
        &self,
        directive: &str,
        history: &[TurnRecord],
    ) -> Result<OracleReply, LlmError> {
        (**self).infer(directive, history).await
    }
}

#[async_trait]
impl<T: ToolExecutor + ?Sized> ToolExecutor for Arc<T> {
    async fn execute(&self, name: &str, input: Value, ctx: ToolContext) -> Option<ToolOutput> {
        (**self).execute(name, input, ctx).await
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        (**self).definitions()
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

#[async_trait]
impl UserStore for UserDatabase {
    async fn get_name(&self, user_id: &str) -> Result<Option<String>, String> {
        self.get_user_name(user_id).map_err(|e| e.to_string())
    }

    async fn put_name(&self, user_id: &str, name: &str) -> Result<(), String> {
        self.persist_user_name(user_id, name)
            .map_err(|e| e.to_string())
    }
}

#[async_trait]
impl CheckpointStore for CheckpointDatabase {
    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>, String> {
        self.latest_checkpoint(thread_id).map_err(|e| e.to_string())
    }

    async fn save(
        &self,
        thread_id: &str,
        phase: TurnPhase,
        state: &SessionState,
    ) -> Result<(), String> {
        let seq = self
            .save_checkpoint(thread_id, phase, state)
            .map_err(|e| e.to_string())?;
        tracing::debug!(thread_id = %thread_id, seq, phase = %phase, "Checkpoint saved");
        Ok(())
    }
}

#[async_trait]
impl SessionStore for SessionDatabase {
    async fn create(&self, key: SessionKey<'_>) -> Result<ManagedSession, String> {
        self.create_session(key).map_err(|e| e.to_string())
    }

    async fn load(&self, key: SessionKey<'_>) -> Result<Option<ManagedSession>, String> {
        self.get_session(key).map_err(|e| e.to_string())
    }

    async fn append(
        &self,
        key: SessionKey<'_>,
        record: &TurnRecord,
        delta: &StateDelta,
    ) -> Result<(), String> {
        self.append_event(key, record, delta)
            .map_err(|e| e.to_string())
    }
}

/// Adapter to use an `LlmService` as the reasoning oracle
pub struct LlmOracle {
    llm: Arc<dyn LlmService>,
    tools: Vec<ToolDefinition>,
}

impl LlmOracle {
    /// Bind the service to the tool set the oracle may call
    pub fn new(llm: Arc<dyn LlmService>, tools: Vec<ToolDefinition>) -> Self {
        Self { llm, tools }
    }

    fn build_request(&self, directive: &str, history: &[TurnRecord]) -> LlmRequest {
        LlmRequest {
            system: directive.to_string(),
            messages: history_to_messages(history),
            tools: self.tools.clone(),
            max_tokens: None,
        }
    }
}

#[async_trait]
impl ReasoningOracle for LlmOracle {
    async fn infer(
        &self,
        directive: &str,
        history: &[TurnRecord],
    ) -> Result<OracleReply, LlmError> {
        let request = self.build_request(directive, history);
        tracing::debug!(
            model = %self.llm.model_id(),
            system = %request.system,
            messages = request.messages.len(),
            "Oracle input"
        );

        let response = self.llm.complete(&request).await?;
        let reply = reply_from_response(&response)?;
        tracing::debug!(reply = ?reply, "Oracle output");
        Ok(reply)
    }
}

/// Convert thread history into provider messages
fn history_to_messages(history: &[TurnRecord]) -> Vec<LlmMessage> {
    let mut messages = Vec::with_capacity(history.len());
    for record in history {
        match record {
            TurnRecord::Human { text, .. } | TurnRecord::System { text, .. } => {
                messages.push(LlmMessage::user(vec![ContentBlock::text(text.clone())]));
            }
            TurnRecord::Assistant {
                text, tool_call, ..
            } => {
                let mut content = Vec::new();
                if !text.is_empty() {
                    content.push(ContentBlock::text(text.clone()));
                }
                if let Some(call) = tool_call {
                    content.push(ContentBlock::tool_use(
                        call.id.clone(),
                        call.name.clone(),
                        Value::Object(call.arguments.clone()),
                    ));
                }
                // Providers reject empty turns
                if !content.is_empty() {
                    messages.push(LlmMessage::assistant(content));
                }
            }
            TurnRecord::ToolResult {
                call_id,
                tool_name,
                content,
                is_error,
                ..
            } => {
                messages.push(LlmMessage::user(vec![ContentBlock::tool_result(
                    call_id.clone(),
                    tool_name.clone(),
                    content.clone(),
                    *is_error,
                )]));
            }
        }
    }
    messages
}

/// First tool use wins and keeps any text sent with it
fn reply_from_response(response: &LlmResponse) -> Result<OracleReply, LlmError> {
    let text = response.text();
    if let Some((id, name, input)) = response.tool_uses().into_iter().next() {
        let Value::Object(arguments) = input else {
            return Err(LlmError::malformed(format!(
                "tool call {name} arguments are not an object"
            )));
        };
        return Ok(OracleReply::ToolCall {
            text,
            call: ToolCall::new(id, name, arguments.clone()),
        });
    }

    if text.trim().is_empty() {
        return Err(LlmError::malformed("oracle returned neither text nor a tool call"));
    }
    Ok(OracleReply::Text(text))
}

/// Adapter to use `ToolRegistry` as `ToolExecutor`
pub struct ToolRegistryExecutor {
    registry: ToolRegistry,
}

impl ToolRegistryExecutor {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistryExecutor {
    async fn execute(&self, name: &str, input: Value, ctx: ToolContext) -> Option<ToolOutput> {
        self.registry.execute(name, input, ctx).await
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        self.registry.definitions()
    }
}
