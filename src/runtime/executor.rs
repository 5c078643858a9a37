//! Turn orchestrator: drives one turn through the state machine

use super::recovery;
use super::traits::{CheckpointStore, ReasoningOracle, ToolExecutor, UserStore};
use crate::llm::LlmError;
use crate::state_machine::{
    start_turn, transition, Effect, Event, SessionState, SessionUpdate, StateError, ToolCall,
    TransitionError, TurnPhase, TurnRecord,
};
use crate::tools::ToolContext;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

/// Default bound on tool executions within one turn
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 3;

/// Tunables for the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Tool executions allowed per turn before the turn fails
    pub max_tool_rounds: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }
}

/// Errors that end a turn
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("session bootstrap failed: {0}")]
    Bootstrap(String),
    #[error("oracle failed: {0}")]
    Oracle(#[from] LlmError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error("tool {tool} failed: {message}")]
    Tool { tool: String, message: String },
    #[error("turn exceeded {limit} tool rounds")]
    ToolRoundsExceeded { limit: usize },
    /// The turn completed but at least one checkpoint write failed
    #[error("checkpoint write failed: {message}")]
    Checkpoint {
        reply: Option<String>,
        message: String,
    },
}

/// Outcome of a successful turn
#[derive(Debug, Clone)]
pub struct TurnReply {
    /// Latest assistant text
    pub text: String,
    /// Session state as of `Done`
    #[allow(dead_code)] // Used in tests
    pub session: SessionState,
}

/// Per-turn bookkeeping that never leaves the orchestrator
struct TurnRun<'a> {
    thread_id: &'a str,
    tool_rounds: usize,
    checkpoint_error: Option<String>,
}

/// Orchestrator generic over its collaborators.
///
/// The oracle is built once by the caller and shared across turns.
pub struct TurnOrchestrator<U, C, O, T>
where
    U: UserStore + 'static,
    C: CheckpointStore,
    O: ReasoningOracle,
    T: ToolExecutor,
{
    users: Arc<U>,
    checkpoints: C,
    oracle: Arc<O>,
    tools: T,
    config: OrchestratorConfig,
    thread_locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl<U, C, O, T> TurnOrchestrator<U, C, O, T>
where
    U: UserStore + 'static,
    C: CheckpointStore,
    O: ReasoningOracle,
    T: ToolExecutor,
{
    pub fn new(
        users: Arc<U>,
        checkpoints: C,
        oracle: Arc<O>,
        tools: T,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            users,
            checkpoints,
            oracle,
            tools,
            config,
            thread_locks: RwLock::new(HashMap::new()),
        }
    }

    /// Run one turn for `message` on `thread_id` and return the reply.
    ///
    /// Turns on the same thread are serialized; distinct threads run
    /// independently.
    pub async fn handle_turn(
        &self,
        user_id: &str,
        thread_id: &str,
        message: &str,
    ) -> Result<TurnReply, TurnError> {
        let lock = self.thread_lock(thread_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.run_turn(user_id, thread_id, message).await
        };
        self.release_thread_lock(thread_id, lock).await;
        result
    }

    async fn run_turn(
        &self,
        user_id: &str,
        thread_id: &str,
        message: &str,
    ) -> Result<TurnReply, TurnError> {
        tracing::info!(user_id = %user_id, thread_id = %thread_id, "Starting turn");
        let mut session = self.open_session(user_id, thread_id, message).await?;
        let mut run = TurnRun {
            thread_id,
            tool_rounds: 0,
            checkpoint_error: None,
        };

        let start = start_turn(&session);
        let mut phase = start.new_phase;
        let mut pending = self
            .execute_effects(&mut run, phase, &mut session, start.effects)
            .await?;

        while !phase.is_terminal() {
            let event = match pending.take() {
                Some(event) => event,
                None if phase.is_internal() => Event::Proceed,
                None => {
                    return Err(TransitionError::InvalidTransition(format!(
                        "phase {phase} is waiting for an event that was never produced"
                    ))
                    .into())
                }
            };

            let result = transition(phase, &session, event)?;
            tracing::debug!(
                thread_id = %thread_id,
                from = %phase,
                to = %result.new_phase,
                "Transition"
            );
            session.merge(result.update)?;
            phase = result.new_phase;
            pending = self
                .execute_effects(&mut run, phase, &mut session, result.effects)
                .await?;
        }

        let text = session.latest_reply().unwrap_or_default().to_string();
        tracing::info!(
            thread_id = %thread_id,
            tool_rounds = run.tool_rounds,
            messages = session.messages.len(),
            "Turn complete"
        );

        match run.checkpoint_error {
            Some(message) => Err(TurnError::Checkpoint {
                reply: Some(text),
                message,
            }),
            None => Ok(TurnReply { text, session }),
        }
    }

    /// Load or bootstrap the thread's session and append the human message
    async fn open_session(
        &self,
        user_id: &str,
        thread_id: &str,
        message: &str,
    ) -> Result<SessionState, TurnError> {
        let checkpoint = self
            .checkpoints
            .load(thread_id)
            .await
            .map_err(TurnError::Bootstrap)?;

        let Some(checkpoint) = checkpoint else {
            let name = self
                .users
                .get_name(user_id)
                .await
                .map_err(TurnError::Bootstrap)?;
            tracing::info!(
                user_id = %user_id,
                thread_id = %thread_id,
                user_name = ?name,
                "New thread, retrieved name from durable store"
            );
            return Ok(SessionState::bootstrap(user_id, name, message)?);
        };

        let mut state = checkpoint.state;
        if !checkpoint.phase.is_terminal() {
            let owner = if state.user_id.is_empty() {
                user_id
            } else {
                state.user_id.as_str()
            };
            let durable = self
                .users
                .get_name(owner)
                .await
                .map_err(TurnError::Bootstrap)?;
            let decision = recovery::resume(state, checkpoint.phase, durable)?;
            tracing::warn!(
                thread_id = %thread_id,
                phase = %checkpoint.phase,
                reason = ?decision.reason,
                "Resuming interrupted thread"
            );
            state = decision.state;
        }

        // user_id is write-once, so a foreign user cannot take over the thread
        state.merge(SessionUpdate {
            messages: vec![TurnRecord::human(message)],
            user_name: None,
            user_id: Some(user_id.to_string()),
        })?;
        Ok(state)
    }

    /// Execute effects in order; returns the event produced, if any
    async fn execute_effects(
        &self,
        run: &mut TurnRun<'_>,
        phase: TurnPhase,
        session: &mut SessionState,
        effects: Vec<Effect>,
    ) -> Result<Option<Event>, TurnError> {
        let mut produced = None;
        for effect in effects {
            match effect {
                Effect::PersistCheckpoint => self.persist(run, phase, session).await,
                Effect::RequestReply { directive } => {
                    let reply = self.oracle.infer(&directive, &session.messages).await?;
                    produced = Some(Event::OracleReplied { reply });
                }
                Effect::ExecuteTool { call } => {
                    produced = Some(self.execute_tool(run, phase, session, call).await?);
                }
            }
        }
        Ok(produced)
    }

    async fn execute_tool(
        &self,
        run: &mut TurnRun<'_>,
        phase: TurnPhase,
        session: &mut SessionState,
        call: ToolCall,
    ) -> Result<Event, TurnError> {
        if run.tool_rounds >= self.config.max_tool_rounds {
            tracing::warn!(
                thread_id = %run.thread_id,
                limit = self.config.max_tool_rounds,
                "Tool round limit reached"
            );
            return Err(TurnError::ToolRoundsExceeded {
                limit: self.config.max_tool_rounds,
            });
        }
        run.tool_rounds += 1;

        tracing::info!(
            thread_id = %run.thread_id,
            tool = %call.name,
            call_id = %call.id,
            "Executing tool"
        );
        let users: Arc<dyn UserStore> = self.users.clone();
        let ctx = ToolContext::new(run.thread_id).with_users(users);
        let output = self
            .tools
            .execute(&call.name, Value::Object(call.arguments.clone()), ctx)
            .await;

        match output {
            Some(out) if out.success => Ok(Event::ToolCompleted {
                call_id: call.id,
                output: out.output,
            }),
            other => {
                let message = other.map_or_else(
                    || format!("unknown tool: {}", call.name),
                    |out| out.output,
                );
                tracing::error!(
                    thread_id = %run.thread_id,
                    tool = %call.name,
                    error = %message,
                    "Tool failed"
                );
                // Close the call so the stored history stays well formed
                session.merge(SessionUpdate::append(TurnRecord::tool_result(
                    &call, &message, true,
                )))?;
                self.persist(run, phase, session).await;
                Err(TurnError::Tool {
                    tool: call.name,
                    message,
                })
            }
        }
    }

    /// Checkpoint failures are recorded and reported at the end of the turn
    async fn persist(&self, run: &mut TurnRun<'_>, phase: TurnPhase, session: &SessionState) {
        if let Err(e) = self.checkpoints.save(run.thread_id, phase, session).await {
            tracing::error!(
                thread_id = %run.thread_id,
                phase = %phase,
                error = %e,
                "Checkpoint write failed"
            );
            run.checkpoint_error.get_or_insert(e);
        }
    }

    async fn thread_lock(&self, thread_id: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.thread_locks.read().await.get(thread_id) {
            return lock.clone();
        }
        self.thread_locks
            .write()
            .await
            .entry(thread_id.to_string())
            .or_default()
            .clone()
    }

    /// Forget the thread's lock once no other turn holds or awaits it
    async fn release_thread_lock(&self, thread_id: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.thread_locks.write().await;
        let tracked = locks
            .get(thread_id)
            .is_some_and(|entry| Arc::ptr_eq(entry, &lock));
        // Owners left: the map and `lock`
        if tracked && Arc::strong_count(&lock) == 2 {
            locks.remove(thread_id);
        }
    }

    #[cfg(test)]
    pub(crate) async fn tracked_threads(&self) -> usize {
        self.thread_locks.read().await.len()
    }
}
