//! Mock implementations for testing
//!
//! These mocks enable integration testing of the orchestrator without real I/O.

use super::traits::*;
use crate::db::{Checkpoint, ManagedSession, SessionKey};
use crate::llm::{LlmError, ToolDefinition};
use crate::managed::scope::{split_delta, StateDelta};
use crate::state_machine::{
    OracleReply, SessionState, ToolCall, TurnPhase, TurnRecord, REMEMBER_NAME_TOOL,
};
use crate::tools::{ToolContext, ToolOutput};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

// ============================================================================
// Stores
// ============================================================================

/// Durable user store backed by a map
#[derive(Default)]
pub struct InMemoryUserStore {
    names: Mutex<HashMap<String, String>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(self, user_id: &str, name: &str) -> Self {
        self.names
            .lock()
            .unwrap()
            .insert(user_id.to_string(), name.to_string());
        self
    }

    pub fn name(&self, user_id: &str) -> Option<String> {
        self.names.lock().unwrap().get(user_id).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.names.lock().unwrap().is_empty()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn get_name(&self, user_id: &str) -> Result<Option<String>, String> {
        Ok(self.name(user_id))
    }

    async fn put_name(&self, user_id: &str, name: &str) -> Result<(), String> {
        self.names
            .lock()
            .unwrap()
            .insert(user_id.to_string(), name.to_string());
        Ok(())
    }
}

/// User store whose every call fails
pub struct FailingUserStore;

#[async_trait]
impl UserStore for FailingUserStore {
    async fn get_name(&self, _user_id: &str) -> Result<Option<String>, String> {
        Err("user store unavailable".to_string())
    }

    async fn put_name(&self, _user_id: &str, _name: &str) -> Result<(), String> {
        Err("user store unavailable".to_string())
    }
}

/// Checkpoint store keeping the full per-thread history
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    threads: Mutex<HashMap<String, Vec<Checkpoint>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a checkpoint as if an earlier process had written it
    pub fn seed(&self, thread_id: &str, phase: TurnPhase, state: SessionState) {
        let mut threads = self.threads.lock().unwrap();
        let history = threads.entry(thread_id.to_string()).or_default();
        history.push(Checkpoint {
            thread_id: thread_id.to_string(),
            seq: history.len() as i64 + 1,
            phase,
            state,
            created_at: Utc::now(),
        });
    }

    pub fn history(&self, thread_id: &str) -> Vec<Checkpoint> {
        self.threads
            .lock()
            .unwrap()
            .get(thread_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn latest(&self, thread_id: &str) -> Option<Checkpoint> {
        self.history(thread_id).pop()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>, String> {
        Ok(self.latest(thread_id))
    }

    async fn save(
        &self,
        thread_id: &str,
        phase: TurnPhase,
        state: &SessionState,
    ) -> Result<(), String> {
        self.seed(thread_id, phase, state.clone());
        Ok(())
    }
}

/// Checkpoint store that loads nothing and rejects every write
pub struct FailingCheckpointStore;

#[async_trait]
impl CheckpointStore for FailingCheckpointStore {
    async fn load(&self, _thread_id: &str) -> Result<Option<Checkpoint>, String> {
        Ok(None)
    }

    async fn save(
        &self,
        _thread_id: &str,
        _phase: TurnPhase,
        _state: &SessionState,
    ) -> Result<(), String> {
        Err("disk full".to_string())
    }
}

/// Session store keeping `user:` keys in a per-user map
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<(String, String), ManagedSession>>,
    user_state: Mutex<HashMap<String, Map<String, Value>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session as a caller would load it, user keys merged in
    pub fn session(&self, user_id: &str, session_id: &str) -> Option<ManagedSession> {
        let mut session = self
            .sessions
            .lock()
            .unwrap()
            .get(&(user_id.to_string(), session_id.to_string()))
            .cloned()?;
        if let Some(user) = self.user_state.lock().unwrap().get(user_id) {
            session
                .state
                .extend(user.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        Some(session)
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, key: SessionKey<'_>) -> Result<ManagedSession, String> {
        let id = (key.user_id.to_string(), key.session_id.to_string());
        {
            let mut sessions = self.sessions.lock().unwrap();
            if sessions.contains_key(&id) {
                return Err(format!("session already exists: {}", key.session_id));
            }
            sessions.insert(
                id,
                ManagedSession {
                    app_name: key.app_name.to_string(),
                    user_id: key.user_id.to_string(),
                    session_id: key.session_id.to_string(),
                    state: Map::new(),
                    events: Vec::new(),
                    created_at: Utc::now(),
                },
            );
        }
        self.session(key.user_id, key.session_id)
            .ok_or_else(|| "session vanished".to_string())
    }

    async fn load(&self, key: SessionKey<'_>) -> Result<Option<ManagedSession>, String> {
        Ok(self.session(key.user_id, key.session_id))
    }

    async fn append(
        &self,
        key: SessionKey<'_>,
        record: &TurnRecord,
        delta: &StateDelta,
    ) -> Result<(), String> {
        let (session_delta, user_delta) = split_delta(delta);
        let id = (key.user_id.to_string(), key.session_id.to_string());
        {
            let mut sessions = self.sessions.lock().unwrap();
            let Some(session) = sessions.get_mut(&id) else {
                return Err(format!("session not found: {}", key.session_id));
            };
            session.events.push(record.clone());
            session.state.extend(session_delta);
        }
        self.user_state
            .lock()
            .unwrap()
            .entry(key.user_id.to_string())
            .or_default()
            .extend(user_delta);
        Ok(())
    }
}

// ============================================================================
// Oracles
// ============================================================================

/// Oracle that returns queued replies and records every request
#[derive(Default)]
pub struct ScriptedOracle {
    replies: Mutex<VecDeque<Result<OracleReply, LlmError>>>,
    /// Record of (directive, history) pairs
    pub requests: Mutex<Vec<(String, Vec<TurnRecord>)>>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply_text(self, text: &str) -> Self {
        self.queue(Ok(OracleReply::Text(text.to_string())))
    }

    pub fn reply_tool(self, call: ToolCall) -> Self {
        self.queue(Ok(OracleReply::call(call)))
    }

    pub fn fail(self, error: LlmError) -> Self {
        self.queue(Err(error))
    }

    fn queue(self, reply: Result<OracleReply, LlmError>) -> Self {
        self.replies.lock().unwrap().push_back(reply);
        self
    }

    pub fn recorded_requests(&self) -> Vec<(String, Vec<TurnRecord>)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReasoningOracle for ScriptedOracle {
    async fn infer(
        &self,
        directive: &str,
        history: &[TurnRecord],
    ) -> Result<OracleReply, LlmError> {
        self.requests
            .lock()
            .unwrap()
            .push((directive.to_string(), history.to_vec()));
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::network("No scripted reply queued")))
    }
}

/// Oracle that follows the directive the way a cooperative model would
pub struct NameAwareOracle;

impl NameAwareOracle {
    fn known_name(directive: &str) -> Option<&str> {
        let rest = directive.split("You know the user's name is ").nth(1)?;
        rest.split('.').next()
    }

    fn introduced_name(text: &str) -> Option<String> {
        let rest = text.split("my name is ").nth(1)?;
        let name: String = rest.chars().take_while(|c| c.is_alphabetic()).collect();
        (!name.is_empty()).then_some(name)
    }
}

#[async_trait]
impl ReasoningOracle for NameAwareOracle {
    async fn infer(
        &self,
        directive: &str,
        history: &[TurnRecord],
    ) -> Result<OracleReply, LlmError> {
        if let Some(name) = Self::known_name(directive) {
            return Ok(OracleReply::Text(format!("Your name is {name}. Nice to see you, {name}!")));
        }
        if let Some(TurnRecord::Human { text, .. }) = history.last() {
            if let Some(name) = Self::introduced_name(text) {
                return Ok(OracleReply::call(remember_call("call-remember", &name)));
            }
        }
        Ok(OracleReply::Text("I don't know your name yet. What is it?".to_string()))
    }
}

/// Oracle that follows the fixed session-scoped instruction: it saves an
/// introduced name, asks `get_name` otherwise, and answers from tool results
pub struct ManagedNameOracle;

#[async_trait]
impl ReasoningOracle for ManagedNameOracle {
    async fn infer(
        &self,
        _directive: &str,
        history: &[TurnRecord],
    ) -> Result<OracleReply, LlmError> {
        let reply = match history.last() {
            Some(TurnRecord::Human { text, .. }) => {
                let args = match NameAwareOracle::introduced_name(text) {
                    Some(name) => ("call-remember", "remember_name", json!({ "name": name })),
                    None => ("call-get", "get_name", json!({})),
                };
                let (id, tool, input) = args;
                let arguments = input.as_object().cloned().unwrap_or_default();
                OracleReply::call(ToolCall::new(id, tool, arguments))
            }
            Some(TurnRecord::ToolResult {
                tool_name, content, ..
            }) => OracleReply::Text(match tool_name.as_str() {
                "remember_name" => format!("Got it. {content}"),
                _ if content == "I don't know your name." => {
                    "I don't know your name yet. What is it?".to_string()
                }
                _ => format!("Your name is {content}."),
            }),
            _ => OracleReply::Text("How can I help?".to_string()),
        };
        Ok(reply)
    }
}

/// Remember-name call as the oracle would emit it, without `user_id`
pub fn remember_call(id: &str, name: &str) -> ToolCall {
    ToolCall::new(
        id,
        REMEMBER_NAME_TOOL,
        json!({ "name": name }).as_object().cloned().unwrap_or_default(),
    )
}

// ============================================================================
// Mock Tool Executor
// ============================================================================

/// Mock tool executor with predefined outputs
#[derive(Default)]
pub struct MockToolExecutor {
    outputs: HashMap<String, ToolOutput>,
    definitions: Vec<ToolDefinition>,
    /// Record of tool executions
    pub executions: Mutex<Vec<(String, Value)>>,
}

impl MockToolExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool with a predefined output
    pub fn with_tool(mut self, name: impl Into<String>, output: ToolOutput) -> Self {
        let name = name.into();
        self.definitions.push(ToolDefinition {
            name: name.clone(),
            description: format!("Mock {name}"),
            input_schema: json!({ "type": "object", "properties": {} }),
        });
        self.outputs.insert(name, output);
        self
    }

    pub fn recorded_executions(&self) -> Vec<(String, Value)> {
        self.executions.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolExecutor for MockToolExecutor {
    async fn execute(&self, name: &str, input: Value, _ctx: ToolContext) -> Option<ToolOutput> {
        self.executions
            .lock()
            .unwrap()
            .push((name.to_string(), input));
        self.outputs.get(name).cloned()
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        self.definitions.clone()
    }
}

// ============================================================================
// Integration Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CheckpointDatabase, UserDatabase, CHECKPOINT_DB_FILE, USER_DB_FILE};
    use crate::runtime::{OrchestratorConfig, TurnError, TurnOrchestrator};
    use crate::state_machine::{SessionUpdate, TransitionError};
    use crate::tools::ToolRegistry;
    use std::sync::Arc;

    fn registry_tools() -> ToolRegistryExecutor {
        ToolRegistryExecutor::new(ToolRegistry::standard())
    }

    fn build<U, C, O, T>(
        users: Arc<U>,
        checkpoints: C,
        oracle: Arc<O>,
        tools: T,
    ) -> TurnOrchestrator<U, C, O, T>
    where
        U: UserStore + 'static,
        C: CheckpointStore,
        O: ReasoningOracle,
        T: ToolExecutor,
    {
        TurnOrchestrator::new(users, checkpoints, oracle, tools, OrchestratorConfig::default())
    }

    #[tokio::test]
    async fn test_bootstrap_seeds_known_name() {
        let users = Arc::new(InMemoryUserStore::new().with_name("user_John", "John"));
        let oracle = Arc::new(ScriptedOracle::new().reply_text("Hi John"));
        let orch = build(
            users,
            Arc::new(InMemoryCheckpointStore::new()),
            oracle.clone(),
            registry_tools(),
        );

        let reply = orch.handle_turn("user_John", "session_101", "What is my name?").await.unwrap();
        assert_eq!(reply.session.user_name.as_deref(), Some("John"));

        let requests = oracle.recorded_requests();
        assert!(requests[0].0.contains("You know the user's name is John"));
    }

    #[tokio::test]
    async fn test_bootstrap_unknown_user_has_no_name() {
        let users = Arc::new(InMemoryUserStore::new());
        let oracle = Arc::new(ScriptedOracle::new().reply_text("Who are you?"));
        let orch = build(
            users,
            Arc::new(InMemoryCheckpointStore::new()),
            oracle.clone(),
            registry_tools(),
        );

        let reply = orch
            .handle_turn("user_Jane", "session_202", "Do you know my name?")
            .await
            .unwrap();
        assert_eq!(reply.session.user_name, None);
        assert_eq!(reply.session.user_id, "user_Jane");
        assert!(oracle.recorded_requests()[0].0.contains("do not know the user's name"));
    }

    #[tokio::test]
    async fn test_plain_reply_skips_tool_phases() {
        let tools = Arc::new(MockToolExecutor::new());
        let checkpoints = Arc::new(InMemoryCheckpointStore::new());
        let oracle = Arc::new(ScriptedOracle::new().reply_text("Hello!"));
        let orch = build(
            Arc::new(InMemoryUserStore::new()),
            checkpoints.clone(),
            oracle,
            tools.clone(),
        );

        let reply = orch.handle_turn("user_a", "t1", "Hi").await.unwrap();
        assert_eq!(reply.text, "Hello!");
        assert_eq!(reply.session.messages.len(), 2);
        assert!(tools.recorded_executions().is_empty());

        let phases: Vec<_> = checkpoints.history("t1").iter().map(|c| c.phase).collect();
        assert_eq!(phases, vec![TurnPhase::Reason, TurnPhase::Route, TurnPhase::Done]);
    }

    #[tokio::test]
    async fn test_remember_name_round_trip() {
        let users = Arc::new(InMemoryUserStore::new());
        let oracle = Arc::new(
            ScriptedOracle::new()
                .reply_tool(remember_call("call-1", "John"))
                .reply_text("Nice to meet you, John!"),
        );
        let orch = build(
            users.clone(),
            Arc::new(InMemoryCheckpointStore::new()),
            oracle.clone(),
            registry_tools(),
        );

        let reply = orch
            .handle_turn("user_John", "session_789", "Hi, my name is John.")
            .await
            .unwrap();
        assert_eq!(reply.text, "Nice to meet you, John!");
        assert_eq!(reply.session.user_name.as_deref(), Some("John"));
        assert_eq!(users.name("user_John").as_deref(), Some("John"));

        // human, assistant(tool call), tool result, assistant(text)
        assert_eq!(reply.session.messages.len(), 4);
        let requests = oracle.recorded_requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].0.contains("You know the user's name is John"));
        assert!(matches!(
            requests[1].1.last(),
            Some(TurnRecord::ToolResult { content, .. })
                if content == "OK, I've saved John to your main profile."
        ));
    }

    #[tokio::test]
    async fn test_enrichment_overwrites_oracle_user_id() {
        let users = Arc::new(InMemoryUserStore::new());
        let mut forged = remember_call("call-1", "John");
        forged.arguments.insert("user_id".into(), json!("someone_else"));
        let oracle = Arc::new(ScriptedOracle::new().reply_tool(forged).reply_text("Saved."));
        let orch = build(
            users.clone(),
            Arc::new(InMemoryCheckpointStore::new()),
            oracle,
            registry_tools(),
        );

        orch.handle_turn("user_John", "t", "Hi, my name is John.").await.unwrap();
        assert_eq!(users.name("user_John").as_deref(), Some("John"));
        assert_eq!(users.name("someone_else"), None);
    }

    #[tokio::test]
    async fn test_executed_arguments_carry_session_user_id() {
        let tools = Arc::new(
            MockToolExecutor::new().with_tool(REMEMBER_NAME_TOOL, ToolOutput::success("OK")),
        );
        let oracle = Arc::new(
            ScriptedOracle::new()
                .reply_tool(remember_call("call-1", "John"))
                .reply_text("Done"),
        );
        let orch = build(
            Arc::new(InMemoryUserStore::new()),
            Arc::new(InMemoryCheckpointStore::new()),
            oracle,
            tools.clone(),
        );

        orch.handle_turn("user_John", "t", "Hi, my name is John.").await.unwrap();
        let executions = tools.recorded_executions();
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].1["user_id"], "user_John");
        assert_eq!(executions[0].1["name"], "John");
    }

    #[tokio::test]
    async fn test_threads_are_isolated_for_same_user() {
        let users = Arc::new(InMemoryUserStore::new());
        let checkpoints = Arc::new(InMemoryCheckpointStore::new());
        let oracle = Arc::new(NameAwareOracle);
        let orch = build(users, checkpoints.clone(), oracle, registry_tools());

        orch.handle_turn("user_John", "session_789", "Hi, my name is John.").await.unwrap();
        let reply = orch.handle_turn("user_John", "session_101", "What is my name?").await.unwrap();

        assert_eq!(reply.session.messages.len(), 2);
        assert!(reply
            .session
            .messages
            .iter()
            .all(|m| !matches!(m, TurnRecord::Human { text, .. } if text.contains("John."))));
        assert_eq!(checkpoints.latest("session_789").unwrap().state.messages.len(), 4);
    }

    #[tokio::test]
    async fn test_three_run_scenario_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let users = Arc::new(UserDatabase::open(dir.path().join(USER_DB_FILE)).unwrap());
        let checkpoints = CheckpointDatabase::open(dir.path().join(CHECKPOINT_DB_FILE)).unwrap();
        let orch = build(
            users.clone(),
            checkpoints.clone(),
            Arc::new(NameAwareOracle),
            registry_tools(),
        );

        // Run 1: John introduces himself
        let run1 = orch
            .handle_turn("user_John", "session_789", "Hi, my name is John.")
            .await
            .unwrap();
        assert_eq!(run1.session.user_name.as_deref(), Some("John"));
        assert_eq!(users.get_user_name("user_John").unwrap().as_deref(), Some("John"));

        // Run 2: same user, fresh thread
        let run2 = orch.handle_turn("user_John", "session_101", "What is my name?").await.unwrap();
        assert!(run2.text.contains("John"));
        assert_eq!(run2.session.messages.len(), 2);

        // Run 3: different user knows nothing
        let run3 = orch
            .handle_turn("user_Jane", "session_202", "Do you know my name?")
            .await
            .unwrap();
        assert!(!run3.text.contains("John"));
        assert_eq!(run3.session.user_name, None);
        assert_eq!(users.get_user_name("user_Jane").unwrap(), None);

        let latest = checkpoints.latest_checkpoint("session_789").unwrap().unwrap();
        assert_eq!(latest.phase, TurnPhase::Done);
        assert_eq!(latest.state, run1.session);
    }

    #[tokio::test]
    async fn test_resumed_thread_appends_only_human_message() {
        let checkpoints = Arc::new(InMemoryCheckpointStore::new());
        let oracle = Arc::new(ScriptedOracle::new().reply_text("one").reply_text("two"));
        let orch = build(Arc::new(InMemoryUserStore::new()), checkpoints, oracle, registry_tools());

        orch.handle_turn("u", "t", "first").await.unwrap();
        let reply = orch.handle_turn("u", "t", "second").await.unwrap();
        assert_eq!(reply.text, "two");
        assert_eq!(reply.session.messages.len(), 4);
    }

    #[tokio::test]
    async fn test_foreign_user_cannot_take_over_thread() {
        let checkpoints = Arc::new(InMemoryCheckpointStore::new());
        let oracle = Arc::new(ScriptedOracle::new().reply_text("hi"));
        let orch = build(Arc::new(InMemoryUserStore::new()), checkpoints, oracle, registry_tools());

        orch.handle_turn("user_John", "t", "hello").await.unwrap();
        let err = orch.handle_turn("user_Jane", "t", "hello").await.unwrap_err();
        assert!(matches!(err, TurnError::State(_)));
    }

    #[tokio::test]
    async fn test_tool_failure_fails_turn_without_sync() {
        let checkpoints = Arc::new(InMemoryCheckpointStore::new());
        let tools = Arc::new(
            MockToolExecutor::new().with_tool(REMEMBER_NAME_TOOL, ToolOutput::error("db locked")),
        );
        let oracle = Arc::new(ScriptedOracle::new().reply_tool(remember_call("call-1", "John")));
        let orch = build(
            Arc::new(InMemoryUserStore::new()),
            checkpoints.clone(),
            oracle.clone(),
            tools,
        );

        let err = orch.handle_turn("user_John", "t", "Hi, my name is John.").await.unwrap_err();
        assert!(matches!(err, TurnError::Tool { ref message, .. } if message == "db locked"));
        assert_eq!(oracle.recorded_requests().len(), 1);

        let latest = checkpoints.latest("t").unwrap();
        assert_eq!(latest.phase, TurnPhase::Execute);
        assert_eq!(latest.state.user_name, None);
        assert!(matches!(
            latest.state.last_message(),
            Some(TurnRecord::ToolResult { is_error: true, .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_tool_fails_turn() {
        let call = ToolCall::new("call-1", "launch_rocket", serde_json::Map::new());
        let oracle = Arc::new(ScriptedOracle::new().reply_tool(call));
        let orch = build(
            Arc::new(InMemoryUserStore::new()),
            Arc::new(InMemoryCheckpointStore::new()),
            oracle,
            registry_tools(),
        );

        let err = orch.handle_turn("u", "t", "go").await.unwrap_err();
        assert!(matches!(err, TurnError::Tool { ref tool, .. } if tool == "launch_rocket"));
    }

    #[tokio::test]
    async fn test_tool_rounds_are_bounded() {
        let tools = Arc::new(
            MockToolExecutor::new().with_tool(REMEMBER_NAME_TOOL, ToolOutput::success("OK")),
        );
        let oracle = Arc::new(
            ScriptedOracle::new()
                .reply_tool(remember_call("c1", "A"))
                .reply_tool(remember_call("c2", "B"))
                .reply_tool(remember_call("c3", "C")),
        );
        let orch = TurnOrchestrator::new(
            Arc::new(InMemoryUserStore::new()),
            Arc::new(InMemoryCheckpointStore::new()),
            oracle,
            tools.clone(),
            OrchestratorConfig { max_tool_rounds: 2 },
        );

        let err = orch.handle_turn("u", "t", "loop").await.unwrap_err();
        assert!(matches!(err, TurnError::ToolRoundsExceeded { limit: 2 }));
        assert_eq!(tools.recorded_executions().len(), 2);
    }

    #[tokio::test]
    async fn test_oracle_error_fails_turn() {
        let oracle = Arc::new(ScriptedOracle::new().fail(LlmError::rate_limit("slow down")));
        let orch = build(
            Arc::new(InMemoryUserStore::new()),
            Arc::new(InMemoryCheckpointStore::new()),
            oracle,
            registry_tools(),
        );
        let err = orch.handle_turn("u", "t", "hi").await.unwrap_err();
        assert!(matches!(err, TurnError::Oracle(_)));
    }

    #[tokio::test]
    async fn test_bootstrap_store_failure() {
        let oracle = Arc::new(ScriptedOracle::new().reply_text("hi"));
        let orch = build(
            Arc::new(FailingUserStore),
            Arc::new(InMemoryCheckpointStore::new()),
            oracle,
            registry_tools(),
        );
        let err = orch.handle_turn("u", "t", "hi").await.unwrap_err();
        assert!(matches!(err, TurnError::Bootstrap(_)));
    }

    #[tokio::test]
    async fn test_checkpoint_failure_reported_with_reply() {
        let oracle = Arc::new(ScriptedOracle::new().reply_text("Hello!"));
        let orch = build(
            Arc::new(InMemoryUserStore::new()),
            FailingCheckpointStore,
            oracle,
            registry_tools(),
        );

        match orch.handle_turn("u", "t", "hi").await {
            Err(TurnError::Checkpoint { reply, message }) => {
                assert_eq!(reply.as_deref(), Some("Hello!"));
                assert_eq!(message, "disk full");
            }
            other => panic!("expected checkpoint error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_interrupted_tool_call_is_repaired_on_resume() {
        let users = Arc::new(InMemoryUserStore::new().with_name("user_John", "John"));
        let checkpoints = Arc::new(InMemoryCheckpointStore::new());

        let mut state = SessionState::bootstrap("user_John", None, "Hi, my name is John.").unwrap();
        let call = remember_call("call-1", "John").with_user_id("user_John");
        state
            .merge(SessionUpdate::append(TurnRecord::assistant("", Some(call))))
            .unwrap();
        checkpoints.seed("session_789", TurnPhase::Execute, state);

        let oracle = Arc::new(ScriptedOracle::new().reply_text("Welcome back, John."));
        let orch = build(users, checkpoints, oracle.clone(), registry_tools());

        let reply = orch.handle_turn("user_John", "session_789", "Are you there?").await.unwrap();
        assert_eq!(reply.session.user_name.as_deref(), Some("John"));

        let (directive, history) = &oracle.recorded_requests()[0];
        assert!(directive.contains("You know the user's name is John"));
        assert!(matches!(
            &history[2],
            TurnRecord::ToolResult { call_id, is_error: true, .. } if call_id == "call-1"
        ));
        assert!(matches!(&history[3], TurnRecord::Human { text, .. } if text == "Are you there?"));
    }

    #[tokio::test]
    async fn test_same_thread_turns_are_serialized() {
        let checkpoints = Arc::new(InMemoryCheckpointStore::new());
        let oracle = Arc::new(ScriptedOracle::new().reply_text("a").reply_text("b"));
        let orch = Arc::new(build(
            Arc::new(InMemoryUserStore::new()),
            checkpoints.clone(),
            oracle,
            registry_tools(),
        ));

        let (r1, r2) = tokio::join!(
            orch.handle_turn("u", "t", "one"),
            orch.handle_turn("u", "t", "two")
        );
        r1.unwrap();
        r2.unwrap();
        assert_eq!(checkpoints.latest("t").unwrap().state.messages.len(), 4);
        assert_eq!(orch.tracked_threads().await, 0);
    }

    #[tokio::test]
    async fn test_missing_user_id_never_reaches_tool() {
        let tools = Arc::new(
            MockToolExecutor::new().with_tool(REMEMBER_NAME_TOOL, ToolOutput::success("OK")),
        );
        let oracle = Arc::new(ScriptedOracle::new().reply_tool(remember_call("call-1", "John")));
        let orch = build(
            Arc::new(InMemoryUserStore::new()),
            Arc::new(InMemoryCheckpointStore::new()),
            oracle,
            tools.clone(),
        );

        let err = orch.handle_turn("", "t", "Hi, my name is John.").await.unwrap_err();
        assert!(matches!(err, TurnError::Transition(TransitionError::MissingUserId)));
        assert!(tools.recorded_executions().is_empty());
    }

    #[tokio::test]
    async fn test_padded_name_is_same_in_store_and_session() {
        let users = Arc::new(InMemoryUserStore::new());
        let oracle = Arc::new(
            ScriptedOracle::new()
                .reply_tool(remember_call("call-1", " John "))
                .reply_text("Saved."),
        );
        let checkpoints = Arc::new(InMemoryCheckpointStore::new());
        let orch = build(users.clone(), checkpoints, oracle, registry_tools());

        let reply = orch
            .handle_turn("user_John", "session_789", "Hi, my name is  John .")
            .await
            .unwrap();
        assert_eq!(users.name("user_John").as_deref(), Some(" John "));
        assert_eq!(users.name("user_John"), reply.session.user_name);
    }

    #[tokio::test]
    async fn test_name_saved_elsewhere_does_not_reach_finished_thread() {
        let users = Arc::new(InMemoryUserStore::new());
        let checkpoints = Arc::new(InMemoryCheckpointStore::new());
        let oracle = Arc::new(
            ScriptedOracle::new()
                .reply_text("Hello, stranger.")
                .reply_tool(remember_call("call-1", "John"))
                .reply_text("Nice to meet you, John!")
                .reply_text("I still don't know."),
        );
        let orch = build(users.clone(), checkpoints.clone(), oracle.clone(), registry_tools());

        orch.handle_turn("user_John", "thread_a", "Hello").await.unwrap();
        orch.handle_turn("user_John", "thread_b", "Hi, my name is John.")
            .await
            .unwrap();

        let a = checkpoints.latest("thread_a").unwrap();
        assert_eq!(a.phase, TurnPhase::Done);
        assert_eq!(a.state.user_name, None);
        assert_eq!(users.name("user_John").as_deref(), Some("John"));

        // A finished thread resumes from its own snapshot, not the durable store
        let next = orch
            .handle_turn("user_John", "thread_a", "What is my name?")
            .await
            .unwrap();
        assert_eq!(next.session.user_name, None);
        let requests = oracle.recorded_requests();
        assert!(requests[3].0.contains("do not know the user's name"));
    }

    #[tokio::test]
    async fn test_thread_locks_released_after_turns() {
        let oracle = Arc::new(
            ScriptedOracle::new()
                .reply_text("one")
                .reply_text("two")
                .fail(LlmError::network("down")),
        );
        let checkpoints = Arc::new(InMemoryCheckpointStore::new());
        let orch = build(Arc::new(InMemoryUserStore::new()), checkpoints, oracle, registry_tools());

        orch.handle_turn("u", "t1", "hi").await.unwrap();
        orch.handle_turn("u", "t2", "hi").await.unwrap();
        orch.handle_turn("u", "t3", "hi").await.unwrap_err();
        assert_eq!(orch.tracked_threads().await, 0);
    }
}
