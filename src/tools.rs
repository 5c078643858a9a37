//! Tool implementations
//!
//! Tools never touch orchestration state. All per-call context arrives
//! through `ToolContext` and the call's arguments.

mod remember_name;
mod session_name;

pub use remember_name::RememberUserNameTool;
pub use session_name::{GetNameTool, RememberNameTool};

use crate::llm::ToolDefinition;
use crate::managed::scope::ScopedState;
use crate::runtime::UserStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Result from tool execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    pub output: String,
}

impl ToolOutput {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: message.into(),
        }
    }
}

/// All context needed for a tool invocation.
///
/// Created fresh for each tool call. The graph orchestrator supplies the
/// durable user store; the session-scoped runner supplies a state view.
#[derive(Clone)]
pub struct ToolContext {
    /// The thread or session this tool is executing within
    pub thread_id: String,

    /// Durable user store
    users: Option<Arc<dyn UserStore>>,

    /// Session state with user-scoped keys merged in
    state: Option<ScopedState>,
}

impl ToolContext {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            users: None,
            state: None,
        }
    }

    #[must_use]
    pub fn with_users(mut self, users: Arc<dyn UserStore>) -> Self {
        self.users = Some(users);
        self
    }

    #[must_use]
    pub fn with_state(mut self, state: ScopedState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn users(&self) -> Option<&Arc<dyn UserStore>> {
        self.users.as_ref()
    }

    pub fn state(&self) -> Option<&ScopedState> {
        self.state.as_ref()
    }
}

/// Trait for tools that can be executed by the orchestrator
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name
    fn name(&self) -> &str;

    /// Tool description for the oracle
    fn description(&self) -> String;

    /// JSON schema for the arguments the oracle is expected to supply
    fn input_schema(&self) -> Value;

    /// Execute the tool with all context provided via `ToolContext`
    async fn run(&self, input: Value, ctx: ToolContext) -> ToolOutput;
}

/// Collection of tools available to the orchestrator
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Registry for the graph orchestrator: the durable remember-name tool
    pub fn standard() -> Self {
        Self {
            tools: vec![Arc::new(RememberUserNameTool)],
        }
    }

    /// Registry for the session-scoped runner
    pub fn session_scoped() -> Self {
        Self {
            tools: vec![Arc::new(RememberNameTool), Arc::new(GetNameTool)],
        }
    }

    /// Get all tool definitions for the oracle
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    /// Execute a tool by name with context
    pub async fn execute(&self, name: &str, input: Value, ctx: ToolContext) -> Option<ToolOutput> {
        for tool in &self.tools {
            if tool.name() == name {
                return Some(tool.run(input, ctx).await);
            }
        }
        None
    }
}
