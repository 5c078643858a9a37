//! Remember-name tool: persists a user's name to the durable store

use super::{Tool, ToolContext, ToolOutput};
use crate::state_machine::REMEMBER_NAME_TOOL;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

/// Writes `user_id -> name` to the durable user store
pub struct RememberUserNameTool;

/// `user_id` is injected by the orchestrator, never by the oracle
#[derive(Debug, Deserialize)]
struct RememberNameInput {
    user_id: String,
    name: String,
}

#[async_trait]
impl Tool for RememberUserNameTool {
    fn name(&self) -> &str {
        REMEMBER_NAME_TOOL
    }

    fn description(&self) -> String {
        "Use this to remember the user's name in their permanent profile.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["name"],
            "properties": {
                "name": {
                    "type": "string",
                    "description": "The user's name exactly as they provided it"
                }
            }
        })
    }

    async fn run(&self, input: Value, ctx: ToolContext) -> ToolOutput {
        let input: RememberNameInput = match serde_json::from_value(input) {
            Ok(i) => i,
            Err(e) => return ToolOutput::error(format!("Invalid input: {e}")),
        };
        // Stored verbatim: SYNC copies the same argument into the session
        let name = input.name.as_str();
        if name.trim().is_empty() {
            return ToolOutput::error("Invalid input: name must not be empty");
        }
        if input.user_id.is_empty() {
            return ToolOutput::error("Invalid input: user_id must not be empty");
        }

        let Some(users) = ctx.users() else {
            return ToolOutput::error("No user store available");
        };

        match users.put_name(&input.user_id, name).await {
            Ok(()) => {
                tracing::info!(
                    thread_id = %ctx.thread_id,
                    user_id = %input.user_id,
                    "Persisted user name to durable store"
                );
                ToolOutput::success(format!("OK, I've saved {name} to your main profile."))
            }
            Err(e) => ToolOutput::error(format!("Failed to save name: {e}")),
        }
    }
}
