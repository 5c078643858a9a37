//! Name tools for the session-scoped strategy
//!
//! Both read and write `user:name` through the state view in `ToolContext`,
//! so the value follows the user into every session they open.

use super::{Tool, ToolContext, ToolOutput};
use crate::managed::scope::USER_PREFIX;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

fn name_key() -> String {
    format!("{USER_PREFIX}name")
}

/// Writes `user:name` into the user-scoped state
pub struct RememberNameTool;

#[derive(Debug, Deserialize)]
struct RememberNameInput {
    name: String,
}

#[async_trait]
impl Tool for RememberNameTool {
    fn name(&self) -> &str {
        "remember_name"
    }

    fn description(&self) -> String {
        "Remembers the user's name.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["name"],
            "properties": {
                "name": { "type": "string", "description": "The user's name" }
            }
        })
    }

    async fn run(&self, input: Value, ctx: ToolContext) -> ToolOutput {
        let input: RememberNameInput = match serde_json::from_value(input) {
            Ok(i) => i,
            Err(e) => return ToolOutput::error(format!("Invalid input: {e}")),
        };
        if input.name.trim().is_empty() {
            return ToolOutput::error("Invalid input: name must not be empty");
        }
        let Some(state) = ctx.state() else {
            return ToolOutput::error("No session state available");
        };

        state.set(name_key(), Value::String(input.name.clone())).await;
        ToolOutput::success(format!("I will remember your name as {}.", input.name))
    }
}

/// Reads `user:name` back from the user-scoped state
pub struct GetNameTool;

#[async_trait]
impl Tool for GetNameTool {
    fn name(&self) -> &str {
        "get_name"
    }

    fn description(&self) -> String {
        "Returns the name of the user.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn run(&self, _input: Value, ctx: ToolContext) -> ToolOutput {
        let Some(state) = ctx.state() else {
            return ToolOutput::error("No session state available");
        };
        match state.get(&name_key()).await {
            Some(Value::String(name)) if !name.is_empty() => ToolOutput::success(name),
            _ => ToolOutput::success("I don't know your name."),
        }
    }
}
