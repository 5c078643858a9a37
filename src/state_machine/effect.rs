//! Effects produced by state transitions

use super::state::ToolCall;

/// Effects to be executed by the runtime after the update is merged
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Invoke the reasoning oracle with this directive and the current history
    RequestReply { directive: String },

    /// Invoke the tool interface with already-enriched arguments
    ExecuteTool { call: ToolCall },

    /// Snapshot the session state to the checkpoint store
    PersistCheckpoint,
}

impl Effect {
    pub fn request_reply(directive: impl Into<String>) -> Self {
        Effect::RequestReply {
            directive: directive.into(),
        }
    }

    pub fn execute_tool(call: ToolCall) -> Self {
        Effect::ExecuteTool { call }
    }
}
