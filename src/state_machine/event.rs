//! Events that advance a turn

use super::state::ToolCall;

/// What the oracle answered
#[derive(Debug, Clone, PartialEq)]
pub enum OracleReply {
    /// Plain natural-language reply
    Text(String),
    /// Request to invoke a tool, with any text the oracle sent alongside it
    ToolCall { text: String, call: ToolCall },
}

impl OracleReply {
    /// Tool request with no accompanying text
    pub fn call(call: ToolCall) -> Self {
        OracleReply::ToolCall {
            text: String::new(),
            call,
        }
    }

    #[allow(dead_code)] // Used in tests
    pub fn tool_call(&self) -> Option<&ToolCall> {
        match self {
            OracleReply::ToolCall { call, .. } => Some(call),
            OracleReply::Text(_) => None,
        }
    }
}

/// Events that trigger phase transitions
#[derive(Debug, Clone)]
pub enum Event {
    /// The oracle produced a reply (REASON)
    OracleReplied { reply: OracleReply },

    /// The tool finished successfully (EXECUTE)
    ToolCompleted { call_id: String, output: String },

    /// Advance an I/O-free phase (ROUTE, ENRICH, SYNC)
    Proceed,
}
