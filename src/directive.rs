//! Directive (system prompt) construction
//!
//! The directive is the only channel through which session state reaches the
//! oracle. It branches on whether the user's name is already known.

use crate::state_machine::REMEMBER_NAME_TOOL;

/// Base role shared by both branches
const BASE_DIRECTIVE: &str = "You are a helpful assistant. \
Your goal is to learn about the user's name and use it in the conversation.";

/// Build the directive for the current `user_name`.
///
/// With no known name the oracle is told that a supplied name must trigger
/// exactly one remember-name tool call, ahead of anything else in the turn.
pub fn build_directive(user_name: Option<&str>) -> String {
    match user_name {
        Some(name) => format!(
            "{BASE_DIRECTIVE} You know the user's name is {name}. Address them by their name {name}"
        ),
        None => format!(
            "{BASE_DIRECTIVE} You do not know the user's name yet. \
\n\n**CRITICAL INSTRUCTION:** When the user provides their name \
(e.g., 'Hi, my name is Bob'), \
you MUST immediately call the '{REMEMBER_NAME_TOOL}' tool \
with the exact name they provided. This is your highest priority \
task when a name is given. Do not answer their other queries \
in the same turn; just call the tool."
        ),
    }
}
