//! Resume recovery for interrupted threads
//!
//! A thread whose latest checkpoint was not taken at `Done` stopped mid-turn.
//! Before a new human message is appended, the history is closed off and the
//! cached name is refreshed from the durable store.

use crate::state_machine::{
    SessionState, SessionUpdate, StateError, ToolCall, TurnPhase, TurnRecord,
};

/// Content of the synthetic tool result closing an interrupted call
pub const INTERRUPTED_TOOL_RESULT: &str = "interrupted";

/// Result of analyzing a checkpoint for resumption
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryDecision {
    /// The state to resume with
    pub state: SessionState,
    /// Reason for the decision (for debugging)
    pub reason: RecoveryReason,
}

/// Why we made a particular recovery decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryReason {
    /// Last turn finished normally
    Completed,
    /// Turn stopped between phases with a well-formed history
    InterruptedBetweenPhases(TurnPhase),
    /// Turn stopped with a tool call that never got a result
    InterruptedToolCall { call_id: String },
}

impl RecoveryDecision {
    #[allow(dead_code)] // Used in tests
    pub fn needs_repair(&self) -> bool {
        self.reason != RecoveryReason::Completed
    }
}

/// Decide how to resume from a checkpoint taken at `phase`.
///
/// `durable_name` is the durable store's value for the thread's user. It
/// overrides the cached `user_name` when present; an absent durable value
/// leaves the cache alone.
pub fn resume(
    mut state: SessionState,
    phase: TurnPhase,
    durable_name: Option<String>,
) -> Result<RecoveryDecision, StateError> {
    if phase.is_terminal() {
        return Ok(RecoveryDecision {
            state,
            reason: RecoveryReason::Completed,
        });
    }

    let dangling = state.dangling_tool_call().cloned();
    let mut update = SessionUpdate::none();
    if let Some(call) = &dangling {
        update.messages.push(close_interrupted(call));
    }
    update.user_name = durable_name;
    state.merge(update)?;

    let reason = match dangling {
        Some(call) => RecoveryReason::InterruptedToolCall { call_id: call.id },
        None => RecoveryReason::InterruptedBetweenPhases(phase),
    };
    Ok(RecoveryDecision { state, reason })
}

fn close_interrupted(call: &ToolCall) -> TurnRecord {
    TurnRecord::tool_result(call, INTERRUPTED_TOOL_RESULT, true)
}
