//! Turn orchestration state machine
//!
//! Pure transitions over an explicit phase enum. All I/O is described as
//! effects and executed by the runtime.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use effect::Effect;
pub use event::{Event, OracleReply};
pub use state::{
    SessionState, SessionUpdate, StateError, ToolCall, TurnPhase, TurnRecord, REMEMBER_NAME_TOOL,
};
pub use transition::{start_turn, transition, TransitionError};
