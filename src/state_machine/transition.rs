//! Pure state transition function
//!
//! REASON -> ROUTE -> (ENRICH -> EXECUTE -> SYNC -> REASON)* -> DONE

use super::{Effect, Event, OracleReply, SessionState, SessionUpdate, TurnPhase, TurnRecord};
use crate::directive::build_directive;
use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_phase: TurnPhase,
    pub update: SessionUpdate,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(phase: TurnPhase) -> Self {
        Self {
            new_phase: phase,
            update: SessionUpdate::none(),
            effects: vec![],
        }
    }

    pub fn with_update(mut self, update: SessionUpdate) -> Self {
        self.update = update;
        self
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Errors that can occur during transition
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("session has no user_id; refusing to execute a tool with incomplete arguments")]
    MissingUserId,
    #[error("latest record is not an assistant tool call")]
    NoPendingToolCall,
    #[error("tool result for {got} does not match pending call {expected}")]
    UnexpectedToolResult { expected: String, got: String },
    #[error("no tool result to synchronize")]
    NoToolResult,
    #[error("malformed tool call: {0}")]
    MalformedToolCall(String),
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

/// Entry edge of a turn: the human record is already merged, ask the oracle.
pub fn start_turn(session: &SessionState) -> TransitionResult {
    TransitionResult::new(TurnPhase::Reason)
        .with_effect(Effect::PersistCheckpoint)
        .with_effect(Effect::request_reply(build_directive(
            session.user_name.as_deref(),
        )))
}

/// Pure transition function.
///
/// Given the same phase, session and event it always produces the same
/// result. The returned update must be merged before effects run.
pub fn transition(
    phase: TurnPhase,
    session: &SessionState,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match (phase, event) {
        // REASON: record the oracle's reply
        (TurnPhase::Reason, Event::OracleReplied { reply }) => {
            let record = match reply {
                OracleReply::Text(text) => TurnRecord::assistant(text, None),
                OracleReply::ToolCall { text, call } => TurnRecord::assistant(text, Some(call)),
            };
            Ok(TransitionResult::new(TurnPhase::Route)
                .with_update(SessionUpdate::append(record))
                .with_effect(Effect::PersistCheckpoint))
        }

        // ROUTE: tool detour or completion
        (TurnPhase::Route, Event::Proceed) => match session.last_message() {
            Some(record @ TurnRecord::Assistant { .. }) => {
                let next = if record.tool_call().is_some() {
                    TurnPhase::Enrich
                } else {
                    TurnPhase::Done
                };
                Ok(TransitionResult::new(next).with_effect(Effect::PersistCheckpoint))
            }
            _ => Err(TransitionError::InvalidTransition(
                "route reached without an assistant reply".to_string(),
            )),
        },

        // ENRICH: rebuild the assistant record with user_id injected, same id
        (TurnPhase::Enrich, Event::Proceed) => {
            if session.user_id.is_empty() {
                return Err(TransitionError::MissingUserId);
            }
            let Some(TurnRecord::Assistant {
                id,
                text,
                tool_call: Some(call),
            }) = session.last_message()
            else {
                return Err(TransitionError::NoPendingToolCall);
            };

            let enriched = call.with_user_id(&session.user_id);
            let record = TurnRecord::Assistant {
                id: id.clone(),
                text: text.clone(),
                tool_call: Some(enriched.clone()),
            };
            Ok(TransitionResult::new(TurnPhase::Execute)
                .with_update(SessionUpdate::append(record))
                .with_effect(Effect::PersistCheckpoint)
                .with_effect(Effect::execute_tool(enriched)))
        }

        // EXECUTE: append the tool's confirmation
        (TurnPhase::Execute, Event::ToolCompleted { call_id, output }) => {
            let pending = session
                .dangling_tool_call()
                .ok_or(TransitionError::NoPendingToolCall)?;
            if pending.id != call_id {
                return Err(TransitionError::UnexpectedToolResult {
                    expected: pending.id.clone(),
                    got: call_id,
                });
            }
            Ok(TransitionResult::new(TurnPhase::Sync)
                .with_update(SessionUpdate::append(TurnRecord::tool_result(
                    pending, output, false,
                )))
                .with_effect(Effect::PersistCheckpoint))
        }

        // SYNC: reflect the durable write into session state, then reason again
        (TurnPhase::Sync, Event::Proceed) => {
            let call = session
                .call_for_latest_tool_result()
                .ok_or(TransitionError::NoToolResult)?;

            let update = if call.is_remember_name() {
                let name = call.str_arg("name").ok_or_else(|| {
                    TransitionError::MalformedToolCall(format!(
                        "{} call {} has no string `name` argument",
                        call.name, call.id
                    ))
                })?;
                SessionUpdate::user_name(name)
            } else {
                SessionUpdate::none()
            };

            let name = update.user_name.as_deref().or(session.user_name.as_deref());
            let directive = build_directive(name);

            Ok(TransitionResult::new(TurnPhase::Reason)
                .with_update(update)
                .with_effect(Effect::PersistCheckpoint)
                .with_effect(Effect::request_reply(directive)))
        }

        (phase, event) => Err(TransitionError::InvalidTransition(format!(
            "No transition from {phase} with event {event:?}"
        ))),
    }
}
