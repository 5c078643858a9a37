//! Property-based tests for the reducer and transition function
//!
//! These tests verify key invariants hold across all possible inputs.

use super::state::*;
use super::transition::*;
use super::*;
use proptest::prelude::*;
use serde_json::{Map, Value};

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_tool_call() -> impl Strategy<Value = ToolCall> {
    (
        "[a-z]{8}",
        prop_oneof![Just(REMEMBER_NAME_TOOL.to_string()), "[a-z_]{3,12}"],
        proptest::option::of("[A-Z][a-z]{1,8}"),
        proptest::option::of("[a-z_]{1,10}"),
    )
        .prop_map(|(id, name, person, forged_user)| {
            let mut args = Map::new();
            if let Some(person) = person {
                args.insert("name".into(), Value::String(person));
            }
            if let Some(forged) = forged_user {
                args.insert("user_id".into(), Value::String(forged));
            }
            ToolCall::new(id, name, args)
        })
}

fn arb_record() -> impl Strategy<Value = TurnRecord> {
    prop_oneof![
        "[a-zA-Z ]{0,20}".prop_map(TurnRecord::human),
        "[a-zA-Z ]{0,20}".prop_map(TurnRecord::system),
        ("[a-zA-Z ]{0,20}", proptest::option::of(arb_tool_call()))
            .prop_map(|(text, call)| TurnRecord::assistant(text, call)),
        (arb_tool_call(), "[a-zA-Z ]{0,20}", any::<bool>())
            .prop_map(|(call, content, err)| TurnRecord::tool_result(&call, content, err)),
    ]
}

fn arb_update() -> impl Strategy<Value = SessionUpdate> {
    (
        proptest::collection::vec(arb_record(), 0..4),
        proptest::option::of("[A-Z][a-z]{1,8}"),
        proptest::option::of(prop_oneof![Just("user_a".to_string()), Just("user_b".to_string())]),
    )
        .prop_map(|(messages, user_name, user_id)| SessionUpdate {
            messages,
            user_name,
            user_id,
        })
}

fn arb_oracle_reply() -> impl Strategy<Value = OracleReply> {
    prop_oneof![
        "[a-zA-Z ]{0,30}".prop_map(OracleReply::Text),
        arb_tool_call().prop_map(OracleReply::call),
    ]
}

// ============================================================================
// Reducer invariants
// ============================================================================

proptest! {
    /// Merging never shrinks the message history
    #[test]
    fn prop_messages_never_shrink(updates in proptest::collection::vec(arb_update(), 1..8)) {
        let mut state = SessionState::default();
        for update in updates {
            let before = state.messages.len();
            let _ = state.merge(update);
            prop_assert!(state.messages.len() >= before);
        }
    }

    /// Once written, user_id never changes
    #[test]
    fn prop_user_id_write_once(updates in proptest::collection::vec(arb_update(), 1..8)) {
        let mut state = SessionState::default();
        let mut first: Option<String> = None;
        for update in updates {
            let attempted = update.user_id.clone();
            let result = state.merge(update);
            match (&first, attempted) {
                (None, Some(id)) => {
                    prop_assert!(result.is_ok());
                    first = Some(id);
                }
                (Some(existing), Some(id)) if existing != &id => {
                    prop_assert!(result.is_err());
                }
                _ => prop_assert!(result.is_ok()),
            }
            if let Some(existing) = &first {
                prop_assert_eq!(&state.user_id, existing);
            }
        }
    }

    /// Re-merging a record with a known id keeps its position
    #[test]
    fn prop_replace_keeps_position(
        records in proptest::collection::vec(arb_record(), 1..6),
        pick in any::<prop::sample::Index>(),
    ) {
        let mut state = SessionState::default();
        state
            .merge(SessionUpdate {
                messages: records.clone(),
                ..SessionUpdate::default()
            })
            .unwrap();
        let idx = pick.index(records.len());
        let target = state.messages[idx].clone();
        state.merge(SessionUpdate::append(target.clone())).unwrap();
        prop_assert_eq!(state.messages.len(), records.len());
        prop_assert_eq!(&state.messages[idx], &target);
    }
}

// ============================================================================
// Transition invariants
// ============================================================================

proptest! {
    /// ROUTE only reaches ENRICH when the reply carries a tool call,
    /// and a plain reply grows history by exactly one record
    #[test]
    fn prop_route_follows_tool_call(reply in arb_oracle_reply()) {
        let mut state = SessionState::bootstrap("user_a", None, "hello").unwrap();
        let has_tool = reply.tool_call().is_some();

        let r = transition(TurnPhase::Reason, &state, Event::OracleReplied { reply }).unwrap();
        state.merge(r.update).unwrap();
        let r = transition(TurnPhase::Route, &state, Event::Proceed).unwrap();

        if has_tool {
            prop_assert_eq!(r.new_phase, TurnPhase::Enrich);
        } else {
            prop_assert_eq!(r.new_phase, TurnPhase::Done);
            prop_assert_eq!(state.messages.len(), 2);
        }
    }

    /// ENRICH always yields the session's user_id, whatever the oracle sent
    #[test]
    fn prop_enrich_sets_session_user_id(call in arb_tool_call(), user_id in "user_[a-z]{1,8}") {
        let mut state = SessionState::bootstrap(user_id.clone(), None, "hello").unwrap();
        state.merge(SessionUpdate::append(TurnRecord::assistant("", Some(call.clone())))).unwrap();
        let len = state.messages.len();

        let r = transition(TurnPhase::Enrich, &state, Event::Proceed).unwrap();
        state.merge(r.update).unwrap();

        prop_assert_eq!(state.messages.len(), len);
        let enriched = state.last_message().and_then(TurnRecord::tool_call).unwrap();
        prop_assert_eq!(enriched.str_arg("user_id"), Some(user_id.as_str()));
        prop_assert_eq!(&enriched.id, &call.id);
        prop_assert_eq!(enriched.str_arg("name"), call.str_arg("name"));
    }

    /// Directive construction is a pure function of the name
    #[test]
    fn prop_directive_deterministic(name in proptest::option::of("[A-Z][a-z]{1,10}")) {
        let a = crate::directive::build_directive(name.as_deref());
        let b = crate::directive::build_directive(name.as_deref());
        prop_assert_eq!(a, b);
    }
}
