// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn turn() -> TurnId {
    TurnId::from("t0123456789abcdef")
}

#[test]
fn tagged_serialization() {
    let event = AgentEvent::TurnStarted { turn_id: turn() };
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["type"], "turn_started");
    assert_eq!(json["turn_id"], "t0123456789abcdef");
}

#[test]
fn completed_flags_default_off_the_wire() {
    let json = r#"{"type":"turn_completed","turn_id":"t0123456789abcdef"}"#;
    let event: AgentEvent = serde_json::from_str(json).unwrap();
    assert_eq!(
        event,
        AgentEvent::TurnCompleted { turn_id: turn(), cancelled: false, error: None }
    );
    assert!(event.ends_turn());
}

#[test]
fn usage_limit_error_roundtrip() {
    let event = AgentEvent::TurnCompleted {
        turn_id: turn(),
        cancelled: false,
        error: Some(TurnError { kind: TurnErrorKind::UsageLimit, message: "limit hit".into() }),
    };
    let json = serde_json::to_string(&event).unwrap();
    assert!(json.contains("\"usage_limit\""));
    let back: AgentEvent = serde_json::from_str(&json).unwrap();
    assert_eq!(back, event);
}

#[test]
fn turn_id_accessor() {
    assert!(AgentEvent::Ready.turn_id().is_none());
    let event = AgentEvent::AssistantDelta { turn_id: turn(), text: "hi".into() };
    assert_eq!(event.turn_id(), Some(&turn()));
}

#[test]
fn exit_omits_absent_fields() {
    let json = serde_json::to_string(&AgentEvent::Exit { code: Some(0), signal: None }).unwrap();
    assert!(!json.contains("signal"));
}
