// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use berth_core::AgentEvent;
use serde_json::json;
use yare::parameterized;

fn inner_with_turn(turn: &TurnId) -> Arc<Mutex<Inner>> {
    let mut inner = Inner::new();
    inner.state = ClientState::Processing;
    inner.current_turn = Some(turn.clone());
    Arc::new(Mutex::new(inner))
}

async fn dispatch(inner: &Arc<Mutex<Inner>>, frame: Value) -> Vec<AgentEvent> {
    let (tx, mut rx) = mpsc::channel(16);
    handle_frame(inner, &tx, frame).await;
    drop(tx);
    let mut out = Vec::new();
    while let Some(event) = rx.recv().await {
        out.push(event);
    }
    out
}

#[tokio::test]
async fn delta_notification_maps_to_assistant_delta() {
    let turn = TurnId::mint();
    let inner = inner_with_turn(&turn);
    let frame = json!({
        "jsonrpc": "2.0",
        "method": "agent_message_delta",
        "params": { "delta": "hel" },
    });
    let events = dispatch(&inner, frame).await;
    assert_eq!(events, vec![AgentEvent::AssistantDelta { turn_id: turn, text: "hel".into() }]);
}

#[tokio::test]
async fn command_completed_carries_exit_code() {
    let turn = TurnId::mint();
    let inner = inner_with_turn(&turn);
    let frame = json!({
        "jsonrpc": "2.0",
        "method": "command_execution_completed",
        "params": { "item_id": "i1", "command": "cargo test", "exit_code": 101, "output": "boom" },
    });
    let events = dispatch(&inner, frame).await;
    assert_eq!(
        events,
        vec![AgentEvent::CommandExecutionCompleted {
            turn_id: turn,
            item_id: "i1".into(),
            command: "cargo test".into(),
            exit_code: Some(101),
            output: "boom".into(),
        }]
    );
}

#[tokio::test]
async fn turn_completed_clears_the_turn() {
    let turn = TurnId::mint();
    let inner = inner_with_turn(&turn);
    let frame = json!({ "jsonrpc": "2.0", "method": "turn_completed", "params": {} });
    let events = dispatch(&inner, frame).await;
    assert_eq!(
        events,
        vec![AgentEvent::TurnCompleted { turn_id: turn, cancelled: false, error: None }]
    );
    let guard = inner.lock();
    assert!(guard.current_turn.is_none());
    assert_eq!(guard.state, ClientState::Ready);
}

#[tokio::test]
async fn turn_aborted_resolves_cancelled() {
    let turn = TurnId::mint();
    let inner = inner_with_turn(&turn);
    let frame = json!({ "jsonrpc": "2.0", "method": "turn_aborted", "params": {} });
    let events = dispatch(&inner, frame).await;
    assert_eq!(
        events,
        vec![AgentEvent::TurnCompleted { turn_id: turn, cancelled: true, error: None }]
    );
}

#[tokio::test]
async fn in_turn_error_classifies_usage_limit() {
    let turn = TurnId::mint();
    let inner = inner_with_turn(&turn);
    let frame = json!({
        "jsonrpc": "2.0",
        "method": "error",
        "params": { "kind": "usageLimitExceeded", "message": "weekly limit reached" },
    });
    let events = dispatch(&inner, frame).await;
    match &events[..] {
        [AgentEvent::TurnCompleted { error: Some(error), cancelled: false, .. }] => {
            assert_eq!(error.kind, TurnErrorKind::UsageLimit);
            assert_eq!(error.message, "weekly limit reached");
        }
        other => panic!("unexpected events: {other:?}"),
    }
}

#[tokio::test]
async fn response_resolves_pending_request() {
    let inner = Arc::new(Mutex::new(Inner::new()));
    let (reply_tx, reply_rx) = oneshot::channel();
    inner.lock().pending.insert(7, reply_tx);

    let (tx, _rx) = mpsc::channel(4);
    handle_frame(&inner, &tx, json!({ "jsonrpc": "2.0", "id": 7, "result": { "ok": true } }))
        .await;

    let result = reply_rx.await.unwrap().unwrap();
    assert_eq!(result, json!({ "ok": true }));
}

#[tokio::test]
async fn error_response_carries_message() {
    let inner = Arc::new(Mutex::new(Inner::new()));
    let (reply_tx, reply_rx) = oneshot::channel();
    inner.lock().pending.insert(3, reply_tx);

    let (tx, _rx) = mpsc::channel(4);
    handle_frame(
        &inner,
        &tx,
        json!({ "jsonrpc": "2.0", "id": 3, "error": { "code": -32000, "message": "busy" } }),
    )
    .await;

    assert_eq!(reply_rx.await.unwrap().unwrap_err(), "busy");
}

#[parameterized(
    usage_snake = { "usage_limit", TurnErrorKind::UsageLimit },
    usage_camel = { "usageLimitExceeded", TurnErrorKind::UsageLimit },
    rate = { "rate_limited", TurnErrorKind::RateLimited },
    network = { "network", TurnErrorKind::Network },
    other = { "weird", TurnErrorKind::Internal },
)]
fn error_kind_classification(kind: &str, expected: TurnErrorKind) {
    assert_eq!(classify_error(kind), expected);
}

#[test]
fn drain_pending_fails_every_waiter() {
    let mut inner = Inner::new();
    let (tx_a, rx_a) = oneshot::channel();
    let (tx_b, rx_b) = oneshot::channel();
    inner.pending.insert(1, tx_a);
    inner.pending.insert(2, tx_b);
    inner.drain_pending("gone");
    assert_eq!(rx_a.blocking_recv().unwrap().unwrap_err(), "gone");
    assert_eq!(rx_b.blocking_recv().unwrap().unwrap_err(), "gone");
}
