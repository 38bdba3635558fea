// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use berth_core::{SessionId, WorktreeId};
use berth_sandbox::{Capabilities, SandboxSpec};
use serde_json::json;
use yare::parameterized;

fn config() -> SpawnConfig {
    SpawnConfig {
        session_id: SessionId::mint(),
        worktree_id: WorktreeId::main(),
        workdir: "/tmp/repo".into(),
        home: "/tmp/home".into(),
        sandbox: SandboxSpec::unsandboxed(),
        caps: Capabilities {
            uid: 0,
            gid: 0,
            read_paths: vec![],
            write_paths: vec![],
            allow_network: true,
            hide_git_credentials: false,
        },
        env: Default::default(),
        model: None,
        reasoning_effort: None,
        thread_id: None,
    }
}

fn fresh_inner() -> Arc<Mutex<Inner>> {
    Arc::new(Mutex::new(Inner {
        state: ClientState::Processing,
        thread_id: None,
        current_turn: None,
        cancel_requested: false,
        model: None,
        child_pid: None,
    }))
}

async fn dispatch(
    inner: &Arc<Mutex<Inner>>,
    turn: &TurnId,
    parse: &mut TurnParse,
    record: Value,
) -> Vec<AgentEvent> {
    let (tx, mut rx) = mpsc::channel(16);
    handle_record(inner, &tx, turn, parse, record).await;
    drop(tx);
    let mut out = Vec::new();
    while let Some(event) = rx.recv().await {
        out.push(event);
    }
    out
}

#[tokio::test]
async fn init_record_captures_thread_id() {
    let inner = fresh_inner();
    let turn = TurnId::mint();
    let record = json!({ "type": "system", "subtype": "init", "session_id": "sess-42" });
    let events = dispatch(&inner, &turn, &mut TurnParse::default(), record).await;
    assert_eq!(events, vec![AgentEvent::ThreadStarted { thread_id: "sess-42".into() }]);
    assert_eq!(inner.lock().thread_id.as_deref(), Some("sess-42"));
}

#[tokio::test]
async fn repeated_init_with_same_thread_is_silent() {
    let inner = fresh_inner();
    inner.lock().thread_id = Some("sess-42".to_string());
    let turn = TurnId::mint();
    let record = json!({ "type": "system", "subtype": "init", "session_id": "sess-42" });
    let events = dispatch(&inner, &turn, &mut TurnParse::default(), record).await;
    assert!(events.is_empty());
}

#[tokio::test]
async fn text_segment_emits_delta_then_message() {
    let inner = fresh_inner();
    let turn = TurnId::mint();
    let record = json!({
        "type": "assistant",
        "message": { "content": [ { "type": "text", "text": "All tests pass." } ] },
    });
    let events = dispatch(&inner, &turn, &mut TurnParse::default(), record).await;
    assert_eq!(
        events,
        vec![
            AgentEvent::AssistantDelta { turn_id: turn.clone(), text: "All tests pass.".into() },
            AgentEvent::AssistantMessage { turn_id: turn, text: "All tests pass.".into() },
        ]
    );
}

#[tokio::test]
async fn bash_tool_use_then_result_closes_command_execution() {
    let inner = fresh_inner();
    let turn = TurnId::mint();
    let mut parse = TurnParse::default();

    let use_record = json!({
        "type": "assistant",
        "message": { "content": [ {
            "type": "tool_use", "id": "toolu_1", "name": "Bash",
            "input": { "command": "cargo check" },
        } ] },
    });
    let started = dispatch(&inner, &turn, &mut parse, use_record).await;
    assert_eq!(
        started,
        vec![
            AgentEvent::ItemStarted {
                turn_id: turn.clone(),
                item_id: "toolu_1".into(),
                kind: "command_execution".into(),
            },
            AgentEvent::CommandExecutionDelta {
                turn_id: turn.clone(),
                item_id: "toolu_1".into(),
                output: "cargo check".into(),
            },
        ]
    );

    let result_record = json!({
        "type": "user",
        "message": { "content": [ {
            "type": "tool_result", "tool_use_id": "toolu_1", "content": "Finished dev profile",
        } ] },
    });
    let completed = dispatch(&inner, &turn, &mut parse, result_record).await;
    assert_eq!(
        completed,
        vec![AgentEvent::CommandExecutionCompleted {
            turn_id: turn,
            item_id: "toolu_1".into(),
            command: "cargo check".into(),
            exit_code: None,
            output: "Finished dev profile".into(),
        }]
    );
}

#[tokio::test]
async fn non_shell_tool_result_surfaces_as_tool_result() {
    let inner = fresh_inner();
    let turn = TurnId::mint();
    let mut parse = TurnParse::default();
    parse.tools.insert("toolu_9".into(), ("Read".into(), String::new()));

    let record = json!({
        "type": "user",
        "message": { "content": [ {
            "type": "tool_result", "tool_use_id": "toolu_9",
            "content": [ { "type": "text", "text": "file contents" } ],
        } ] },
    });
    let events = dispatch(&inner, &turn, &mut parse, record).await;
    assert_eq!(
        events,
        vec![AgentEvent::ToolResult {
            turn_id: turn,
            item_id: "toolu_9".into(),
            name: "Read".into(),
            payload: Value::String("file contents".into()),
        }]
    );
}

#[tokio::test]
async fn success_result_completes_turn() {
    let inner = fresh_inner();
    let turn = TurnId::mint();
    let mut parse = TurnParse::default();
    let record = json!({ "type": "result", "subtype": "success", "result": "done" });
    let events = dispatch(&inner, &turn, &mut parse, record).await;
    assert_eq!(
        events,
        vec![AgentEvent::TurnCompleted { turn_id: turn, cancelled: false, error: None }]
    );
    assert!(parse.got_result);
}

#[tokio::test]
async fn error_result_is_classified() {
    let inner = fresh_inner();
    let turn = TurnId::mint();
    let record = json!({
        "type": "result", "subtype": "error_during_execution",
        "result": "Claude AI usage limit reached",
    });
    let events = dispatch(&inner, &turn, &mut TurnParse::default(), record).await;
    match &events[..] {
        [AgentEvent::TurnCompleted { error: Some(error), .. }] => {
            assert_eq!(error.kind, TurnErrorKind::UsageLimit);
        }
        other => panic!("unexpected events: {other:?}"),
    }
}

#[parameterized(
    usage = { "Usage limit reached", TurnErrorKind::UsageLimit },
    rate = { "rate limit exceeded", TurnErrorKind::RateLimited },
    network = { "network unreachable", TurnErrorKind::Network },
    internal = { "something else", TurnErrorKind::Internal },
)]
fn result_classification(message: &str, expected: TurnErrorKind) {
    assert_eq!(classify_result(message), expected);
}

#[test]
fn turn_argv_includes_resume_and_model() {
    let mut config = config();
    config.thread_id = Some("sess-7".to_string());
    config.model = Some("claude-sonnet".to_string());
    let (tx, _rx) = mpsc::channel(4);
    let client = ClaudeClient::new(config, tx);
    let argv = client.turn_argv();
    assert_eq!(argv[0], "claude");
    assert!(argv.windows(2).any(|w| w == ["--resume", "sess-7"]));
    assert!(argv.windows(2).any(|w| w == ["--model", "claude-sonnet"]));
    assert!(argv.contains(&"--output-format".to_string()));
}

#[test]
fn tool_result_text_handles_both_shapes() {
    assert_eq!(tool_result_text(&json!({ "content": "plain" })), "plain");
    assert_eq!(
        tool_result_text(&json!({ "content": [
            { "type": "text", "text": "a" }, { "type": "text", "text": "b" },
        ] })),
        "a\nb"
    );
}
