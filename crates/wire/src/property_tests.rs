// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Serde roundtrips for every frame variant with minimal fixed field
//! values, plus proptest coverage for the envelope.

use proptest::prelude::*;

use berth_core::{
    Message, MessageRole, ProviderKind, SessionId, TurnError, TurnErrorKind, TurnId, WorktreeId,
    WorktreeStatus,
};

use crate::http::WorktreeInfo;
use crate::{ClientFrame, DiffFile, RpcDirection, RpcLogEntry, ServerFrame, ServerPayload};

fn sid() -> SessionId {
    SessionId::from("0123456789abcdef0123456789abcdef")
}

fn turn() -> TurnId {
    TurnId::from("t0123456789abcdef")
}

fn msg() -> Message {
    Message {
        id: 1,
        role: MessageRole::Assistant,
        text: String::new(),
        attachments: vec![],
        tool_result: None,
        created_at_ms: 0,
    }
}

fn info() -> WorktreeInfo {
    WorktreeInfo {
        id: WorktreeId::main(),
        branch_name: String::new(),
        name: String::new(),
        provider: ProviderKind::Codex,
        context: berth_core::WorktreeContext::New,
        source_worktree_id: None,
        model: None,
        reasoning_effort: None,
        internet_access: false,
        deny_git_credentials_access: false,
        status: WorktreeStatus::Ready,
        color: String::new(),
        thread_id: None,
        created_at_ms: 0,
    }
}

fn all_client_frames() -> Vec<ClientFrame> {
    vec![
        ClientFrame::Auth { token: String::new() },
        ClientFrame::Ping,
        ClientFrame::SyncMessages {
            session_id: sid(),
            worktree_id: WorktreeId::main(),
            last_seen_message_id: None,
        },
        ClientFrame::SyncMessages {
            session_id: sid(),
            worktree_id: WorktreeId::main(),
            last_seen_message_id: Some(9),
        },
        ClientFrame::Subscribe { session_id: sid(), worktree_id: None },
        ClientFrame::Subscribe { session_id: sid(), worktree_id: Some(WorktreeId::main()) },
    ]
}

fn all_server_payloads() -> Vec<ServerPayload> {
    vec![
        ServerPayload::Pong,
        ServerPayload::Status { status: "deleted".into(), message: None },
        ServerPayload::Ready,
        ServerPayload::RepoDiff {
            files: vec![DiffFile { path: "a".into(), status: " M".into() }],
            diff: String::new(),
        },
        ServerPayload::TurnStarted { turn_id: turn() },
        ServerPayload::TurnCompleted { turn_id: turn(), cancelled: false, error: None },
        ServerPayload::TurnCompleted {
            turn_id: turn(),
            cancelled: true,
            error: Some(TurnError { kind: TurnErrorKind::UsageLimit, message: String::new() }),
        },
        ServerPayload::TurnError { turn_id: None, kind: "internal".into(), message: String::new() },
        ServerPayload::AssistantDelta { turn_id: turn(), text: String::new() },
        ServerPayload::AssistantMessage { turn_id: turn(), message: msg() },
        ServerPayload::CommandExecutionDelta {
            turn_id: turn(),
            item_id: String::new(),
            output: String::new(),
        },
        ServerPayload::CommandExecutionCompleted {
            turn_id: turn(),
            item_id: String::new(),
            command: String::new(),
            exit_code: Some(0),
            message: msg(),
        },
        ServerPayload::ToolResult {
            turn_id: turn(),
            item_id: String::new(),
            name: String::new(),
            message: msg(),
        },
        ServerPayload::WorktreeCreated { worktree: info() },
        ServerPayload::WorktreeReady,
        ServerPayload::WorktreeStatus { status: WorktreeStatus::Processing },
        ServerPayload::WorktreeRemoved,
        ServerPayload::WorktreeRenamed { name: String::new() },
        ServerPayload::WorktreesList { worktrees: vec![info()] },
        ServerPayload::WorktreeMessagesSync { messages: vec![msg()] },
        ServerPayload::WorktreeDiff { diff: String::new() },
        ServerPayload::MessagesSync { messages: vec![] },
        ServerPayload::ProviderSwitched { provider: ProviderKind::Claude },
        ServerPayload::AccountLoginCompleted { provider: ProviderKind::Codex },
        ServerPayload::RpcLog {
            entries: vec![RpcLogEntry {
                at_ms: 0,
                direction: RpcDirection::Sent,
                payload: serde_json::Value::Null,
            }],
        },
    ]
}

#[test]
fn every_client_frame_roundtrips() {
    for frame in all_client_frames() {
        let json = serde_json::to_string(&frame).unwrap();
        let back: ClientFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(back, frame, "roundtrip failed for {json}");
    }
}

#[test]
fn every_server_payload_roundtrips_in_envelope() {
    for (i, payload) in all_server_payloads().into_iter().enumerate() {
        let frame = ServerFrame::worktree(i as u64, sid(), WorktreeId::main(), payload);
        let json = serde_json::to_string(&frame).unwrap();
        let back: ServerFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(back, frame, "roundtrip failed for {json}");
    }
}

#[test]
fn every_server_payload_has_snake_case_tag() {
    for payload in all_server_payloads() {
        let frame = ServerFrame::bare(0, payload);
        let value = serde_json::to_value(&frame).unwrap();
        let tag = value["type"].as_str().unwrap_or_default();
        assert!(!tag.is_empty());
        assert_eq!(tag, tag.to_ascii_lowercase());
        assert!(!tag.contains('-'));
    }
}

proptest! {
    #[test]
    fn envelope_seq_and_ids_survive(seq in any::<u64>(), with_wt in any::<bool>()) {
        let payload = ServerPayload::Ready;
        let frame = if with_wt {
            ServerFrame::worktree(seq, sid(), WorktreeId::main(), payload)
        } else {
            ServerFrame::session(seq, sid(), payload)
        };
        let json = serde_json::to_string(&frame).map_err(|e| TestCaseError::fail(e.to_string()))?;
        let back: ServerFrame =
            serde_json::from_str(&json).map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(back, frame);
    }

    #[test]
    fn sync_cursor_roundtrips(cursor in proptest::option::of(any::<i64>())) {
        let frame = ClientFrame::SyncMessages {
            session_id: sid(),
            worktree_id: WorktreeId::main(),
            last_seen_message_id: cursor,
        };
        let json = serde_json::to_string(&frame).map_err(|e| TestCaseError::fail(e.to_string()))?;
        let back: ClientFrame =
            serde_json::from_str(&json).map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(back, frame);
    }
}
