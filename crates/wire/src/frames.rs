// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket frames.

use serde::{Deserialize, Serialize};

use berth_core::{
    Message, MessageId, ProviderKind, SessionId, TurnError, TurnId, WorktreeId, WorktreeStatus,
};

use crate::http::WorktreeInfo;

/// Frames a client may send after the connection is established.
///
/// The very first frame MUST be `auth`; the server closes the socket if it
/// does not arrive within the auth deadline. There is deliberately no
/// query-string fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Auth {
        token: String,
    },
    Ping,
    #[serde(rename_all = "camelCase")]
    SyncMessages {
        session_id: SessionId,
        worktree_id: WorktreeId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_seen_message_id: Option<MessageId>,
    },
    #[serde(rename_all = "camelCase")]
    Subscribe {
        session_id: SessionId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        worktree_id: Option<WorktreeId>,
    },
}

/// One changed file in a repo diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffFile {
    pub path: String,
    /// Two-character porcelain status (`M `, `??`, …).
    pub status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcDirection {
    Sent,
    Received,
}

/// Entry in the per-session RPC log ring buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcLogEntry {
    pub at_ms: u64,
    pub direction: RpcDirection,
    pub payload: serde_json::Value,
}

/// Envelope for every server→client frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerFrame {
    /// Per-session monotone sequence number.
    pub seq: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree_id: Option<WorktreeId>,
    #[serde(flatten)]
    pub payload: ServerPayload,
}

impl ServerFrame {
    pub fn bare(seq: u64, payload: ServerPayload) -> Self {
        Self { seq, session_id: None, worktree_id: None, payload }
    }

    pub fn session(seq: u64, session_id: SessionId, payload: ServerPayload) -> Self {
        Self { seq, session_id: Some(session_id), worktree_id: None, payload }
    }

    pub fn worktree(
        seq: u64,
        session_id: SessionId,
        worktree_id: WorktreeId,
        payload: ServerPayload,
    ) -> Self {
        Self { seq, session_id: Some(session_id), worktree_id: Some(worktree_id), payload }
    }
}

/// Tagged payload of a server frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerPayload {
    Pong,

    /// Connection- or session-level notice; carries the termination notice
    /// (`status: "deleted"`) when a session is garbage-collected.
    Status {
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// The worktree's agent client finished its handshake.
    Ready,

    #[serde(rename_all = "camelCase")]
    RepoDiff {
        files: Vec<DiffFile>,
        diff: String,
    },

    #[serde(rename_all = "camelCase")]
    TurnStarted {
        turn_id: TurnId,
    },

    #[serde(rename_all = "camelCase")]
    TurnCompleted {
        turn_id: TurnId,
        #[serde(default)]
        cancelled: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<TurnError>,
    },

    #[serde(rename_all = "camelCase")]
    TurnError {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        turn_id: Option<TurnId>,
        kind: String,
        message: String,
    },

    #[serde(rename_all = "camelCase")]
    AssistantDelta {
        turn_id: TurnId,
        text: String,
    },

    /// Persisted assistant message (carries the store-assigned id).
    #[serde(rename_all = "camelCase")]
    AssistantMessage {
        turn_id: TurnId,
        message: Message,
    },

    #[serde(rename_all = "camelCase")]
    CommandExecutionDelta {
        turn_id: TurnId,
        item_id: String,
        output: String,
    },

    #[serde(rename_all = "camelCase")]
    CommandExecutionCompleted {
        turn_id: TurnId,
        item_id: String,
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
        message: Message,
    },

    #[serde(rename_all = "camelCase")]
    ToolResult {
        turn_id: TurnId,
        item_id: String,
        name: String,
        message: Message,
    },

    WorktreeCreated {
        worktree: WorktreeInfo,
    },

    WorktreeReady,

    WorktreeStatus {
        status: WorktreeStatus,
    },

    WorktreeRemoved,

    WorktreeRenamed {
        name: String,
    },

    WorktreesList {
        worktrees: Vec<WorktreeInfo>,
    },

    /// Live append or catch-up of worktree messages, oldest first.
    WorktreeMessagesSync {
        messages: Vec<Message>,
    },

    WorktreeDiff {
        diff: String,
    },

    /// Response to `sync_messages`, oldest first, then live events follow.
    MessagesSync {
        messages: Vec<Message>,
    },

    ProviderSwitched {
        provider: ProviderKind,
    },

    AccountLoginCompleted {
        provider: ProviderKind,
    },

    RpcLog {
        entries: Vec<RpcLogEntry>,
    },
}

#[cfg(test)]
#[path = "frames_tests.rs"]
mod tests;
