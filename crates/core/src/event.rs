// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The uniform agent event stream.
//!
//! Both provider adapters — whatever their wire protocol — emit this sum.
//! Events are scoped to one client; the session manager attaches session and
//! worktree ids before persistence and broadcast.

use serde::{Deserialize, Serialize};

use crate::ids::TurnId;

/// Terminal error classification for a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnErrorKind {
    UsageLimit,
    RateLimited,
    Network,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnError {
    pub kind: TurnErrorKind,
    pub message: String,
}

/// Events emitted by an agent client.
///
/// Serializes with `{"type": "name", ...fields}`. Within one turn, order is
/// adapter-emission order; across turns, the message log is the ordering
/// authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentEvent {
    /// Client finished its init handshake and accepts turns.
    #[serde(rename = "ready")]
    Ready,

    /// The agent assigned (or resumed) its conversation thread.
    #[serde(rename = "thread_started")]
    ThreadStarted { thread_id: String },

    /// The adapter accepted a turn.
    #[serde(rename = "turn_started")]
    TurnStarted { turn_id: TurnId },

    /// Token-level (JSON-RPC) or segment-level (JSONL) assistant text delta.
    #[serde(rename = "assistant_delta")]
    AssistantDelta { turn_id: TurnId, text: String },

    /// Complete assistant message for the turn so far.
    #[serde(rename = "assistant_message")]
    AssistantMessage { turn_id: TurnId, text: String },

    /// A work item (command, tool call) began.
    #[serde(rename = "item_started")]
    ItemStarted { turn_id: TurnId, item_id: String, kind: String },

    /// Incremental command output.
    #[serde(rename = "command_execution_delta")]
    CommandExecutionDelta { turn_id: TurnId, item_id: String, output: String },

    #[serde(rename = "command_execution_completed")]
    CommandExecutionCompleted {
        turn_id: TurnId,
        item_id: String,
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
        output: String,
    },

    #[serde(rename = "tool_result")]
    ToolResult { turn_id: TurnId, item_id: String, name: String, payload: serde_json::Value },

    /// Turn finished — successfully, cancelled, or with a classified error.
    #[serde(rename = "turn_completed")]
    TurnCompleted {
        turn_id: TurnId,
        #[serde(default)]
        cancelled: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<TurnError>,
    },

    /// Protocol-level fault outside any turn.
    #[serde(rename = "error")]
    Error { message: String },

    /// The child process exited.
    #[serde(rename = "exit")]
    Exit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signal: Option<i32>,
    },
}

impl AgentEvent {
    /// Turn this event belongs to, when turn-scoped.
    pub fn turn_id(&self) -> Option<&TurnId> {
        match self {
            AgentEvent::TurnStarted { turn_id }
            | AgentEvent::AssistantDelta { turn_id, .. }
            | AgentEvent::AssistantMessage { turn_id, .. }
            | AgentEvent::ItemStarted { turn_id, .. }
            | AgentEvent::CommandExecutionDelta { turn_id, .. }
            | AgentEvent::CommandExecutionCompleted { turn_id, .. }
            | AgentEvent::ToolResult { turn_id, .. }
            | AgentEvent::TurnCompleted { turn_id, .. } => Some(turn_id),
            AgentEvent::Ready
            | AgentEvent::ThreadStarted { .. }
            | AgentEvent::Error { .. }
            | AgentEvent::Exit { .. } => None,
        }
    }

    /// True for `turn_completed`, however it resolved.
    pub fn ends_turn(&self) -> bool {
        matches!(self, AgentEvent::TurnCompleted { .. })
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
