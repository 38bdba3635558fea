// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The adapter-facing client contract and its lifecycle state machine.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use berth_core::{SessionId, TurnId, WorktreeId};
use berth_sandbox::{Capabilities, SandboxSpec};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle of one agent client.
///
/// ```text
/// idle → starting → ready → processing → {ready, error, stopped}
/// stopped → starting (respawn)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientState {
    Idle,
    Starting,
    Ready,
    Processing,
    Stopped,
    Error,
}

impl ClientState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientState::Idle => "idle",
            ClientState::Starting => "starting",
            ClientState::Ready => "ready",
            ClientState::Processing => "processing",
            ClientState::Stopped => "stopped",
            ClientState::Error => "error",
        }
    }

    /// States from which `start()` may spawn.
    pub fn can_start(&self) -> bool {
        matches!(self, ClientState::Idle | ClientState::Stopped | ClientState::Error)
    }
}

/// Everything needed to spawn a client's child process.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    pub session_id: SessionId,
    pub worktree_id: WorktreeId,
    /// The worktree's checkout — the child's working directory.
    pub workdir: PathBuf,
    /// The workspace home directory.
    pub home: PathBuf,
    pub sandbox: SandboxSpec,
    pub caps: Capabilities,
    /// Environment pass-list for the child (credentials included).
    pub env: HashMap<String, String>,
    pub model: Option<String>,
    pub reasoning_effort: Option<String>,
    /// Resume an existing conversation thread (fork inheritance).
    pub thread_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to spawn agent: {0}")]
    SpawnFailed(String),

    #[error("agent handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("client is {}, expected {expected}", state.as_str())]
    WrongState { state: ClientState, expected: &'static str },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("turn rejected: {0}")]
    TurnRejected(String),

    #[error("agent stdio error: {0}")]
    Io(#[from] std::io::Error),
}

/// A supervised provider CLI bound to one worktree.
///
/// All asynchronous output flows over the event channel handed to the
/// concrete client at construction; methods only carry control flow.
#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Drive the client to `ready`, spawning if necessary. Idempotent when
    /// already ready or processing.
    async fn start(&self) -> Result<(), ClientError>;

    /// Issue a turn under a server-minted id, independent of whatever id
    /// the CLI assigns internally. Resolves once the adapter has *accepted*
    /// the turn (`turn_started` emitted) — callers serialize on this.
    async fn send_turn(&self, turn_id: TurnId, text: &str) -> Result<(), ClientError>;

    /// Cancel an in-flight turn. Idempotent; unknown or finished turn ids
    /// are no-ops. Returns immediately — the cancelled `turn_completed`
    /// arrives on the event stream.
    async fn interrupt(&self, turn_id: &TurnId) -> Result<(), ClientError>;

    /// Models the provider offers. Empty when the CLI cannot enumerate.
    async fn list_models(&self) -> Result<Vec<ModelInfo>, ClientError>;

    async fn set_model(
        &self,
        model: &str,
        reasoning_effort: Option<&str>,
    ) -> Result<(), ClientError>;

    /// Clean shutdown followed by respawn.
    async fn request_restart(&self) -> Result<(), ClientError>;

    /// Cooperative stop: close the dialogue, wait `grace`, then SIGTERM,
    /// wait again, then SIGKILL. Never fails.
    async fn stop(&self, grace: Duration);

    fn state(&self) -> ClientState;

    /// Conversation thread id, once the agent assigned one.
    fn thread_id(&self) -> Option<String>;
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
