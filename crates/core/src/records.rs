// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persistent records: workspaces, sessions, worktrees, messages, tokens.
//!
//! Ownership is strictly hierarchical — workspaces own sessions own
//! worktrees own messages. Records reference each other by id only; the
//! runtime (agent clients, subscribers) lives in the daemon keyed by the
//! same ids.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, SessionId, TurnId, WorkspaceId, WorktreeId};

/// Agent provider backing a worktree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Codex,
    Claude,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Codex => "codex",
            ProviderKind::Claude => "claude",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "codex" => Some(ProviderKind::Codex),
            "claude" => Some(ProviderKind::Claude),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape of a stored provider credential.
///
/// The blob is opaque to berth — it is written to the provider's credential
/// file verbatim and never inspected or given a synthetic expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    ApiKey,
    AuthJsonB64,
    SetupToken,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub kind: CredentialKind,
    pub blob: String,
}

/// Per-provider enablement + credential for a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<Credential>,
}

/// A tenant. The clear secret is emitted exactly once at creation; only the
/// salted hash is stored. uid/gid are allocated once and never reused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub secret_hash: String,
    pub uid: u32,
    pub gid: u32,
    pub providers: HashMap<ProviderKind, ProviderConfig>,
    pub created_at_ms: u64,
}

impl Workspace {
    /// Providers currently enabled for this workspace.
    pub fn enabled_providers(&self) -> Vec<ProviderKind> {
        let mut out: Vec<ProviderKind> =
            self.providers.iter().filter(|(_, c)| c.enabled).map(|(k, _)| *k).collect();
        out.sort_by_key(|p| p.as_str());
        out
    }
}

/// Item on a session's persisted backlog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BacklogItem {
    pub id: String,
    pub text: String,
    pub created_at_ms: u64,
}

/// A cloned repository bound to one workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub workspace_id: WorkspaceId,
    pub repo_url: String,
    pub name: String,
    pub created_at_ms: u64,
    pub last_activity_ms: u64,
    pub default_internet_access: bool,
    pub default_deny_git_credentials_access: bool,
    pub active_provider: ProviderKind,
    /// Snapshot of the workspace's enabled providers at creation time.
    pub providers: Vec<ProviderKind>,
    pub git_dir: PathBuf,
    pub repo_dir: PathBuf,
    pub attachments_dir: PathBuf,
    #[serde(default)]
    pub backlog: Vec<BacklogItem>,
}

impl Session {
    /// Bump `last_activity_ms`, keeping it monotone even if the clock skews.
    pub fn touch(&mut self, now_ms: u64) {
        if now_ms > self.last_activity_ms {
            self.last_activity_ms = now_ms;
        }
    }

    pub fn idle_for_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_activity_ms)
    }

    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.created_at_ms)
    }
}

/// How a worktree came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorktreeContext {
    /// Fresh branch from a chosen start point.
    New,
    /// Fork of another worktree, inheriting its conversation thread.
    Fork,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorktreeStatus {
    Creating,
    Ready,
    Processing,
    Stopped,
    Error,
}

/// A branch working copy inside a session, hosting one agent client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worktree {
    pub id: WorktreeId,
    pub session_id: SessionId,
    pub branch_name: String,
    pub name: String,
    pub provider: ProviderKind,
    pub context: WorktreeContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_worktree_id: Option<WorktreeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
    pub internet_access: bool,
    pub deny_git_credentials_access: bool,
    pub status: WorktreeStatus,
    pub color: String,
    /// Conversation thread id assigned by the agent on its first turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    /// Turn currently in flight, if any. `status == Processing` implies set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_turn_id: Option<TurnId>,
    pub created_at_ms: u64,
}

/// Fixed palette for worktree accent colors.
const PALETTE: &[&str] =
    &["#e06c75", "#98c379", "#e5c07b", "#61afef", "#c678dd", "#56b6c2", "#d19a66", "#abb2bf"];

/// Stable palette pick for a worktree id.
pub fn palette_color(id: &WorktreeId) -> &'static str {
    let sum: u32 = id.as_str().bytes().map(u32::from).sum();
    PALETTE[(sum as usize) % PALETTE.len()]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageRole {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "assistant")]
    Assistant,
    #[serde(rename = "commandExecution")]
    CommandExecution,
    #[serde(rename = "tool_result")]
    ToolResult,
}

/// Append-only conversation record scoped to (session, worktree).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: MessageRole,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<serde_json::Value>,
    pub created_at_ms: u64,
}

/// Stored refresh token. Only the hash ever touches disk; a token is valid
/// for at most one rotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    pub token_hash: String,
    pub workspace_id: WorkspaceId,
    pub created_at_ms: u64,
    pub expires_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_at_ms: Option<u64>,
}

#[cfg(test)]
#[path = "records_tests.rs"]
mod tests;
