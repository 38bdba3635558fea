// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable state for berth: workspaces, sessions, worktrees, messages,
//! refresh tokens.
//!
//! Two backends behind one trait — an embedded SQLite file for
//! single-machine deployments and an external Redis instance when the
//! operator wants state outside the daemon's filesystem. All operations are
//! idempotent on identity; concurrent writers are serialized per key by the
//! backend (SQLite: one connection behind a mutex plus WAL + busy_timeout;
//! Redis: single-key commands and `SET NX` for the one read-modify-write,
//! refresh-token consumption).

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod redis_store;
mod sqlite;

pub use redis_store::RedisStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use berth_core::{
    Message, MessageId, MessageRole, RefreshTokenRecord, Session, SessionId, Workspace,
    WorkspaceId, Worktree, WorktreeId,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("corrupt record for {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Outcome of a refresh-token consumption attempt.
///
/// `Consumed` is returned to exactly one caller per token, even under
/// concurrent rotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeOutcome {
    Consumed(RefreshTokenRecord),
    Missing,
    AlreadyUsed,
    Expired,
}

/// A message to append; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub role: MessageRole,
    pub text: String,
    pub attachments: Vec<String>,
    pub tool_result: Option<serde_json::Value>,
    pub created_at_ms: u64,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn put_workspace(&self, workspace: &Workspace) -> Result<(), StoreError>;
    async fn get_workspace(&self, id: &WorkspaceId) -> Result<Option<Workspace>, StoreError>;
    async fn list_workspaces(&self) -> Result<Vec<Workspace>, StoreError>;

    async fn save_session(&self, session: &Session) -> Result<(), StoreError>;
    async fn get_session(&self, id: &SessionId) -> Result<Option<Session>, StoreError>;
    async fn list_sessions(&self, workspace_id: &WorkspaceId) -> Result<Vec<Session>, StoreError>;
    /// Removes the session row, its worktrees, and its messages.
    async fn delete_session(&self, id: &SessionId) -> Result<(), StoreError>;

    async fn save_worktree(&self, worktree: &Worktree) -> Result<(), StoreError>;
    async fn get_worktree(
        &self,
        session_id: &SessionId,
        id: &WorktreeId,
    ) -> Result<Option<Worktree>, StoreError>;
    async fn list_worktrees(&self, session_id: &SessionId) -> Result<Vec<Worktree>, StoreError>;
    async fn delete_worktree(
        &self,
        session_id: &SessionId,
        id: &WorktreeId,
    ) -> Result<(), StoreError>;

    /// Append a message; the assigned id is unique within the worktree and
    /// monotone in insertion order.
    async fn append_message(
        &self,
        session_id: &SessionId,
        worktree_id: &WorktreeId,
        message: NewMessage,
    ) -> Result<Message, StoreError>;

    /// Newest-last page of messages with id < `before_id` (all when `None`),
    /// at most `limit` entries.
    async fn list_messages(
        &self,
        session_id: &SessionId,
        worktree_id: &WorktreeId,
        limit: usize,
        before_id: Option<MessageId>,
    ) -> Result<Vec<Message>, StoreError>;

    /// Messages with id strictly greater than `after_id`, in insertion
    /// order. Backs the `sync_messages` catch-up cursor.
    async fn messages_after(
        &self,
        session_id: &SessionId,
        worktree_id: &WorktreeId,
        after_id: MessageId,
    ) -> Result<Vec<Message>, StoreError>;

    async fn clear_messages(
        &self,
        session_id: &SessionId,
        worktree_id: &WorktreeId,
    ) -> Result<(), StoreError>;

    async fn put_refresh_token(&self, record: &RefreshTokenRecord) -> Result<(), StoreError>;

    /// Atomically mark the token consumed. At most one caller observes
    /// `Consumed` for a given hash.
    async fn consume_refresh_token(
        &self,
        token_hash: &str,
        now_ms: u64,
    ) -> Result<ConsumeOutcome, StoreError>;

    /// Drop refresh tokens past their expiry. Sessions are torn down by the
    /// session manager's GC, which owns directory removal and subscriber
    /// notification.
    async fn purge_expired(&self, now_ms: u64) -> Result<u64, StoreError>;
}
