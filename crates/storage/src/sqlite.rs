// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Embedded SQLite backend.
//!
//! One connection behind a mutex. WAL journaling and a busy_timeout keep
//! concurrent readers (external tooling, backups) from failing writes.
//! Entity records are stored as JSON columns; messages get real columns
//! because the store assigns their ids.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use berth_core::{
    Message, MessageId, MessageRole, RefreshTokenRecord, Session, SessionId, Workspace,
    WorkspaceId, Worktree, WorktreeId,
};

use crate::{ConsumeOutcome, NewMessage, Store, StoreError};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS workspaces (
    id TEXT PRIMARY KEY,
    record TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    workspace_id TEXT NOT NULL,
    record TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS sessions_by_workspace ON sessions (workspace_id);
CREATE TABLE IF NOT EXISTS worktrees (
    session_id TEXT NOT NULL,
    id TEXT NOT NULL,
    record TEXT NOT NULL,
    PRIMARY KEY (session_id, id)
);
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    worktree_id TEXT NOT NULL,
    role TEXT NOT NULL,
    body TEXT NOT NULL,
    attachments TEXT,
    tool_result TEXT,
    created_at_ms INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS messages_by_scope ON messages (session_id, worktree_id, id);
CREATE TABLE IF NOT EXISTS refresh_tokens (
    token_hash TEXT PRIMARY KEY,
    workspace_id TEXT NOT NULL,
    created_at_ms INTEGER NOT NULL,
    expires_at_ms INTEGER NOT NULL,
    used_at_ms INTEGER
);
";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    ///
    /// `busy_timeout` is mandatory — writes must wait out concurrent readers
    /// rather than erroring. Default 5 s, tunable by the caller.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn role_str(role: MessageRole) -> &'static str {
        match role {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::CommandExecution => "commandExecution",
            MessageRole::ToolResult => "tool_result",
        }
    }

    fn parse_role(s: &str) -> Option<MessageRole> {
        match s {
            "user" => Some(MessageRole::User),
            "assistant" => Some(MessageRole::Assistant),
            "commandExecution" => Some(MessageRole::CommandExecution),
            "tool_result" => Some(MessageRole::ToolResult),
            _ => None,
        }
    }

    fn decode<T: serde::de::DeserializeOwned>(key: &str, json: &str) -> Result<T, StoreError> {
        serde_json::from_str(json)
            .map_err(|source| StoreError::Corrupt { key: key.to_string(), source })
    }

    fn encode<T: serde::Serialize>(key: &str, record: &T) -> Result<String, StoreError> {
        serde_json::to_string(record)
            .map_err(|source| StoreError::Corrupt { key: key.to_string(), source })
    }

    fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<(i64, String, String, Option<String>, Option<String>, u64)> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get::<_, i64>(5)? as u64,
        ))
    }

    fn build_message(
        raw: (i64, String, String, Option<String>, Option<String>, u64),
    ) -> Result<Message, StoreError> {
        let (id, role, body, attachments, tool_result, created_at_ms) = raw;
        let role = Self::parse_role(&role).ok_or_else(|| StoreError::Corrupt {
            key: "message.role".to_string(),
            source: serde::de::Error::custom(format!("unknown role {role:?}")),
        })?;
        let attachments = match attachments {
            Some(json) => Self::decode("message.attachments", &json)?,
            None => Vec::new(),
        };
        let tool_result = match tool_result {
            Some(json) => Some(Self::decode("message.tool_result", &json)?),
            None => None,
        };
        Ok(Message { id, role, text: body, attachments, tool_result, created_at_ms })
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn put_workspace(&self, workspace: &Workspace) -> Result<(), StoreError> {
        let json = Self::encode(workspace.id.as_str(), workspace)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO workspaces (id, record) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET record = excluded.record",
            params![workspace.id.as_str(), json],
        )?;
        Ok(())
    }

    async fn get_workspace(&self, id: &WorkspaceId) -> Result<Option<Workspace>, StoreError> {
        let conn = self.conn.lock();
        let json: Option<String> = conn
            .query_row("SELECT record FROM workspaces WHERE id = ?1", params![id.as_str()], |r| {
                r.get(0)
            })
            .optional()?;
        json.map(|j| Self::decode(id.as_str(), &j)).transpose()
    }

    async fn list_workspaces(&self) -> Result<Vec<Workspace>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id, record FROM workspaces ORDER BY id")?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?;
        let mut out = Vec::new();
        for row in rows {
            let (id, json) = row?;
            out.push(Self::decode(&id, &json)?);
        }
        Ok(out)
    }

    async fn save_session(&self, session: &Session) -> Result<(), StoreError> {
        let json = Self::encode(session.id.as_str(), session)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sessions (id, workspace_id, record) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET record = excluded.record",
            params![session.id.as_str(), session.workspace_id.as_str(), json],
        )?;
        Ok(())
    }

    async fn get_session(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        let conn = self.conn.lock();
        let json: Option<String> = conn
            .query_row("SELECT record FROM sessions WHERE id = ?1", params![id.as_str()], |r| {
                r.get(0)
            })
            .optional()?;
        json.map(|j| Self::decode(id.as_str(), &j)).transpose()
    }

    async fn list_sessions(&self, workspace_id: &WorkspaceId) -> Result<Vec<Session>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT id, record FROM sessions WHERE workspace_id = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![workspace_id.as_str()], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (id, json) = row?;
            out.push(Self::decode(&id, &json)?);
        }
        Ok(out)
    }

    async fn delete_session(&self, id: &SessionId) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM messages WHERE session_id = ?1", params![id.as_str()])?;
        conn.execute("DELETE FROM worktrees WHERE session_id = ?1", params![id.as_str()])?;
        conn.execute("DELETE FROM sessions WHERE id = ?1", params![id.as_str()])?;
        Ok(())
    }

    async fn save_worktree(&self, worktree: &Worktree) -> Result<(), StoreError> {
        let json = Self::encode(worktree.id.as_str(), worktree)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO worktrees (session_id, id, record) VALUES (?1, ?2, ?3)
             ON CONFLICT(session_id, id) DO UPDATE SET record = excluded.record",
            params![worktree.session_id.as_str(), worktree.id.as_str(), json],
        )?;
        Ok(())
    }

    async fn get_worktree(
        &self,
        session_id: &SessionId,
        id: &WorktreeId,
    ) -> Result<Option<Worktree>, StoreError> {
        let conn = self.conn.lock();
        let json: Option<String> = conn
            .query_row(
                "SELECT record FROM worktrees WHERE session_id = ?1 AND id = ?2",
                params![session_id.as_str(), id.as_str()],
                |r| r.get(0),
            )
            .optional()?;
        json.map(|j| Self::decode(id.as_str(), &j)).transpose()
    }

    async fn list_worktrees(&self, session_id: &SessionId) -> Result<Vec<Worktree>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, record FROM worktrees WHERE session_id = ?1
             ORDER BY CASE WHEN id = 'main' THEN 0 ELSE 1 END, id",
        )?;
        let rows = stmt.query_map(params![session_id.as_str()], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (id, json) = row?;
            out.push(Self::decode(&id, &json)?);
        }
        Ok(out)
    }

    async fn delete_worktree(
        &self,
        session_id: &SessionId,
        id: &WorktreeId,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM messages WHERE session_id = ?1 AND worktree_id = ?2",
            params![session_id.as_str(), id.as_str()],
        )?;
        conn.execute(
            "DELETE FROM worktrees WHERE session_id = ?1 AND id = ?2",
            params![session_id.as_str(), id.as_str()],
        )?;
        Ok(())
    }

    async fn append_message(
        &self,
        session_id: &SessionId,
        worktree_id: &WorktreeId,
        message: NewMessage,
    ) -> Result<Message, StoreError> {
        let role = Self::role_str(message.role);
        let attachments = if message.attachments.is_empty() {
            None
        } else {
            Some(Self::encode("message.attachments", &message.attachments)?)
        };
        let tool_result = message
            .tool_result
            .as_ref()
            .map(|v| Self::encode("message.tool_result", v))
            .transpose()?;

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO messages (session_id, worktree_id, role, body, attachments, tool_result, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                session_id.as_str(),
                worktree_id.as_str(),
                role,
                message.text,
                attachments,
                tool_result,
                message.created_at_ms as i64,
            ],
        )?;
        let id: MessageId = conn.last_insert_rowid();
        Ok(Message {
            id,
            role: message.role,
            text: message.text,
            attachments: message.attachments,
            tool_result: message.tool_result,
            created_at_ms: message.created_at_ms,
        })
    }

    async fn list_messages(
        &self,
        session_id: &SessionId,
        worktree_id: &WorktreeId,
        limit: usize,
        before_id: Option<MessageId>,
    ) -> Result<Vec<Message>, StoreError> {
        let conn = self.conn.lock();
        let before = before_id.unwrap_or(i64::MAX);
        let mut stmt = conn.prepare(
            "SELECT id, role, body, attachments, tool_result, created_at_ms FROM messages
             WHERE session_id = ?1 AND worktree_id = ?2 AND id < ?3
             ORDER BY id DESC LIMIT ?4",
        )?;
        let rows = stmt.query_map(
            params![session_id.as_str(), worktree_id.as_str(), before, limit as i64],
            Self::row_to_message,
        )?;
        let mut out = Vec::new();
        for row in rows {
            out.push(Self::build_message(row?)?);
        }
        // Query walks newest-first for the LIMIT; callers get insertion order.
        out.reverse();
        Ok(out)
    }

    async fn messages_after(
        &self,
        session_id: &SessionId,
        worktree_id: &WorktreeId,
        after_id: MessageId,
    ) -> Result<Vec<Message>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, role, body, attachments, tool_result, created_at_ms FROM messages
             WHERE session_id = ?1 AND worktree_id = ?2 AND id > ?3
             ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(
            params![session_id.as_str(), worktree_id.as_str(), after_id],
            Self::row_to_message,
        )?;
        let mut out = Vec::new();
        for row in rows {
            out.push(Self::build_message(row?)?);
        }
        Ok(out)
    }

    async fn clear_messages(
        &self,
        session_id: &SessionId,
        worktree_id: &WorktreeId,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM messages WHERE session_id = ?1 AND worktree_id = ?2",
            params![session_id.as_str(), worktree_id.as_str()],
        )?;
        Ok(())
    }

    async fn put_refresh_token(&self, record: &RefreshTokenRecord) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO refresh_tokens (token_hash, workspace_id, created_at_ms, expires_at_ms, used_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(token_hash) DO NOTHING",
            params![
                record.token_hash,
                record.workspace_id.as_str(),
                record.created_at_ms as i64,
                record.expires_at_ms as i64,
                record.used_at_ms.map(|v| v as i64),
            ],
        )?;
        Ok(())
    }

    async fn consume_refresh_token(
        &self,
        token_hash: &str,
        now_ms: u64,
    ) -> Result<ConsumeOutcome, StoreError> {
        let conn = self.conn.lock();
        // The conditional UPDATE is the atomicity point: rows-affected tells
        // exactly one caller it won the rotation.
        let updated = conn.execute(
            "UPDATE refresh_tokens SET used_at_ms = ?1
             WHERE token_hash = ?2 AND used_at_ms IS NULL AND expires_at_ms > ?1",
            params![now_ms as i64, token_hash],
        )?;
        if updated == 1 {
            let record = conn.query_row(
                "SELECT workspace_id, created_at_ms, expires_at_ms, used_at_ms
                 FROM refresh_tokens WHERE token_hash = ?1",
                params![token_hash],
                |r| {
                    Ok(RefreshTokenRecord {
                        token_hash: token_hash.to_string(),
                        workspace_id: WorkspaceId::from(r.get::<_, String>(0)?),
                        created_at_ms: r.get::<_, i64>(1)? as u64,
                        expires_at_ms: r.get::<_, i64>(2)? as u64,
                        used_at_ms: r.get::<_, Option<i64>>(3)?.map(|v| v as u64),
                    })
                },
            )?;
            return Ok(ConsumeOutcome::Consumed(record));
        }

        let row: Option<(i64, Option<i64>)> = conn
            .query_row(
                "SELECT expires_at_ms, used_at_ms FROM refresh_tokens WHERE token_hash = ?1",
                params![token_hash],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        Ok(match row {
            None => ConsumeOutcome::Missing,
            Some((_, Some(_))) => ConsumeOutcome::AlreadyUsed,
            Some((expires, None)) if (expires as u64) <= now_ms => ConsumeOutcome::Expired,
            // Lost a race between the UPDATE and this SELECT.
            Some(_) => ConsumeOutcome::AlreadyUsed,
        })
    }

    async fn purge_expired(&self, now_ms: u64) -> Result<u64, StoreError> {
        let conn = self.conn.lock();
        let purged = conn.execute(
            "DELETE FROM refresh_tokens WHERE expires_at_ms <= ?1",
            params![now_ms as i64],
        )?;
        Ok(purged as u64)
    }
}

#[cfg(test)]
#[path = "sqlite_tests.rs"]
mod tests;
