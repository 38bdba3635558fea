// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! External Redis backend.
//!
//! Entity records are JSON strings under namespaced keys; per-workspace and
//! per-session membership lives in index sets. The session index set never
//! expires — only session keys may carry native TTLs, so a TTL'd session can
//! vanish while the index still names it and readers treat the missing key
//! as deleted. Refresh-token consumption uses `SET NX` on a consumed-marker
//! key so concurrent rotations succeed exactly once.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use berth_core::{
    Message, MessageId, RefreshTokenRecord, Session, SessionId, Workspace, WorkspaceId, Worktree,
    WorktreeId,
};

use crate::{ConsumeOutcome, NewMessage, Store, StoreError};

const NS: &str = "berth";

pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    fn ws_key(id: &WorkspaceId) -> String {
        format!("{NS}:ws:{id}")
    }

    fn ws_index() -> String {
        format!("{NS}:wsidx")
    }

    fn sess_key(id: &SessionId) -> String {
        format!("{NS}:sess:{id}")
    }

    fn sess_index(workspace_id: &WorkspaceId) -> String {
        format!("{NS}:sessidx:{workspace_id}")
    }

    fn wt_hash(session_id: &SessionId) -> String {
        format!("{NS}:wt:{session_id}")
    }

    fn msg_list(session_id: &SessionId, worktree_id: &WorktreeId) -> String {
        format!("{NS}:msg:{session_id}:{worktree_id}")
    }

    fn msg_seq(session_id: &SessionId, worktree_id: &WorktreeId) -> String {
        format!("{NS}:msgseq:{session_id}:{worktree_id}")
    }

    fn rt_key(hash: &str) -> String {
        format!("{NS}:rt:{hash}")
    }

    fn rt_used_key(hash: &str) -> String {
        format!("{NS}:rtused:{hash}")
    }

    fn rt_index() -> String {
        format!("{NS}:rtidx")
    }

    fn decode<T: serde::de::DeserializeOwned>(key: &str, json: &str) -> Result<T, StoreError> {
        serde_json::from_str(json)
            .map_err(|source| StoreError::Corrupt { key: key.to_string(), source })
    }

    fn encode<T: serde::Serialize>(key: &str, record: &T) -> Result<String, StoreError> {
        serde_json::to_string(record)
            .map_err(|source| StoreError::Corrupt { key: key.to_string(), source })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        let mut conn = self.conn.clone();
        let json: Option<String> = conn.get(key).await?;
        json.map(|j| Self::decode(key, &j)).transpose()
    }

    /// Load every message in a worktree's list, in insertion order.
    async fn all_messages(
        &self,
        session_id: &SessionId,
        worktree_id: &WorktreeId,
    ) -> Result<Vec<Message>, StoreError> {
        let mut conn = self.conn.clone();
        let key = Self::msg_list(session_id, worktree_id);
        let raw: Vec<String> = conn.lrange(&key, 0, -1).await?;
        raw.iter().map(|j| Self::decode(&key, j)).collect()
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn put_workspace(&self, workspace: &Workspace) -> Result<(), StoreError> {
        let key = Self::ws_key(&workspace.id);
        let json = Self::encode(&key, workspace)?;
        let mut conn = self.conn.clone();
        let _: () = conn.set(&key, json).await?;
        let _: () = conn.sadd(Self::ws_index(), workspace.id.as_str()).await?;
        Ok(())
    }

    async fn get_workspace(&self, id: &WorkspaceId) -> Result<Option<Workspace>, StoreError> {
        self.get_json(&Self::ws_key(id)).await
    }

    async fn list_workspaces(&self) -> Result<Vec<Workspace>, StoreError> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.smembers(Self::ws_index()).await?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(ws) = self.get_json(&Self::ws_key(&WorkspaceId::from(id))).await? {
                out.push(ws);
            }
        }
        out.sort_by(|a: &Workspace, b: &Workspace| a.id.as_str().cmp(b.id.as_str()));
        Ok(out)
    }

    async fn save_session(&self, session: &Session) -> Result<(), StoreError> {
        let key = Self::sess_key(&session.id);
        let json = Self::encode(&key, session)?;
        let mut conn = self.conn.clone();
        let _: () = conn.set(&key, json).await?;
        // Membership only; the index carries no TTL.
        let _: () = conn.sadd(Self::sess_index(&session.workspace_id), session.id.as_str()).await?;
        Ok(())
    }

    async fn get_session(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        self.get_json(&Self::sess_key(id)).await
    }

    async fn list_sessions(&self, workspace_id: &WorkspaceId) -> Result<Vec<Session>, StoreError> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.smembers(Self::sess_index(workspace_id)).await?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let session_id = SessionId::from(id);
            match self.get_json::<Session>(&Self::sess_key(&session_id)).await? {
                Some(session) => out.push(session),
                // Key TTL'd away; drop the stale index entry.
                None => {
                    tracing::debug!(session = %session_id, "pruning stale session index entry");
                    let _: () =
                        conn.srem(Self::sess_index(workspace_id), session_id.as_str()).await?;
                }
            }
        }
        out.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        Ok(out)
    }

    async fn delete_session(&self, id: &SessionId) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        if let Some(session) = self.get_json::<Session>(&Self::sess_key(id)).await? {
            let _: () = conn.srem(Self::sess_index(&session.workspace_id), id.as_str()).await?;
        }
        let worktree_ids: Vec<String> = conn.hkeys(Self::wt_hash(id)).await?;
        for wid in worktree_ids {
            let wid = WorktreeId::from(wid);
            let _: () = conn.del(Self::msg_list(id, &wid)).await?;
            let _: () = conn.del(Self::msg_seq(id, &wid)).await?;
        }
        let _: () = conn.del(Self::wt_hash(id)).await?;
        let _: () = conn.del(Self::sess_key(id)).await?;
        Ok(())
    }

    async fn save_worktree(&self, worktree: &Worktree) -> Result<(), StoreError> {
        let key = Self::wt_hash(&worktree.session_id);
        let json = Self::encode(&key, worktree)?;
        let mut conn = self.conn.clone();
        let _: () = conn.hset(&key, worktree.id.as_str(), json).await?;
        Ok(())
    }

    async fn get_worktree(
        &self,
        session_id: &SessionId,
        id: &WorktreeId,
    ) -> Result<Option<Worktree>, StoreError> {
        let mut conn = self.conn.clone();
        let key = Self::wt_hash(session_id);
        let json: Option<String> = conn.hget(&key, id.as_str()).await?;
        json.map(|j| Self::decode(&key, &j)).transpose()
    }

    async fn list_worktrees(&self, session_id: &SessionId) -> Result<Vec<Worktree>, StoreError> {
        let mut conn = self.conn.clone();
        let key = Self::wt_hash(session_id);
        let raw: Vec<(String, String)> = conn.hgetall(&key).await?;
        let mut out = Vec::with_capacity(raw.len());
        for (_, json) in &raw {
            out.push(Self::decode::<Worktree>(&key, json)?);
        }
        out.sort_by(|a, b| {
            (!a.id.is_main(), a.id.as_str()).cmp(&(!b.id.is_main(), b.id.as_str()))
        });
        Ok(out)
    }

    async fn delete_worktree(
        &self,
        session_id: &SessionId,
        id: &WorktreeId,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.hdel(Self::wt_hash(session_id), id.as_str()).await?;
        let _: () = conn.del(Self::msg_list(session_id, id)).await?;
        let _: () = conn.del(Self::msg_seq(session_id, id)).await?;
        Ok(())
    }

    async fn append_message(
        &self,
        session_id: &SessionId,
        worktree_id: &WorktreeId,
        message: NewMessage,
    ) -> Result<Message, StoreError> {
        let mut conn = self.conn.clone();
        let id: i64 = conn.incr(Self::msg_seq(session_id, worktree_id), 1).await?;
        let record = Message {
            id,
            role: message.role,
            text: message.text,
            attachments: message.attachments,
            tool_result: message.tool_result,
            created_at_ms: message.created_at_ms,
        };
        let key = Self::msg_list(session_id, worktree_id);
        let json = Self::encode(&key, &record)?;
        let _: () = conn.rpush(&key, json).await?;
        Ok(record)
    }

    async fn list_messages(
        &self,
        session_id: &SessionId,
        worktree_id: &WorktreeId,
        limit: usize,
        before_id: Option<MessageId>,
    ) -> Result<Vec<Message>, StoreError> {
        let mut all = self.all_messages(session_id, worktree_id).await?;
        if let Some(before) = before_id {
            all.retain(|m| m.id < before);
        }
        let skip = all.len().saturating_sub(limit);
        Ok(all.split_off(skip))
    }

    async fn messages_after(
        &self,
        session_id: &SessionId,
        worktree_id: &WorktreeId,
        after_id: MessageId,
    ) -> Result<Vec<Message>, StoreError> {
        let mut all = self.all_messages(session_id, worktree_id).await?;
        all.retain(|m| m.id > after_id);
        Ok(all)
    }

    async fn clear_messages(
        &self,
        session_id: &SessionId,
        worktree_id: &WorktreeId,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(Self::msg_list(session_id, worktree_id)).await?;
        // The sequence counter survives so ids stay monotone across clears.
        Ok(())
    }

    async fn put_refresh_token(&self, record: &RefreshTokenRecord) -> Result<(), StoreError> {
        let key = Self::rt_key(&record.token_hash);
        let json = Self::encode(&key, record)?;
        let mut conn = self.conn.clone();
        let _: () = conn.set(&key, json).await?;
        let _: () = conn.sadd(Self::rt_index(), record.token_hash.as_str()).await?;
        Ok(())
    }

    async fn consume_refresh_token(
        &self,
        token_hash: &str,
        now_ms: u64,
    ) -> Result<ConsumeOutcome, StoreError> {
        let key = Self::rt_key(token_hash);
        let mut record = match self.get_json::<RefreshTokenRecord>(&key).await? {
            Some(record) => record,
            None => return Ok(ConsumeOutcome::Missing),
        };
        if record.used_at_ms.is_some() {
            return Ok(ConsumeOutcome::AlreadyUsed);
        }
        if record.expires_at_ms <= now_ms {
            return Ok(ConsumeOutcome::Expired);
        }

        // SET NX on the marker is the atomicity point: exactly one concurrent
        // caller wins the rotation.
        let mut conn = self.conn.clone();
        let won: bool = conn.set_nx(Self::rt_used_key(token_hash), now_ms).await?;
        if !won {
            return Ok(ConsumeOutcome::AlreadyUsed);
        }
        record.used_at_ms = Some(now_ms);
        let json = Self::encode(&key, &record)?;
        let _: () = conn.set(&key, json).await?;
        Ok(ConsumeOutcome::Consumed(record))
    }

    async fn purge_expired(&self, now_ms: u64) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let hashes: Vec<String> = conn.smembers(Self::rt_index()).await?;
        let mut purged = 0u64;
        for hash in hashes {
            let key = Self::rt_key(&hash);
            let expired = match self.get_json::<RefreshTokenRecord>(&key).await? {
                Some(record) => record.expires_at_ms <= now_ms,
                None => true,
            };
            if expired {
                let _: () = conn.del(&key).await?;
                let _: () = conn.del(Self::rt_used_key(&hash)).await?;
                let _: () = conn.srem(Self::rt_index(), &hash).await?;
                purged += 1;
            }
        }
        Ok(purged)
    }
}

#[cfg(test)]
#[path = "redis_store_tests.rs"]
mod tests;
