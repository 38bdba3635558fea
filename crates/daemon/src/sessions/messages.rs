// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Message routing: user turns in, transcripts out.

use tracing::{info, warn};

use berth_core::{
    ApiError, Clock, Message, MessageId, MessageRole, SessionId, TurnId, WorktreeId,
};
use berth_storage::NewMessage;
use berth_wire::{RpcDirection, ServerPayload};

use super::SessionManager;

impl<C: Clock> SessionManager<C> {
    /// Route a user message to a worktree's agent.
    ///
    /// The user message is persisted *before* it is broadcast — a client
    /// that observes the frame can always read the message back. The call
    /// returns once the turn is queued; issuance happens on a background
    /// task that holds the worktree's turn gate (a fair mutex, so turns
    /// start in arrival order) and waits for the previous turn to complete
    /// before handing the next one to the adapter.
    pub async fn send_message(
        &self,
        session_id: &SessionId,
        worktree_id: &WorktreeId,
        text: String,
        attachments: Vec<String>,
    ) -> Result<(TurnId, MessageId), ApiError> {
        if text.trim().is_empty() {
            return Err(ApiError::Validation("message text is required".to_string()));
        }
        let mut session = self.load_session(session_id).await?;
        let workspace = self.load_workspace(&session.workspace_id).await?;
        let worktree = self.load_worktree(session_id, worktree_id).await?;

        session.touch(self.now_ms());
        self.store.save_session(&session).await.map_err(|e| ApiError::Internal(e.to_string()))?;

        let client = self.ensure_client(&workspace, &session, &worktree).await?;

        // Persist, then broadcast.
        let message = self
            .store
            .append_message(
                session_id,
                worktree_id,
                NewMessage {
                    role: MessageRole::User,
                    text: text.clone(),
                    attachments,
                    tool_result: None,
                    created_at_ms: self.now_ms(),
                },
            )
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        self.broadcaster.publish(
            session_id,
            Some(worktree_id),
            ServerPayload::WorktreeMessagesSync { messages: vec![message.clone()] },
        );

        self.record_rpc(
            session_id,
            RpcDirection::Sent,
            serde_json::json!({ "method": "sendTurn", "worktreeId": worktree_id, "text": text }),
        );

        let (_, gate) = self
            .client_entry(session_id, worktree_id)
            .ok_or_else(|| ApiError::Internal("client disappeared".to_string()))?;
        let turn_id = TurnId::mint();

        let issue_turn = turn_id.clone();
        let issue_session = session_id.clone();
        let issue_worktree = worktree_id.clone();
        let broadcaster = std::sync::Arc::clone(&self.broadcaster);
        tokio::spawn(async move {
            // Fair mutex: issuance order is arrival order.
            let _guard = gate.lock().await;
            // A turn never starts before the previous one completed. There
            // is no server-side turn timeout; cancellation is explicit.
            loop {
                match client.state() {
                    berth_adapters::ClientState::Ready => break,
                    berth_adapters::ClientState::Processing
                    | berth_adapters::ClientState::Starting => {
                        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    }
                    // Lazy respawn on the next use after an idle exit.
                    _ => {
                        if let Err(e) = client.start().await {
                            warn!(error = %e, "client respawn before turn failed");
                            broadcaster.publish(
                                &issue_session,
                                Some(&issue_worktree),
                                ServerPayload::TurnError {
                                    turn_id: Some(issue_turn.clone()),
                                    kind: "internal".to_string(),
                                    message: e.to_string(),
                                },
                            );
                            return;
                        }
                    }
                }
            }
            if let Err(e) = client.send_turn(issue_turn.clone(), &text).await {
                warn!(error = %e, "turn rejected by adapter");
                broadcaster.publish(
                    &issue_session,
                    Some(&issue_worktree),
                    ServerPayload::TurnError {
                        turn_id: Some(issue_turn),
                        kind: "internal".to_string(),
                        message: e.to_string(),
                    },
                );
            }
        });

        info!(session = %session_id, worktree = %worktree_id, turn = %turn_id, "turn queued");
        Ok((turn_id, message.id))
    }

    /// Cancel an in-flight turn. Idempotent: duplicates and unknown turns
    /// are no-ops, including when no client exists at all.
    pub async fn interrupt_turn(
        &self,
        session_id: &SessionId,
        worktree_id: &WorktreeId,
        turn_id: &TurnId,
    ) -> Result<(), ApiError> {
        let Some((client, _)) = self.client_entry(session_id, worktree_id) else {
            return Ok(());
        };
        client.interrupt(turn_id).await.map_err(|e| ApiError::Internal(e.to_string()))
    }

    pub async fn list_messages(
        &self,
        session_id: &SessionId,
        worktree_id: &WorktreeId,
        limit: usize,
        before_id: Option<MessageId>,
    ) -> Result<Vec<Message>, ApiError> {
        self.load_worktree(session_id, worktree_id).await?;
        self.store
            .list_messages(session_id, worktree_id, limit, before_id)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))
    }

    /// Catch-up for `sync_messages`: strictly newer than the cursor.
    pub async fn messages_after(
        &self,
        session_id: &SessionId,
        worktree_id: &WorktreeId,
        after_id: MessageId,
    ) -> Result<Vec<Message>, ApiError> {
        self.store
            .messages_after(session_id, worktree_id, after_id)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))
    }

    /// Clear every worktree's transcript in a session.
    pub async fn clear_session_messages(&self, session_id: &SessionId) -> Result<(), ApiError> {
        let worktrees = self
            .store
            .list_worktrees(session_id)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        for worktree in &worktrees {
            self.store
                .clear_messages(session_id, &worktree.id)
                .await
                .map_err(|e| ApiError::Internal(e.to_string()))?;
            self.broadcaster.publish(
                session_id,
                Some(&worktree.id),
                ServerPayload::MessagesSync { messages: vec![] },
            );
        }
        Ok(())
    }

    // ---- backlog ----

    pub async fn list_backlog(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<berth_core::BacklogItem>, ApiError> {
        Ok(self.load_session(session_id).await?.backlog)
    }

    pub async fn add_backlog(
        &self,
        session_id: &SessionId,
        text: String,
    ) -> Result<berth_core::BacklogItem, ApiError> {
        if text.trim().is_empty() {
            return Err(ApiError::Validation("backlog text is required".to_string()));
        }
        let mut session = self.load_session(session_id).await?;
        let item = berth_core::BacklogItem {
            id: crate::auth::random_hex(6),
            text,
            created_at_ms: self.now_ms(),
        };
        session.backlog.push(item.clone());
        session.touch(self.now_ms());
        self.store.save_session(&session).await.map_err(|e| ApiError::Internal(e.to_string()))?;
        Ok(item)
    }

    pub async fn remove_backlog(
        &self,
        session_id: &SessionId,
        item_id: &str,
    ) -> Result<(), ApiError> {
        let mut session = self.load_session(session_id).await?;
        let before = session.backlog.len();
        session.backlog.retain(|item| item.id != item_id);
        if session.backlog.len() == before {
            return Err(ApiError::not_found("backlog item", item_id));
        }
        self.store.save_session(&session).await.map_err(|e| ApiError::Internal(e.to_string()))?;
        Ok(())
    }
}
