// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worktree creation (`new` / `fork`), mutation, and removal.

use tracing::info;

use berth_core::{
    palette_color, ApiError, Clock, SessionId, Worktree, WorktreeContext, WorktreeId,
    WorktreeStatus,
};
use berth_wire::http::{CreateWorktreeRequest, PatchWorktreeRequest};
use berth_wire::ServerPayload;

use super::SessionManager;

impl<C: Clock> SessionManager<C> {
    /// Create a worktree. Branch minting is serialized by the per-session
    /// mutex so names are unique within the session.
    pub async fn create_worktree(
        &self,
        session_id: &SessionId,
        req: CreateWorktreeRequest,
    ) -> Result<Worktree, ApiError> {
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().await;

        let mut session = self.load_session(session_id).await?;
        let workspace = self.load_workspace(&session.workspace_id).await?;
        let existing = self
            .store
            .list_worktrees(session_id)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;

        // Resolve inheritance before touching git.
        let (provider, thread_id, start_point, source_id) = match req.context {
            WorktreeContext::New => {
                let start = match &req.source_branch {
                    Some(branch) => branch.clone(),
                    None => main_branch(&existing)?,
                };
                (req.provider.unwrap_or(session.active_provider), None, start, None)
            }
            WorktreeContext::Fork => {
                let source_id = req
                    .source_worktree_id
                    .clone()
                    .ok_or_else(|| ApiError::Validation("fork requires sourceWorktreeId".into()))?;
                let source = existing
                    .iter()
                    .find(|wt| wt.id == source_id)
                    .ok_or_else(|| ApiError::not_found("worktree", &source_id))?;
                // A fork inherits the source's conversation and provider.
                (source.provider, source.thread_id.clone(), source.branch_name.clone(), Some(source_id))
            }
        };

        let id = mint_worktree_id(&existing);
        let branch_name = mint_branch(session_id, &id, &existing);
        let path = self.worktree_dir(&session, &id);

        let git = self.git_ctx(&workspace, &session, false, false);
        git.worktree_add(&session.repo_dir, &branch_name, &path, &start_point).await?;

        let now_ms = self.now_ms();
        let worktree = Worktree {
            color: palette_color(&id).to_string(),
            id: id.clone(),
            session_id: session_id.clone(),
            branch_name,
            name: req.name.unwrap_or_else(|| id.as_str().to_string()),
            provider,
            context: req.context,
            source_worktree_id: source_id.clone(),
            model: req.model,
            reasoning_effort: req.reasoning_effort,
            internet_access: req.internet_access.unwrap_or(session.default_internet_access),
            deny_git_credentials_access: req
                .deny_git_credentials_access
                .unwrap_or(session.default_deny_git_credentials_access),
            status: WorktreeStatus::Ready,
            thread_id,
            current_turn_id: None,
            created_at_ms: now_ms,
        };
        self.store.save_worktree(&worktree).await.map_err(|e| ApiError::Internal(e.to_string()))?;

        // A fork observes the source's transcript from the moment of
        // creation; copies get fresh ids in the fork's own log.
        if let Some(source_id) = &source_id {
            self.copy_transcript(session_id, source_id, &worktree.id).await?;
        }

        session.touch(now_ms);
        self.store.save_session(&session).await.map_err(|e| ApiError::Internal(e.to_string()))?;

        self.broadcaster.publish(
            session_id,
            Some(&worktree.id),
            ServerPayload::WorktreeCreated { worktree: (&worktree).into() },
        );
        self.broadcaster.publish(session_id, Some(&worktree.id), ServerPayload::WorktreeReady);
        self.broadcast_worktree_list(session_id).await;
        info!(session = %session_id, worktree = %worktree.id, branch = %worktree.branch_name, "worktree created");
        Ok(worktree)
    }

    /// Session-wide `worktrees_list` snapshot after membership changes.
    async fn broadcast_worktree_list(&self, session_id: &SessionId) {
        if let Ok(worktrees) = self.store.list_worktrees(session_id).await {
            self.broadcaster.publish(
                session_id,
                None,
                ServerPayload::WorktreesList {
                    worktrees: worktrees.iter().map(Into::into).collect(),
                },
            );
        }
    }

    async fn copy_transcript(
        &self,
        session_id: &SessionId,
        source: &WorktreeId,
        target: &WorktreeId,
    ) -> Result<(), ApiError> {
        let messages = self
            .store
            .messages_after(session_id, source, 0)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        for message in messages {
            self.store
                .append_message(
                    session_id,
                    target,
                    berth_storage::NewMessage {
                        role: message.role,
                        text: message.text,
                        attachments: message.attachments,
                        tool_result: message.tool_result,
                        created_at_ms: message.created_at_ms,
                    },
                )
                .await
                .map_err(|e| ApiError::Internal(e.to_string()))?;
        }
        Ok(())
    }

    pub async fn patch_worktree(
        &self,
        session_id: &SessionId,
        worktree_id: &WorktreeId,
        patch: PatchWorktreeRequest,
    ) -> Result<Worktree, ApiError> {
        let mut worktree = self.load_worktree(session_id, worktree_id).await?;
        let renamed = patch.name.is_some();
        if let Some(name) = patch.name {
            worktree.name = name;
        }
        if let Some(model) = patch.model {
            worktree.model = Some(model);
        }
        if let Some(effort) = patch.reasoning_effort {
            worktree.reasoning_effort = Some(effort);
        }
        if let Some(allow) = patch.internet_access {
            worktree.internet_access = allow;
        }
        if let Some(deny) = patch.deny_git_credentials_access {
            worktree.deny_git_credentials_access = deny;
        }
        self.store.save_worktree(&worktree).await.map_err(|e| ApiError::Internal(e.to_string()))?;

        if renamed {
            self.broadcaster.publish(
                session_id,
                Some(worktree_id),
                ServerPayload::WorktreeRenamed { name: worktree.name.clone() },
            );
        }
        Ok(worktree)
    }

    /// Delete a worktree: stop its client, detach the working tree, delete
    /// the branch, drop the rows.
    pub async fn delete_worktree(
        &self,
        session_id: &SessionId,
        worktree_id: &WorktreeId,
    ) -> Result<(), ApiError> {
        if worktree_id.is_main() {
            return Err(ApiError::Validation("the main worktree cannot be deleted".into()));
        }
        let session = self.load_session(session_id).await?;
        let workspace = self.load_workspace(&session.workspace_id).await?;
        let worktree = self.load_worktree(session_id, worktree_id).await?;

        self.drop_client(session_id, worktree_id).await;

        let git = self.git_ctx(&workspace, &session, false, false);
        let path = self.worktree_dir(&session, worktree_id);
        git.worktree_remove(&session.repo_dir, &path, &worktree.branch_name).await;
        if path.exists() {
            let _ = std::fs::remove_dir_all(&path);
        }

        self.store
            .delete_worktree(session_id, worktree_id)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        self.broadcaster.publish(session_id, Some(worktree_id), ServerPayload::WorktreeRemoved);
        self.broadcast_worktree_list(session_id).await;
        info!(session = %session_id, worktree = %worktree_id, "worktree deleted");
        Ok(())
    }

    /// Explicitly spawn a worktree's client and wait for `ready`.
    pub async fn wakeup(
        &self,
        session_id: &SessionId,
        worktree_id: &WorktreeId,
    ) -> Result<(), ApiError> {
        let session = self.load_session(session_id).await?;
        let workspace = self.load_workspace(&session.workspace_id).await?;
        let worktree = self.load_worktree(session_id, worktree_id).await?;
        self.ensure_client(&workspace, &session, &worktree).await.map(|_| ())
    }

    pub async fn list_models(
        &self,
        session_id: &SessionId,
        worktree_id: &WorktreeId,
    ) -> Result<Vec<berth_adapters::ModelInfo>, ApiError> {
        let session = self.load_session(session_id).await?;
        let workspace = self.load_workspace(&session.workspace_id).await?;
        let worktree = self.load_worktree(session_id, worktree_id).await?;
        let client = self.ensure_client(&workspace, &session, &worktree).await?;
        client.list_models().await.map_err(|e| ApiError::Internal(e.to_string()))
    }

    pub async fn set_model(
        &self,
        session_id: &SessionId,
        worktree_id: &WorktreeId,
        model: &str,
        reasoning_effort: Option<&str>,
    ) -> Result<Worktree, ApiError> {
        if model.trim().is_empty() {
            return Err(ApiError::Validation("model is required".into()));
        }
        let session = self.load_session(session_id).await?;
        let workspace = self.load_workspace(&session.workspace_id).await?;
        let mut worktree = self.load_worktree(session_id, worktree_id).await?;

        let client = self.ensure_client(&workspace, &session, &worktree).await?;
        client
            .set_model(model, reasoning_effort)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;

        worktree.model = Some(model.to_string());
        worktree.reasoning_effort = reasoning_effort.map(str::to_string);
        self.store.save_worktree(&worktree).await.map_err(|e| ApiError::Internal(e.to_string()))?;
        Ok(worktree)
    }
}

/// Branch the `main` worktree tracks; new worktrees start there by default.
fn main_branch(existing: &[Worktree]) -> Result<String, ApiError> {
    existing
        .iter()
        .find(|wt| wt.id.is_main())
        .map(|wt| wt.branch_name.clone())
        .ok_or_else(|| ApiError::Internal("session has no main worktree".into()))
}

fn mint_worktree_id(existing: &[Worktree]) -> WorktreeId {
    loop {
        let id = WorktreeId::mint();
        if !existing.iter().any(|wt| wt.id == id) {
            return id;
        }
    }
}

/// `session-<sid prefix>-w<short>`, re-minted on collision.
fn mint_branch(session_id: &SessionId, worktree_id: &WorktreeId, existing: &[Worktree]) -> String {
    let sid = &session_id.as_str()[..8.min(session_id.as_str().len())];
    let mut branch = format!("session-{}-{}", sid, worktree_id.short());
    let mut n = 1;
    while existing.iter().any(|wt| wt.branch_name == branch) {
        branch = format!("session-{}-{}-{}", sid, worktree_id.short(), n);
        n += 1;
    }
    branch
}

#[cfg(test)]
#[path = "worktrees_tests.rs"]
mod tests;
