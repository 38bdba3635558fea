// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worktree endpoints: CRUD, messages, interrupts, git views, models.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use berth_core::{Message, SessionId, TurnId, WorktreeId};
use berth_wire::http::{
    BranchListResponse, BranchSwitchRequest, CherryPickRequest, CommitInfo, CreateWorktreeRequest,
    GitIdentityResponse, InterruptRequest, MergeRequest, PatchWorktreeRequest, SendMessageRequest,
    SendMessageResponse, SetModelRequest, WorktreeInfo,
};
use berth_wire::DiffFile;

use super::{ApiResult, AppState, Authed};

pub async fn list_worktrees(
    State(state): State<AppState>,
    Authed(workspace_id): Authed,
    Path(session_id): Path<SessionId>,
) -> ApiResult<Json<Vec<WorktreeInfo>>> {
    state.authorize_session(&workspace_id, &session_id).await?;
    let worktrees = state
        .store
        .list_worktrees(&session_id)
        .await
        .map_err(|e| berth_core::ApiError::Internal(e.to_string()))?;
    Ok(Json(worktrees.iter().map(WorktreeInfo::from).collect()))
}

pub async fn create_worktree(
    State(state): State<AppState>,
    Authed(workspace_id): Authed,
    Path(session_id): Path<SessionId>,
    Json(req): Json<CreateWorktreeRequest>,
) -> ApiResult<(StatusCode, Json<WorktreeInfo>)> {
    state.authorize_session(&workspace_id, &session_id).await?;
    let worktree = state.manager.create_worktree(&session_id, req).await?;
    Ok((StatusCode::CREATED, Json(WorktreeInfo::from(&worktree))))
}

pub async fn get_worktree(
    State(state): State<AppState>,
    Authed(workspace_id): Authed,
    Path((session_id, worktree_id)): Path<(SessionId, WorktreeId)>,
) -> ApiResult<Json<WorktreeInfo>> {
    state.authorize_session(&workspace_id, &session_id).await?;
    let worktree = state
        .store
        .get_worktree(&session_id, &worktree_id)
        .await
        .map_err(|e| berth_core::ApiError::Internal(e.to_string()))?
        .ok_or_else(|| berth_core::ApiError::not_found("worktree", &worktree_id))?;
    Ok(Json(WorktreeInfo::from(&worktree)))
}

pub async fn patch_worktree(
    State(state): State<AppState>,
    Authed(workspace_id): Authed,
    Path((session_id, worktree_id)): Path<(SessionId, WorktreeId)>,
    Json(patch): Json<PatchWorktreeRequest>,
) -> ApiResult<Json<WorktreeInfo>> {
    state.authorize_session(&workspace_id, &session_id).await?;
    let worktree = state.manager.patch_worktree(&session_id, &worktree_id, patch).await?;
    Ok(Json(WorktreeInfo::from(&worktree)))
}

pub async fn delete_worktree(
    State(state): State<AppState>,
    Authed(workspace_id): Authed,
    Path((session_id, worktree_id)): Path<(SessionId, WorktreeId)>,
) -> ApiResult<StatusCode> {
    state.authorize_session(&workspace_id, &session_id).await?;
    state.manager.delete_worktree(&session_id, &worktree_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMessagesQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub before_id: Option<i64>,
}

fn default_limit() -> usize {
    100
}

pub async fn list_messages(
    State(state): State<AppState>,
    Authed(workspace_id): Authed,
    Path((session_id, worktree_id)): Path<(SessionId, WorktreeId)>,
    Query(query): Query<ListMessagesQuery>,
) -> ApiResult<Json<Vec<Message>>> {
    state.authorize_session(&workspace_id, &session_id).await?;
    let messages = state
        .manager
        .list_messages(&session_id, &worktree_id, query.limit, query.before_id)
        .await?;
    Ok(Json(messages))
}

/// Queue a turn. Returns 200 once queued; agent errors stream over the
/// WebSocket as `turn_error` frames.
pub async fn send_message(
    State(state): State<AppState>,
    Authed(workspace_id): Authed,
    Path((session_id, worktree_id)): Path<(SessionId, WorktreeId)>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<Json<SendMessageResponse>> {
    state.authorize_session(&workspace_id, &session_id).await?;
    let (turn_id, message_id) = state
        .manager
        .send_message(&session_id, &worktree_id, req.text, req.attachments)
        .await?;
    Ok(Json(SendMessageResponse { turn_id: turn_id.as_str().to_string(), message_id }))
}

pub async fn interrupt(
    State(state): State<AppState>,
    Authed(workspace_id): Authed,
    Path((session_id, worktree_id)): Path<(SessionId, WorktreeId)>,
    Json(req): Json<InterruptRequest>,
) -> ApiResult<StatusCode> {
    state.authorize_session(&workspace_id, &session_id).await?;
    state
        .manager
        .interrupt_turn(&session_id, &worktree_id, &TurnId::from(req.turn_id))
        .await?;
    Ok(StatusCode::OK)
}

pub async fn wakeup(
    State(state): State<AppState>,
    Authed(workspace_id): Authed,
    Path((session_id, worktree_id)): Path<(SessionId, WorktreeId)>,
) -> ApiResult<StatusCode> {
    state.authorize_session(&workspace_id, &session_id).await?;
    state.manager.wakeup(&session_id, &worktree_id).await?;
    Ok(StatusCode::OK)
}

pub async fn diff(
    State(state): State<AppState>,
    Authed(workspace_id): Authed,
    Path((session_id, worktree_id)): Path<(SessionId, WorktreeId)>,
) -> ApiResult<Json<serde_json::Value>> {
    state.authorize_session(&workspace_id, &session_id).await?;
    let (git, dir) = state.manager.git_for(&session_id, &worktree_id).await?;
    let diff = git.diff(&dir).await?;
    Ok(Json(serde_json::json!({ "diff": diff })))
}

pub async fn status(
    State(state): State<AppState>,
    Authed(workspace_id): Authed,
    Path((session_id, worktree_id)): Path<(SessionId, WorktreeId)>,
) -> ApiResult<Json<Vec<DiffFile>>> {
    state.authorize_session(&workspace_id, &session_id).await?;
    let (git, dir) = state.manager.git_for(&session_id, &worktree_id).await?;
    Ok(Json(git.status_porcelain(&dir).await?))
}

#[derive(Debug, Deserialize)]
pub struct CommitsQuery {
    #[serde(default = "default_commits")]
    pub limit: usize,
}

fn default_commits() -> usize {
    50
}

pub async fn commits(
    State(state): State<AppState>,
    Authed(workspace_id): Authed,
    Path((session_id, worktree_id)): Path<(SessionId, WorktreeId)>,
    Query(query): Query<CommitsQuery>,
) -> ApiResult<Json<Vec<CommitInfo>>> {
    state.authorize_session(&workspace_id, &session_id).await?;
    let (git, dir) = state.manager.git_for(&session_id, &worktree_id).await?;
    Ok(Json(git.commits(&dir, query.limit).await?))
}

pub async fn merge(
    State(state): State<AppState>,
    Authed(workspace_id): Authed,
    Path((session_id, worktree_id)): Path<(SessionId, WorktreeId)>,
    Json(req): Json<MergeRequest>,
) -> ApiResult<StatusCode> {
    state.authorize_session(&workspace_id, &session_id).await?;
    let (git, dir) = state.manager.git_for(&session_id, &worktree_id).await?;
    let branch = match req.branch {
        Some(branch) => branch,
        None => main_branch_of(&state, &session_id).await?,
    };
    git.merge(&dir, &branch).await?;
    Ok(StatusCode::OK)
}

async fn main_branch_of(state: &AppState, session_id: &SessionId) -> Result<String, super::ApiFailure> {
    let main = state
        .store
        .get_worktree(session_id, &WorktreeId::main())
        .await
        .map_err(|e| berth_core::ApiError::Internal(e.to_string()))?
        .ok_or_else(|| berth_core::ApiError::not_found("worktree", "main"))?;
    Ok(main.branch_name)
}

pub async fn abort_merge(
    State(state): State<AppState>,
    Authed(workspace_id): Authed,
    Path((session_id, worktree_id)): Path<(SessionId, WorktreeId)>,
) -> ApiResult<StatusCode> {
    state.authorize_session(&workspace_id, &session_id).await?;
    let (git, dir) = state.manager.git_for(&session_id, &worktree_id).await?;
    git.abort_merge(&dir).await?;
    Ok(StatusCode::OK)
}

pub async fn cherry_pick(
    State(state): State<AppState>,
    Authed(workspace_id): Authed,
    Path((session_id, worktree_id)): Path<(SessionId, WorktreeId)>,
    Json(req): Json<CherryPickRequest>,
) -> ApiResult<StatusCode> {
    state.authorize_session(&workspace_id, &session_id).await?;
    let (git, dir) = state.manager.git_for(&session_id, &worktree_id).await?;
    git.cherry_pick(&dir, &req.commit).await?;
    Ok(StatusCode::OK)
}

pub async fn branches(
    State(state): State<AppState>,
    Authed(workspace_id): Authed,
    Path((session_id, worktree_id)): Path<(SessionId, WorktreeId)>,
) -> ApiResult<Json<BranchListResponse>> {
    state.authorize_session(&workspace_id, &session_id).await?;
    let (git, dir) = state.manager.git_for(&session_id, &worktree_id).await?;
    Ok(Json(git.branches(&dir).await?))
}

pub async fn switch_branch(
    State(state): State<AppState>,
    Authed(workspace_id): Authed,
    Path((session_id, worktree_id)): Path<(SessionId, WorktreeId)>,
    Json(req): Json<BranchSwitchRequest>,
) -> ApiResult<StatusCode> {
    state.authorize_session(&workspace_id, &session_id).await?;
    let (git, dir) = state.manager.git_for(&session_id, &worktree_id).await?;
    git.switch_branch(&dir, &req.branch).await?;
    Ok(StatusCode::OK)
}

pub async fn git_identity(
    State(state): State<AppState>,
    Authed(workspace_id): Authed,
    Path(session_id): Path<SessionId>,
) -> ApiResult<Json<GitIdentityResponse>> {
    state.authorize_session(&workspace_id, &session_id).await?;
    let (git, dir) = state.manager.git_for(&session_id, &WorktreeId::main()).await?;
    Ok(Json(git.identity(&dir).await?))
}

pub async fn list_models(
    State(state): State<AppState>,
    Authed(workspace_id): Authed,
    Path((session_id, worktree_id)): Path<(SessionId, WorktreeId)>,
) -> ApiResult<Json<Vec<berth_adapters::ModelInfo>>> {
    state.authorize_session(&workspace_id, &session_id).await?;
    Ok(Json(state.manager.list_models(&session_id, &worktree_id).await?))
}

pub async fn set_model(
    State(state): State<AppState>,
    Authed(workspace_id): Authed,
    Path((session_id, worktree_id)): Path<(SessionId, WorktreeId)>,
    Json(req): Json<SetModelRequest>,
) -> ApiResult<Json<WorktreeInfo>> {
    state.authorize_session(&workspace_id, &session_id).await?;
    let worktree = state
        .manager
        .set_model(&session_id, &worktree_id, &req.model, req.reasoning_effort.as_deref())
        .await?;
    Ok(Json(WorktreeInfo::from(&worktree)))
}
