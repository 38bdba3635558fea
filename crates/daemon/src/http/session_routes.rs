// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session CRUD and backlog endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use berth_core::{BacklogItem, SessionId};
use berth_wire::http::{BacklogRequest, CreateSessionRequest, SessionInfo};

use super::{ApiResult, AppState, Authed};

pub async fn list_sessions(
    State(state): State<AppState>,
    Authed(workspace_id): Authed,
) -> ApiResult<Json<Vec<SessionInfo>>> {
    let sessions = state
        .store
        .list_sessions(&workspace_id)
        .await
        .map_err(|e| berth_core::ApiError::Internal(e.to_string()))?;
    Ok(Json(sessions.iter().map(SessionInfo::from).collect()))
}

pub async fn create_session(
    State(state): State<AppState>,
    Authed(workspace_id): Authed,
    Json(req): Json<CreateSessionRequest>,
) -> ApiResult<(StatusCode, Json<SessionInfo>)> {
    let session = state.manager.create_session(&workspace_id, req).await?;
    Ok((StatusCode::CREATED, Json(SessionInfo::from(&session))))
}

pub async fn get_session(
    State(state): State<AppState>,
    Authed(workspace_id): Authed,
    Path(session_id): Path<SessionId>,
) -> ApiResult<Json<SessionInfo>> {
    let session = state.authorize_session(&workspace_id, &session_id).await?;
    Ok(Json(SessionInfo::from(&session)))
}

pub async fn delete_session(
    State(state): State<AppState>,
    Authed(workspace_id): Authed,
    Path(session_id): Path<SessionId>,
) -> ApiResult<StatusCode> {
    state.authorize_session(&workspace_id, &session_id).await?;
    state.manager.delete_session(&session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn clear_session(
    State(state): State<AppState>,
    Authed(workspace_id): Authed,
    Path(session_id): Path<SessionId>,
) -> ApiResult<StatusCode> {
    state.authorize_session(&workspace_id, &session_id).await?;
    state.manager.clear_session_messages(&session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_backlog(
    State(state): State<AppState>,
    Authed(workspace_id): Authed,
    Path(session_id): Path<SessionId>,
) -> ApiResult<Json<Vec<BacklogItem>>> {
    state.authorize_session(&workspace_id, &session_id).await?;
    Ok(Json(state.manager.list_backlog(&session_id).await?))
}

pub async fn add_backlog(
    State(state): State<AppState>,
    Authed(workspace_id): Authed,
    Path(session_id): Path<SessionId>,
    Json(req): Json<BacklogRequest>,
) -> ApiResult<(StatusCode, Json<BacklogItem>)> {
    state.authorize_session(&workspace_id, &session_id).await?;
    let item = state.manager.add_backlog(&session_id, req.text).await?;
    Ok((StatusCode::CREATED, Json(item)))
}

pub async fn remove_backlog(
    State(state): State<AppState>,
    Authed(workspace_id): Authed,
    Path((session_id, item_id)): Path<(SessionId, String)>,
) -> ApiResult<StatusCode> {
    state.authorize_session(&workspace_id, &session_id).await?;
    state.manager.remove_backlog(&session_id, &item_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
