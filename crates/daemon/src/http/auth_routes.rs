// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace and token endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use berth_core::{ApiError, ProviderConfig, WorkspaceId};
use berth_wire::http::{
    CreateWorkspaceResponse, HandoffConsumeRequest, HandoffConsumeResponse, HandoffCreateRequest,
    HandoffCreateResponse, LoginRequest, PatchWorkspaceRequest, RefreshRequest, TokenResponse,
};

use crate::auth::{hash_secret, random_hex, IssuedTokens};
use crate::env::DeploymentMode;

use super::{ApiResult, AppState, Authed};

fn token_response(tokens: IssuedTokens) -> TokenResponse {
    TokenResponse {
        workspace_token: tokens.access,
        refresh_token: tokens.refresh,
        expires_in: tokens.expires_in,
        refresh_expires_in: tokens.refresh_expires_in,
    }
}

/// `POST /workspaces` — multi-user mode only. The clear secret appears in
/// this response and never again.
pub async fn create_workspace(
    State(state): State<AppState>,
) -> ApiResult<(StatusCode, Json<CreateWorkspaceResponse>)> {
    if state.mode != DeploymentMode::MultiUser {
        return Err(ApiError::Forbidden(
            "workspace creation is disabled in mono-user mode".to_string(),
        )
        .into());
    }
    let mut workspace =
        crate::lifecycle::provision_workspace(&state.store, &state.fs, state.manager.now_ms())
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
    let secret = random_hex(24);
    workspace.secret_hash = hash_secret(&secret);
    state
        .store
        .put_workspace(&workspace)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok((
        StatusCode::CREATED,
        Json(CreateWorkspaceResponse { workspace_id: workspace.id.as_str().to_string(), secret }),
    ))
}

/// `PATCH /workspaces` — provider enable/disable + credential updates.
/// Disabling a provider is refused while sessions use it.
pub async fn patch_workspace(
    State(state): State<AppState>,
    Authed(workspace_id): Authed,
    Json(patch): Json<PatchWorkspaceRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let mut workspace = state
        .store
        .get_workspace(&workspace_id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::not_found("workspace", &workspace_id))?;

    for (provider, change) in &patch.providers {
        if change.enabled == Some(false)
            && state.manager.provider_in_use(&workspace_id, *provider).await?
        {
            return Err(ApiError::Forbidden(
                "Provider cannot be disabled: active sessions use it.".to_string(),
            )
            .into());
        }
    }
    let mut credential_files = Vec::new();
    for (provider, change) in patch.providers {
        let entry = workspace
            .providers
            .entry(provider)
            .or_insert(ProviderConfig { enabled: false, credential: None });
        if let Some(enabled) = change.enabled {
            entry.enabled = enabled;
        }
        if let Some(credential) = change.credential {
            entry.credential = Some(credential.clone());
            credential_files.push((provider, credential));
        }
    }
    // Opaque bytes to disk, readable only by the workspace user.
    for (provider, credential) in credential_files {
        state
            .fs
            .write_credential(&workspace, provider, &credential)
            .map_err(|e| ApiError::Internal(e.to_string()))?;
    }

    state
        .store
        .put_workspace(&workspace)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

/// `POST /workspaces/login` — public.
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<TokenResponse>> {
    let workspace_id = WorkspaceId::from(req.workspace_id);
    let tokens = state.auth.login(&workspace_id, &req.secret).await?;
    Ok(Json(token_response(tokens)))
}

/// `POST /workspaces/refresh` — public; single-use rotation.
pub async fn refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> ApiResult<Json<TokenResponse>> {
    let (_workspace, tokens) = state.auth.rotate(&req.refresh_token).await?;
    Ok(Json(token_response(tokens)))
}

/// `POST /sessions/handoff` — authenticated.
pub async fn create_handoff(
    State(state): State<AppState>,
    Authed(workspace_id): Authed,
    Json(req): Json<HandoffCreateRequest>,
) -> ApiResult<Json<HandoffCreateResponse>> {
    if let Some(session_id) = &req.session_id {
        state.authorize_session(&workspace_id, session_id).await?;
    }
    let (token, expires_at_ms) = state.auth.handoff.create(workspace_id, req.session_id);
    let url = format!("{}/handoff?token={}", state.public_base, token);
    Ok(Json(HandoffCreateResponse { token, expires_at_ms, url }))
}

/// `POST /sessions/handoff/consume` — public, exactly-once.
pub async fn consume_handoff(
    State(state): State<AppState>,
    Json(req): Json<HandoffConsumeRequest>,
) -> ApiResult<Json<HandoffConsumeResponse>> {
    let (workspace_id, session_id) = state.auth.handoff.consume(&req.token)?;
    let tokens = state.auth.issue_tokens(&workspace_id).await?;
    Ok(Json(HandoffConsumeResponse { tokens: token_response(tokens), session_id }))
}
