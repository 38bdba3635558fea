// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket surface.
//!
//! Handlers are thin: validate, resolve the workspace from the bearer
//! token, call into the session manager or auth service, map the error
//! taxonomy onto status codes. Session-scoped routes 404 when the session
//! belongs to a different workspace — existence is not leaked across
//! tenants.

mod auth_routes;
mod session_routes;
mod worktree_routes;
mod ws;

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};

use berth_core::{ApiError, Session, SessionId, SystemClock, WorkspaceId};
use berth_storage::Store;
use berth_wire::http::ErrorBody;

use crate::auth::AuthService;
use crate::broadcast::Broadcaster;
use crate::env::DeploymentMode;
use crate::sessions::SessionManager;
use crate::workspacefs::WorkspaceFs;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SessionManager<SystemClock>>,
    pub auth: Arc<AuthService<SystemClock>>,
    pub store: Arc<dyn Store>,
    pub broadcaster: Arc<Broadcaster>,
    pub fs: Arc<WorkspaceFs>,
    pub mode: DeploymentMode,
    /// Base URL used when rendering handoff links.
    pub public_base: String,
}

impl AppState {
    /// Load a session and verify it belongs to the caller's workspace.
    pub async fn authorize_session(
        &self,
        workspace_id: &WorkspaceId,
        session_id: &SessionId,
    ) -> Result<Session, ApiFailure> {
        let session = self
            .store
            .get_session(session_id)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?
            .ok_or_else(|| ApiError::not_found("session", session_id))?;
        if &session.workspace_id != workspace_id {
            return Err(ApiError::not_found("session", session_id).into());
        }
        Ok(session)
    }
}

/// Response-side wrapper for the error taxonomy.
#[derive(Debug)]
pub struct ApiFailure(pub ApiError);

impl From<ApiError> for ApiFailure {
    fn from(err: ApiError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(ErrorBody::from(&self.0))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiFailure>;

/// Bearer-authenticated workspace, extracted from `Authorization`.
pub struct Authed(pub WorkspaceId);

impl FromRequestParts<AppState> for Authed {
    type Rejection = ApiFailure;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::TokenInvalid)?;
        let token = header.strip_prefix("Bearer ").ok_or(ApiError::TokenInvalid)?;
        let workspace_id = state.auth.verify(token)?;
        Ok(Authed(workspace_id))
    }
}

/// Build the full router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        // auth
        .route(
            "/workspaces",
            post(auth_routes::create_workspace).patch(auth_routes::patch_workspace),
        )
        .route("/workspaces/login", post(auth_routes::login))
        .route("/workspaces/refresh", post(auth_routes::refresh))
        .route("/sessions/handoff", post(auth_routes::create_handoff))
        .route("/sessions/handoff/consume", post(auth_routes::consume_handoff))
        // sessions
        .route(
            "/sessions",
            get(session_routes::list_sessions).post(session_routes::create_session),
        )
        .route(
            "/sessions/{id}",
            get(session_routes::get_session).delete(session_routes::delete_session),
        )
        .route("/sessions/{id}/clear", post(session_routes::clear_session))
        .route(
            "/sessions/{id}/backlog",
            get(session_routes::list_backlog).post(session_routes::add_backlog),
        )
        .route("/sessions/{id}/backlog/{item}", axum::routing::delete(session_routes::remove_backlog))
        .route("/sessions/{id}/git/identity", get(worktree_routes::git_identity))
        // worktrees
        .route(
            "/sessions/{id}/worktrees",
            get(worktree_routes::list_worktrees).post(worktree_routes::create_worktree),
        )
        .route(
            "/sessions/{id}/worktrees/{wt}",
            get(worktree_routes::get_worktree)
                .patch(worktree_routes::patch_worktree)
                .delete(worktree_routes::delete_worktree),
        )
        .route(
            "/sessions/{id}/worktrees/{wt}/messages",
            get(worktree_routes::list_messages).post(worktree_routes::send_message),
        )
        .route("/sessions/{id}/worktrees/{wt}/interrupt", post(worktree_routes::interrupt))
        .route("/sessions/{id}/worktrees/{wt}/wakeup", post(worktree_routes::wakeup))
        .route("/sessions/{id}/worktrees/{wt}/diff", get(worktree_routes::diff))
        .route("/sessions/{id}/worktrees/{wt}/status", get(worktree_routes::status))
        .route("/sessions/{id}/worktrees/{wt}/commits", get(worktree_routes::commits))
        .route("/sessions/{id}/worktrees/{wt}/merge", post(worktree_routes::merge))
        .route("/sessions/{id}/worktrees/{wt}/abort-merge", post(worktree_routes::abort_merge))
        .route("/sessions/{id}/worktrees/{wt}/cherry-pick", post(worktree_routes::cherry_pick))
        .route("/sessions/{id}/worktrees/{wt}/branches", get(worktree_routes::branches))
        .route(
            "/sessions/{id}/worktrees/{wt}/branches/switch",
            post(worktree_routes::switch_branch),
        )
        .route(
            "/sessions/{id}/worktrees/{wt}/models",
            get(worktree_routes::list_models).post(worktree_routes::set_model),
        )
        // websocket
        .route("/ws", get(ws::upgrade))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<berth_wire::http::HealthResponse> {
    Json(berth_wire::http::HealthResponse {
        status: "ok".to_string(),
        version: crate::env::VERSION.to_string(),
    })
}
