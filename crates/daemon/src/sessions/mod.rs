// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session lifecycle and the parallel worktree scheduler.
//!
//! The manager owns durable state through the Store and runtime state in
//! arenas keyed by ids — agent clients and per-session locks are never
//! reachable from the records themselves, so there are no ownership
//! cycles. Each worktree hosts at most one agent client, created lazily on
//! first use and pumped by a dedicated task that persists and broadcasts
//! its events.

mod create;
mod gc;
mod messages;
mod pump;
mod worktrees;

pub use gc::spawn_gc;
pub use pump::DiffScheduler;

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::warn;

use berth_adapters::{AgentClient, ClientState, SpawnConfig};
use berth_core::{
    AgentEvent, ApiError, Clock, Credential, CredentialKind, ProviderKind, Session, SessionId,
    Workspace, WorkspaceId, Worktree, WorktreeId,
};
use berth_sandbox::{Capabilities, SandboxSpec};
use berth_storage::Store;
use berth_wire::{RpcDirection, RpcLogEntry};

use crate::broadcast::Broadcaster;
use crate::gitops::GitCtx;
use crate::workspacefs::WorkspaceFs;

/// Tuning knobs, resolved from the environment at startup.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub idle_ttl: Duration,
    pub max_ttl: Duration,
    pub wakeup_timeout: Duration,
    pub diff_debounce: Duration,
    pub rpc_log_buffer: usize,
    pub shutdown_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_ttl: Duration::from_secs(24 * 60 * 60),
            max_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            wakeup_timeout: Duration::from_secs(15),
            diff_debounce: Duration::from_millis(500),
            rpc_log_buffer: 500,
            shutdown_grace: Duration::from_secs(3),
        }
    }
}

/// Runtime entry for one worktree's client.
struct ClientEntry {
    client: Arc<dyn AgentClient>,
    /// Serializes turns within the worktree. The gate is a fair mutex, so
    /// queued turns are issued in arrival order, each after the previous
    /// turn completed.
    turn_gate: Arc<tokio::sync::Mutex<()>>,
}

/// Adapter constructor; tests swap in fakes through
/// [`SessionManager::with_client_factory`].
pub type ClientFactory = Box<
    dyn Fn(ProviderKind, SpawnConfig, mpsc::Sender<AgentEvent>) -> Arc<dyn AgentClient>
        + Send
        + Sync,
>;

pub struct SessionManager<C: Clock> {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) fs: Arc<WorkspaceFs>,
    pub(crate) sandbox: SandboxSpec,
    pub(crate) broadcaster: Arc<Broadcaster>,
    pub(crate) clock: C,
    pub(crate) config: SessionConfig,
    clients: Mutex<HashMap<(SessionId, WorktreeId), ClientEntry>>,
    session_locks: Mutex<HashMap<SessionId, Arc<tokio::sync::Mutex<()>>>>,
    pub(crate) diff: DiffScheduler,
    rpc_logs: Arc<Mutex<HashMap<SessionId, VecDeque<RpcLogEntry>>>>,
    client_factory: ClientFactory,
}

impl<C: Clock> SessionManager<C> {
    pub fn new(
        store: Arc<dyn Store>,
        fs: Arc<WorkspaceFs>,
        sandbox: SandboxSpec,
        broadcaster: Arc<Broadcaster>,
        clock: C,
        config: SessionConfig,
    ) -> Self {
        let diff = DiffScheduler::new(Arc::clone(&broadcaster), config.diff_debounce);
        Self {
            store,
            fs,
            sandbox,
            broadcaster,
            clock,
            config,
            clients: Mutex::new(HashMap::new()),
            session_locks: Mutex::new(HashMap::new()),
            diff,
            rpc_logs: Arc::new(Mutex::new(HashMap::new())),
            client_factory: Box::new(|provider, config, events| {
                berth_adapters::client_for(provider, config, events)
            }),
        }
    }

    /// Swap the adapter constructor; tests inject fakes here.
    pub fn with_client_factory(mut self, factory: ClientFactory) -> Self {
        self.client_factory = factory;
        self
    }

    /// Current time through the injected clock.
    pub fn now_ms(&self) -> u64 {
        self.clock.epoch_ms()
    }

    pub(crate) fn rpc_logs_handle(
        &self,
    ) -> Arc<Mutex<HashMap<SessionId, VecDeque<RpcLogEntry>>>> {
        Arc::clone(&self.rpc_logs)
    }

    /// Per-session mutex guarding worktree creation and branch minting.
    pub(crate) fn session_lock(&self, session_id: &SessionId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.session_locks.lock();
        Arc::clone(locks.entry(session_id.clone()).or_default())
    }

    pub(crate) async fn load_session(&self, session_id: &SessionId) -> Result<Session, ApiError> {
        self.store
            .get_session(session_id)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?
            .ok_or_else(|| ApiError::not_found("session", session_id))
    }

    pub(crate) async fn load_worktree(
        &self,
        session_id: &SessionId,
        worktree_id: &WorktreeId,
    ) -> Result<Worktree, ApiError> {
        self.store
            .get_worktree(session_id, worktree_id)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?
            .ok_or_else(|| ApiError::not_found("worktree", worktree_id))
    }

    pub(crate) async fn load_workspace(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Workspace, ApiError> {
        self.store
            .get_workspace(workspace_id)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?
            .ok_or_else(|| ApiError::not_found("workspace", workspace_id))
    }

    /// Checkout directory of a worktree: the primary clone for `main`,
    /// `worktrees/<id>` under the session root otherwise.
    pub(crate) fn worktree_dir(&self, session: &Session, worktree_id: &WorktreeId) -> PathBuf {
        if worktree_id.is_main() {
            session.repo_dir.clone()
        } else {
            let paths = self.fs.session_paths(&session.workspace_id, &session.id);
            paths.root.join("worktrees").join(worktree_id.as_str())
        }
    }

    /// Sandbox capabilities for work inside one worktree.
    pub(crate) fn caps_for(
        &self,
        workspace: &Workspace,
        session: &Session,
        allow_network: bool,
        hide_git_credentials: bool,
    ) -> Capabilities {
        let paths = self.fs.session_paths(&workspace.id, &session.id);
        Capabilities {
            uid: workspace.uid,
            gid: workspace.gid,
            read_paths: vec![
                PathBuf::from("/usr"),
                PathBuf::from("/bin"),
                PathBuf::from("/lib"),
                PathBuf::from("/etc"),
            ],
            write_paths: vec![paths.root, self.fs.home_dir(&workspace.id)],
            allow_network,
            hide_git_credentials,
        }
    }

    /// Git context for a session, using the workspace's identity.
    pub(crate) fn git_ctx(
        &self,
        workspace: &Workspace,
        session: &Session,
        allow_network: bool,
        hide_git_credentials: bool,
    ) -> GitCtx {
        GitCtx {
            sandbox: self.sandbox.clone(),
            caps: self.caps_for(workspace, session, allow_network, hide_git_credentials),
            home: self.fs.home_dir(&workspace.id),
            env: HashMap::new(),
        }
    }

    /// Credential material for a provider, as (env vars, files to write).
    ///
    /// `api_key`/`setup_token` cross as environment variables;
    /// `auth_json_b64` is decoded and written into the provider's
    /// well-known file under the workspace home. Blobs are never inspected.
    pub(crate) fn provider_env(
        &self,
        workspace: &Workspace,
        provider: ProviderKind,
    ) -> HashMap<String, String> {
        let mut env = HashMap::new();
        let Some(credential) =
            workspace.providers.get(&provider).and_then(|c| c.credential.clone())
        else {
            return env;
        };
        match (provider, credential.kind) {
            (ProviderKind::Claude, CredentialKind::ApiKey) => {
                env.insert("ANTHROPIC_API_KEY".to_string(), credential.blob);
            }
            (ProviderKind::Claude, CredentialKind::SetupToken) => {
                env.insert("CLAUDE_CODE_OAUTH_TOKEN".to_string(), credential.blob);
            }
            (ProviderKind::Claude, CredentialKind::AuthJsonB64) => {
                self.write_auth_json(workspace, &credential, ".claude/.credentials.json");
            }
            (ProviderKind::Codex, CredentialKind::ApiKey) => {
                env.insert("OPENAI_API_KEY".to_string(), credential.blob);
            }
            (ProviderKind::Codex, CredentialKind::SetupToken) => {
                env.insert("CODEX_SETUP_TOKEN".to_string(), credential.blob);
            }
            (ProviderKind::Codex, CredentialKind::AuthJsonB64) => {
                self.write_auth_json(workspace, &credential, ".codex/auth.json");
            }
        }
        env
    }

    fn write_auth_json(&self, workspace: &Workspace, credential: &Credential, rel: &str) {
        use base64::Engine;
        let decoded = match base64::engine::general_purpose::STANDARD.decode(&credential.blob) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(workspace = %workspace.id, error = %e, "credential blob is not base64");
                return;
            }
        };
        let path = self.fs.home_dir(&workspace.id).join(rel);
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(error = %e, "failed to create credential directory");
                return;
            }
        }
        if let Err(e) = std::fs::write(&path, decoded) {
            warn!(path = %path.display(), error = %e, "failed to write credential file");
        }
    }

    /// Get or create the agent client for a worktree and drive it ready.
    ///
    /// The wakeup wait is bounded (default 15 s, caller-adjustable up to
    /// 60 s via the environment).
    pub(crate) async fn ensure_client(
        &self,
        workspace: &Workspace,
        session: &Session,
        worktree: &Worktree,
    ) -> Result<Arc<dyn AgentClient>, ApiError> {
        let key = (session.id.clone(), worktree.id.clone());
        let existing = {
            let clients = self.clients.lock();
            clients.get(&key).map(|entry| Arc::clone(&entry.client))
        };
        let client = match existing {
            Some(client) => client,
            None => {
                let spawn = SpawnConfig {
                    session_id: session.id.clone(),
                    worktree_id: worktree.id.clone(),
                    workdir: self.worktree_dir(session, &worktree.id),
                    home: self.fs.home_dir(&workspace.id),
                    sandbox: self.sandbox.clone(),
                    caps: self.caps_for(
                        workspace,
                        session,
                        worktree.internet_access,
                        worktree.deny_git_credentials_access,
                    ),
                    env: self.provider_env(workspace, worktree.provider),
                    model: worktree.model.clone(),
                    reasoning_effort: worktree.reasoning_effort.clone(),
                    thread_id: worktree.thread_id.clone(),
                };
                let (events_tx, events_rx) = mpsc::channel(256);
                let client = (self.client_factory)(worktree.provider, spawn, events_tx);
                self.spawn_pump(workspace, session, worktree, events_rx);
                let mut clients = self.clients.lock();
                clients.insert(
                    key.clone(),
                    ClientEntry {
                        client: Arc::clone(&client),
                        turn_gate: Arc::new(tokio::sync::Mutex::new(())),
                    },
                );
                client
            }
        };

        if matches!(client.state(), ClientState::Ready | ClientState::Processing) {
            return Ok(client);
        }
        match tokio::time::timeout(self.config.wakeup_timeout, client.start()).await {
            Ok(Ok(())) => Ok(client),
            Ok(Err(e)) => Err(ApiError::Internal(format!("agent start failed: {e}"))),
            Err(_) => Err(ApiError::Internal(format!(
                "agent wakeup timed out after {:?}",
                self.config.wakeup_timeout
            ))),
        }
    }

    pub(crate) fn client_entry(
        &self,
        session_id: &SessionId,
        worktree_id: &WorktreeId,
    ) -> Option<(Arc<dyn AgentClient>, Arc<tokio::sync::Mutex<()>>)> {
        let clients = self.clients.lock();
        clients
            .get(&(session_id.clone(), worktree_id.clone()))
            .map(|entry| (Arc::clone(&entry.client), Arc::clone(&entry.turn_gate)))
    }

    /// Stop every client of a session cooperatively, escalating inside the
    /// adapter (TERM then KILL) after the grace window.
    pub async fn stop_session_clients(&self, session_id: &SessionId) {
        let entries: Vec<Arc<dyn AgentClient>> = {
            let mut clients = self.clients.lock();
            let keys: Vec<_> =
                clients.keys().filter(|(sid, _)| sid == session_id).cloned().collect();
            keys.iter().filter_map(|k| clients.remove(k)).map(|e| e.client).collect()
        };
        for client in entries {
            client.stop(self.config.shutdown_grace).await;
        }
    }

    /// Drop one worktree's client (if any), stopping it first.
    pub(crate) async fn drop_client(&self, session_id: &SessionId, worktree_id: &WorktreeId) {
        let entry = {
            let mut clients = self.clients.lock();
            clients.remove(&(session_id.clone(), worktree_id.clone()))
        };
        if let Some(entry) = entry {
            entry.client.stop(self.config.shutdown_grace).await;
        }
    }

    /// Record an entry in the per-session RPC log ring buffer and stream it.
    pub(crate) fn record_rpc(
        &self,
        session_id: &SessionId,
        direction: RpcDirection,
        payload: serde_json::Value,
    ) {
        let entry = RpcLogEntry { at_ms: self.now_ms(), direction, payload };
        {
            let mut logs = self.rpc_logs.lock();
            let buffer = logs.entry(session_id.clone()).or_default();
            if buffer.len() >= self.config.rpc_log_buffer {
                buffer.pop_front();
            }
            buffer.push_back(entry.clone());
        }
        self.broadcaster.publish(
            session_id,
            None,
            berth_wire::ServerPayload::RpcLog { entries: vec![entry] },
        );
    }

    /// Forget all runtime state of a session (after deletion).
    pub(crate) fn forget_session_runtime(&self, session_id: &SessionId) {
        self.clients.lock().retain(|(sid, _), _| sid != session_id);
        self.session_locks.lock().remove(session_id);
        self.rpc_logs.lock().remove(session_id);
    }

    /// Git context + checkout directory for read-only views and merges.
    pub async fn git_for(
        &self,
        session_id: &SessionId,
        worktree_id: &WorktreeId,
    ) -> Result<(crate::gitops::GitCtx, PathBuf), ApiError> {
        let session = self.load_session(session_id).await?;
        let workspace = self.load_workspace(&session.workspace_id).await?;
        let worktree = self.load_worktree(session_id, worktree_id).await?;
        let ctx =
            self.git_ctx(&workspace, &session, false, worktree.deny_git_credentials_access);
        Ok((ctx, self.worktree_dir(&session, worktree_id)))
    }

    /// Is any session or worktree of this workspace using the provider?
    pub async fn provider_in_use(
        &self,
        workspace_id: &WorkspaceId,
        provider: ProviderKind,
    ) -> Result<bool, ApiError> {
        let sessions = self
            .store
            .list_sessions(workspace_id)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        for session in &sessions {
            if session.active_provider == provider {
                return Ok(true);
            }
            let worktrees = self
                .store
                .list_worktrees(&session.id)
                .await
                .map_err(|e| ApiError::Internal(e.to_string()))?;
            if worktrees.iter().any(|wt| wt.provider == provider) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
