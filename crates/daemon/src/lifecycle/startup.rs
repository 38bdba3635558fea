// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon startup and initialization logic.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use fs2::FileExt;
use tracing::info;

use berth_core::{ProviderConfig, ProviderKind, SystemClock, Workspace, WorkspaceId};
use berth_sandbox::SandboxSpec;
use berth_storage::{RedisStore, SqliteStore, Store};

use crate::auth::AuthService;
use crate::broadcast::Broadcaster;
use crate::env::{self, StorageBackend};
use crate::http::AppState;
use crate::sessions::{spawn_gc, SessionConfig, SessionManager};
use crate::workspacefs::WorkspaceFs;

use super::{Config, LifecycleError};

pub struct StartupResult {
    pub state: AppState,
    pub listener: tokio::net::TcpListener,
    /// Held for the daemon's lifetime; dropping releases the lock.
    pub lock_file: std::fs::File,
}

impl std::fmt::Debug for StartupResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StartupResult").finish_non_exhaustive()
    }
}

/// Start the daemon.
pub async fn startup(config: &Config) -> Result<StartupResult, LifecycleError> {
    match startup_inner(config).await {
        Ok(result) => Ok(result),
        Err(e) => {
            // Don't clean up if we failed to acquire the lock —
            // those files belong to the already-running daemon.
            if !matches!(e, LifecycleError::LockFailed(_)) {
                cleanup_on_failure(config);
            }
            Err(e)
        }
    }
}

async fn startup_inner(config: &Config) -> Result<StartupResult, LifecycleError> {
    // 1. State directory, then the lock FIRST — prevents races. Open
    // without truncating so a running daemon's PID survives a failed start.
    std::fs::create_dir_all(&config.state_dir)?;
    let lock_file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&config.lock_path)?;
    lock_file.try_lock_exclusive().map_err(LifecycleError::LockFailed)?;
    let mut lock_file = lock_file;
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;
    let lock_file = lock_file;

    // 2. Roots + version file.
    std::fs::create_dir_all(&config.data_root)?;
    std::fs::create_dir_all(&config.home_root)?;
    std::fs::write(&config.version_path, env::VERSION)?;

    // 3. Durable store.
    let store: Arc<dyn Store> = match config.backend {
        StorageBackend::Embedded => Arc::new(
            SqliteStore::open(&config.db_path, env::sqlite_busy_timeout())
                .map_err(|e| LifecycleError::Store(e.to_string()))?,
        ),
        StorageBackend::External => {
            let url = env::redis_url()?;
            Arc::new(
                RedisStore::connect(&url)
                    .await
                    .map_err(|e| LifecycleError::Store(e.to_string()))?,
            )
        }
    };

    // 4. Workspace filesystem; recover uid allocations before anything can
    // allocate.
    let fs = Arc::new(WorkspaceFs::new(
        config.data_root.clone(),
        config.home_root.clone(),
        config.uid_range,
    ));
    let workspaces =
        store.list_workspaces().await.map_err(|e| LifecycleError::Store(e.to_string()))?;
    fs.recover_allocations(&workspaces);

    // 5. Services.
    let jwt_key = AuthService::<SystemClock>::load_or_create_key(&config.jwt_key_path)?;
    let auth = Arc::new(AuthService::new(Arc::clone(&store), SystemClock, &jwt_key));
    let broadcaster = Arc::new(Broadcaster::new(env::subscriber_queue()));
    let sandbox = if env::sandbox_disabled() {
        SandboxSpec::unsandboxed()
    } else {
        SandboxSpec::new(env::runas_bin())
    };
    let manager = Arc::new(SessionManager::new(
        Arc::clone(&store),
        Arc::clone(&fs),
        sandbox,
        Arc::clone(&broadcaster),
        SystemClock,
        SessionConfig {
            idle_ttl: env::session_idle_ttl(),
            max_ttl: env::session_max_ttl(),
            wakeup_timeout: env::wakeup_timeout(),
            diff_debounce: env::diff_debounce(),
            rpc_log_buffer: env::rpc_log_buffer(),
            shutdown_grace: env::shutdown_grace(),
        },
    ));
    spawn_gc(Arc::clone(&manager), env::gc_interval());

    let state = AppState {
        manager,
        auth,
        store,
        broadcaster,
        fs,
        mode: config.mode,
        public_base: config.public_base.clone(),
    };

    // 6. Mono-user bootstrap: one implicit workspace, handoff URL out of
    // band, no credentials collected.
    if config.mode == env::DeploymentMode::MonoUser && workspaces.is_empty() {
        bootstrap_mono_workspace(config, &state).await?;
    }

    // 7. Bind LAST — only after all validation passes.
    let addr = format!("{}:{}", config.bind, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| LifecycleError::BindFailed(addr, e))?;

    info!(state_dir = %config.state_dir.display(), "daemon started");
    Ok(StartupResult { state, listener, lock_file })
}

/// Mint a workspace row with an allocated uid/gid and the default provider
/// set. The row persists before any filesystem work so a crash between the
/// two is recoverable by the startup scan.
pub async fn provision_workspace(
    store: &Arc<dyn Store>,
    fs: &Arc<WorkspaceFs>,
    now_ms: u64,
) -> Result<Workspace, LifecycleError> {
    let (uid, gid) =
        fs.allocate_uid().map_err(|e| LifecycleError::Store(e.to_string()))?;
    let mut providers = HashMap::new();
    providers.insert(ProviderKind::Codex, ProviderConfig { enabled: true, credential: None });
    providers.insert(ProviderKind::Claude, ProviderConfig { enabled: true, credential: None });
    let workspace = Workspace {
        id: WorkspaceId::mint(),
        secret_hash: String::new(),
        uid,
        gid,
        providers,
        created_at_ms: now_ms,
    };
    store.put_workspace(&workspace).await.map_err(|e| LifecycleError::Store(e.to_string()))?;
    fs.create_workspace_dirs(&workspace).map_err(|e| LifecycleError::Store(e.to_string()))?;
    Ok(workspace)
}

async fn bootstrap_mono_workspace(
    config: &Config,
    state: &AppState,
) -> Result<(), LifecycleError> {
    let workspace =
        provision_workspace(&state.store, &state.fs, state.manager.now_ms()).await?;
    let (token, _expires) = state.auth.handoff.create(workspace.id.clone(), None);
    let url = format!("{}/handoff?token={}", config.public_base, token);

    if let Some(path) = &config.handoff_url_file {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &url)?;
    }
    // The out-of-band channel: file (above) and console.
    println!("==> Open this URL to authenticate: {url}");
    info!(workspace = %workspace.id, "mono-user workspace bootstrapped");
    Ok(())
}

/// Clean up resources on startup failure.
fn cleanup_on_failure(config: &Config) {
    if config.version_path.exists() {
        let _ = std::fs::remove_file(&config.version_path);
    }
    if config.lock_path.exists() {
        let _ = std::fs::remove_file(&config.lock_path);
    }
}

#[cfg(test)]
#[path = "startup_tests.rs"]
mod tests;
