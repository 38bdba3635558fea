// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Idle-session garbage collection and session deletion.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use berth_core::{ApiError, Clock, SessionId};

use super::SessionManager;

impl<C: Clock> SessionManager<C> {
    /// Periodic sweep: purge expired refresh tokens, then collect sessions
    /// past their idle or absolute TTL.
    pub async fn gc_sweep(&self) {
        let now_ms = self.now_ms();
        match self.store.purge_expired(now_ms).await {
            Ok(0) => {}
            Ok(purged) => info!(purged, "purged expired refresh tokens"),
            Err(e) => warn!(error = %e, "refresh token purge failed"),
        }

        let workspaces = match self.store.list_workspaces().await {
            Ok(workspaces) => workspaces,
            Err(e) => {
                warn!(error = %e, "gc could not list workspaces");
                return;
            }
        };
        let idle_ttl = self.config.idle_ttl.as_millis() as u64;
        let max_ttl = self.config.max_ttl.as_millis() as u64;

        for workspace in workspaces {
            let sessions = match self.store.list_sessions(&workspace.id).await {
                Ok(sessions) => sessions,
                Err(e) => {
                    warn!(workspace = %workspace.id, error = %e, "gc could not list sessions");
                    continue;
                }
            };
            for session in sessions {
                let idle = session.idle_for_ms(now_ms);
                let age = session.age_ms(now_ms);
                if idle <= idle_ttl && age <= max_ttl {
                    continue;
                }
                info!(
                    session = %session.id,
                    idle_ms = idle,
                    age_ms = age,
                    "collecting expired session"
                );
                if let Err(e) = self.delete_session(&session.id).await {
                    warn!(session = %session.id, error = %e, "gc deletion failed");
                }
            }
        }
    }

    /// Tear a session down completely: stop its clients, remove its
    /// directory tree, delete its rows, notify subscribers, audit.
    pub async fn delete_session(&self, session_id: &SessionId) -> Result<(), ApiError> {
        let session = self.load_session(session_id).await?;

        self.stop_session_clients(session_id).await;
        self.fs.remove_session_dirs(&session.workspace_id, session_id);
        self.store
            .delete_session(session_id)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;

        self.fs.append_audit(
            self.now_ms(),
            &session.workspace_id,
            "session_deleted",
            serde_json::json!({ "sessionId": session_id }),
        );
        // Termination frame, then the channel is gone.
        self.broadcaster.drop_session(session_id);
        self.forget_session_runtime(session_id);
        info!(session = %session_id, "session deleted");
        Ok(())
    }
}

/// Spawn the GC loop. Runs until the daemon exits.
pub fn spawn_gc<C: Clock>(manager: Arc<SessionManager<C>>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            manager.gc_sweep().await;
        }
    });
}
