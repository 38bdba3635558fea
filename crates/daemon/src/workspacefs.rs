// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-workspace filesystem layout, uid/gid allocation, credential files,
//! and the append-only audit log.
//!
//! Layout: `<dataRoot>/<workspaceId>/{workspace marker, audit.log,
//! credentials/, sessions/<sessionId>/{repo,git,attachments,tmp}}` plus a
//! home tree under `<homeRoot>/<workspaceId>`. Session directories are mode
//! `02750` owned by the workspace's (uid, gid); ownership calls are skipped
//! with a warning when the daemon is not running as root (dev mode).

use std::collections::BTreeSet;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use berth_core::{Credential, ProviderKind, SessionId, Workspace, WorkspaceId};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Setgid + rwxr-x--- : group members (the daemon) traverse, others nothing.
const SESSION_DIR_MODE: u32 = 0o2750;
const CREDENTIAL_FILE_MODE: u32 = 0o600;

#[derive(Debug, Error)]
pub enum WorkspaceFsError {
    #[error("workspace id already exists: {0}")]
    IdTaken(WorkspaceId),

    #[error("uid range exhausted ({0}-{1})")]
    IdExhausted(u32, u32),

    #[error("workspace io failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Paths of one session's directory tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPaths {
    pub root: PathBuf,
    pub repo: PathBuf,
    pub git: PathBuf,
    pub attachments: PathBuf,
    pub tmp: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub at_ms: u64,
    pub workspace_id: WorkspaceId,
    pub kind: String,
    pub payload: serde_json::Value,
}

pub struct WorkspaceFs {
    data_root: PathBuf,
    home_root: PathBuf,
    uid_range: (u32, u32),
    /// Allocated uids; guarded by the workspace-wide allocation mutex.
    allocated: Mutex<BTreeSet<u32>>,
    audit_tx: mpsc::Sender<AuditEntry>,
}

impl WorkspaceFs {
    /// Create the adapter and spawn the audit writer task.
    pub fn new(data_root: PathBuf, home_root: PathBuf, uid_range: (u32, u32)) -> Self {
        let (audit_tx, audit_rx) = mpsc::channel(256);
        Self::spawn_audit_writer(data_root.clone(), audit_rx);
        Self { data_root, home_root, uid_range, allocated: Mutex::new(BTreeSet::new()), audit_tx }
    }

    /// Re-mark uids of persisted workspaces after a restart so they are
    /// never handed out twice.
    pub fn recover_allocations(&self, workspaces: &[Workspace]) {
        let mut allocated = self.allocated.lock();
        for ws in workspaces {
            allocated.insert(ws.uid);
        }
        info!(count = workspaces.len(), "recovered workspace uid allocations");
    }

    /// Allocate the lowest free (uid, gid) pair in the configured range.
    ///
    /// uid == gid by construction; the pair is immutable once a workspace
    /// row persists it.
    pub fn allocate_uid(&self) -> Result<(u32, u32), WorkspaceFsError> {
        let (lo, hi) = self.uid_range;
        let mut allocated = self.allocated.lock();
        for candidate in lo..=hi {
            if !allocated.contains(&candidate) {
                allocated.insert(candidate);
                return Ok((candidate, candidate));
            }
        }
        Err(WorkspaceFsError::IdExhausted(lo, hi))
    }

    pub fn workspace_dir(&self, id: &WorkspaceId) -> PathBuf {
        self.data_root.join(id.as_str())
    }

    pub fn home_dir(&self, id: &WorkspaceId) -> PathBuf {
        self.home_root.join(id.as_str())
    }

    pub fn session_paths(&self, workspace_id: &WorkspaceId, session_id: &SessionId) -> SessionPaths {
        let root = self.workspace_dir(workspace_id).join("sessions").join(session_id.as_str());
        SessionPaths {
            repo: root.join("repo"),
            git: root.join("git"),
            attachments: root.join("attachments"),
            tmp: root.join("tmp"),
            root,
        }
    }

    /// Create the workspace's data + home trees.
    ///
    /// Double-creation is rejected by an existence check — ids are minted
    /// server-side, so a collision here means a bug or a replayed request.
    pub fn create_workspace_dirs(&self, workspace: &Workspace) -> Result<(), WorkspaceFsError> {
        let data = self.workspace_dir(&workspace.id);
        if data.exists() {
            return Err(WorkspaceFsError::IdTaken(workspace.id.clone()));
        }
        for dir in [&data, &data.join("sessions"), &data.join("credentials")] {
            std::fs::create_dir_all(dir)?;
            apply_mode_and_owner(dir, SESSION_DIR_MODE, workspace.uid, workspace.gid)?;
        }
        let home = self.home_dir(&workspace.id);
        std::fs::create_dir_all(&home)?;
        apply_mode_and_owner(&home, SESSION_DIR_MODE, workspace.uid, workspace.gid)?;
        Ok(())
    }

    pub fn create_session_dirs(
        &self,
        workspace: &Workspace,
        session_id: &SessionId,
    ) -> Result<SessionPaths, WorkspaceFsError> {
        let paths = self.session_paths(&workspace.id, session_id);
        for dir in [&paths.root, &paths.repo, &paths.git, &paths.attachments, &paths.tmp] {
            std::fs::create_dir_all(dir)?;
            apply_mode_and_owner(dir, SESSION_DIR_MODE, workspace.uid, workspace.gid)?;
        }
        Ok(paths)
    }

    /// Remove a session tree. Best-effort: failures are logged, not fatal —
    /// GC retries on the next sweep if the directory is still present.
    pub fn remove_session_dirs(&self, workspace_id: &WorkspaceId, session_id: &SessionId) {
        let paths = self.session_paths(workspace_id, session_id);
        if let Err(e) = std::fs::remove_dir_all(&paths.root) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    path = %paths.root.display(),
                    error = %e,
                    "failed to remove session directory"
                );
            }
        }
    }

    /// Write a provider credential file readable only by the workspace user.
    ///
    /// The blob is opaque bytes — no inspection, no synthetic expiry.
    pub fn write_credential(
        &self,
        workspace: &Workspace,
        provider: ProviderKind,
        credential: &Credential,
    ) -> Result<PathBuf, WorkspaceFsError> {
        let path = self
            .workspace_dir(&workspace.id)
            .join("credentials")
            .join(format!("{}.credential", provider.as_str()));
        std::fs::write(&path, credential.blob.as_bytes())?;
        apply_mode_and_owner(&path, CREDENTIAL_FILE_MODE, workspace.uid, workspace.gid)?;
        Ok(path)
    }

    pub fn credential_path(&self, workspace_id: &WorkspaceId, provider: ProviderKind) -> PathBuf {
        self.workspace_dir(workspace_id)
            .join("credentials")
            .join(format!("{}.credential", provider.as_str()))
    }

    /// Queue an audit entry. Append-only; the writer task owns the files.
    pub fn append_audit(
        &self,
        at_ms: u64,
        workspace_id: &WorkspaceId,
        kind: &str,
        payload: serde_json::Value,
    ) {
        let entry = AuditEntry {
            at_ms,
            workspace_id: workspace_id.clone(),
            kind: kind.to_string(),
            payload,
        };
        if self.audit_tx.try_send(entry).is_err() {
            warn!("audit channel full, dropping entry");
        }
    }

    /// Background task appending audit entries as JSONL per workspace.
    fn spawn_audit_writer(data_root: PathBuf, mut rx: mpsc::Receiver<AuditEntry>) {
        tokio::spawn(async move {
            while let Some(entry) = rx.recv().await {
                let path = data_root.join(entry.workspace_id.as_str()).join("audit.log");
                let line = match serde_json::to_string(&entry) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!(error = %e, "unserializable audit entry");
                        continue;
                    }
                };
                let result = async {
                    let mut file = tokio::fs::OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(&path)
                        .await?;
                    file.write_all(line.as_bytes()).await?;
                    file.write_all(b"\n").await
                }
                .await;
                if let Err(e) = result {
                    warn!(path = %path.display(), error = %e, "audit append failed");
                }
            }
        });
    }
}

/// chmod always; chown only when running as root.
fn apply_mode_and_owner(
    path: &Path,
    mode: u32,
    uid: u32,
    gid: u32,
) -> Result<(), WorkspaceFsError> {
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    if nix::unistd::Uid::effective().is_root() {
        nix::unistd::chown(
            path,
            Some(nix::unistd::Uid::from_raw(uid)),
            Some(nix::unistd::Gid::from_raw(gid)),
        )
        .map_err(|e| WorkspaceFsError::Io(std::io::Error::other(e)))?;
    } else {
        warn!(path = %path.display(), "not root, skipping chown");
    }
    Ok(())
}

#[cfg(test)]
#[path = "workspacefs_tests.rs"]
mod tests;
