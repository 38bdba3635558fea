// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon startup, configuration resolution, and shutdown.

mod startup;

pub use startup::{provision_workspace, startup, StartupResult};

use std::path::PathBuf;

use thiserror::Error;

use crate::env::{self, DeploymentMode, StorageBackend};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("cannot determine a state directory (set BERTH_STATE_DIR or HOME)")]
    NoStateDir,

    #[error("another daemon holds the lock: {0}")]
    LockFailed(std::io::Error),

    #[error("failed to bind {0}: {1}")]
    BindFailed(String, std::io::Error),

    #[error("store error: {0}")]
    Store(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl LifecycleError {
    /// Process exit code per the external contract: 2 for configuration
    /// errors, 1 for any other fatal startup error.
    pub fn exit_code(&self) -> i32 {
        match self {
            LifecycleError::Config(_) | LifecycleError::NoStateDir => 2,
            _ => 1,
        }
    }
}

/// Resolved daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub state_dir: PathBuf,
    pub data_root: PathBuf,
    pub home_root: PathBuf,
    pub lock_path: PathBuf,
    pub version_path: PathBuf,
    pub db_path: PathBuf,
    pub jwt_key_path: PathBuf,
    pub bind: String,
    pub port: u16,
    pub mode: DeploymentMode,
    pub backend: StorageBackend,
    pub uid_range: (u32, u32),
    pub public_base: String,
    pub handoff_url_file: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self, LifecycleError> {
        let state_dir = env::state_dir()?;
        let bind = env::bind_addr();
        let port = env::port()?;
        let public_base =
            env::public_url().unwrap_or_else(|| format!("http://{bind}:{port}"));
        Ok(Self {
            data_root: env::data_root(&state_dir),
            home_root: env::home_root(&state_dir),
            lock_path: state_dir.join("berthd.lock"),
            version_path: state_dir.join("berthd.version"),
            db_path: state_dir.join("berth.db"),
            jwt_key_path: env::jwt_key_path(&state_dir),
            state_dir,
            bind,
            port,
            mode: env::deployment_mode()?,
            backend: env::storage_backend()?,
            uid_range: env::uid_range()?,
            public_base,
            handoff_url_file: env::handoff_url_file(),
        })
    }
}
