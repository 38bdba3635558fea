// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate.

use std::path::PathBuf;
use std::time::Duration;

use crate::lifecycle::LifecycleError;

/// Daemon version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentMode {
    MonoUser,
    MultiUser,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Embedded,
    External,
}

/// `DEPLOYMENT_MODE`: `mono_user` (default) or `multi_user`.
pub fn deployment_mode() -> Result<DeploymentMode, LifecycleError> {
    match std::env::var("DEPLOYMENT_MODE").as_deref() {
        Err(_) | Ok("mono_user") => Ok(DeploymentMode::MonoUser),
        Ok("multi_user") => Ok(DeploymentMode::MultiUser),
        Ok(other) => Err(LifecycleError::Config(format!("invalid DEPLOYMENT_MODE: {other:?}"))),
    }
}

/// `STORAGE_BACKEND`: `embedded` (default) or `external`.
pub fn storage_backend() -> Result<StorageBackend, LifecycleError> {
    match std::env::var("STORAGE_BACKEND").as_deref() {
        Err(_) | Ok("embedded") => Ok(StorageBackend::Embedded),
        Ok("external") => Ok(StorageBackend::External),
        Ok(other) => Err(LifecycleError::Config(format!("invalid STORAGE_BACKEND: {other:?}"))),
    }
}

/// Resolve state directory: BERTH_STATE_DIR > XDG_STATE_HOME/berth > ~/.local/state/berth
pub fn state_dir() -> Result<PathBuf, LifecycleError> {
    if let Ok(dir) = std::env::var("BERTH_STATE_DIR") {
        return Ok(PathBuf::from(dir));
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Ok(PathBuf::from(xdg).join("berth"));
    }
    let home = std::env::var("HOME").map_err(|_| LifecycleError::NoStateDir)?;
    Ok(PathBuf::from(home).join(".local/state/berth"))
}

/// Root for per-workspace data trees (`data/<workspaceId>/…`).
pub fn data_root(state: &std::path::Path) -> PathBuf {
    std::env::var("BERTH_DATA_ROOT").map(PathBuf::from).unwrap_or_else(|_| state.join("data"))
}

/// Root for per-workspace home trees.
pub fn home_root(state: &std::path::Path) -> PathBuf {
    std::env::var("BERTH_HOME_ROOT").map(PathBuf::from).unwrap_or_else(|_| state.join("home"))
}

pub fn bind_addr() -> String {
    std::env::var("BERTH_BIND").unwrap_or_else(|_| "127.0.0.1".to_string())
}

pub fn port() -> Result<u16, LifecycleError> {
    match std::env::var("BERTH_PORT") {
        Err(_) => Ok(3030),
        Ok(raw) => raw
            .parse::<u16>()
            .map_err(|_| LifecycleError::Config(format!("invalid BERTH_PORT: {raw:?}"))),
    }
}

/// External base URL for handoff links; defaults to the bind address.
pub fn public_url() -> Option<String> {
    std::env::var("BERTH_PUBLIC_URL").ok().filter(|s| !s.is_empty())
}

pub fn jwt_key_path(state: &std::path::Path) -> PathBuf {
    std::env::var("BERTH_JWT_KEY_PATH").map(PathBuf::from).unwrap_or_else(|_| state.join("jwt.key"))
}

/// Mono mode: file the handoff URL is written to at startup, if set.
pub fn handoff_url_file() -> Option<PathBuf> {
    std::env::var("BERTH_HANDOFF_URL_FILE").ok().filter(|s| !s.is_empty()).map(PathBuf::from)
}

pub fn redis_url() -> Result<String, LifecycleError> {
    std::env::var("BERTH_REDIS_URL")
        .map_err(|_| LifecycleError::Config("STORAGE_BACKEND=external requires BERTH_REDIS_URL".to_string()))
}

/// `lo-hi` inclusive uid/gid allocation range, default 30000-30999.
pub fn uid_range() -> Result<(u32, u32), LifecycleError> {
    let raw = match std::env::var("BERTH_UID_RANGE") {
        Err(_) => return Ok((30_000, 30_999)),
        Ok(raw) => raw,
    };
    let parsed = raw.split_once('-').and_then(|(lo, hi)| {
        let lo = lo.trim().parse::<u32>().ok()?;
        let hi = hi.trim().parse::<u32>().ok()?;
        (lo <= hi).then_some((lo, hi))
    });
    parsed.ok_or_else(|| LifecycleError::Config(format!("invalid BERTH_UID_RANGE: {raw:?}")))
}

/// Path to the run-as helper; defaults to `berth-runas` next to the daemon.
pub fn runas_bin() -> PathBuf {
    if let Ok(path) = std::env::var("BERTH_RUNAS_BIN") {
        return PathBuf::from(path);
    }
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|d| d.join("berth-runas")))
        .unwrap_or_else(|| PathBuf::from("berth-runas"))
}

/// Dev escape hatch: run children without the sandbox helper.
pub fn sandbox_disabled() -> bool {
    std::env::var("BERTH_SANDBOX_DISABLED").is_ok_and(|v| v == "1" || v == "true")
}

fn duration_ms(var: &str, default_ms: u64) -> Duration {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_millis(default_ms))
}

pub fn gc_interval() -> Duration {
    duration_ms("BERTH_GC_INTERVAL_MS", 60_000)
}

pub fn session_idle_ttl() -> Duration {
    duration_ms("BERTH_SESSION_IDLE_TTL_MS", 86_400_000)
}

pub fn session_max_ttl() -> Duration {
    duration_ms("BERTH_SESSION_MAX_TTL_MS", 604_800_000)
}

pub fn sqlite_busy_timeout() -> Duration {
    duration_ms("BERTH_SQLITE_BUSY_TIMEOUT_MS", 5_000)
}

/// Agent wakeup bound: default 15 s, clamped to 60 s.
pub fn wakeup_timeout() -> Duration {
    duration_ms("BERTH_WAKEUP_TIMEOUT_MS", 15_000).min(Duration::from_secs(60))
}

pub fn diff_debounce() -> Duration {
    duration_ms("BERTH_DIFF_DEBOUNCE_MS", 500)
}

pub fn subscriber_queue() -> usize {
    std::env::var("BERTH_SUBSCRIBER_QUEUE").ok().and_then(|s| s.parse().ok()).unwrap_or(256)
}

pub fn rpc_log_buffer() -> usize {
    std::env::var("BERTH_RPC_LOG_BUFFER").ok().and_then(|s| s.parse().ok()).unwrap_or(500)
}

pub fn ping_interval() -> Duration {
    duration_ms("BERTH_PING_INTERVAL_MS", 25_000)
}

pub fn ping_grace() -> Duration {
    duration_ms("BERTH_PING_GRACE_MS", 8_000)
}

/// Grace for cooperative client shutdown before SIGTERM/SIGKILL escalation.
pub fn shutdown_grace() -> Duration {
    duration_ms("BERTH_SHUTDOWN_GRACE_MS", 3_000)
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
