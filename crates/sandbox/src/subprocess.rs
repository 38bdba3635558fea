// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Timeout-wrapped subprocess execution for git plumbing.
//!
//! Clones run without a timeout (network-bound, progress-reported); every
//! other git invocation goes through [`run_with_timeout`] so a wedged
//! command cannot pin a session mutex forever.

use std::process::Output;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;

/// Ceiling for worktree add/remove, diff, status, branch operations.
pub const GIT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum SubprocessError {
    #[error("{label} timed out after {timeout:?}")]
    TimedOut { label: String, timeout: Duration },

    #[error("{label} failed to run: {source}")]
    Io {
        label: String,
        #[source]
        source: std::io::Error,
    },
}

/// Run `cmd` to completion, capturing output, failing after `timeout`.
///
/// On timeout the child is killed by dropping the future (`kill_on_drop`
/// is set here so the process does not outlive the wait).
pub async fn run_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    label: &str,
) -> Result<Output, SubprocessError> {
    cmd.kill_on_drop(true);
    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(source)) => Err(SubprocessError::Io { label: label.to_string(), source }),
        Err(_) => Err(SubprocessError::TimedOut { label: label.to_string(), timeout }),
    }
}

/// Stderr (falling back to stdout) of a failed command, trimmed.
pub fn failure_detail(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
#[path = "subprocess_tests.rs"]
mod tests;
