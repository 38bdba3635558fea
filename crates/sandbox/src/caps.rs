// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Capability description and helper argv construction.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::process::Command;

/// What a sandboxed child may do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub uid: u32,
    pub gid: u32,
    /// Read-only filesystem grants (beneath-semantics).
    pub read_paths: Vec<PathBuf>,
    /// Read-write filesystem grants. The session directory tree and the
    /// workspace home are always present here.
    pub write_paths: Vec<PathBuf>,
    pub allow_network: bool,
    pub hide_git_credentials: bool,
}

impl Capabilities {
    /// Paths withheld from the child's view when credentials are hidden.
    pub fn mask_paths(&self, home: &Path) -> Vec<PathBuf> {
        if !self.hide_git_credentials {
            return Vec::new();
        }
        vec![home.join(".git-credentials"), home.join(".ssh")]
    }
}

/// How to reach the run-as helper, resolved once at startup.
#[derive(Debug, Clone)]
pub struct SandboxSpec {
    pub helper: PathBuf,
    /// Dev escape hatch: run children directly, without the helper.
    /// Containment tests do not pass in this mode; it exists for running
    /// the daemon unprivileged on a workstation.
    pub disabled: bool,
}

impl SandboxSpec {
    pub fn new(helper: PathBuf) -> Self {
        Self { helper, disabled: false }
    }

    pub fn unsandboxed() -> Self {
        Self { helper: PathBuf::new(), disabled: true }
    }

    /// Build the helper argv for `argv` with the given capabilities.
    ///
    /// Exposed separately from [`SandboxSpec::command`] so containment
    /// policy is testable without spawning anything.
    pub fn helper_args(
        &self,
        argv: &[String],
        cwd: &Path,
        caps: &Capabilities,
        home: &Path,
    ) -> Vec<String> {
        let mut args = vec![
            "--uid".to_string(),
            caps.uid.to_string(),
            "--gid".to_string(),
            caps.gid.to_string(),
            "--workdir".to_string(),
            cwd.display().to_string(),
        ];
        for path in &caps.read_paths {
            args.push("--read".to_string());
            args.push(path.display().to_string());
        }
        for path in &caps.write_paths {
            args.push("--write".to_string());
            args.push(path.display().to_string());
        }
        if !caps.allow_network {
            args.push("--deny-network".to_string());
        }
        for mask in caps.mask_paths(home) {
            args.push("--mask".to_string());
            args.push(mask.display().to_string());
        }
        args.push("--".to_string());
        args.extend(argv.iter().cloned());
        args
    }

    /// Build the command to launch `argv` under the sandbox.
    ///
    /// The host environment is stripped; only `env` crosses into the child
    /// (plus `HOME`/`USER` derived from the capability, set here so every
    /// call site agrees on them).
    pub fn command(
        &self,
        argv: &[String],
        cwd: &Path,
        env: &HashMap<String, String>,
        caps: &Capabilities,
        home: &Path,
    ) -> Command {
        let mut cmd = if self.disabled {
            let mut cmd = Command::new(&argv[0]);
            cmd.args(&argv[1..]);
            cmd.current_dir(cwd);
            cmd
        } else {
            let mut cmd = Command::new(&self.helper);
            cmd.args(self.helper_args(argv, cwd, caps, home));
            cmd
        };
        cmd.env_clear();
        cmd.env("HOME", home);
        cmd.env("PATH", "/usr/local/bin:/usr/bin:/bin");
        for (key, value) in env {
            cmd.env(key, value);
        }
        cmd
    }
}

#[cfg(test)]
#[path = "caps_tests.rs"]
mod tests;
