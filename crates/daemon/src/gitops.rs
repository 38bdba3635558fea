// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Git plumbing executed on a session's behalf.
//!
//! Every invocation goes through the sandbox builder with the session's
//! capabilities — the daemon itself never runs git against tenant repos
//! directly. Clones run without a timeout (network-bound); everything else
//! is bounded by [`berth_sandbox::GIT_TIMEOUT`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Output;

use berth_core::{ApiError, GitFailure};
use berth_sandbox::{failure_detail, run_with_timeout, Capabilities, SandboxSpec, GIT_TIMEOUT};
use berth_wire::http::{BranchListResponse, CommitInfo, GitIdentityResponse};
use berth_wire::DiffFile;
use tracing::warn;

/// Everything needed to run git for one session.
#[derive(Clone)]
pub struct GitCtx {
    pub sandbox: SandboxSpec,
    pub caps: Capabilities,
    pub home: PathBuf,
    pub env: HashMap<String, String>,
}

impl GitCtx {
    fn command(&self, dir: &Path, args: &[&str]) -> tokio::process::Command {
        let mut argv = vec!["git".to_string()];
        argv.extend(args.iter().map(|s| s.to_string()));
        let mut cmd = self.sandbox.command(&argv, dir, &self.env, &self.caps, &self.home);
        // A worktree's own env must win over anything inherited.
        cmd.env_remove("GIT_DIR");
        cmd.env_remove("GIT_WORK_TREE");
        cmd
    }

    async fn run(&self, dir: &Path, args: &[&str], label: &str) -> Result<Output, ApiError> {
        let output = run_with_timeout(self.command(dir, args), GIT_TIMEOUT, label)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        if !output.status.success() {
            return Err(ApiError::Internal(format!("{label} failed: {}", failure_detail(&output))));
        }
        Ok(output)
    }

    /// `git clone <url> <dest>`, failures classified for the API taxonomy.
    ///
    /// No timeout: clones are network-bound and legitimately slow.
    pub async fn clone_repo(&self, repo_url: &str, dest: &Path) -> Result<(), ApiError> {
        if !is_plausible_repo_url(repo_url) {
            return Err(ApiError::Git {
                failure: GitFailure::InvalidUrl,
                message: format!("not a clonable URL: {repo_url}"),
            });
        }
        let parent = dest.parent().unwrap_or(dest);
        let mut cmd = self.command(parent, &["clone", repo_url, &dest.display().to_string()]);
        cmd.kill_on_drop(true);
        let output = cmd.output().await.map_err(|e| ApiError::Internal(e.to_string()))?;
        if output.status.success() {
            return Ok(());
        }
        let detail = failure_detail(&output);
        Err(ApiError::Git { failure: classify_clone_failure(&detail), message: detail })
    }

    pub async fn worktree_add(
        &self,
        repo_dir: &Path,
        branch: &str,
        path: &Path,
        start_point: &str,
    ) -> Result<(), ApiError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ApiError::Internal(format!("worktree parent dir: {e}")))?;
        }
        self.run(
            repo_dir,
            &["worktree", "add", "-b", branch, &path.display().to_string(), start_point],
            "git worktree add",
        )
        .await
        .map(|_| ())
    }

    /// Unregister a worktree and delete its branch. Best-effort — failures
    /// are logged and the directory removal proceeds regardless.
    pub async fn worktree_remove(&self, repo_dir: &Path, path: &Path, branch: &str) {
        if let Err(e) = self
            .run(
                repo_dir,
                &["worktree", "remove", "--force", &path.display().to_string()],
                "git worktree remove",
            )
            .await
        {
            warn!(path = %path.display(), error = %e, "git worktree remove failed");
        }
        if let Err(e) = self.run(repo_dir, &["branch", "-D", branch], "git branch delete").await {
            warn!(branch, error = %e, "git branch delete failed");
        }
    }

    pub async fn status_porcelain(&self, dir: &Path) -> Result<Vec<DiffFile>, ApiError> {
        let output = self.run(dir, &["status", "--porcelain"], "git status").await?;
        Ok(parse_porcelain(&String::from_utf8_lossy(&output.stdout)))
    }

    pub async fn diff(&self, dir: &Path) -> Result<String, ApiError> {
        let output = self.run(dir, &["diff"], "git diff").await?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    pub async fn commits(&self, dir: &Path, limit: usize) -> Result<Vec<CommitInfo>, ApiError> {
        let count = format!("-n{limit}");
        let output = self
            .run(dir, &["log", &count, "--pretty=format:%H%x09%an%x09%s%x09%ct"], "git log")
            .await?;
        Ok(parse_commits(&String::from_utf8_lossy(&output.stdout)))
    }

    pub async fn branches(&self, dir: &Path) -> Result<BranchListResponse, ApiError> {
        let output = self
            .run(dir, &["branch", "--format=%(refname:short)"], "git branch list")
            .await?;
        let branches: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        let head = self.run(dir, &["rev-parse", "--abbrev-ref", "HEAD"], "git rev-parse").await?;
        let current = String::from_utf8_lossy(&head.stdout).trim().to_string();
        Ok(BranchListResponse { branches, current })
    }

    /// Switch branches; refused on a dirty tree.
    pub async fn switch_branch(&self, dir: &Path, branch: &str) -> Result<(), ApiError> {
        if !self.status_porcelain(dir).await?.is_empty() {
            return Err(ApiError::Conflict(
                "working tree has uncommitted changes".to_string(),
            ));
        }
        self.run(dir, &["switch", branch], "git switch").await.map(|_| ())
    }

    pub async fn identity(&self, dir: &Path) -> Result<GitIdentityResponse, ApiError> {
        let name = self.run(dir, &["config", "user.name"], "git config user.name").await;
        let email = self.run(dir, &["config", "user.email"], "git config user.email").await;
        let text = |r: Result<Output, ApiError>| {
            r.map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string()).unwrap_or_default()
        };
        Ok(GitIdentityResponse { name: text(name), email: text(email) })
    }

    pub async fn merge(&self, dir: &Path, branch: &str) -> Result<(), ApiError> {
        self.run(dir, &["merge", "--no-edit", branch], "git merge")
            .await
            .map(|_| ())
            .map_err(|e| conflict_from_internal(e, "merge conflict"))
    }

    pub async fn abort_merge(&self, dir: &Path) -> Result<(), ApiError> {
        self.run(dir, &["merge", "--abort"], "git merge abort").await.map(|_| ())
    }

    pub async fn cherry_pick(&self, dir: &Path, commit: &str) -> Result<(), ApiError> {
        self.run(dir, &["cherry-pick", commit], "git cherry-pick")
            .await
            .map(|_| ())
            .map_err(|e| conflict_from_internal(e, "cherry-pick conflict"))
    }
}

/// Merge-style failures read better as 409s than 500s.
fn conflict_from_internal(err: ApiError, label: &str) -> ApiError {
    match err {
        ApiError::Internal(detail) if detail.to_lowercase().contains("conflict") => {
            ApiError::Conflict(format!("{label}: {detail}"))
        }
        other => other,
    }
}

/// Accept https/http/ssh/git/file schemes and scp-style `git@host:path`.
pub fn is_plausible_repo_url(url: &str) -> bool {
    url.starts_with("https://")
        || url.starts_with("http://")
        || url.starts_with("ssh://")
        || url.starts_with("git://")
        || url.starts_with("file://")
        || (url.contains('@') && url.contains(':') && !url.contains("://"))
}

pub fn classify_clone_failure(stderr: &str) -> GitFailure {
    let lower = stderr.to_lowercase();
    if lower.contains("authentication failed")
        || lower.contains("could not read username")
        || lower.contains("could not read password")
        || lower.contains("permission denied")
        || lower.contains("403")
    {
        GitFailure::AuthFailed
    } else if lower.contains("not found")
        || lower.contains("does not exist")
        || lower.contains("404")
    {
        GitFailure::RepoNotFound
    } else if lower.contains("could not resolve host")
        || lower.contains("unable to access")
        || lower.contains("timed out")
        || lower.contains("connection refused")
        || lower.contains("network")
    {
        GitFailure::Network
    } else {
        GitFailure::Network
    }
}

fn parse_porcelain(raw: &str) -> Vec<DiffFile> {
    raw.lines()
        .filter(|line| line.len() > 3)
        .map(|line| DiffFile { status: line[..2].to_string(), path: line[3..].to_string() })
        .collect()
}

fn parse_commits(raw: &str) -> Vec<CommitInfo> {
    raw.lines()
        .filter_map(|line| {
            let mut parts = line.splitn(4, '\t');
            Some(CommitInfo {
                hash: parts.next()?.to_string(),
                author: parts.next()?.to_string(),
                subject: parts.next()?.to_string(),
                at_ms: parts.next()?.trim().parse::<u64>().ok()? * 1000,
            })
        })
        .collect()
}

#[cfg(test)]
#[path = "gitops_tests.rs"]
mod tests;
