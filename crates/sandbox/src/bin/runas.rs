// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Run-as helper: launches a child as a workspace user inside its sandbox.
//!
//! Invoked by the daemon (running as root) with the argv produced by
//! `berth_sandbox::SandboxSpec::helper_args`. Applies, in order: network
//! namespace unsharing, the Landlock filesystem allowlist (with credential
//! masks already subtracted via grant expansion), group/gid/uid drop, then
//! execs the child so its exit code and signal disposition replace ours.
//!
//! Exit code 125 means the sandbox itself could not be established; the
//! child is never started in that case.

use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::Command;

use clap::Parser;
use landlock::{
    Access, AccessFs, PathBeneath, PathFd, Ruleset, RulesetAttr, RulesetCreatedAttr, ABI,
};
use nix::sched::{unshare, CloneFlags};
use nix::unistd::{chdir, setgid, setgroups, setuid, Gid, Uid};

use berth_sandbox::expand_grants;

#[derive(Parser)]
#[command(name = "berth-runas", disable_help_subcommand = true)]
struct Args {
    /// Target uid for the child.
    #[arg(long)]
    uid: u32,

    /// Target gid for the child.
    #[arg(long)]
    gid: u32,

    /// Working directory for the child.
    #[arg(long)]
    workdir: PathBuf,

    /// Read-only grant (repeatable).
    #[arg(long = "read")]
    read: Vec<PathBuf>,

    /// Read-write grant (repeatable).
    #[arg(long = "write")]
    write: Vec<PathBuf>,

    /// Unshare the network namespace; connect calls fail.
    #[arg(long)]
    deny_network: bool,

    /// Path withheld from the child's view (repeatable).
    #[arg(long = "mask")]
    mask: Vec<PathBuf>,

    /// Child argv, after `--`.
    #[arg(last = true, required = true)]
    argv: Vec<String>,
}

fn main() {
    let args = Args::parse();
    // run() only returns on failure — success is an exec.
    let err = run(args);
    eprintln!("berth-runas: {err}");
    std::process::exit(125);
}

fn run(args: Args) -> String {
    if args.deny_network {
        if let Err(e) = unshare(CloneFlags::CLONE_NEWNET) {
            return format!("failed to unshare network namespace: {e}");
        }
    }

    if let Err(e) = apply_landlock(&args) {
        return e;
    }

    let gid = Gid::from_raw(args.gid);
    if let Err(e) = setgroups(&[gid]) {
        return format!("setgroups failed: {e}");
    }
    if let Err(e) = setgid(gid) {
        return format!("setgid({}) failed: {e}", args.gid);
    }
    if let Err(e) = setuid(Uid::from_raw(args.uid)) {
        return format!("setuid({}) failed: {e}", args.uid);
    }

    if let Err(e) = chdir(&args.workdir) {
        return format!("chdir({}) failed: {e}", args.workdir.display());
    }

    let Some((program, rest)) = args.argv.split_first() else {
        return "empty child argv".to_string();
    };
    let err = Command::new(program).args(rest).exec();
    format!("exec {program} failed: {err}")
}

/// Build and apply the Landlock ruleset.
///
/// Masks are subtracted by expanding any grant that covers them into
/// per-child grants; the masked path itself gets no rule, so reads come
/// back ENOENT/EACCES.
fn apply_landlock(args: &Args) -> Result<(), String> {
    let abi = ABI::V2;
    let read_grants = expand_grants(&args.read, &args.mask);
    let write_grants = expand_grants(&args.write, &args.mask);

    let ruleset = Ruleset::default()
        .handle_access(AccessFs::from_all(abi))
        .map_err(|e| format!("landlock handle_access failed: {e}"))?;
    let mut created =
        ruleset.create().map_err(|e| format!("landlock ruleset create failed: {e}"))?;

    for path in &read_grants {
        let fd = match PathFd::new(path) {
            Ok(fd) => fd,
            // Grant targets may vanish between expansion and rule insertion.
            Err(_) => continue,
        };
        created = created
            .add_rule(PathBeneath::new(fd, AccessFs::from_read(abi)))
            .map_err(|e| format!("landlock read rule for {} failed: {e}", path.display()))?;
    }
    for path in &write_grants {
        let fd = match PathFd::new(path) {
            Ok(fd) => fd,
            Err(_) => continue,
        };
        created = created
            .add_rule(PathBeneath::new(fd, AccessFs::from_all(abi)))
            .map_err(|e| format!("landlock write rule for {} failed: {e}", path.display()))?;
    }

    created
        .restrict_self()
        .map_err(|e| format!("landlock restrict_self failed: {e}"))?;
    Ok(())
}
