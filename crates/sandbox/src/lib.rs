// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sandboxed child-process launching.
//!
//! Every external command executed on a session's behalf — the clone, git
//! invocations, agent spawns — is built through [`SandboxSpec::command`],
//! which produces an invocation of the `berth-runas` helper. The helper
//! (running as root) drops to the workspace's uid/gid, applies a Landlock
//! filesystem allowlist, optionally unshares the network namespace, and
//! execs the child so exit codes and signals propagate unchanged.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod caps;
pub mod grants;
pub mod subprocess;

pub use caps::{Capabilities, SandboxSpec};
pub use grants::expand_grants;
pub use subprocess::{failure_detail, run_with_timeout, SubprocessError, GIT_TIMEOUT};
