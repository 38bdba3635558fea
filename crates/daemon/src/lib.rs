// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Berth daemon library.
//!
//! Hosts the multi-tenant orchestrator runtime: workspace filesystem and
//! uid allocation, auth/token lifecycle, the session manager with its
//! worktree scheduler and GC, the event broadcaster, and the HTTP +
//! WebSocket surface. The binary (`berthd`) is a thin wrapper over
//! [`lifecycle::startup`] and the axum server.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod auth;
pub mod broadcast;
pub mod env;
pub mod gitops;
pub mod http;
pub mod lifecycle;
pub mod sessions;
pub mod workspacefs;
