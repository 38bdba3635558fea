// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent client adapters.
//!
//! An agent client wraps one external provider CLI bound to one worktree.
//! Two wire protocols exist in the wild — a newline-framed JSON-RPC dialogue
//! over a long-lived child (codex) and a per-turn JSONL stream (claude) —
//! and both are adapted to the uniform [`berth_core::AgentEvent`] stream so
//! everything above this crate is protocol-agnostic.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod claude;
mod client;
mod codex;

#[cfg(any(test, feature = "test-support"))]
mod fake;

pub use claude::ClaudeClient;
pub use client::{AgentClient, ClientError, ClientState, ModelInfo, SpawnConfig};
pub use codex::CodexClient;

#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeAgentClient;

use std::sync::Arc;

use berth_core::{AgentEvent, ProviderKind};
use tokio::sync::mpsc;

/// Construct the adapter for a provider.
pub fn client_for(
    provider: ProviderKind,
    config: SpawnConfig,
    events: mpsc::Sender<AgentEvent>,
) -> Arc<dyn AgentClient> {
    match provider {
        ProviderKind::Codex => Arc::new(CodexClient::new(config, events)),
        ProviderKind::Claude => Arc::new(ClaudeClient::new(config, events)),
    }
}
