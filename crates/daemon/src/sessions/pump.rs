// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-client event pump and the debounced repo-diff scheduler.
//!
//! One task per agent client: it translates [`AgentEvent`]s into durable
//! messages and broadcast frames. For user messages persistence strictly
//! precedes broadcast (the API layer enforces that); for assistant and
//! command events this pump persists first too, so the broadcast frame can
//! carry the store-assigned message id — clients resync from the log by id
//! on reconnect.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use berth_core::{
    AgentEvent, Clock, Message, MessageRole, Session, SessionId, TurnError, Workspace, Worktree,
    WorktreeId, WorktreeStatus,
};
use berth_storage::{NewMessage, Store};
use berth_wire::{RpcDirection, RpcLogEntry, ServerPayload};

use crate::broadcast::Broadcaster;
use crate::gitops::GitCtx;

use super::SessionManager;

impl<C: Clock> SessionManager<C> {
    /// Spawn the pump task for a freshly created client.
    pub(crate) fn spawn_pump(
        &self,
        workspace: &Workspace,
        session: &Session,
        worktree: &Worktree,
        events_rx: mpsc::Receiver<AgentEvent>,
    ) {
        let ctx = PumpCtx {
            store: Arc::clone(&self.store),
            broadcaster: Arc::clone(&self.broadcaster),
            clock: self.clock.clone(),
            session_id: session.id.clone(),
            worktree_id: worktree.id.clone(),
            repo_dir: self.worktree_dir(session, &worktree.id),
            git: self.git_ctx(workspace, session, false, worktree.deny_git_credentials_access),
            diff: self.diff.clone(),
            rpc_logs: self.rpc_logs_handle(),
            rpc_cap: self.config.rpc_log_buffer,
        };
        tokio::spawn(pump(ctx, events_rx));
    }
}

struct PumpCtx<C: Clock> {
    store: Arc<dyn Store>,
    broadcaster: Arc<Broadcaster>,
    clock: C,
    session_id: SessionId,
    worktree_id: WorktreeId,
    repo_dir: PathBuf,
    git: GitCtx,
    diff: DiffScheduler,
    rpc_logs: Arc<Mutex<HashMap<SessionId, VecDeque<RpcLogEntry>>>>,
    rpc_cap: usize,
}

async fn pump<C: Clock>(ctx: PumpCtx<C>, mut events_rx: mpsc::Receiver<AgentEvent>) {
    while let Some(event) = events_rx.recv().await {
        if let Ok(payload) = serde_json::to_value(&event) {
            record_rpc(&ctx, payload);
        }
        handle_event(&ctx, event).await;
    }
    debug!(session = %ctx.session_id, worktree = %ctx.worktree_id, "event pump ended");
}

/// Ring-buffer the inbound frame and stream it as an `rpc_log` event.
fn record_rpc<C: Clock>(ctx: &PumpCtx<C>, payload: serde_json::Value) {
    let entry =
        RpcLogEntry { at_ms: ctx.clock.epoch_ms(), direction: RpcDirection::Received, payload };
    {
        let mut logs = ctx.rpc_logs.lock();
        let buffer = logs.entry(ctx.session_id.clone()).or_default();
        if buffer.len() >= ctx.rpc_cap {
            buffer.pop_front();
        }
        buffer.push_back(entry.clone());
    }
    ctx.broadcaster.publish(
        &ctx.session_id,
        None,
        ServerPayload::RpcLog { entries: vec![entry] },
    );
}

async fn handle_event<C: Clock>(ctx: &PumpCtx<C>, event: AgentEvent) {
    match event {
        AgentEvent::Ready => {
            update_status(ctx, WorktreeStatus::Ready, None).await;
            publish(ctx, ServerPayload::Ready);
            publish(ctx, ServerPayload::WorktreeStatus { status: WorktreeStatus::Ready });
        }

        AgentEvent::ThreadStarted { thread_id } => {
            if let Some(mut worktree) = load_worktree(ctx).await {
                if worktree.thread_id.as_deref() != Some(thread_id.as_str()) {
                    worktree.thread_id = Some(thread_id);
                    save_worktree(ctx, &worktree).await;
                }
            }
        }

        AgentEvent::TurnStarted { turn_id } => {
            if let Some(mut worktree) = load_worktree(ctx).await {
                worktree.status = WorktreeStatus::Processing;
                worktree.current_turn_id = Some(turn_id.clone());
                save_worktree(ctx, &worktree).await;
            }
            publish(ctx, ServerPayload::TurnStarted { turn_id });
        }

        AgentEvent::AssistantDelta { turn_id, text } => {
            publish(ctx, ServerPayload::AssistantDelta { turn_id, text });
        }

        AgentEvent::AssistantMessage { turn_id, text } => {
            if let Some(message) = append(ctx, MessageRole::Assistant, text, None).await {
                publish(ctx, ServerPayload::AssistantMessage { turn_id, message });
            }
        }

        // Work-item starts are internal bookkeeping; the wire surface
        // begins at the first command delta.
        AgentEvent::ItemStarted { .. } => {}

        AgentEvent::CommandExecutionDelta { turn_id, item_id, output } => {
            publish(ctx, ServerPayload::CommandExecutionDelta { turn_id, item_id, output });
        }

        AgentEvent::CommandExecutionCompleted { turn_id, item_id, command, exit_code, output } => {
            let text = if command.is_empty() {
                output
            } else {
                format!("$ {command}\n{output}")
            };
            if let Some(message) = append(ctx, MessageRole::CommandExecution, text, None).await {
                publish(
                    ctx,
                    ServerPayload::CommandExecutionCompleted {
                        turn_id,
                        item_id,
                        command,
                        exit_code,
                        message,
                    },
                );
            }
        }

        AgentEvent::ToolResult { turn_id, item_id, name, payload } => {
            let text = payload.as_str().map(str::to_string).unwrap_or_else(|| payload.to_string());
            if let Some(message) =
                append(ctx, MessageRole::ToolResult, text, Some(payload)).await
            {
                publish(ctx, ServerPayload::ToolResult { turn_id, item_id, name, message });
            }
        }

        AgentEvent::TurnCompleted { turn_id, cancelled, error } => {
            if let Some(mut worktree) = load_worktree(ctx).await {
                worktree.status = WorktreeStatus::Ready;
                worktree.current_turn_id = None;
                save_worktree(ctx, &worktree).await;
            }
            if let Some(TurnError { kind, message }) = &error {
                publish(
                    ctx,
                    ServerPayload::TurnError {
                        turn_id: Some(turn_id.clone()),
                        kind: kind_str(*kind).to_string(),
                        message: message.clone(),
                    },
                );
            }
            publish(ctx, ServerPayload::TurnCompleted { turn_id, cancelled, error });
            // Post-turn repo diff, debounced and coalesced per worktree.
            ctx.diff.schedule(
                ctx.session_id.clone(),
                ctx.worktree_id.clone(),
                ctx.git.clone(),
                ctx.repo_dir.clone(),
            );
        }

        AgentEvent::Error { message } => {
            publish(
                ctx,
                ServerPayload::TurnError { turn_id: None, kind: "internal".to_string(), message },
            );
        }

        AgentEvent::Exit { code, signal } => {
            debug!(?code, ?signal, worktree = %ctx.worktree_id, "agent process exited");
            update_status(ctx, WorktreeStatus::Stopped, None).await;
            publish(ctx, ServerPayload::WorktreeStatus { status: WorktreeStatus::Stopped });
        }
    }
}

fn kind_str(kind: berth_core::TurnErrorKind) -> &'static str {
    match kind {
        berth_core::TurnErrorKind::UsageLimit => "usage_limit",
        berth_core::TurnErrorKind::RateLimited => "rate_limited",
        berth_core::TurnErrorKind::Network => "network",
        berth_core::TurnErrorKind::Internal => "internal",
    }
}

fn publish<C: Clock>(ctx: &PumpCtx<C>, payload: ServerPayload) {
    ctx.broadcaster.publish(&ctx.session_id, Some(&ctx.worktree_id), payload);
}

async fn load_worktree<C: Clock>(ctx: &PumpCtx<C>) -> Option<berth_core::Worktree> {
    match ctx.store.get_worktree(&ctx.session_id, &ctx.worktree_id).await {
        Ok(worktree) => worktree,
        Err(e) => {
            warn!(error = %e, "pump failed to load worktree");
            None
        }
    }
}

async fn save_worktree<C: Clock>(ctx: &PumpCtx<C>, worktree: &berth_core::Worktree) {
    if let Err(e) = ctx.store.save_worktree(worktree).await {
        warn!(error = %e, "pump failed to save worktree");
    }
}

async fn update_status<C: Clock>(
    ctx: &PumpCtx<C>,
    status: WorktreeStatus,
    turn: Option<berth_core::TurnId>,
) {
    if let Some(mut worktree) = load_worktree(ctx).await {
        worktree.status = status;
        worktree.current_turn_id = turn;
        save_worktree(ctx, &worktree).await;
    }
}

/// Persist an agent-produced message. Returns `None` (and logs) on store
/// failure — the broadcast is skipped so subscribers never see a message
/// the log cannot replay.
async fn append<C: Clock>(
    ctx: &PumpCtx<C>,
    role: MessageRole,
    text: String,
    tool_result: Option<serde_json::Value>,
) -> Option<Message> {
    let new = NewMessage {
        role,
        text,
        attachments: Vec::new(),
        tool_result,
        created_at_ms: ctx.clock.epoch_ms(),
    };
    match ctx.store.append_message(&ctx.session_id, &ctx.worktree_id, new).await {
        Ok(message) => Some(message),
        Err(e) => {
            warn!(error = %e, "failed to persist agent message");
            None
        }
    }
}

/// Debounced, coalescing post-turn diff broadcasts.
#[derive(Clone)]
pub struct DiffScheduler {
    broadcaster: Arc<Broadcaster>,
    debounce: Duration,
    pending: Arc<Mutex<HashSet<(SessionId, WorktreeId)>>>,
}

impl DiffScheduler {
    pub fn new(broadcaster: Arc<Broadcaster>, debounce: Duration) -> Self {
        Self { broadcaster, debounce, pending: Arc::new(Mutex::new(HashSet::new())) }
    }

    /// Schedule a diff broadcast. Calls within the debounce window coalesce
    /// into one run.
    pub fn schedule(
        &self,
        session_id: SessionId,
        worktree_id: WorktreeId,
        git: GitCtx,
        dir: PathBuf,
    ) {
        let key = (session_id.clone(), worktree_id.clone());
        {
            let mut pending = self.pending.lock();
            if !pending.insert(key.clone()) {
                return;
            }
        }
        let scheduler = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(scheduler.debounce).await;
            scheduler.pending.lock().remove(&key);

            let files = match git.status_porcelain(&dir).await {
                Ok(files) => files,
                Err(e) => {
                    warn!(error = %e, "repo diff status failed");
                    return;
                }
            };
            let diff = match git.diff(&dir).await {
                Ok(diff) => diff,
                Err(e) => {
                    warn!(error = %e, "repo diff failed");
                    return;
                }
            };
            scheduler.broadcaster.publish(
                &session_id,
                Some(&worktree_id),
                ServerPayload::RepoDiff { files, diff },
            );
        });
    }
}
