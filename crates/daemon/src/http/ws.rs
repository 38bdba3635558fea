// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket endpoint.
//!
//! The first client frame MUST be `{type:"auth", token}` within the auth
//! deadline; the socket closes otherwise. There is no query-string auth.
//! After auth, clients subscribe to sessions, ping for liveness, and
//! resync transcripts with `sync_messages` — the catch-up is everything
//! strictly newer than the supplied cursor, in insertion order, after
//! which live frames continue on the same connection.

use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use berth_core::WorkspaceId;
use berth_wire::{ClientFrame, ServerFrame, ServerPayload};

use crate::broadcast::SubscriberId;
use crate::env::{ping_grace, ping_interval};

use super::AppState;

const AUTH_DEADLINE: Duration = Duration::from_secs(5);

pub async fn upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| connection(state, socket))
}

async fn connection(state: AppState, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();

    // First frame: auth, or the connection dies.
    let workspace_id = match authenticate(&state, &mut stream).await {
        Some(workspace_id) => workspace_id,
        None => {
            let _ = sink.close().await;
            return;
        }
    };
    debug!(workspace = %workspace_id, "websocket authenticated");

    // All server frames funnel through one writer.
    let (out_tx, mut out_rx) = mpsc::channel::<ServerFrame>(64);
    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let Ok(text) = serde_json::to_string(&frame) else { continue };
            if sink.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut subscriptions: Vec<(SubscriberId, tokio::task::JoinHandle<()>)> = Vec::new();
    let liveness = ping_interval() + ping_grace();
    let mut alive_deadline = tokio::time::Instant::now() + liveness;

    loop {
        let frame = tokio::select! {
            frame = stream.next() => frame,
            _ = tokio::time::sleep_until(alive_deadline) => {
                debug!("websocket liveness expired");
                break;
            }
        };
        let Some(Ok(message)) = frame else { break };
        alive_deadline = tokio::time::Instant::now() + liveness;

        let text = match message {
            WsMessage::Text(text) => text,
            WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
            WsMessage::Close(_) => break,
            WsMessage::Binary(_) => continue,
        };
        let frame: ClientFrame = match serde_json::from_str(&text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "unparseable client frame");
                continue;
            }
        };

        match frame {
            // Re-auth frames after the handshake are tolerated no-ops.
            ClientFrame::Auth { .. } => {}

            ClientFrame::Ping => {
                let _ = out_tx.send(ServerFrame::bare(0, ServerPayload::Pong)).await;
            }

            ClientFrame::Subscribe { session_id, worktree_id } => {
                if state.authorize_session(&workspace_id, &session_id).await.is_err() {
                    continue;
                }
                let (handle, mut rx) =
                    state.broadcaster.subscribe(session_id.clone(), worktree_id);
                let forward_tx = out_tx.clone();
                let forwarder = tokio::spawn(async move {
                    while let Some(frame) = rx.recv().await {
                        if forward_tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                });
                subscriptions.push((handle, forwarder));
            }

            ClientFrame::SyncMessages { session_id, worktree_id, last_seen_message_id } => {
                if state.authorize_session(&workspace_id, &session_id).await.is_err() {
                    continue;
                }
                let cursor = last_seen_message_id.unwrap_or(0);
                match state.manager.messages_after(&session_id, &worktree_id, cursor).await {
                    Ok(messages) => {
                        let frame = ServerFrame::worktree(
                            state.broadcaster.current_seq(&session_id),
                            session_id,
                            worktree_id,
                            ServerPayload::MessagesSync { messages },
                        );
                        let _ = out_tx.send(frame).await;
                    }
                    Err(e) => warn!(error = %e, "sync_messages failed"),
                }
            }
        }
    }

    for (handle, forwarder) in subscriptions {
        state.broadcaster.unsubscribe(&handle);
        forwarder.abort();
    }
    writer.abort();
}

/// Wait for the auth frame; `None` closes the connection.
async fn authenticate(
    state: &AppState,
    stream: &mut futures_util::stream::SplitStream<WebSocket>,
) -> Option<WorkspaceId> {
    let first = tokio::time::timeout(AUTH_DEADLINE, stream.next()).await.ok()??;
    let text = match first.ok()? {
        WsMessage::Text(text) => text,
        _ => return None,
    };
    match serde_json::from_str::<ClientFrame>(&text) {
        Ok(ClientFrame::Auth { token }) => state.auth.verify(&token).ok(),
        _ => None,
    }
}
