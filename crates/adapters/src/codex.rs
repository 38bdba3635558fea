// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSON-RPC stdio adapter (codex).
//!
//! One long-lived child per worktree speaking newline-framed JSON-RPC 2.0.
//! Requests (`initialize`, `newConversation`, `listModels`, `setModel`,
//! `sendUserTurn`, `interruptConversation`) carry ids and resolve through a
//! pending map; server notifications are translated to [`AgentEvent`]s.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use berth_core::{AgentEvent, TurnError, TurnErrorKind, TurnId};

use crate::client::{AgentClient, ClientError, ClientState, ModelInfo, SpawnConfig};

/// Grace between stdin close and SIGTERM during restart.
const RESTART_GRACE: Duration = Duration::from_secs(2);

type PendingReply = oneshot::Sender<Result<Value, String>>;

struct Inner {
    state: ClientState,
    next_id: u64,
    pending: HashMap<u64, PendingReply>,
    current_turn: Option<TurnId>,
    cancel_requested: bool,
    conversation_id: Option<String>,
    thread_id: Option<String>,
    /// Queue feeding the stdin writer task. `None` while no child runs.
    write_tx: Option<mpsc::Sender<String>>,
    child_pid: Option<i32>,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: ClientState::Idle,
            next_id: 1,
            pending: HashMap::new(),
            current_turn: None,
            cancel_requested: false,
            conversation_id: None,
            thread_id: None,
            write_tx: None,
            child_pid: None,
        }
    }

    /// Fail every caller waiting on a response. Used when the child dies.
    fn drain_pending(&mut self, reason: &str) {
        for (_, reply) in self.pending.drain() {
            let _ = reply.send(Err(reason.to_string()));
        }
    }
}

pub struct CodexClient {
    config: SpawnConfig,
    events: mpsc::Sender<AgentEvent>,
    inner: Arc<Mutex<Inner>>,
    /// Child handle lives outside the sync mutex so stop() can await it.
    child: tokio::sync::Mutex<Option<Child>>,
}

impl CodexClient {
    pub fn new(config: SpawnConfig, events: mpsc::Sender<AgentEvent>) -> Self {
        Self {
            config,
            events,
            inner: Arc::new(Mutex::new(Inner::new())),
            child: tokio::sync::Mutex::new(None),
        }
    }

    async fn emit(&self, event: AgentEvent) {
        if self.events.send(event).await.is_err() {
            debug!("agent event receiver dropped");
        }
    }

    /// Send a request and await its response.
    async fn request(&self, method: &str, params: Value) -> Result<Value, ClientError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let (line, tx) = {
            let mut inner = self.inner.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            let Some(tx) = inner.write_tx.clone() else {
                return Err(ClientError::Protocol("agent stdin is closed".to_string()));
            };
            inner.pending.insert(id, reply_tx);
            let frame = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
            (frame.to_string(), tx)
        };
        tx.send(line)
            .await
            .map_err(|_| ClientError::Protocol("agent stdin writer gone".to_string()))?;
        match reply_rx.await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(message)) => Err(ClientError::Protocol(message)),
            Err(_) => Err(ClientError::Protocol("agent exited mid-request".to_string())),
        }
    }

    /// Send a notification (no id, no reply).
    async fn notify(&self, method: &str, params: Value) -> Result<(), ClientError> {
        let tx = {
            let inner = self.inner.lock();
            inner.write_tx.clone()
        };
        let Some(tx) = tx else {
            return Err(ClientError::Protocol("agent stdin is closed".to_string()));
        };
        let frame = json!({ "jsonrpc": "2.0", "method": method, "params": params });
        tx.send(frame.to_string())
            .await
            .map_err(|_| ClientError::Protocol("agent stdin writer gone".to_string()))
    }

    fn spawn_child(&self) -> Result<Child, ClientError> {
        let argv = vec!["codex".to_string(), "proto".to_string()];
        let mut cmd = self.config.sandbox.command(
            &argv,
            &self.config.workdir,
            &self.config.env,
            &self.config.caps,
            &self.config.home,
        );
        cmd.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        cmd.spawn().map_err(|e| ClientError::SpawnFailed(e.to_string()))
    }

    /// Wire up writer/reader tasks for a freshly spawned child.
    fn attach_stdio(&self, child: &mut Child) -> Result<(), ClientError> {
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ClientError::SpawnFailed("child stdin not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ClientError::SpawnFailed("child stdout not piped".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ClientError::SpawnFailed("child stderr not piped".to_string()))?;

        let (write_tx, mut write_rx) = mpsc::channel::<String>(64);
        {
            let mut inner = self.inner.lock();
            inner.write_tx = Some(write_tx);
            inner.child_pid = child.id().map(|p| p as i32);
        }

        // Writer: single consumer of stdin, newline framing.
        tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(line) = write_rx.recv().await {
                if stdin.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if stdin.write_all(b"\n").await.is_err() {
                    break;
                }
            }
            // Dropping stdin closes the dialogue; the CLI exits on EOF.
        });

        // Stderr: log only — diagnostics, never protocol.
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(target: "agent.stderr", "{}", line);
            }
        });

        // Reader: every stdout line is a JSON-RPC frame.
        let inner = Arc::clone(&self.inner);
        let events = self.events.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let frame: Value = match serde_json::from_str(&line) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(error = %e, "unparseable agent frame");
                        continue;
                    }
                };
                handle_frame(&inner, &events, frame).await;
            }
            // EOF: the child is gone.
            let turn = {
                let mut guard = inner.lock();
                guard.state = ClientState::Stopped;
                guard.write_tx = None;
                guard.drain_pending("agent process exited");
                guard.current_turn.take()
            };
            if let Some(turn_id) = turn {
                let _ = events
                    .send(AgentEvent::TurnCompleted {
                        turn_id,
                        cancelled: true,
                        error: None,
                    })
                    .await;
            }
            let _ = events.send(AgentEvent::Exit { code: None, signal: None }).await;
        });
        Ok(())
    }
}

/// Dispatch one inbound frame: responses resolve the pending map,
/// notifications become events.
async fn handle_frame(inner: &Arc<Mutex<Inner>>, events: &mpsc::Sender<AgentEvent>, frame: Value) {
    if let Some(id) = frame.get("id").and_then(Value::as_u64) {
        let reply = inner.lock().pending.remove(&id);
        if let Some(reply) = reply {
            let outcome = if let Some(error) = frame.get("error") {
                Err(error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string())
            } else {
                Ok(frame.get("result").cloned().unwrap_or(Value::Null))
            };
            let _ = reply.send(outcome);
        }
        return;
    }

    let Some(method) = frame.get("method").and_then(Value::as_str) else {
        return;
    };
    let params = frame.get("params").cloned().unwrap_or(Value::Null);

    let (turn, cancel_requested) = {
        let guard = inner.lock();
        (guard.current_turn.clone(), guard.cancel_requested)
    };
    let Some(turn_id) = turn else {
        // Outside a turn only protocol faults are interesting.
        if method == "error" {
            let message =
                params.get("message").and_then(Value::as_str).unwrap_or("unknown").to_string();
            let _ = events.send(AgentEvent::Error { message }).await;
        }
        return;
    };

    let text = |key: &str| params.get(key).and_then(Value::as_str).unwrap_or("").to_string();

    let event = match method {
        "agent_message_delta" => {
            Some(AgentEvent::AssistantDelta { turn_id, text: text("delta") })
        }
        "agent_message" => Some(AgentEvent::AssistantMessage { turn_id, text: text("message") }),
        "item_started" => Some(AgentEvent::ItemStarted {
            turn_id,
            item_id: text("item_id"),
            kind: text("kind"),
        }),
        "command_execution_delta" => Some(AgentEvent::CommandExecutionDelta {
            turn_id,
            item_id: text("item_id"),
            output: text("output"),
        }),
        "command_execution_completed" => Some(AgentEvent::CommandExecutionCompleted {
            turn_id,
            item_id: text("item_id"),
            command: text("command"),
            exit_code: params.get("exit_code").and_then(Value::as_i64).map(|c| c as i32),
            output: text("output"),
        }),
        "tool_result" => Some(AgentEvent::ToolResult {
            turn_id,
            item_id: text("item_id"),
            name: text("name"),
            payload: params.get("result").cloned().unwrap_or(Value::Null),
        }),
        // We emit turn_started ourselves at acceptance; the notification is
        // redundant but harmless.
        "turn_started" => None,
        "turn_completed" => {
            finish_turn(inner);
            Some(AgentEvent::TurnCompleted {
                turn_id,
                cancelled: cancel_requested,
                error: turn_error_from(&params),
            })
        }
        "turn_aborted" => {
            finish_turn(inner);
            Some(AgentEvent::TurnCompleted { turn_id, cancelled: true, error: None })
        }
        "error" => {
            // Provider-level failures end the turn with a classified error.
            finish_turn(inner);
            Some(AgentEvent::TurnCompleted {
                turn_id,
                cancelled: false,
                error: Some(TurnError {
                    kind: classify_error(&text("kind")),
                    message: text("message"),
                }),
            })
        }
        other => {
            debug!(method = other, "ignoring unknown agent notification");
            None
        }
    };
    if let Some(event) = event {
        let _ = events.send(event).await;
    }
}

fn finish_turn(inner: &Arc<Mutex<Inner>>) {
    let mut guard = inner.lock();
    guard.current_turn = None;
    guard.cancel_requested = false;
    if guard.state == ClientState::Processing {
        guard.state = ClientState::Ready;
    }
}

/// Map provider error kinds onto the uniform taxonomy.
fn classify_error(kind: &str) -> TurnErrorKind {
    match kind {
        "usage_limit" | "usageLimitExceeded" => TurnErrorKind::UsageLimit,
        "rate_limited" | "rateLimitExceeded" => TurnErrorKind::RateLimited,
        "network" => TurnErrorKind::Network,
        _ => TurnErrorKind::Internal,
    }
}

fn turn_error_from(params: &Value) -> Option<TurnError> {
    let error = params.get("error")?;
    Some(TurnError {
        kind: classify_error(error.get("kind").and_then(Value::as_str).unwrap_or("")),
        message: error.get("message").and_then(Value::as_str).unwrap_or("").to_string(),
    })
}

#[async_trait]
impl AgentClient for CodexClient {
    async fn start(&self) -> Result<(), ClientError> {
        {
            let mut inner = self.inner.lock();
            match inner.state {
                ClientState::Ready | ClientState::Processing => return Ok(()),
                ClientState::Starting => {
                    return Err(ClientError::WrongState {
                        state: ClientState::Starting,
                        expected: "not already starting",
                    })
                }
                _ => inner.state = ClientState::Starting,
            }
        }

        let mut child = match self.spawn_child() {
            Ok(child) => child,
            Err(e) => {
                self.inner.lock().state = ClientState::Error;
                self.emit(AgentEvent::Error { message: e.to_string() }).await;
                return Err(e);
            }
        };
        self.attach_stdio(&mut child)?;
        *self.child.lock().await = Some(child);

        let handshake = async {
            self.request("initialize", json!({ "clientInfo": { "name": "berth" } })).await?;
            let mut params = json!({ "cwd": self.config.workdir });
            if let Some(model) = &self.config.model {
                params["model"] = json!(model);
            }
            if let Some(effort) = &self.config.reasoning_effort {
                params["reasoningEffort"] = json!(effort);
            }
            if let Some(thread) = &self.config.thread_id {
                params["resumeThreadId"] = json!(thread);
            }
            self.request("newConversation", params).await
        };

        match handshake.await {
            Ok(result) => {
                let conversation_id = result
                    .get("conversationId")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| {
                        ClientError::HandshakeFailed("missing conversationId".to_string())
                    })?;
                let thread_id = result
                    .get("threadId")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| conversation_id.clone());
                {
                    let mut inner = self.inner.lock();
                    inner.conversation_id = Some(conversation_id);
                    inner.thread_id = Some(thread_id.clone());
                    inner.state = ClientState::Ready;
                }
                self.emit(AgentEvent::ThreadStarted { thread_id }).await;
                self.emit(AgentEvent::Ready).await;
                Ok(())
            }
            Err(e) => {
                self.inner.lock().state = ClientState::Error;
                self.emit(AgentEvent::Error { message: e.to_string() }).await;
                self.stop(Duration::from_millis(200)).await;
                Err(ClientError::HandshakeFailed(e.to_string()))
            }
        }
    }

    async fn send_turn(&self, turn_id: TurnId, text: &str) -> Result<(), ClientError> {
        let conversation_id = {
            let mut inner = self.inner.lock();
            if inner.state != ClientState::Ready {
                return Err(ClientError::WrongState { state: inner.state, expected: "ready" });
            }
            let Some(conversation_id) = inner.conversation_id.clone() else {
                return Err(ClientError::Protocol("no conversation".to_string()));
            };
            inner.state = ClientState::Processing;
            inner.current_turn = Some(turn_id.clone());
            inner.cancel_requested = false;
            conversation_id
        };

        let params = json!({
            "conversationId": conversation_id,
            "items": [ { "type": "text", "text": text } ],
        });
        match self.request("sendUserTurn", params).await {
            Ok(_) => {
                self.emit(AgentEvent::TurnStarted { turn_id }).await;
                Ok(())
            }
            Err(e) => {
                let mut inner = self.inner.lock();
                inner.current_turn = None;
                if inner.state == ClientState::Processing {
                    inner.state = ClientState::Ready;
                }
                drop(inner);
                Err(ClientError::TurnRejected(e.to_string()))
            }
        }
    }

    async fn interrupt(&self, turn_id: &TurnId) -> Result<(), ClientError> {
        let conversation_id = {
            let mut inner = self.inner.lock();
            if inner.current_turn.as_ref() != Some(turn_id) || inner.cancel_requested {
                // Unknown, finished, or already-cancelled turn: no-op.
                return Ok(());
            }
            inner.cancel_requested = true;
            inner.conversation_id.clone()
        };
        let Some(conversation_id) = conversation_id else {
            return Ok(());
        };
        self.notify(
            "interruptConversation",
            json!({ "conversationId": conversation_id, "turnId": turn_id }),
        )
        .await
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, ClientError> {
        let result =
            self.request("listModels", json!({ "cursor": null, "pageSize": 100 })).await?;
        let models = result
            .get("models")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|m| {
                        Some(ModelInfo {
                            id: m.get("id").and_then(Value::as_str)?.to_string(),
                            label: m
                                .get("label")
                                .and_then(Value::as_str)
                                .map(str::to_string),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(models)
    }

    async fn set_model(
        &self,
        model: &str,
        reasoning_effort: Option<&str>,
    ) -> Result<(), ClientError> {
        let mut params = json!({ "model": model });
        if let Some(effort) = reasoning_effort {
            params["reasoningEffort"] = json!(effort);
        }
        self.request("setModel", params).await?;
        Ok(())
    }

    async fn request_restart(&self) -> Result<(), ClientError> {
        self.stop(RESTART_GRACE).await;
        self.start().await
    }

    async fn stop(&self, grace: Duration) {
        // Close stdin first — a well-behaved CLI exits on EOF.
        {
            let mut inner = self.inner.lock();
            inner.write_tx = None;
            inner.drain_pending("client stopping");
        }

        let mut guard = self.child.lock().await;
        let Some(mut child) = guard.take() else {
            self.inner.lock().state = ClientState::Stopped;
            return;
        };
        let pid = self.inner.lock().child_pid;

        if tokio::time::timeout(grace, child.wait()).await.is_ok() {
            self.inner.lock().state = ClientState::Stopped;
            return;
        }

        if let Some(pid) = pid {
            let _ = nix::sys::signal::kill(
                nix::unistd::Pid::from_raw(pid),
                nix::sys::signal::Signal::SIGTERM,
            );
        }
        if tokio::time::timeout(grace, child.wait()).await.is_err() {
            let _ = child.kill().await;
        }
        self.inner.lock().state = ClientState::Stopped;
    }

    fn state(&self) -> ClientState {
        self.inner.lock().state
    }

    fn thread_id(&self) -> Option<String> {
        self.inner.lock().thread_id.clone()
    }
}

#[cfg(test)]
#[path = "codex_tests.rs"]
mod tests;
