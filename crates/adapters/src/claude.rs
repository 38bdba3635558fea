// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSONL adapter (claude).
//!
//! The CLI is invoked once per turn (`claude -p --output-format stream-json
//! --verbose [--resume <thread>]`) with the prompt on stdin, and emits one
//! JSON record per line: `system(init)`, `assistant` messages with `text` /
//! `tool_use` content segments, `user` messages with `tool_result` segments,
//! and a final `result`. No token-level streaming exists; deltas surface at
//! segment boundaries. Thread and turn ids are synthesized server-side —
//! the thread id is the CLI's session id captured from the init record.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use berth_core::{AgentEvent, TurnError, TurnErrorKind, TurnId};

use crate::client::{AgentClient, ClientError, ClientState, ModelInfo, SpawnConfig};

struct Inner {
    state: ClientState,
    thread_id: Option<String>,
    current_turn: Option<TurnId>,
    cancel_requested: bool,
    model: Option<String>,
    child_pid: Option<i32>,
}

pub struct ClaudeClient {
    config: SpawnConfig,
    events: mpsc::Sender<AgentEvent>,
    inner: Arc<Mutex<Inner>>,
    child: tokio::sync::Mutex<Option<Child>>,
}

impl ClaudeClient {
    pub fn new(config: SpawnConfig, events: mpsc::Sender<AgentEvent>) -> Self {
        let inner = Inner {
            state: ClientState::Idle,
            thread_id: config.thread_id.clone(),
            current_turn: None,
            cancel_requested: false,
            model: config.model.clone(),
            child_pid: None,
        };
        Self {
            config,
            events,
            inner: Arc::new(Mutex::new(inner)),
            child: tokio::sync::Mutex::new(None),
        }
    }

    async fn emit(&self, event: AgentEvent) {
        let _ = self.events.send(event).await;
    }

    fn turn_argv(&self) -> Vec<String> {
        let inner = self.inner.lock();
        let mut argv = vec![
            "claude".to_string(),
            "-p".to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
        ];
        if let Some(thread) = &inner.thread_id {
            argv.push("--resume".to_string());
            argv.push(thread.clone());
        }
        if let Some(model) = &inner.model {
            argv.push("--model".to_string());
            argv.push(model.clone());
        }
        argv
    }

    async fn kill_inflight(&self) {
        let pid = self.inner.lock().child_pid;
        if let Some(pid) = pid {
            let _ = nix::sys::signal::kill(
                nix::unistd::Pid::from_raw(pid),
                nix::sys::signal::Signal::SIGTERM,
            );
        }
        let mut guard = self.child.lock().await;
        if let Some(mut child) = guard.take() {
            if tokio::time::timeout(Duration::from_secs(2), child.wait()).await.is_err() {
                let _ = child.kill().await;
            }
        }
    }
}

/// Per-turn parse state: tool ids seen, mapped to (name, command).
#[derive(Default)]
struct TurnParse {
    tools: HashMap<String, (String, String)>,
    got_result: bool,
}

/// Translate one JSONL record into events.
async fn handle_record(
    inner: &Arc<Mutex<Inner>>,
    events: &mpsc::Sender<AgentEvent>,
    turn_id: &TurnId,
    parse: &mut TurnParse,
    record: Value,
) {
    let kind = record.get("type").and_then(Value::as_str).unwrap_or("");
    match kind {
        "system" => {
            if record.get("subtype").and_then(Value::as_str) == Some("init") {
                if let Some(sid) = record.get("session_id").and_then(Value::as_str) {
                    let changed = {
                        let mut guard = inner.lock();
                        let changed = guard.thread_id.as_deref() != Some(sid);
                        guard.thread_id = Some(sid.to_string());
                        changed
                    };
                    if changed {
                        let _ = events
                            .send(AgentEvent::ThreadStarted { thread_id: sid.to_string() })
                            .await;
                    }
                }
            }
            // Other system records (hooks, tool metadata) are not surfaced.
        }
        "assistant" => {
            let segments = record
                .pointer("/message/content")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for segment in segments {
                match segment.get("type").and_then(Value::as_str) {
                    Some("text") => {
                        let text = segment
                            .get("text")
                            .and_then(Value::as_str)
                            .unwrap_or("")
                            .to_string();
                        if text.is_empty() {
                            continue;
                        }
                        // Segment-granularity delta, then the full message.
                        let _ = events
                            .send(AgentEvent::AssistantDelta {
                                turn_id: turn_id.clone(),
                                text: text.clone(),
                            })
                            .await;
                        let _ = events
                            .send(AgentEvent::AssistantMessage { turn_id: turn_id.clone(), text })
                            .await;
                    }
                    Some("tool_use") => {
                        let item_id = segment
                            .get("id")
                            .and_then(Value::as_str)
                            .unwrap_or("")
                            .to_string();
                        let name = segment
                            .get("name")
                            .and_then(Value::as_str)
                            .unwrap_or("")
                            .to_string();
                        let command = segment
                            .pointer("/input/command")
                            .and_then(Value::as_str)
                            .unwrap_or("")
                            .to_string();
                        parse.tools.insert(item_id.clone(), (name.clone(), command.clone()));
                        let _ = events
                            .send(AgentEvent::ItemStarted {
                                turn_id: turn_id.clone(),
                                item_id: item_id.clone(),
                                kind: "command_execution".to_string(),
                            })
                            .await;
                        let preview = if command.is_empty() {
                            segment.get("input").cloned().unwrap_or(Value::Null).to_string()
                        } else {
                            command
                        };
                        let _ = events
                            .send(AgentEvent::CommandExecutionDelta {
                                turn_id: turn_id.clone(),
                                item_id,
                                output: preview,
                            })
                            .await;
                    }
                    _ => {}
                }
            }
        }
        "user" => {
            let segments = record
                .pointer("/message/content")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for segment in segments {
                if segment.get("type").and_then(Value::as_str) != Some("tool_result") {
                    continue;
                }
                let item_id = segment
                    .get("tool_use_id")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string();
                let output = tool_result_text(&segment);
                match parse.tools.get(&item_id) {
                    // Shell tools close as command executions; everything
                    // else surfaces as a generic tool result.
                    Some((name, command)) if name.eq_ignore_ascii_case("bash") => {
                        let _ = events
                            .send(AgentEvent::CommandExecutionCompleted {
                                turn_id: turn_id.clone(),
                                item_id,
                                command: command.clone(),
                                exit_code: None,
                                output,
                            })
                            .await;
                    }
                    Some((name, _)) => {
                        let _ = events
                            .send(AgentEvent::ToolResult {
                                turn_id: turn_id.clone(),
                                item_id,
                                name: name.clone(),
                                payload: Value::String(output),
                            })
                            .await;
                    }
                    None => {
                        let _ = events
                            .send(AgentEvent::ToolResult {
                                turn_id: turn_id.clone(),
                                item_id,
                                name: String::new(),
                                payload: Value::String(output),
                            })
                            .await;
                    }
                }
            }
        }
        "result" => {
            parse.got_result = true;
            let subtype = record.get("subtype").and_then(Value::as_str).unwrap_or("");
            let cancelled = inner.lock().cancel_requested;
            let error = if subtype == "success" {
                None
            } else {
                let message = record
                    .get("result")
                    .or_else(|| record.get("error"))
                    .and_then(Value::as_str)
                    .unwrap_or(subtype)
                    .to_string();
                Some(TurnError { kind: classify_result(&message), message })
            };
            let _ = events
                .send(AgentEvent::TurnCompleted { turn_id: turn_id.clone(), cancelled, error })
                .await;
        }
        other => {
            debug!(kind = other, "ignoring unknown stream record");
        }
    }
}

/// Flatten a tool_result content field (string or content-block list).
fn tool_result_text(segment: &Value) -> String {
    match segment.get("content") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

fn classify_result(message: &str) -> TurnErrorKind {
    let lower = message.to_ascii_lowercase();
    if lower.contains("usage limit") {
        TurnErrorKind::UsageLimit
    } else if lower.contains("rate limit") {
        TurnErrorKind::RateLimited
    } else if lower.contains("network") || lower.contains("connection") {
        TurnErrorKind::Network
    } else {
        TurnErrorKind::Internal
    }
}

#[async_trait]
impl AgentClient for ClaudeClient {
    async fn start(&self) -> Result<(), ClientError> {
        // No long-lived process: ready means "able to spawn a turn".
        {
            let mut inner = self.inner.lock();
            if matches!(inner.state, ClientState::Ready | ClientState::Processing) {
                return Ok(());
            }
            inner.state = ClientState::Ready;
        }
        self.emit(AgentEvent::Ready).await;
        Ok(())
    }

    async fn send_turn(&self, turn_id: TurnId, text: &str) -> Result<(), ClientError> {
        {
            let mut inner = self.inner.lock();
            if inner.state != ClientState::Ready {
                return Err(ClientError::WrongState { state: inner.state, expected: "ready" });
            }
            inner.state = ClientState::Processing;
            inner.current_turn = Some(turn_id.clone());
            inner.cancel_requested = false;
        }

        let argv = self.turn_argv();
        let mut cmd = self.config.sandbox.command(
            &argv,
            &self.config.workdir,
            &self.config.env,
            &self.config.caps,
            &self.config.home,
        );
        cmd.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let mut inner = self.inner.lock();
                inner.state = ClientState::Ready;
                inner.current_turn = None;
                drop(inner);
                return Err(ClientError::SpawnFailed(e.to_string()));
            }
        };
        self.inner.lock().child_pid = child.id().map(|p| p as i32);

        // Prompt goes over stdin; closing it starts the turn.
        if let Some(mut stdin) = child.stdin.take() {
            let prompt = text.to_string();
            tokio::spawn(async move {
                let _ = stdin.write_all(prompt.as_bytes()).await;
            });
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ClientError::SpawnFailed("child stdout not piped".to_string()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "agent.stderr", "{}", line);
                }
            });
        }

        let inner = Arc::clone(&self.inner);
        let events = self.events.clone();
        let reader_turn = turn_id.clone();
        tokio::spawn(async move {
            let mut parse = TurnParse::default();
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let record: Value = match serde_json::from_str(&line) {
                    Ok(record) => record,
                    Err(e) => {
                        warn!(error = %e, "unparseable stream record");
                        continue;
                    }
                };
                handle_record(&inner, &events, &reader_turn, &mut parse, record).await;
            }

            let cancelled = {
                let mut guard = inner.lock();
                let cancelled = guard.cancel_requested;
                guard.current_turn = None;
                guard.cancel_requested = false;
                guard.child_pid = None;
                if guard.state == ClientState::Processing {
                    guard.state = ClientState::Ready;
                }
                cancelled
            };
            if !parse.got_result {
                // Killed (interrupt) or crashed before the result record.
                let error = if cancelled {
                    None
                } else {
                    Some(TurnError {
                        kind: TurnErrorKind::Internal,
                        message: "agent exited before emitting a result".to_string(),
                    })
                };
                let _ = events
                    .send(AgentEvent::TurnCompleted { turn_id: reader_turn, cancelled, error })
                    .await;
            }
        });

        *self.child.lock().await = Some(child);
        self.emit(AgentEvent::TurnStarted { turn_id }).await;
        Ok(())
    }

    async fn interrupt(&self, turn_id: &TurnId) -> Result<(), ClientError> {
        {
            let mut inner = self.inner.lock();
            if inner.current_turn.as_ref() != Some(turn_id) || inner.cancel_requested {
                return Ok(());
            }
            inner.cancel_requested = true;
        }
        // No cancel frame exists in the JSONL protocol: kill the process.
        self.kill_inflight().await;
        Ok(())
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, ClientError> {
        // The CLI cannot enumerate models; selection is argv-only.
        Ok(Vec::new())
    }

    async fn set_model(
        &self,
        model: &str,
        _reasoning_effort: Option<&str>,
    ) -> Result<(), ClientError> {
        if model.is_empty() {
            return Err(ClientError::Protocol("empty model".to_string()));
        }
        self.inner.lock().model = Some(model.to_string());
        Ok(())
    }

    async fn request_restart(&self) -> Result<(), ClientError> {
        self.stop(Duration::from_secs(2)).await;
        self.start().await
    }

    async fn stop(&self, _grace: Duration) {
        self.kill_inflight().await;
        let mut inner = self.inner.lock();
        inner.state = ClientState::Stopped;
        inner.current_turn = None;
    }

    fn state(&self) -> ClientState {
        self.inner.lock().state
    }

    fn thread_id(&self) -> Option<String> {
        self.inner.lock().thread_id.clone()
    }
}

#[cfg(test)]
#[path = "claude_tests.rs"]
mod tests;
