// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process fake client for session-manager and daemon tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use berth_core::{AgentEvent, TurnId};

use crate::client::{AgentClient, ClientError, ClientState, ModelInfo};

struct Inner {
    state: ClientState,
    thread_id: Option<String>,
    current_turn: Option<TurnId>,
    sent: Vec<String>,
    interrupts: Vec<TurnId>,
}

/// Scripted agent client.
///
/// `start()` goes ready immediately; `send_turn` emits `turn_started` and,
/// when auto-complete is on (the default), an assistant message plus
/// `turn_completed` shortly after. Turns stay open when auto-complete is
/// off so tests can exercise interrupts.
pub struct FakeAgentClient {
    events: mpsc::Sender<AgentEvent>,
    inner: Arc<Mutex<Inner>>,
    auto_complete: bool,
}

impl FakeAgentClient {
    pub fn new(events: mpsc::Sender<AgentEvent>) -> Self {
        Self {
            events,
            inner: Arc::new(Mutex::new(Inner {
                state: ClientState::Idle,
                thread_id: None,
                current_turn: None,
                sent: Vec::new(),
                interrupts: Vec::new(),
            })),
            auto_complete: true,
        }
    }

    pub fn manual(events: mpsc::Sender<AgentEvent>) -> Self {
        let mut fake = Self::new(events);
        fake.auto_complete = false;
        fake
    }

    pub fn sent_turns(&self) -> Vec<String> {
        self.inner.lock().sent.clone()
    }

    pub fn interrupted_turns(&self) -> Vec<TurnId> {
        self.inner.lock().interrupts.clone()
    }

    /// Complete the open turn by hand (manual mode).
    pub async fn complete_current(&self, text: &str) {
        let turn = self.inner.lock().current_turn.clone();
        if let Some(turn_id) = turn {
            let _ = self
                .events
                .send(AgentEvent::AssistantMessage {
                    turn_id: turn_id.clone(),
                    text: text.to_string(),
                })
                .await;
            let _ = self
                .events
                .send(AgentEvent::TurnCompleted { turn_id, cancelled: false, error: None })
                .await;
            let mut inner = self.inner.lock();
            inner.current_turn = None;
            inner.state = ClientState::Ready;
        }
    }
}

#[async_trait]
impl AgentClient for FakeAgentClient {
    async fn start(&self) -> Result<(), ClientError> {
        {
            let mut inner = self.inner.lock();
            if matches!(inner.state, ClientState::Ready | ClientState::Processing) {
                return Ok(());
            }
            inner.state = ClientState::Ready;
            inner.thread_id.get_or_insert_with(|| "fake-thread".to_string());
        }
        let thread = self.inner.lock().thread_id.clone().unwrap_or_default();
        let _ = self.events.send(AgentEvent::ThreadStarted { thread_id: thread }).await;
        let _ = self.events.send(AgentEvent::Ready).await;
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
            inner.sent.push(text.to_string());
        }
        let _ = self.events.send(AgentEvent::TurnStarted { turn_id: turn_id.clone() }).await;

        if self.auto_complete {
            let events = self.events.clone();
            let inner = Arc::clone(&self.inner);
            let done_turn = turn_id.clone();
            tokio::spawn(async move {
                let _ = events
                    .send(AgentEvent::AssistantMessage {
                        turn_id: done_turn.clone(),
                        text: "done".to_string(),
                    })
                    .await;
                let _ = events
                    .send(AgentEvent::TurnCompleted {
                        turn_id: done_turn,
                        cancelled: false,
                        error: None,
                    })
                    .await;
                let mut guard = inner.lock();
                guard.current_turn = None;
                guard.state = ClientState::Ready;
            });
        }
        Ok(())
    }

    async fn interrupt(&self, turn_id: &TurnId) -> Result<(), ClientError> {
        let matched = {
            let mut inner = self.inner.lock();
            if inner.current_turn.as_ref() != Some(turn_id) {
                return Ok(());
            }
            if inner.interrupts.contains(turn_id) {
                return Ok(());
            }
            inner.interrupts.push(turn_id.clone());
            inner.current_turn = None;
            inner.state = ClientState::Ready;
            turn_id.clone()
        };
        let _ = self
            .events
            .send(AgentEvent::TurnCompleted { turn_id: matched, cancelled: true, error: None })
            .await;
        Ok(())
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, ClientError> {
        Ok(vec![ModelInfo { id: "fake-medium".to_string(), label: None }])
    }

    async fn set_model(&self, _model: &str, _effort: Option<&str>) -> Result<(), ClientError> {
        Ok(())
    }

    async fn request_restart(&self) -> Result<(), ClientError> {
        self.stop(Duration::from_millis(0)).await;
        self.start().await
    }

    async fn stop(&self, _grace: Duration) {
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
