// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-session fan-out of server frames.
//!
//! Subscribers register with a `(session, worktree?)` filter and get a
//! bounded queue. Every published frame carries the session's monotone
//! sequence number. Backpressure is drop-to-detach: a subscriber whose
//! queue is full is removed and must reconnect (catching up over
//! `sync_messages`, which reads the durable log — nothing is lost unless
//! the session itself was collected).

use std::collections::HashMap;

use berth_core::{SessionId, WorktreeId};
use berth_wire::{ServerFrame, ServerPayload};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

struct Subscriber {
    id: u64,
    worktree_filter: Option<WorktreeId>,
    tx: mpsc::Sender<ServerFrame>,
}

#[derive(Default)]
struct SessionChannel {
    seq: u64,
    subscribers: Vec<Subscriber>,
}

pub struct Broadcaster {
    queue_size: usize,
    next_subscriber: Mutex<u64>,
    sessions: Mutex<HashMap<SessionId, SessionChannel>>,
}

/// Handle for unsubscribing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberId {
    session_id: SessionId,
    id: u64,
}

impl Broadcaster {
    pub fn new(queue_size: usize) -> Self {
        Self {
            queue_size,
            next_subscriber: Mutex::new(1),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Register a subscriber; frames arrive on the returned receiver.
    pub fn subscribe(
        &self,
        session_id: SessionId,
        worktree_filter: Option<WorktreeId>,
    ) -> (SubscriberId, mpsc::Receiver<ServerFrame>) {
        let (tx, rx) = mpsc::channel(self.queue_size);
        let id = {
            let mut next = self.next_subscriber.lock();
            let id = *next;
            *next += 1;
            id
        };
        let mut sessions = self.sessions.lock();
        sessions
            .entry(session_id.clone())
            .or_default()
            .subscribers
            .push(Subscriber { id, worktree_filter, tx });
        (SubscriberId { session_id, id }, rx)
    }

    pub fn unsubscribe(&self, handle: &SubscriberId) {
        let mut sessions = self.sessions.lock();
        if let Some(channel) = sessions.get_mut(&handle.session_id) {
            channel.subscribers.retain(|s| s.id != handle.id);
        }
    }

    /// Current sequence number of a session (frames published so far).
    pub fn current_seq(&self, session_id: &SessionId) -> u64 {
        self.sessions.lock().get(session_id).map(|c| c.seq).unwrap_or(0)
    }

    /// Publish a frame to every matching subscriber.
    ///
    /// `worktree_id` scopes both the frame envelope and the filter match;
    /// frames without one reach every subscriber of the session.
    pub fn publish(
        &self,
        session_id: &SessionId,
        worktree_id: Option<&WorktreeId>,
        payload: ServerPayload,
    ) -> u64 {
        let mut sessions = self.sessions.lock();
        let channel = sessions.entry(session_id.clone()).or_default();
        channel.seq += 1;
        let frame = ServerFrame {
            seq: channel.seq,
            session_id: Some(session_id.clone()),
            worktree_id: worktree_id.cloned(),
            payload,
        };

        channel.subscribers.retain(|subscriber| {
            let matches = match (&subscriber.worktree_filter, worktree_id) {
                (Some(filter), Some(wt)) => filter == wt,
                (Some(_), None) => true, // session-wide frames reach everyone
                (None, _) => true,
            };
            if !matches {
                return true;
            }
            match subscriber.tx.try_send(frame.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    // Slow consumer: detach. It must reconnect and resync.
                    warn!(subscriber = subscriber.id, %session_id, "subscriber queue overflow, detaching");
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(subscriber = subscriber.id, "subscriber gone");
                    false
                }
            }
        });
        channel.seq
    }

    /// Publish the termination notice and drop the session's channel.
    pub fn drop_session(&self, session_id: &SessionId) {
        self.publish(
            session_id,
            None,
            ServerPayload::Status { status: "deleted".to_string(), message: None },
        );
        self.sessions.lock().remove(session_id);
    }

    #[cfg(test)]
    pub fn subscriber_count(&self, session_id: &SessionId) -> usize {
        self.sessions.lock().get(session_id).map(|c| c.subscribers.len()).unwrap_or(0)
    }
}

#[cfg(test)]
#[path = "broadcast_tests.rs"]
mod tests;
