// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-use handoff tokens for transferring an authenticated session
//! between clients (QR pairing, mono-mode bootstrap).
//!
//! Tokens live only in process memory, expire in 60 seconds, and are
//! consumed exactly once. Consumed entries are kept (marked used) until
//! purge so a second consume attempt is distinguishable from an unknown
//! token.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;

use berth_core::{ApiError, Clock, SessionId, WorkspaceId};

const HANDOFF_TTL: Duration = Duration::from_secs(60);
/// Used/expired entries linger this long for precise error reporting.
const PURGE_AFTER: Duration = Duration::from_secs(600);

struct Entry {
    workspace_id: WorkspaceId,
    session_id: Option<SessionId>,
    expires_at_ms: u64,
    used: bool,
}

pub struct HandoffService<C: Clock> {
    clock: C,
    entries: Mutex<HashMap<String, Entry>>,
}

impl<C: Clock> HandoffService<C> {
    pub fn new(clock: C) -> Self {
        Self { clock, entries: Mutex::new(HashMap::new()) }
    }

    /// Mint a handoff token. Returns `(token, expires_at_ms)`.
    pub fn create(
        &self,
        workspace_id: WorkspaceId,
        session_id: Option<SessionId>,
    ) -> (String, u64) {
        let now_ms = self.clock.epoch_ms();
        let token = super::random_hex(24);
        let expires_at_ms = now_ms + HANDOFF_TTL.as_millis() as u64;
        let mut entries = self.entries.lock();
        purge(&mut entries, now_ms);
        entries.insert(token.clone(), Entry { workspace_id, session_id, expires_at_ms, used: false });
        (token, expires_at_ms)
    }

    /// Consume a token exactly once.
    pub fn consume(&self, token: &str) -> Result<(WorkspaceId, Option<SessionId>), ApiError> {
        let now_ms = self.clock.epoch_ms();
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(token).ok_or(ApiError::MonoAuthTokenInvalid)?;
        if entry.used {
            return Err(ApiError::HandoffUsed);
        }
        if entry.expires_at_ms <= now_ms {
            return Err(ApiError::HandoffExpired);
        }
        entry.used = true;
        Ok((entry.workspace_id.clone(), entry.session_id.clone()))
    }
}

fn purge(entries: &mut HashMap<String, Entry>, now_ms: u64) {
    let cutoff = PURGE_AFTER.as_millis() as u64;
    entries.retain(|_, e| e.expires_at_ms + cutoff > now_ms);
}

#[cfg(test)]
#[path = "handoff_tests.rs"]
mod tests;
