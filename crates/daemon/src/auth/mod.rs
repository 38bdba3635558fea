// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace authentication: access JWTs, refresh rotation, handoffs.
//!
//! Access tokens are HS256 JWTs over a key file (`BERTH_JWT_KEY_PATH`,
//! random bytes minted on first start). Refresh tokens are 256-bit random
//! values stored only as SHA-256 hashes; a token is valid for exactly one
//! rotation — the store's consume operation is the atomicity point, so
//! concurrent rotations of the same token succeed once. Handoff tokens are
//! process-memory only (see [`handoff`]).

mod handoff;

pub use handoff::HandoffService;

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use berth_core::{ApiError, Clock, RefreshTokenRecord, Workspace, WorkspaceId};
use berth_storage::{ConsumeOutcome, Store};

const ISSUER: &str = "berth";
const AUDIENCE: &str = "berth-client";
const ACCESS_TTL: Duration = Duration::from_secs(900);
const REFRESH_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iss: String,
    aud: String,
    iat: u64,
    exp: u64,
}

/// Result of issuing or rotating tokens. TTLs are seconds.
#[derive(Debug, Clone)]
pub struct IssuedTokens {
    pub access: String,
    pub refresh: String,
    pub expires_in: u64,
    pub refresh_expires_in: u64,
}

pub struct AuthService<C: Clock> {
    store: Arc<dyn Store>,
    clock: C,
    encoding: EncodingKey,
    decoding: DecodingKey,
    pub handoff: HandoffService<C>,
}

impl<C: Clock> AuthService<C> {
    pub fn new(store: Arc<dyn Store>, clock: C, jwt_key: &[u8]) -> Self {
        Self {
            store,
            clock: clock.clone(),
            encoding: EncodingKey::from_secret(jwt_key),
            decoding: DecodingKey::from_secret(jwt_key),
            handoff: HandoffService::new(clock),
        }
    }

    /// Load the JWT key, minting 64 random bytes on first start.
    pub fn load_or_create_key(path: &std::path::Path) -> std::io::Result<Vec<u8>> {
        match std::fs::read(path) {
            Ok(key) if !key.is_empty() => Ok(key),
            _ => {
                let mut key = vec![0u8; 64];
                rand::thread_rng().fill_bytes(&mut key);
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(path, &key)?;
                info!(path = %path.display(), "minted new JWT signing key");
                Ok(key)
            }
        }
    }

    pub async fn issue_tokens(&self, workspace_id: &WorkspaceId) -> Result<IssuedTokens, ApiError> {
        let now_ms = self.clock.epoch_ms();
        let claims = Claims {
            sub: workspace_id.as_str().to_string(),
            iss: ISSUER.to_string(),
            aud: AUDIENCE.to_string(),
            iat: now_ms / 1000,
            exp: now_ms / 1000 + ACCESS_TTL.as_secs(),
        };
        let access = jsonwebtoken::encode(&jsonwebtoken::Header::default(), &claims, &self.encoding)
            .map_err(|e| ApiError::Internal(format!("jwt encode failed: {e}")))?;

        let refresh = random_hex(32);
        let record = RefreshTokenRecord {
            token_hash: sha256_hex(&refresh),
            workspace_id: workspace_id.clone(),
            created_at_ms: now_ms,
            expires_at_ms: now_ms + REFRESH_TTL.as_millis() as u64,
            used_at_ms: None,
        };
        self.store
            .put_refresh_token(&record)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;

        Ok(IssuedTokens {
            access,
            refresh,
            expires_in: ACCESS_TTL.as_secs(),
            refresh_expires_in: REFRESH_TTL.as_secs(),
        })
    }

    /// Validate an access token and return its workspace.
    pub fn verify(&self, access: &str) -> Result<WorkspaceId, ApiError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[ISSUER]);
        validation.set_audience(&[AUDIENCE]);
        let data = jsonwebtoken::decode::<Claims>(access, &self.decoding, &validation)
            .map_err(|_| ApiError::TokenInvalid)?;
        Ok(WorkspaceId::from(data.claims.sub))
    }

    /// Rotate a refresh token: consume exactly once, mint a fresh pair.
    pub async fn rotate(&self, refresh: &str) -> Result<(WorkspaceId, IssuedTokens), ApiError> {
        let hash = sha256_hex(refresh);
        let now_ms = self.clock.epoch_ms();
        let outcome = self
            .store
            .consume_refresh_token(&hash, now_ms)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        let record = match outcome {
            ConsumeOutcome::Consumed(record) => record,
            ConsumeOutcome::Missing => return Err(ApiError::RefreshInvalid),
            ConsumeOutcome::AlreadyUsed => return Err(ApiError::RefreshUsed),
            ConsumeOutcome::Expired => return Err(ApiError::RefreshExpired),
        };
        let tokens = self.issue_tokens(&record.workspace_id).await?;
        Ok((record.workspace_id, tokens))
    }

    /// Verify a (workspaceId, secret) login.
    pub async fn login(
        &self,
        workspace_id: &WorkspaceId,
        secret: &str,
    ) -> Result<IssuedTokens, ApiError> {
        let workspace = self
            .store
            .get_workspace(workspace_id)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?
            .ok_or(ApiError::WorkspaceTokenInvalid)?;
        if !verify_secret(secret, &workspace.secret_hash) {
            return Err(ApiError::WorkspaceTokenInvalid);
        }
        self.issue_tokens(&workspace.id).await
    }

    /// Is the provider credential/enablement secret correct for `workspace`?
    pub fn check_secret(workspace: &Workspace, secret: &str) -> bool {
        verify_secret(secret, &workspace.secret_hash)
    }
}

/// Salted secret hash: `v1$<salt>$<sha256(salt || secret)>`, hex fields.
pub fn hash_secret(secret: &str) -> String {
    let salt = random_hex(16);
    let digest = sha256_hex(&format!("{salt}{secret}"));
    format!("v1${salt}${digest}")
}

pub fn verify_secret(secret: &str, stored: &str) -> bool {
    let mut parts = stored.splitn(3, '$');
    let (Some("v1"), Some(salt), Some(digest)) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    // Comparing digests, not secrets: equality is not timing-sensitive.
    sha256_hex(&format!("{salt}{secret}")) == digest
}

pub fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

pub fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
