// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    validation = { ApiError::Validation("bad".into()), 400 },
    token = { ApiError::TokenInvalid, 401 },
    refresh_used = { ApiError::RefreshUsed, 401 },
    forbidden = { ApiError::Forbidden("no".into()), 403 },
    missing = { ApiError::NotFound("session".into()), 404 },
    conflict = { ApiError::Conflict("dirty tree".into()), 409 },
    handoff_used = { ApiError::HandoffUsed, 409 },
    handoff_expired = { ApiError::HandoffExpired, 410 },
    internal = { ApiError::Internal("boom".into()), 500 },
)]
fn status_mapping(err: ApiError, status: u16) {
    assert_eq!(err.status(), status);
}

#[test]
fn git_failures_map_by_classifier() {
    let auth = ApiError::Git { failure: GitFailure::AuthFailed, message: "denied".into() };
    assert_eq!(auth.status(), 401);
    assert_eq!(auth.error_type(), Some("AUTH_FAILED"));

    let missing = ApiError::Git { failure: GitFailure::RepoNotFound, message: "404".into() };
    assert_eq!(missing.status(), 404);

    let net = ApiError::Git { failure: GitFailure::Network, message: "timeout".into() };
    assert_eq!(net.status(), 400);
}

#[test]
fn error_types_are_screaming_snake() {
    assert_eq!(ApiError::RefreshUsed.error_type(), Some("REFRESH_USED"));
    assert_eq!(ApiError::HandoffUsed.error_type(), Some("HANDOFF_TOKEN_USED"));
    assert!(ApiError::NotFound("x".into()).error_type().is_none());
}
