// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    https = { "https://example.test/repo.git", true },
    http = { "http://example.test/repo.git", true },
    ssh_scheme = { "ssh://git@example.test/repo.git", true },
    scp_style = { "git@example.test:org/repo.git", true },
    file_scheme = { "file:///srv/repo.git", true },
    local_path = { "/srv/repo.git", false },
    empty = { "", false },
    word = { "repo", false },
)]
fn url_plausibility(url: &str, ok: bool) {
    assert_eq!(is_plausible_repo_url(url), ok);
}

#[parameterized(
    auth = { "fatal: Authentication failed for 'https://…'", GitFailure::AuthFailed },
    username = { "fatal: could not read Username for 'https://…'", GitFailure::AuthFailed },
    denied = { "git@host: Permission denied (publickey).", GitFailure::AuthFailed },
    missing = { "fatal: repository 'https://…' not found", GitFailure::RepoNotFound },
    dns = { "fatal: unable to access '…': Could not resolve host: example.test", GitFailure::Network },
    refused = { "fatal: unable to access '…': Connection refused", GitFailure::Network },
    other = { "fatal: something odd happened", GitFailure::Network },
)]
fn clone_failure_classification(stderr: &str, expected: GitFailure) {
    assert_eq!(classify_clone_failure(stderr), expected);
}

#[test]
fn porcelain_parse_keeps_two_char_status() {
    let raw = " M src/lib.rs\n?? notes.txt\nA  new.rs\n";
    let files = parse_porcelain(raw);
    assert_eq!(files.len(), 3);
    assert_eq!(files[0], DiffFile { status: " M".into(), path: "src/lib.rs".into() });
    assert_eq!(files[1], DiffFile { status: "??".into(), path: "notes.txt".into() });
    assert_eq!(files[2].path, "new.rs");
}

#[test]
fn commit_parse_converts_epoch_to_ms() {
    let raw = "abc123\tAda\tfix parser\t1700000000\ndef456\tGrace\tadd tests\t1700000100";
    let commits = parse_commits(raw);
    assert_eq!(commits.len(), 2);
    assert_eq!(commits[0].hash, "abc123");
    assert_eq!(commits[0].author, "Ada");
    assert_eq!(commits[0].subject, "fix parser");
    assert_eq!(commits[0].at_ms, 1_700_000_000_000);
}

#[test]
fn commit_parse_skips_malformed_lines() {
    assert!(parse_commits("just-a-hash").is_empty());
    assert!(parse_commits("").is_empty());
}

#[test]
fn conflict_detection_rewrites_status() {
    let internal = ApiError::Internal("git merge failed: CONFLICT (content): …".into());
    assert!(matches!(conflict_from_internal(internal, "merge conflict"), ApiError::Conflict(_)));

    let other = ApiError::Internal("git merge failed: unrelated".into());
    assert!(matches!(conflict_from_internal(other, "merge conflict"), ApiError::Internal(_)));
}
