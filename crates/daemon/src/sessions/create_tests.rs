// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    https_git = { "https://example.test/org/repo.git", "repo" },
    https_bare = { "https://example.test/org/repo", "repo" },
    trailing_slash = { "https://example.test/org/repo/", "repo" },
    scp = { "git@example.test:org/tool.git", "tool" },
)]
fn basename_from_url(url: &str, expected: &str) {
    assert_eq!(repo_basename(url), expected);
}

#[test]
fn basic_auth_injection() {
    assert_eq!(
        inject_basic_auth("https://example.test/r.git", "u", "p"),
        "https://u:p@example.test/r.git"
    );
    // Already-credentialed URLs are left alone.
    assert_eq!(
        inject_basic_auth("https://x:y@example.test/r.git", "u", "p"),
        "https://x:y@example.test/r.git"
    );
    // Non-scheme URLs are left alone.
    assert_eq!(inject_basic_auth("git@host:r.git", "u", "p"), "git@host:r.git");
}
