// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Filesystem grant expansion.
//!
//! Landlock grants are beneath-semantics: allowing a directory allows the
//! whole subtree, and there is no way to subtract a path from a grant. To
//! mask a credential file that lives under an allowed tree (the workspace
//! home), the grant covering it is split: each ancestor of the mask is
//! replaced by grants on its children, with the mask's own path withheld.

use std::path::{Path, PathBuf};

/// Expand `grants` so that no resulting grant covers any of `masks`.
///
/// Ancestors of a mask are replaced by sibling grants down to (but not
/// including) the mask itself. Unreadable directories along the way drop
/// their grant rather than widening it.
pub fn expand_grants(grants: &[PathBuf], masks: &[PathBuf]) -> Vec<PathBuf> {
    let mut out = Vec::new();
    for grant in grants {
        expand_one(grant, masks, &mut out);
    }
    out.sort();
    out.dedup();
    out
}

fn expand_one(grant: &Path, masks: &[PathBuf], out: &mut Vec<PathBuf>) {
    // Masked exactly: withhold entirely.
    if masks.iter().any(|m| m == grant) {
        return;
    }
    // No mask beneath this grant: keep it whole.
    if !masks.iter().any(|m| m.starts_with(grant)) {
        out.push(grant.to_path_buf());
        return;
    }
    // A mask lives beneath: grant children individually and recurse.
    let entries = match std::fs::read_dir(grant) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        expand_one(&entry.path(), masks, out);
    }
}

#[cfg(test)]
#[path = "grants_tests.rs"]
mod tests;
