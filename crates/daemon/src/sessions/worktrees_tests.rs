// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use berth_core::ProviderKind;

fn worktree(id: WorktreeId, branch: &str) -> Worktree {
    Worktree {
        color: palette_color(&id).to_string(),
        id,
        session_id: SessionId::mint(),
        branch_name: branch.to_string(),
        name: "wt".into(),
        provider: ProviderKind::Codex,
        context: WorktreeContext::New,
        source_worktree_id: None,
        model: None,
        reasoning_effort: None,
        internet_access: false,
        deny_git_credentials_access: true,
        status: WorktreeStatus::Ready,
        thread_id: None,
        current_turn_id: None,
        created_at_ms: 0,
    }
}

#[test]
fn main_branch_requires_main() {
    let main = worktree(WorktreeId::main(), "trunk");
    assert_eq!(main_branch(&[main]).unwrap(), "trunk");
    assert!(main_branch(&[worktree(WorktreeId::mint(), "other")]).is_err());
}

#[test]
fn minted_id_avoids_existing() {
    let existing: Vec<Worktree> =
        (0..4).map(|i| worktree(WorktreeId::mint(), &format!("b{i}"))).collect();
    let id = mint_worktree_id(&existing);
    assert!(existing.iter().all(|wt| wt.id != id));
}

#[test]
fn branch_names_are_unique_within_session() {
    let session_id = SessionId::from("0123456789abcdef0123456789abcdef");
    let wt_id = WorktreeId::from("waabbccddeeff");
    let first = mint_branch(&session_id, &wt_id, &[]);
    assert_eq!(first, "session-01234567-waabbcc");

    let taken = worktree(WorktreeId::mint(), &first);
    let second = mint_branch(&session_id, &wt_id, &[taken]);
    assert_ne!(second, first);
    assert!(second.starts_with("session-01234567-waabbcc-"));
}
