// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::{ConsumeOutcome, NewMessage, Store};
use berth_core::{
    palette_color, ProviderConfig, ProviderKind, RefreshTokenRecord, Session, SessionId,
    Workspace, WorkspaceId, Worktree, WorktreeContext, WorktreeId, WorktreeStatus,
};
use std::collections::HashMap;

fn store() -> SqliteStore {
    SqliteStore::open_in_memory().unwrap()
}

fn workspace() -> Workspace {
    let mut providers = HashMap::new();
    providers.insert(ProviderKind::Codex, ProviderConfig { enabled: true, credential: None });
    Workspace {
        id: WorkspaceId::mint(),
        secret_hash: "h".into(),
        uid: 30001,
        gid: 30001,
        providers,
        created_at_ms: 1,
    }
}

fn session(workspace_id: &WorkspaceId) -> Session {
    Session {
        id: SessionId::mint(),
        workspace_id: workspace_id.clone(),
        repo_url: "https://example.test/repo.git".into(),
        name: "repo".into(),
        created_at_ms: 10,
        last_activity_ms: 10,
        default_internet_access: false,
        default_deny_git_credentials_access: true,
        active_provider: ProviderKind::Codex,
        providers: vec![ProviderKind::Codex],
        git_dir: "/data/s/git".into(),
        repo_dir: "/data/s/repo".into(),
        attachments_dir: "/data/s/attachments".into(),
        backlog: vec![],
    }
}

fn worktree(session_id: &SessionId, id: WorktreeId) -> Worktree {
    let color = palette_color(&id).to_string();
    Worktree {
        id,
        session_id: session_id.clone(),
        branch_name: "main".into(),
        name: "main".into(),
        provider: ProviderKind::Codex,
        context: WorktreeContext::New,
        source_worktree_id: None,
        model: None,
        reasoning_effort: None,
        internet_access: false,
        deny_git_credentials_access: true,
        status: WorktreeStatus::Ready,
        color,
        thread_id: None,
        current_turn_id: None,
        created_at_ms: 10,
    }
}

fn user_message(text: &str, at: u64) -> NewMessage {
    NewMessage {
        role: berth_core::MessageRole::User,
        text: text.into(),
        attachments: vec![],
        tool_result: None,
        created_at_ms: at,
    }
}

#[tokio::test]
async fn workspace_roundtrip_and_idempotent_put() {
    let store = store();
    let ws = workspace();
    store.put_workspace(&ws).await.unwrap();
    store.put_workspace(&ws).await.unwrap();
    assert_eq!(store.get_workspace(&ws.id).await.unwrap(), Some(ws.clone()));
    assert_eq!(store.list_workspaces().await.unwrap(), vec![ws]);
}

#[tokio::test]
async fn sessions_scoped_by_workspace() {
    let store = store();
    let ws_a = workspace();
    let ws_b = workspace();
    let sess_a = session(&ws_a.id);
    let sess_b = session(&ws_b.id);
    store.save_session(&sess_a).await.unwrap();
    store.save_session(&sess_b).await.unwrap();

    assert_eq!(store.list_sessions(&ws_a.id).await.unwrap(), vec![sess_a.clone()]);
    assert_eq!(store.list_sessions(&ws_b.id).await.unwrap(), vec![sess_b]);

    store.delete_session(&sess_a.id).await.unwrap();
    assert!(store.get_session(&sess_a.id).await.unwrap().is_none());
}

#[tokio::test]
async fn main_worktree_sorts_first() {
    let store = store();
    let sess = session(&WorkspaceId::mint());
    store.save_worktree(&worktree(&sess.id, WorktreeId::mint())).await.unwrap();
    store.save_worktree(&worktree(&sess.id, WorktreeId::main())).await.unwrap();

    let listed = store.list_worktrees(&sess.id).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed[0].id.is_main());
}

#[tokio::test]
async fn message_ids_are_monotone_and_scoped() {
    let store = store();
    let sess = session(&WorkspaceId::mint());
    let wt_a = WorktreeId::main();
    let wt_b = WorktreeId::mint();

    let first = store.append_message(&sess.id, &wt_a, user_message("one", 1)).await.unwrap();
    let second = store.append_message(&sess.id, &wt_a, user_message("two", 2)).await.unwrap();
    let other = store.append_message(&sess.id, &wt_b, user_message("three", 3)).await.unwrap();

    assert!(second.id > first.id);
    // Ids never collide across worktrees of a session.
    assert!(other.id != first.id && other.id != second.id);

    let listed = store.list_messages(&sess.id, &wt_a, 10, None).await.unwrap();
    assert_eq!(listed.iter().map(|m| m.text.as_str()).collect::<Vec<_>>(), vec!["one", "two"]);
}

#[tokio::test]
async fn list_messages_pages_backwards() {
    let store = store();
    let sess = session(&WorkspaceId::mint());
    let wt = WorktreeId::main();
    for i in 0..5 {
        store.append_message(&sess.id, &wt, user_message(&format!("m{i}"), i)).await.unwrap();
    }

    let newest = store.list_messages(&sess.id, &wt, 2, None).await.unwrap();
    assert_eq!(newest.iter().map(|m| m.text.as_str()).collect::<Vec<_>>(), vec!["m3", "m4"]);

    let older = store.list_messages(&sess.id, &wt, 2, Some(newest[0].id)).await.unwrap();
    assert_eq!(older.iter().map(|m| m.text.as_str()).collect::<Vec<_>>(), vec!["m1", "m2"]);
}

#[tokio::test]
async fn messages_after_is_strictly_greater() {
    let store = store();
    let sess = session(&WorkspaceId::mint());
    let wt = WorktreeId::main();
    let first = store.append_message(&sess.id, &wt, user_message("a", 1)).await.unwrap();
    store.append_message(&sess.id, &wt, user_message("b", 2)).await.unwrap();

    let caught_up = store.messages_after(&sess.id, &wt, first.id).await.unwrap();
    assert_eq!(caught_up.iter().map(|m| m.text.as_str()).collect::<Vec<_>>(), vec!["b"]);

    // Identical cursor, identical stream.
    let again = store.messages_after(&sess.id, &wt, first.id).await.unwrap();
    assert_eq!(again, caught_up);
}

#[tokio::test]
async fn clear_messages_only_touches_the_worktree() {
    let store = store();
    let sess = session(&WorkspaceId::mint());
    let keep = WorktreeId::mint();
    store.append_message(&sess.id, &WorktreeId::main(), user_message("gone", 1)).await.unwrap();
    store.append_message(&sess.id, &keep, user_message("kept", 2)).await.unwrap();

    store.clear_messages(&sess.id, &WorktreeId::main()).await.unwrap();
    assert!(store.list_messages(&sess.id, &WorktreeId::main(), 10, None).await.unwrap().is_empty());
    assert_eq!(store.list_messages(&sess.id, &keep, 10, None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn refresh_token_consumed_exactly_once() {
    let store = store();
    let record = RefreshTokenRecord {
        token_hash: "abc123".into(),
        workspace_id: WorkspaceId::mint(),
        created_at_ms: 0,
        expires_at_ms: 10_000,
        used_at_ms: None,
    };
    store.put_refresh_token(&record).await.unwrap();

    match store.consume_refresh_token("abc123", 5_000).await.unwrap() {
        ConsumeOutcome::Consumed(consumed) => {
            assert_eq!(consumed.workspace_id, record.workspace_id);
            assert_eq!(consumed.used_at_ms, Some(5_000));
        }
        other => panic!("expected Consumed, got {other:?}"),
    }
    assert_eq!(
        store.consume_refresh_token("abc123", 5_001).await.unwrap(),
        ConsumeOutcome::AlreadyUsed
    );
}

#[tokio::test]
async fn refresh_token_outcomes() {
    let store = store();
    assert_eq!(
        store.consume_refresh_token("missing", 0).await.unwrap(),
        ConsumeOutcome::Missing
    );

    let expired = RefreshTokenRecord {
        token_hash: "old".into(),
        workspace_id: WorkspaceId::mint(),
        created_at_ms: 0,
        expires_at_ms: 100,
        used_at_ms: None,
    };
    store.put_refresh_token(&expired).await.unwrap();
    assert_eq!(store.consume_refresh_token("old", 100).await.unwrap(), ConsumeOutcome::Expired);

    assert_eq!(store.purge_expired(200).await.unwrap(), 1);
    assert_eq!(store.consume_refresh_token("old", 200).await.unwrap(), ConsumeOutcome::Missing);
}

#[tokio::test]
async fn open_on_disk_applies_pragmas() {
    let dir = tempfile::tempdir().unwrap();
    let store =
        SqliteStore::open(&dir.path().join("state.db"), std::time::Duration::from_secs(5)).unwrap();
    let ws = workspace();
    store.put_workspace(&ws).await.unwrap();
    assert!(store.get_workspace(&ws.id).await.unwrap().is_some());
}
