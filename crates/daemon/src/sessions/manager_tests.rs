// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::broadcast::Broadcaster;
use crate::workspacefs::WorkspaceFs;
use berth_adapters::FakeAgentClient;
use berth_core::{
    palette_color, FakeClock, ProviderConfig, Session, WorktreeContext, WorktreeStatus,
};
use berth_storage::SqliteStore;
use berth_wire::http::{CreateSessionRequest, CreateWorktreeRequest};
use berth_wire::{ServerFrame, ServerPayload};
use std::path::Path;
use std::time::Duration;

struct Harness {
    manager: Arc<SessionManager<FakeClock>>,
    store: Arc<dyn Store>,
    broadcaster: Arc<Broadcaster>,
    clock: FakeClock,
    fakes: Arc<Mutex<Vec<Arc<FakeAgentClient>>>>,
    _dir: tempfile::TempDir,
}

fn harness(auto_complete: bool) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn Store> = Arc::new(SqliteStore::open_in_memory().unwrap());
    let fs = Arc::new(WorkspaceFs::new(
        dir.path().join("data"),
        dir.path().join("home"),
        (30_000, 30_020),
    ));
    let broadcaster = Arc::new(Broadcaster::new(64));
    let clock = FakeClock::new();
    let fakes: Arc<Mutex<Vec<Arc<FakeAgentClient>>>> = Arc::new(Mutex::new(Vec::new()));

    let factory_fakes = Arc::clone(&fakes);
    let manager = SessionManager::new(
        Arc::clone(&store),
        fs,
        berth_sandbox::SandboxSpec::unsandboxed(),
        Arc::clone(&broadcaster),
        clock.clone(),
        SessionConfig {
            wakeup_timeout: Duration::from_secs(2),
            diff_debounce: Duration::from_millis(10),
            ..SessionConfig::default()
        },
    )
    .with_client_factory(Box::new(move |_provider, _config, events| {
        let fake = if auto_complete {
            Arc::new(FakeAgentClient::new(events))
        } else {
            Arc::new(FakeAgentClient::manual(events))
        };
        factory_fakes.lock().push(Arc::clone(&fake));
        fake
    }));

    Harness { manager: Arc::new(manager), store, broadcaster, clock, fakes, _dir: dir }
}

async fn seed_workspace(h: &Harness) -> Workspace {
    let mut providers = HashMap::new();
    providers.insert(ProviderKind::Codex, ProviderConfig { enabled: true, credential: None });
    providers.insert(ProviderKind::Claude, ProviderConfig { enabled: true, credential: None });
    let (uid, gid) = h.manager.fs.allocate_uid().unwrap();
    let workspace = Workspace {
        id: berth_core::WorkspaceId::mint(),
        secret_hash: "h".into(),
        uid,
        gid,
        providers,
        created_at_ms: h.clock.epoch_ms(),
    };
    h.manager.fs.create_workspace_dirs(&workspace).unwrap();
    h.store.put_workspace(&workspace).await.unwrap();
    workspace
}

/// Insert session + main worktree rows directly (no clone).
async fn seed_session(h: &Harness, workspace: &Workspace) -> Session {
    let session_id = SessionId::mint();
    let paths = h.manager.fs.create_session_dirs(workspace, &session_id).unwrap();
    let now = h.clock.epoch_ms();
    let session = Session {
        id: session_id.clone(),
        workspace_id: workspace.id.clone(),
        repo_url: "https://example.test/repo.git".into(),
        name: "repo".into(),
        created_at_ms: now,
        last_activity_ms: now,
        default_internet_access: false,
        default_deny_git_credentials_access: true,
        active_provider: ProviderKind::Codex,
        providers: vec![ProviderKind::Codex],
        git_dir: paths.git,
        repo_dir: paths.repo,
        attachments_dir: paths.attachments,
        backlog: vec![],
    };
    h.store.save_session(&session).await.unwrap();
    let main_id = WorktreeId::main();
    let main = Worktree {
        color: palette_color(&main_id).to_string(),
        id: main_id,
        session_id,
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
        thread_id: None,
        current_turn_id: None,
        created_at_ms: now,
    };
    h.store.save_worktree(&main).await.unwrap();
    session
}

/// Receive frames until one matches, within a deadline.
async fn wait_for_frame(
    rx: &mut tokio::sync::mpsc::Receiver<ServerFrame>,
    matcher: impl Fn(&ServerPayload) -> bool,
) -> ServerFrame {
    let deadline = Duration::from_secs(5);
    let fut = async {
        loop {
            let frame = rx.recv().await.expect("frame channel closed");
            if matcher(&frame.payload) {
                return frame;
            }
        }
    };
    tokio::time::timeout(deadline, fut).await.expect("timed out waiting for frame")
}

fn init_origin(dir: &Path) -> String {
    let run = |args: &[&str]| {
        let output = std::process::Command::new("git")
            .args(args)
            .current_dir(dir)
            .env("GIT_AUTHOR_NAME", "t")
            .env("GIT_AUTHOR_EMAIL", "t@example.test")
            .env("GIT_COMMITTER_NAME", "t")
            .env("GIT_COMMITTER_EMAIL", "t@example.test")
            .output()
            .expect("git runs");
        assert!(output.status.success(), "git {args:?}: {}", String::from_utf8_lossy(&output.stderr));
    };
    run(&["init", "-b", "main"]);
    run(&["commit", "--allow-empty", "-m", "init"]);
    format!("file://{}", dir.display())
}

#[tokio::test]
async fn create_session_clones_and_seeds_main_worktree() {
    let h = harness(true);
    let workspace = seed_workspace(&h).await;
    let origin = tempfile::tempdir().unwrap();
    let url = init_origin(origin.path());

    let session = h
        .manager
        .create_session(
            &workspace.id,
            CreateSessionRequest {
                repo_url: url,
                name: None,
                auth: None,
                provider: None,
                default_internet_access: None,
                default_deny_git_credentials_access: None,
            },
        )
        .await
        .unwrap();

    assert!(session.repo_dir.join(".git").exists());
    assert_eq!(session.active_provider, ProviderKind::Codex);

    let worktrees = h.store.list_worktrees(&session.id).await.unwrap();
    assert_eq!(worktrees.len(), 1);
    assert!(worktrees[0].id.is_main());
    assert_eq!(worktrees[0].branch_name, "main");
    assert_eq!(worktrees[0].status, WorktreeStatus::Ready);
}

#[tokio::test]
async fn clone_failure_removes_partial_directories() {
    let h = harness(true);
    let workspace = seed_workspace(&h).await;

    let err = h
        .manager
        .create_session(
            &workspace.id,
            CreateSessionRequest {
                repo_url: "not a url".into(),
                name: None,
                auth: None,
                provider: None,
                default_internet_access: None,
                default_deny_git_credentials_access: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Git { failure: berth_core::GitFailure::InvalidUrl, .. }));

    // No sessions persisted, no stray directories.
    assert!(h.store.list_sessions(&workspace.id).await.unwrap().is_empty());
    let sessions_root = h.manager.fs.workspace_dir(&workspace.id).join("sessions");
    assert_eq!(std::fs::read_dir(&sessions_root).unwrap().count(), 0);
}

#[tokio::test]
async fn send_message_persists_before_broadcast_and_completes() {
    let h = harness(true);
    let workspace = seed_workspace(&h).await;
    let session = seed_session(&h, &workspace).await;
    let main = WorktreeId::main();
    let (_sub, mut rx) = h.broadcaster.subscribe(session.id.clone(), None);

    let (turn_id, message_id) = h
        .manager
        .send_message(&session.id, &main, "print 1".into(), vec![])
        .await
        .unwrap();

    // The user-message frame arrives only after the row is durable.
    let frame = wait_for_frame(&mut rx, |p| {
        matches!(p, ServerPayload::WorktreeMessagesSync { .. })
    })
    .await;
    if let ServerPayload::WorktreeMessagesSync { messages } = &frame.payload {
        assert_eq!(messages[0].id, message_id);
        let stored = h.store.list_messages(&session.id, &main, 10, None).await.unwrap();
        assert!(stored.iter().any(|m| m.id == message_id));
    }

    let started = wait_for_frame(&mut rx, |p| matches!(p, ServerPayload::TurnStarted { .. })).await;
    if let ServerPayload::TurnStarted { turn_id: started_id } = &started.payload {
        assert_eq!(started_id, &turn_id);
    }

    wait_for_frame(&mut rx, |p| matches!(p, ServerPayload::AssistantMessage { .. })).await;
    wait_for_frame(&mut rx, |p| {
        matches!(p, ServerPayload::TurnCompleted { cancelled: false, .. })
    })
    .await;

    // Assistant reply persisted; worktree settled back to ready.
    let stored = h.store.list_messages(&session.id, &main, 10, None).await.unwrap();
    assert_eq!(stored.len(), 2);
    let worktree = h.store.get_worktree(&session.id, &main).await.unwrap().unwrap();
    assert_eq!(worktree.status, WorktreeStatus::Ready);
    assert!(worktree.current_turn_id.is_none());
}

#[tokio::test]
async fn turns_serialize_within_a_worktree() {
    let h = harness(false);
    let workspace = seed_workspace(&h).await;
    let session = seed_session(&h, &workspace).await;
    let main = WorktreeId::main();
    let (_sub, mut rx) = h.broadcaster.subscribe(session.id.clone(), None);

    let (first_turn, _) =
        h.manager.send_message(&session.id, &main, "one".into(), vec![]).await.unwrap();
    let (second_turn, _) =
        h.manager.send_message(&session.id, &main, "two".into(), vec![]).await.unwrap();
    assert_ne!(first_turn, second_turn);

    let started =
        wait_for_frame(&mut rx, |p| matches!(p, ServerPayload::TurnStarted { .. })).await;
    if let ServerPayload::TurnStarted { turn_id } = &started.payload {
        assert_eq!(turn_id, &first_turn);
    }

    // The second turn must not start while the first is processing.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let fake = Arc::clone(&h.fakes.lock()[0]);
    assert_eq!(fake.sent_turns(), vec!["one".to_string()]);

    fake.complete_current("done with one").await;
    let completed =
        wait_for_frame(&mut rx, |p| matches!(p, ServerPayload::TurnCompleted { .. })).await;
    if let ServerPayload::TurnCompleted { turn_id, .. } = &completed.payload {
        assert_eq!(turn_id, &first_turn);
    }

    let started =
        wait_for_frame(&mut rx, |p| matches!(p, ServerPayload::TurnStarted { .. })).await;
    if let ServerPayload::TurnStarted { turn_id } = &started.payload {
        assert_eq!(turn_id, &second_turn);
    }
}

#[tokio::test]
async fn interrupt_is_idempotent() {
    let h = harness(false);
    let workspace = seed_workspace(&h).await;
    let session = seed_session(&h, &workspace).await;
    let main = WorktreeId::main();
    let (_sub, mut rx) = h.broadcaster.subscribe(session.id.clone(), None);

    let (turn_id, _) =
        h.manager.send_message(&session.id, &main, "work".into(), vec![]).await.unwrap();
    wait_for_frame(&mut rx, |p| matches!(p, ServerPayload::TurnStarted { .. })).await;

    h.manager.interrupt_turn(&session.id, &main, &turn_id).await.unwrap();
    h.manager.interrupt_turn(&session.id, &main, &turn_id).await.unwrap();

    let completed =
        wait_for_frame(&mut rx, |p| matches!(p, ServerPayload::TurnCompleted { .. })).await;
    assert!(matches!(
        completed.payload,
        ServerPayload::TurnCompleted { cancelled: true, .. }
    ));
    // Exactly one interrupt reached the adapter.
    let fake = Arc::clone(&h.fakes.lock()[0]);
    assert_eq!(fake.interrupted_turns(), vec![turn_id]);
}

#[tokio::test]
async fn fork_inherits_thread_provider_and_transcript() {
    let h = harness(true);
    let workspace = seed_workspace(&h).await;
    let origin = tempfile::tempdir().unwrap();
    let url = init_origin(origin.path());
    let session = h
        .manager
        .create_session(
            &workspace.id,
            CreateSessionRequest {
                repo_url: url,
                name: None,
                auth: None,
                provider: Some(ProviderKind::Claude),
                default_internet_access: None,
                default_deny_git_credentials_access: None,
            },
        )
        .await
        .unwrap();
    let main = WorktreeId::main();

    // Give main a thread and some history.
    let mut main_wt = h.store.get_worktree(&session.id, &main).await.unwrap().unwrap();
    main_wt.thread_id = Some("thread-7".into());
    h.store.save_worktree(&main_wt).await.unwrap();
    h.store
        .append_message(
            &session.id,
            &main,
            berth_storage::NewMessage {
                role: berth_core::MessageRole::User,
                text: "hello".into(),
                attachments: vec![],
                tool_result: None,
                created_at_ms: 1,
            },
        )
        .await
        .unwrap();

    let fork = h
        .manager
        .create_worktree(
            &session.id,
            CreateWorktreeRequest {
                context: WorktreeContext::Fork,
                source_branch: None,
                source_worktree_id: Some(main.clone()),
                name: Some("experiment".into()),
                provider: None,
                model: None,
                reasoning_effort: None,
                internet_access: None,
                deny_git_credentials_access: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(fork.provider, ProviderKind::Claude);
    assert_eq!(fork.thread_id.as_deref(), Some("thread-7"));
    assert_eq!(fork.source_worktree_id, Some(main.clone()));
    assert!(fork.branch_name.starts_with("session-"));

    // Transcript copied, ids disjoint from the source's.
    let source_msgs = h.store.list_messages(&session.id, &main, 10, None).await.unwrap();
    let fork_msgs = h.store.list_messages(&session.id, &fork.id, 10, None).await.unwrap();
    assert_eq!(fork_msgs.len(), source_msgs.len());
    assert_eq!(fork_msgs[0].text, "hello");
    assert!(fork_msgs.iter().all(|f| source_msgs.iter().all(|s| s.id != f.id)));

    // The fork's checkout exists on its own branch.
    let fork_dir = h.manager.worktree_dir(&session, &fork.id);
    assert!(fork_dir.join(".git").exists());
}

#[tokio::test]
async fn worktree_branches_are_unique_under_concurrency() {
    let h = harness(true);
    let workspace = seed_workspace(&h).await;
    let origin = tempfile::tempdir().unwrap();
    let url = init_origin(origin.path());
    let session = h
        .manager
        .create_session(
            &workspace.id,
            CreateSessionRequest {
                repo_url: url,
                name: None,
                auth: None,
                provider: None,
                default_internet_access: None,
                default_deny_git_credentials_access: None,
            },
        )
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let manager = Arc::clone(&h.manager);
        let session_id = session.id.clone();
        handles.push(tokio::spawn(async move {
            manager
                .create_worktree(
                    &session_id,
                    CreateWorktreeRequest {
                        context: WorktreeContext::New,
                        source_branch: None,
                        source_worktree_id: None,
                        name: None,
                        provider: None,
                        model: None,
                        reasoning_effort: None,
                        internet_access: None,
                        deny_git_credentials_access: None,
                    },
                )
                .await
                .unwrap()
        }));
    }
    let mut branches = std::collections::HashSet::new();
    for handle in handles {
        let worktree = handle.await.unwrap();
        assert!(branches.insert(worktree.branch_name), "duplicate branch minted");
    }
}

#[tokio::test]
async fn gc_collects_idle_sessions() {
    let h = harness(true);
    let workspace = seed_workspace(&h).await;
    let session = seed_session(&h, &workspace).await;
    let (_sub, mut rx) = h.broadcaster.subscribe(session.id.clone(), None);
    let session_root = h.manager.fs.session_paths(&workspace.id, &session.id).root;
    assert!(session_root.exists());

    // Not yet expired: nothing happens.
    h.manager.gc_sweep().await;
    assert!(h.store.get_session(&session.id).await.unwrap().is_some());

    h.clock.advance(Duration::from_secs(25 * 60 * 60));
    h.manager.gc_sweep().await;

    assert!(h.store.get_session(&session.id).await.unwrap().is_none());
    assert!(h.store.list_worktrees(&session.id).await.unwrap().is_empty());
    assert!(!session_root.exists());

    let frame =
        wait_for_frame(&mut rx, |p| matches!(p, ServerPayload::Status { .. })).await;
    assert_eq!(
        frame.payload,
        ServerPayload::Status { status: "deleted".into(), message: None }
    );
}

#[tokio::test]
async fn provider_in_use_detection() {
    let h = harness(true);
    let workspace = seed_workspace(&h).await;
    let session = seed_session(&h, &workspace).await;

    assert!(h.manager.provider_in_use(&workspace.id, ProviderKind::Codex).await.unwrap());
    assert!(!h.manager.provider_in_use(&workspace.id, ProviderKind::Claude).await.unwrap());

    h.manager.delete_session(&session.id).await.unwrap();
    assert!(!h.manager.provider_in_use(&workspace.id, ProviderKind::Codex).await.unwrap());
}

#[tokio::test]
async fn backlog_crud_persists() {
    let h = harness(true);
    let workspace = seed_workspace(&h).await;
    let session = seed_session(&h, &workspace).await;

    let item = h.manager.add_backlog(&session.id, "try the parser fix".into()).await.unwrap();
    assert_eq!(h.manager.list_backlog(&session.id).await.unwrap(), vec![item.clone()]);

    h.manager.remove_backlog(&session.id, &item.id).await.unwrap();
    assert!(h.manager.list_backlog(&session.id).await.unwrap().is_empty());
    assert!(matches!(
        h.manager.remove_backlog(&session.id, &item.id).await,
        Err(ApiError::NotFound(_))
    ));
}
