// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use berth_core::CredentialKind;
use std::collections::HashMap;

fn workspace(uid: u32) -> Workspace {
    Workspace {
        id: WorkspaceId::mint(),
        secret_hash: "h".into(),
        uid,
        gid: uid,
        providers: HashMap::new(),
        created_at_ms: 0,
    }
}

fn fs_in(dir: &Path) -> WorkspaceFs {
    WorkspaceFs::new(dir.join("data"), dir.join("home"), (30_000, 30_004))
}

#[tokio::test]
async fn allocations_are_unique_and_exhaustible() {
    let dir = tempfile::tempdir().unwrap();
    let fs = fs_in(dir.path());

    let mut seen = std::collections::HashSet::new();
    for _ in 0..5 {
        let (uid, gid) = fs.allocate_uid().unwrap();
        assert_eq!(uid, gid);
        assert!((30_000..=30_004).contains(&uid));
        assert!(seen.insert(uid), "uid {uid} handed out twice");
    }
    assert!(matches!(fs.allocate_uid(), Err(WorkspaceFsError::IdExhausted(_, _))));
}

#[tokio::test]
async fn recovery_skips_persisted_uids() {
    let dir = tempfile::tempdir().unwrap();
    let fs = fs_in(dir.path());
    fs.recover_allocations(&[workspace(30_000), workspace(30_001)]);
    assert_eq!(fs.allocate_uid().unwrap(), (30_002, 30_002));
}

#[tokio::test]
async fn workspace_dirs_created_once() {
    let dir = tempfile::tempdir().unwrap();
    let fs = fs_in(dir.path());
    let ws = workspace(30_000);

    fs.create_workspace_dirs(&ws).unwrap();
    assert!(fs.workspace_dir(&ws.id).join("sessions").is_dir());
    assert!(fs.home_dir(&ws.id).is_dir());

    assert!(matches!(fs.create_workspace_dirs(&ws), Err(WorkspaceFsError::IdTaken(_))));
}

#[tokio::test]
async fn session_tree_has_expected_shape() {
    let dir = tempfile::tempdir().unwrap();
    let fs = fs_in(dir.path());
    let ws = workspace(30_000);
    fs.create_workspace_dirs(&ws).unwrap();

    let session_id = SessionId::mint();
    let paths = fs.create_session_dirs(&ws, &session_id).unwrap();
    for p in [&paths.repo, &paths.git, &paths.attachments, &paths.tmp] {
        assert!(p.is_dir());
        assert!(p.starts_with(&paths.root));
    }

    fs.remove_session_dirs(&ws.id, &session_id);
    assert!(!paths.root.exists());
    // Idempotent on a missing tree.
    fs.remove_session_dirs(&ws.id, &session_id);
}

#[tokio::test]
async fn credential_blob_written_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    let fs = fs_in(dir.path());
    let ws = workspace(30_000);
    fs.create_workspace_dirs(&ws).unwrap();

    let cred = Credential { kind: CredentialKind::AuthJsonB64, blob: "eyJvcGFxdWUiOjF9".into() };
    let path = fs.write_credential(&ws, ProviderKind::Claude, &cred).unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "eyJvcGFxdWUiOjF9");
    assert_eq!(path, fs.credential_path(&ws.id, ProviderKind::Claude));
}

#[tokio::test]
async fn audit_entries_append_as_jsonl() {
    let dir = tempfile::tempdir().unwrap();
    let fs = fs_in(dir.path());
    let ws = workspace(30_000);
    fs.create_workspace_dirs(&ws).unwrap();

    fs.append_audit(1, &ws.id, "session_created", serde_json::json!({ "session": "s1" }));
    fs.append_audit(2, &ws.id, "session_deleted", serde_json::json!({ "session": "s1" }));

    // The writer task drains asynchronously.
    let path = fs.workspace_dir(&ws.id).join("audit.log");
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        if std::fs::read_to_string(&path).map(|c| c.lines().count() == 2).unwrap_or(false) {
            break;
        }
    }
    let content = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 2);
    let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(first["kind"], "session_created");
    assert_eq!(first["at_ms"], 1);
}
