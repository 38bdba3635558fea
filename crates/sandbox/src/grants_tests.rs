// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::fs;

#[test]
fn unmasked_grants_pass_through() {
    let dir = tempfile::tempdir().unwrap();
    let grants = vec![dir.path().to_path_buf()];
    assert_eq!(expand_grants(&grants, &[]), grants);
}

#[test]
fn masked_file_is_withheld_and_siblings_survive() {
    let dir = tempfile::tempdir().unwrap();
    let home = dir.path();
    fs::create_dir(home.join("project")).unwrap();
    fs::write(home.join(".git-credentials"), "secret").unwrap();
    fs::write(home.join("notes.txt"), "ok").unwrap();

    let expanded =
        expand_grants(&[home.to_path_buf()], &[home.join(".git-credentials")]);

    assert!(expanded.contains(&home.join("project")));
    assert!(expanded.contains(&home.join("notes.txt")));
    assert!(!expanded.contains(&home.join(".git-credentials")));
    assert!(!expanded.contains(&home.to_path_buf()));
}

#[test]
fn masked_directory_is_withheld_recursively() {
    let dir = tempfile::tempdir().unwrap();
    let home = dir.path();
    fs::create_dir_all(home.join(".ssh")).unwrap();
    fs::write(home.join(".ssh/id_ed25519"), "key").unwrap();
    fs::create_dir(home.join("work")).unwrap();

    let expanded = expand_grants(&[home.to_path_buf()], &[home.join(".ssh")]);

    assert!(expanded.contains(&home.join("work")));
    assert!(expanded.iter().all(|p| !p.starts_with(home.join(".ssh"))));
}

#[test]
fn exact_mask_removes_grant() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("masked");
    fs::create_dir(&target).unwrap();
    assert!(expand_grants(&[target.clone()], &[target]).is_empty());
}
