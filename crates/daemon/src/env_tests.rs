// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serial_test::serial;

#[test]
#[serial]
fn deployment_mode_defaults_to_mono() {
    std::env::remove_var("DEPLOYMENT_MODE");
    assert_eq!(deployment_mode().unwrap(), DeploymentMode::MonoUser);

    std::env::set_var("DEPLOYMENT_MODE", "multi_user");
    assert_eq!(deployment_mode().unwrap(), DeploymentMode::MultiUser);

    std::env::set_var("DEPLOYMENT_MODE", "cluster");
    assert!(deployment_mode().is_err());
    std::env::remove_var("DEPLOYMENT_MODE");
}

#[test]
#[serial]
fn uid_range_parses_and_validates() {
    std::env::remove_var("BERTH_UID_RANGE");
    assert_eq!(uid_range().unwrap(), (30_000, 30_999));

    std::env::set_var("BERTH_UID_RANGE", "40000-40010");
    assert_eq!(uid_range().unwrap(), (40_000, 40_010));

    std::env::set_var("BERTH_UID_RANGE", "50-40");
    assert!(uid_range().is_err());

    std::env::set_var("BERTH_UID_RANGE", "junk");
    assert!(uid_range().is_err());
    std::env::remove_var("BERTH_UID_RANGE");
}

#[test]
#[serial]
fn wakeup_timeout_is_clamped() {
    std::env::set_var("BERTH_WAKEUP_TIMEOUT_MS", "120000");
    assert_eq!(wakeup_timeout(), Duration::from_secs(60));
    std::env::set_var("BERTH_WAKEUP_TIMEOUT_MS", "20000");
    assert_eq!(wakeup_timeout(), Duration::from_secs(20));
    std::env::remove_var("BERTH_WAKEUP_TIMEOUT_MS");
    assert_eq!(wakeup_timeout(), Duration::from_secs(15));
}

#[test]
#[serial]
fn state_dir_resolution_chain() {
    std::env::set_var("BERTH_STATE_DIR", "/custom/state");
    assert_eq!(state_dir().unwrap(), PathBuf::from("/custom/state"));
    std::env::remove_var("BERTH_STATE_DIR");

    std::env::set_var("XDG_STATE_HOME", "/xdg");
    assert_eq!(state_dir().unwrap(), PathBuf::from("/xdg/berth"));
    std::env::remove_var("XDG_STATE_HOME");
}

#[test]
#[serial]
fn external_backend_requires_redis_url() {
    std::env::remove_var("BERTH_REDIS_URL");
    assert!(redis_url().is_err());
    std::env::set_var("BERTH_REDIS_URL", "redis://127.0.0.1:6379");
    assert_eq!(redis_url().unwrap(), "redis://127.0.0.1:6379");
    std::env::remove_var("BERTH_REDIS_URL");
}
