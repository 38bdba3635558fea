// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn sid() -> SessionId {
    SessionId::mint()
}

#[tokio::test]
async fn frames_carry_monotone_seq() {
    let broadcaster = Broadcaster::new(8);
    let session = sid();
    let (_handle, mut rx) = broadcaster.subscribe(session.clone(), None);

    broadcaster.publish(&session, None, ServerPayload::Ready);
    broadcaster.publish(&session, None, ServerPayload::Pong);

    let first = rx.recv().await.unwrap();
    let second = rx.recv().await.unwrap();
    assert_eq!(first.seq, 1);
    assert_eq!(second.seq, 2);
    assert_eq!(first.session_id, Some(session.clone()));
    assert_eq!(broadcaster.current_seq(&session), 2);
}

#[tokio::test]
async fn worktree_filter_drops_other_worktrees() {
    let broadcaster = Broadcaster::new(8);
    let session = sid();
    let wt_a = WorktreeId::main();
    let wt_b = WorktreeId::mint();
    let (_handle, mut rx) = broadcaster.subscribe(session.clone(), Some(wt_a.clone()));

    broadcaster.publish(&session, Some(&wt_b), ServerPayload::Ready);
    broadcaster.publish(&session, Some(&wt_a), ServerPayload::Ready);
    // Session-wide frames always pass the filter.
    broadcaster.publish(&session, None, ServerPayload::Pong);

    let frame = rx.recv().await.unwrap();
    assert_eq!(frame.worktree_id, Some(wt_a));
    let frame = rx.recv().await.unwrap();
    assert_eq!(frame.payload, ServerPayload::Pong);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn overflow_detaches_subscriber() {
    let broadcaster = Broadcaster::new(2);
    let session = sid();
    let (_handle, _rx) = broadcaster.subscribe(session.clone(), None);

    for _ in 0..3 {
        broadcaster.publish(&session, None, ServerPayload::Ready);
    }
    assert_eq!(broadcaster.subscriber_count(&session), 0);
    // Seq keeps advancing for the remaining audience.
    assert_eq!(broadcaster.current_seq(&session), 3);
}

#[tokio::test]
async fn unsubscribe_removes_only_that_handle() {
    let broadcaster = Broadcaster::new(8);
    let session = sid();
    let (handle_a, _rx_a) = broadcaster.subscribe(session.clone(), None);
    let (_handle_b, _rx_b) = broadcaster.subscribe(session.clone(), None);

    broadcaster.unsubscribe(&handle_a);
    assert_eq!(broadcaster.subscriber_count(&session), 1);
}

#[tokio::test]
async fn drop_session_sends_termination_notice() {
    let broadcaster = Broadcaster::new(8);
    let session = sid();
    let (_handle, mut rx) = broadcaster.subscribe(session.clone(), None);

    broadcaster.drop_session(&session);
    let frame = rx.recv().await.unwrap();
    assert_eq!(
        frame.payload,
        ServerPayload::Status { status: "deleted".into(), message: None }
    );
    assert_eq!(broadcaster.subscriber_count(&session), 0);
    assert_eq!(broadcaster.current_seq(&session), 0);
}

#[tokio::test]
async fn sessions_do_not_share_seq() {
    let broadcaster = Broadcaster::new(8);
    let session_a = sid();
    let session_b = sid();
    broadcaster.publish(&session_a, None, ServerPayload::Ready);
    broadcaster.publish(&session_a, None, ServerPayload::Ready);
    broadcaster.publish(&session_b, None, ServerPayload::Ready);
    assert_eq!(broadcaster.current_seq(&session_a), 2);
    assert_eq!(broadcaster.current_seq(&session_b), 1);
}
