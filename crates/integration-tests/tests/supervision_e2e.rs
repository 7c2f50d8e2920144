//! End-to-end supervision against real subprocesses
//!
//! Uses the fake remote from `common`: no network, no real rsync.

mod common;

use std::fs;
use std::sync::Arc;

use common::{context, wait_for_event, wait_until, FakeRemote, WAIT};
use driftsync_core::application::{shutdown_channel, EventKind, Fleet, SyncTrigger};
use driftsync_core::domain::{FailureKind, ServiceState, SyncOutcome};

#[tokio::test]
async fn test_sync_once_mirrors_source() {
    let remote = FakeRemote::new();
    fs::write(remote.src().join("index.html"), "<h1>hi</h1>").unwrap();
    fs::create_dir_all(remote.src().join("assets")).unwrap();
    fs::write(remote.src().join("assets/app.js"), "console.log(1)").unwrap();

    let fleet = Fleet::new(vec![remote.spec("app")], context(remote.tools()));
    let reports = fleet.sync_once().await;

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].outcome, SyncOutcome::Success);
    let dest = remote.dest("app");
    assert_eq!(fs::read_to_string(dest.join("index.html")).unwrap(), "<h1>hi</h1>");
    assert_eq!(fs::read_to_string(dest.join("assets/app.js")).unwrap(), "console.log(1)");
}

#[tokio::test]
async fn test_sync_once_reports_unreachable_remote() {
    let remote = FakeRemote::new();
    remote.set_down(true);

    let fleet = Fleet::new(vec![remote.spec("app")], context(remote.tools()));
    let reports = fleet.sync_once().await;

    match &reports[0].outcome {
        SyncOutcome::Failure { kind, reason } => {
            assert_eq!(*kind, FailureKind::Unreachable);
            assert!(reason.contains("Connection refused"));
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(remote.rsync_calls(), 0);
}

/// Initial sync, change-triggered resync, clean shutdown
#[tokio::test]
async fn test_supervisor_syncs_changes_until_shutdown() {
    let remote = FakeRemote::new();
    fs::write(remote.src().join("a.txt"), "first").unwrap();

    let ctx = context(remote.tools());
    let mut events = ctx.events.subscribe();
    let board = ctx.board.clone();
    let fleet = Arc::new(Fleet::new(vec![remote.spec("app")], ctx));
    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let running = {
        let fleet = Arc::clone(&fleet);
        tokio::spawn(async move { fleet.run(shutdown_rx).await })
    };

    wait_for_event(&mut events, |e| {
        matches!(e.kind, EventKind::StateChanged { to: ServiceState::Watching, .. })
    })
    .await;
    assert_eq!(
        fs::read_to_string(remote.dest("app").join("a.txt")).unwrap(),
        "first"
    );

    remote.change("b.txt", "second");
    wait_for_event(&mut events, |e| {
        matches!(
            e.kind,
            EventKind::SyncCompleted {
                trigger: SyncTrigger::Change,
                ..
            }
        )
    })
    .await;
    assert_eq!(
        fs::read_to_string(remote.dest("app").join("b.txt")).unwrap(),
        "second"
    );
    assert!(board.get("app").unwrap().last_sync_at.is_some());

    shutdown_tx.shutdown();
    let statuses = tokio::time::timeout(WAIT, running).await.unwrap().unwrap();

    assert_eq!(statuses[0].state, ServiceState::Stopped);
    assert_eq!(statuses[0].restarts, 0);
    assert_eq!(statuses[0].run_id.as_deref(), Some("run-1"));
}

/// Remote disappears while watching, comes back, pipeline restarts and resyncs
#[tokio::test]
async fn test_outage_tears_down_and_restarts() {
    let remote = FakeRemote::new();
    fs::write(remote.src().join("a.txt"), "v1").unwrap();

    let ctx = context(remote.tools());
    let mut events = ctx.events.subscribe();
    let fleet = Arc::new(Fleet::new(vec![remote.spec("app")], ctx));
    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let running = {
        let fleet = Arc::clone(&fleet);
        tokio::spawn(async move { fleet.run(shutdown_rx).await })
    };

    wait_for_event(&mut events, |e| {
        matches!(e.kind, EventKind::StateChanged { to: ServiceState::Watching, .. })
    })
    .await;
    let syncs_before_outage = remote.rsync_calls();

    remote.set_down(true);
    let unreachable = wait_for_event(&mut events, |e| {
        matches!(e.kind, EventKind::RemoteUnreachable { .. })
    })
    .await;
    assert_eq!(unreachable.run_id.as_deref(), Some("run-1"));
    wait_for_event(&mut events, |e| {
        matches!(
            e.kind,
            EventKind::StateChanged {
                to: ServiceState::WaitingForRemote,
                ..
            }
        )
    })
    .await;

    // Edit while the remote is down, then bring it back
    fs::write(remote.src().join("a.txt"), "v2").unwrap();
    remote.set_down(false);

    let resynced = wait_for_event(&mut events, |e| {
        matches!(
            e.kind,
            EventKind::SyncCompleted {
                trigger: SyncTrigger::Initial,
                ..
            }
        )
    })
    .await;
    assert_eq!(resynced.run_id.as_deref(), Some("run-2"));
    assert!(remote.rsync_calls() > syncs_before_outage);
    wait_until(|| {
        fs::read_to_string(remote.dest("app").join("a.txt")).ok().as_deref() == Some("v2")
    })
    .await;

    shutdown_tx.shutdown();
    let statuses = tokio::time::timeout(WAIT, running).await.unwrap().unwrap();
    assert_eq!(statuses[0].state, ServiceState::Stopped);
    assert_eq!(statuses[0].restarts, 1);
}

/// Host key failure is not retried
#[tokio::test]
async fn test_host_key_failure_is_fatal() {
    let remote = FakeRemote::new();

    let ctx = context(remote.tools());
    let mut events = ctx.events.subscribe();
    let fleet = Arc::new(Fleet::new(vec![remote.spec("app")], ctx));
    let (_shutdown_tx, shutdown_rx) = shutdown_channel();

    let running = {
        let fleet = Arc::clone(&fleet);
        tokio::spawn(async move { fleet.run(shutdown_rx).await })
    };

    wait_for_event(&mut events, |e| {
        matches!(e.kind, EventKind::StateChanged { to: ServiceState::Watching, .. })
    })
    .await;

    remote.set_host_key_failure(true);
    remote.change("c.txt", "x");

    let failed = wait_for_event(&mut events, |e| matches!(e.kind, EventKind::SyncFailed { .. })).await;
    let statuses = tokio::time::timeout(WAIT, running).await.unwrap().unwrap();

    assert!(matches!(
        failed.kind,
        EventKind::SyncFailed {
            kind: FailureKind::Fatal,
            ..
        }
    ));
    assert_eq!(statuses[0].state, ServiceState::Failed);
    assert_eq!(statuses[0].restarts, 0);
}
