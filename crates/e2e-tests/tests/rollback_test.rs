//! Version and rollback E2E tests.
//!
//! Rollbacks travel over the control topic to the alias manager. Rejected
//! rollbacks leave the active version and alias untouched.

use std::collections::BTreeSet;

use pretty_assertions::assert_eq;

use e2e_tests::TestHarness;
use ragops_types::{BuildMessage, RollbackMessage, RunStatus};
use ragops_worker::BuildRequest;

async fn build_versions(harness: &TestHarness, count: usize) {
    for _ in 0..count {
        let queued = harness
            .enqueuer
            .submit_build(BuildRequest::new("demo", "sample"))
            .await
            .unwrap();
        let run = harness
            .wait_for_run(&queued.run_id, |r| r.status.is_terminal())
            .await;
        assert_eq!(run.status, RunStatus::Succeeded);
    }
}

async fn alias_target(harness: &TestHarness) -> Option<String> {
    harness
        .aliases()
        .index_status("demo")
        .await
        .unwrap()
        .alias_target
}

/// Two builds then a rollback: v1 is active again and both versions remain.
#[tokio::test]
async fn test_two_builds_then_rollback() {
    let harness = TestHarness::new();
    let worker = harness.start_worker().await;

    build_versions(&harness, 2).await;
    assert_eq!(harness.history("demo").active, Some(2));
    assert_eq!(alias_target(&harness).await.as_deref(), Some("demo_demo_v2"));

    harness
        .enqueuer
        .submit_rollback(RollbackMessage::new("demo", 1, None))
        .await
        .unwrap();
    harness
        .wait_for_acks(&harness.settings.control_topic, 1)
        .await;
    worker.stop().await;

    let history = harness.history("demo");
    assert_eq!(history.active, Some(1));
    assert_eq!(history.versions, BTreeSet::from([1, 2]));
    assert_eq!(alias_target(&harness).await.as_deref(), Some("demo_demo_v1"));
    // Readers of the alias now see v1's points
    assert_eq!(harness.backend.point_count("demo_demo_active"), 3);
}

/// Rolling back past the oldest version is rejected, acked, and changes
/// nothing.
#[tokio::test]
async fn test_rollback_past_oldest_is_rejected() {
    let harness = TestHarness::new();
    let worker = harness.start_worker().await;
    build_versions(&harness, 1).await;

    let outcome = harness.aliases().rollback("demo", 1, None).await.unwrap();
    assert!(!outcome.ok);
    assert_eq!(outcome.error.as_deref(), Some("no previous version available"));

    harness
        .enqueuer
        .submit_rollback(RollbackMessage::new("demo", 1, None))
        .await
        .unwrap();
    harness
        .wait_for_acks(&harness.settings.control_topic, 1)
        .await;
    let stats = worker.stop().await;
    assert_eq!(stats[1].nacked, 0);

    assert_eq!(harness.history("demo").active, Some(1));
    assert_eq!(alias_target(&harness).await.as_deref(), Some("demo_demo_v1"));
}

/// Request-level rollback problems come back as values.
#[tokio::test]
async fn test_rollback_rejections() {
    let harness = TestHarness::new();
    let aliases = harness.aliases();

    let outcome = aliases.rollback("demo", 1, None).await.unwrap();
    assert_eq!(outcome.error.as_deref(), Some("no active version"));

    harness
        .executor
        .run_build(&BuildMessage::new("r1", "demo", "sample"))
        .await
        .unwrap();

    let outcome = aliases.rollback("demo", 1, Some(7)).await.unwrap();
    assert!(!outcome.ok);
    assert_eq!(outcome.error.as_deref(), Some("version 7 not found"));

    let outcome = aliases.rollback("demo", 0, None).await.unwrap();
    assert_eq!(outcome.error.as_deref(), Some("steps must be >= 1"));
    assert_eq!(harness.history("demo").active, Some(1));
}

/// An explicit target version can move the alias forward again.
#[tokio::test]
async fn test_rollback_to_version_and_forward() {
    let harness = TestHarness::new();
    for run_id in ["r1", "r2", "r3"] {
        harness
            .executor
            .run_build(&BuildMessage::new(run_id, "demo", "sample"))
            .await
            .unwrap();
    }

    let outcome = harness.aliases().rollback("demo", 2, None).await.unwrap();
    assert!(outcome.ok);
    assert_eq!(outcome.active, Some(1));
    assert_eq!(outcome.collection.as_deref(), Some("demo_demo_v1"));

    let outcome = harness.aliases().rollback("demo", 1, Some(3)).await.unwrap();
    assert!(outcome.ok);
    assert_eq!(outcome.active, Some(3));
    assert_eq!(alias_target(&harness).await.as_deref(), Some("demo_demo_v3"));
    assert_eq!(harness.history("demo").versions, BTreeSet::from([1, 2, 3]));
}

/// A failed alias flip fails the promote step and keeps the prior version
/// active.
#[tokio::test]
async fn test_failed_promote_keeps_previous_version() {
    let harness = TestHarness::new();
    harness
        .executor
        .run_build(&BuildMessage::new("r1", "demo", "sample"))
        .await
        .unwrap();

    harness.backend.set_fail_alias_updates(true);
    let run = harness
        .executor
        .run_build(&BuildMessage::new("r2", "demo", "sample"))
        .await
        .unwrap()
        .into_run();

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.errors.last().unwrap().step, "promote");
    assert_eq!(harness.history("demo").active, Some(1));
    assert_eq!(alias_target(&harness).await.as_deref(), Some("demo_demo_v1"));
}
