//! Snapshot cleanup workflow tests

mod common;

use chrono::{DateTime, Duration, TimeZone, Utc};
use common::{attached_volume, snapshot, TestEnv, INSTANCE_ID};
use ebsctl_common::{
    Error, InstanceState, MonthlyRetention, RetentionClass, RetentionPolicy, SnapshotStatus, VolumeType,
};
use ebsctl_core::instances::InstanceSelector;
use ebsctl_core::provider::{CallKind, MemoryFixture};
use ebsctl_core::snapshots::DeletionOutcome;
use ebsctl_core::tasks::{clean, clean_test, VolumeTarget};
use ebsctl_core::volumes::VolumeFilter;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2021, 3, 17, 12, 0, 0).unwrap()
}

fn three_daily() -> RetentionPolicy {
    RetentionPolicy {
        hourly: 0,
        daily: 3,
        weekly: 0,
        monthly: MonthlyRetention::NONE,
    }
}

/// Instance with two volumes; `vol-f` has one snapshot a day for ten days
fn env_with_history() -> TestEnv {
    let snapshots = (0..10)
        .map(|day| snapshot(&format!("snap-d{}", day), "vol-f", now() - Duration::days(day)))
        .collect();
    TestEnv::new(MemoryFixture {
        instances: vec![common::instance(InstanceState::Running)],
        volumes: vec![
            attached_volume("vol-f", "/dev/sdf", VolumeType::Gp2, 50),
            attached_volume("vol-g", "/dev/sdg", VolumeType::Gp2, 50),
        ],
        snapshots,
    })
}

#[tokio::test]
async fn test_clean_volume_deletes_unkept_snapshots() {
    let env = env_with_history();
    let target = VolumeTarget::Volume("vol-f".to_string());

    let reports = clean(&env.ctx, &target, &three_daily(), now(), false).await.unwrap();

    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    let kept: Vec<&str> = report.kept().map(|e| e.snapshot_id.as_str()).collect();
    assert_eq!(kept, vec!["snap-d0", "snap-d1", "snap-d2"]);
    assert!(report.kept().all(|e| e.class == Some(RetentionClass::Daily)));
    assert_eq!(report.removed().count(), 7);
    assert!(report.removed().all(|e| e.outcome == DeletionOutcome::Deleted));
    assert!(!report.has_failures());

    let mut left: Vec<String> = env.storage.snapshots().await.into_iter().map(|s| s.id).collect();
    left.sort();
    assert_eq!(left, vec!["snap-d0", "snap-d1", "snap-d2"]);
}

#[tokio::test]
async fn test_dry_run_clean_only_probes() {
    let env = env_with_history();
    let target = VolumeTarget::Volume("vol-f".to_string());

    let reports = clean(&env.ctx, &target, &three_daily(), now(), true).await.unwrap();

    assert!(reports[0].removed().all(|e| e.outcome == DeletionOutcome::Simulated));
    assert!(env.storage.mutations().await.is_empty());
    let probes = env
        .storage
        .calls()
        .await
        .iter()
        .filter(|c| c.kind == CallKind::DeleteSnapshot && c.dry_run)
        .count();
    assert_eq!(probes, 7);
    assert_eq!(env.storage.snapshots().await.len(), 10);
}

#[tokio::test]
async fn test_failed_deletion_does_not_stop_the_batch() {
    let env = env_with_history();
    env.storage
        .fail_on(CallKind::DeleteSnapshot, "snap-d5", "snapshot is in use by an image")
        .await;
    let target = VolumeTarget::Volume("vol-f".to_string());

    let reports = clean(&env.ctx, &target, &three_daily(), now(), false).await.unwrap();

    let report = &reports[0];
    let failures: Vec<&str> = report.failures().map(|e| e.snapshot_id.as_str()).collect();
    assert_eq!(failures, vec!["snap-d5"]);
    assert_eq!(
        report.removed().filter(|e| e.outcome == DeletionOutcome::Deleted).count(),
        6
    );
    assert_eq!(env.storage.snapshots().await.len(), 4);
    assert!(env
        .rendered()
        .iter()
        .any(|l| l == "Could not delete snapshot snap-d5"));
}

#[tokio::test]
async fn test_pending_snapshot_is_never_deleted() {
    let mut stuck = snapshot("snap-old", "vol-f", now() - Duration::days(40));
    stuck.status = SnapshotStatus::Pending;
    let env = TestEnv::new(MemoryFixture {
        instances: vec![common::instance(InstanceState::Running)],
        volumes: vec![attached_volume("vol-f", "/dev/sdf", VolumeType::Gp2, 50)],
        snapshots: vec![snapshot("snap-new", "vol-f", now()), stuck],
    });
    let policy = RetentionPolicy {
        daily: 1,
        ..three_daily()
    };

    let reports = clean(&env.ctx, &VolumeTarget::Volume("vol-f".to_string()), &policy, now(), false)
        .await
        .unwrap();

    let entry = reports[0].entries.iter().find(|e| e.snapshot_id == "snap-old").unwrap();
    assert_eq!(entry.class, None);
    assert_eq!(entry.outcome, DeletionOutcome::SkippedPending);
    assert_eq!(env.storage.snapshots().await.len(), 2);
}

#[tokio::test]
async fn test_clean_by_instance_and_volume_name() {
    let env = env_with_history();
    let target = VolumeTarget::Instance {
        selector: InstanceSelector::Name("db-primary".to_string()),
        filter: VolumeFilter::name("data-f").unwrap(),
    };

    let reports = clean(&env.ctx, &target, &three_daily(), now(), true).await.unwrap();

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].volume_id.as_deref(), Some("vol-f"));
}

#[tokio::test]
async fn test_volume_without_snapshots_does_not_hide_other_reports() {
    let env = env_with_history();
    let target = VolumeTarget::Instance {
        selector: InstanceSelector::Id(INSTANCE_ID.to_string()),
        filter: VolumeFilter::device("/dev/sd").unwrap(),
    };

    let reports = clean(&env.ctx, &target, &three_daily(), now(), false).await.unwrap();

    assert_eq!(reports.len(), 2);
    let cleaned = &reports[0];
    assert_eq!(cleaned.volume_id.as_deref(), Some("vol-f"));
    assert!(cleaned.error.is_none());
    assert_eq!(
        cleaned.removed().filter(|e| e.outcome == DeletionOutcome::Deleted).count(),
        7
    );
    assert_eq!(env.storage.snapshots().await.len(), 3);

    let skipped = &reports[1];
    assert_eq!(skipped.volume_id.as_deref(), Some("vol-g"));
    assert!(skipped.entries.is_empty());
    assert_eq!(skipped.error.as_deref(), Some("Volume vol-g does not have snapshots"));
    assert_eq!(skipped.failure_count(), 1);
    assert!(env
        .rendered()
        .iter()
        .any(|l| l == "Volume vol-g does not have snapshots"));
}

#[tokio::test]
async fn test_missing_volume() {
    let env = env_with_history();

    let err = clean(&env.ctx, &VolumeTarget::Volume("vol-404".to_string()), &three_daily(), now(), false)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "volume vol-404 does not exist");

    let err = clean(&env.ctx, &VolumeTarget::Volume("disk-1".to_string()), &three_daily(), now(), false)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MalformedId { .. }));
}

#[test]
fn test_synthetic_history_cleanup() {
    let policy = RetentionPolicy {
        hourly: 2,
        daily: 3,
        weekly: 0,
        monthly: MonthlyRetention::NONE,
    };

    let report = clean_test(&policy, now(), 10);

    assert_eq!(report.entries.len(), 30);
    assert!(report.dry_run);
    let summary = report.summary();
    assert_eq!(summary.hourly, 2);
    assert_eq!(summary.daily, 3);
    assert_eq!(summary.delete, 25);
    assert!(report.removed().all(|e| e.outcome == DeletionOutcome::Simulated));
}
