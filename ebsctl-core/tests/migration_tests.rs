//! Volume migration workflow tests
//! Drive the whole stop / migrate / start sequence against the in-memory provider

mod common;

use common::{attached_volume, TestEnv, INSTANCE_ID};
use ebsctl_common::{Error, InstanceState, VolumeType};
use ebsctl_core::instances::{InstanceSelector, StateChange};
use ebsctl_core::migration::{MigrationRequest, MigrationStep, StepOutcome};
use ebsctl_core::progress::NoticeLevel;
use ebsctl_core::provider::CallKind;
use ebsctl_core::tasks::migrate;
use ebsctl_core::volumes::VolumeFilter;

fn selector() -> InstanceSelector {
    InstanceSelector::Id(INSTANCE_ID.to_string())
}

fn three_volume_env(state: InstanceState) -> TestEnv {
    TestEnv::with_instance(
        state,
        vec![
            attached_volume("vol-f", "/dev/sdf", VolumeType::Standard, 100),
            attached_volume("vol-g", "/dev/sdg", VolumeType::Standard, 100),
            attached_volume("vol-h", "/dev/sdh", VolumeType::Standard, 100),
        ],
    )
}

fn to_gp2(dry_run: bool) -> MigrationRequest {
    MigrationRequest {
        volume_type: VolumeType::Gp2,
        iops: None,
        dry_run,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dry_run_reports_every_step_without_mutations() {
    let env = three_volume_env(InstanceState::Running);
    let filter = VolumeFilter::device("/dev/sdf").unwrap();

    let outcome = migrate(&env.ctx, &selector(), &filter, &to_gp2(true)).await.unwrap();

    assert!(env.storage.mutations().await.is_empty());
    assert_eq!(outcome.stop, StateChange::Simulated);
    assert_eq!(outcome.reports.len(), 1);

    let report = &outcome.reports[0];
    assert!(report.succeeded());
    let steps: Vec<MigrationStep> = report.steps.iter().map(|r| r.step).collect();
    assert_eq!(steps, MigrationStep::ALL.to_vec());
    assert_eq!(report.outcome(MigrationStep::Snapshot), Some(&StepOutcome::Simulated));
    assert_eq!(report.outcome(MigrationStep::Detach), Some(&StepOutcome::Simulated));
    assert_eq!(report.outcome(MigrationStep::CreateReplacement), Some(&StepOutcome::Simulated));
    assert!(matches!(report.outcome(MigrationStep::Attach), Some(StepOutcome::Skipped(_))));
    assert_eq!(report.outcome(MigrationStep::DeleteOld), Some(&StepOutcome::Simulated));

    // probes still reached the provider
    let calls = env.storage.calls().await;
    for kind in [CallKind::CreateSnapshot, CallKind::DetachVolume, CallKind::CreateVolume, CallKind::DeleteVolume] {
        assert!(calls.iter().any(|c| c.kind == kind && c.dry_run), "missing {:?} probe", kind);
    }
    assert!(!calls.iter().any(|c| c.kind == CallKind::AttachVolume));

    let lines = env.rendered();
    assert!(lines.iter().any(|l| l.starts_with("[DRY] [0] Creating snapshot for volume-id vol-f")));
    assert!(lines.iter().any(|l| l.starts_with("[DRY] [0] Detaching volume vol-f")));
    assert!(lines.iter().any(|l| l.contains("Not attaching new volume")));
    assert!(lines.iter().any(|l| l.starts_with("[DRY] [0] Deleting old volume vol-f")));

    // nothing changed
    let volume = env.storage.volume("vol-f").await.unwrap();
    assert_eq!(volume.volume_type, VolumeType::Standard);
    assert!(env.storage.snapshots().await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_three_volumes_migrate_in_parallel_before_restart() {
    let env = three_volume_env(InstanceState::Running);
    let filter = VolumeFilter::device("/dev/sd[fgh]").unwrap();

    let outcome = migrate(&env.ctx, &selector(), &filter, &to_gp2(false)).await.unwrap();

    assert!(outcome.succeeded());
    assert_eq!(outcome.reports.len(), 3);
    assert_eq!(outcome.stop, StateChange::Changed);
    assert_eq!(outcome.start, Some(StateChange::Changed));
    let tasks: Vec<usize> = outcome.reports.iter().map(|r| r.task).collect();
    assert_eq!(tasks, vec![0, 1, 2]);

    // stop first, every old volume deleted, start last
    let mutations = env.storage.mutations().await;
    assert_eq!(mutations.first().map(|c| c.kind), Some(CallKind::StopInstance));
    assert_eq!(mutations.last().map(|c| c.kind), Some(CallKind::StartInstance));
    let deletes = mutations.iter().filter(|c| c.kind == CallKind::DeleteVolume).count();
    assert_eq!(deletes, 3);

    let notices = env.notices.notices();
    let banners: Vec<&str> = notices
        .iter()
        .filter(|n| n.level == NoticeLevel::Banner)
        .map(|n| n.message.as_str())
        .collect();
    assert_eq!(banners, vec!["STARTING PARALLEL TASKS", "FINISHED PARALLEL TASKS"]);

    let instance = env.storage.instance(INSTANCE_ID).await.unwrap();
    assert_eq!(instance.state, InstanceState::Running);

    let volumes = env.storage.volumes().await;
    assert_eq!(volumes.len(), 3);
    for volume in &volumes {
        assert_eq!(volume.volume_type, VolumeType::Gp2);
        assert_eq!(volume.instance_id(), Some(INSTANCE_ID));
        assert!(!["vol-f", "vol-g", "vol-h"].contains(&volume.id.as_str()));
    }
    let mut names: Vec<&str> = volumes.iter().map(|v| v.name()).collect();
    names.sort();
    assert_eq!(names, vec!["data-f", "data-g", "data-h"]);

    let snapshots = env.storage.snapshots().await;
    assert_eq!(snapshots.len(), 3);
    assert!(snapshots
        .iter()
        .any(|s| s.description == format!("Migration from standard to gp2 ({} /dev/sdf)", INSTANCE_ID)));
}

#[tokio::test]
async fn test_stopped_instance_is_not_restarted() {
    let env = three_volume_env(InstanceState::Stopped);
    let filter = VolumeFilter::device("/dev/sdg").unwrap();

    let outcome = migrate(&env.ctx, &selector(), &filter, &to_gp2(false)).await.unwrap();

    assert!(outcome.succeeded());
    assert_eq!(outcome.stop, StateChange::Unchanged);
    assert_eq!(outcome.start, None);
    let calls = env.storage.calls().await;
    assert!(!calls.iter().any(|c| matches!(c.kind, CallKind::StartInstance | CallKind::StopInstance)));
    assert_eq!(env.storage.instance(INSTANCE_ID).await.unwrap().state, InstanceState::Stopped);
}

#[tokio::test]
async fn test_same_type_migration_is_rejected_before_any_call() {
    let env = three_volume_env(InstanceState::Running);
    let filter = VolumeFilter::device("/dev/sdf").unwrap();
    let request = MigrationRequest {
        volume_type: VolumeType::Standard,
        iops: None,
        dry_run: false,
    };

    let err = migrate(&env.ctx, &selector(), &filter, &request).await.unwrap_err();

    assert!(matches!(err, Error::AllVolumesSameType(VolumeType::Standard)));
    assert!(err.is_precondition());
    assert!(env.storage.calls().await.iter().all(|c| !c.kind.is_mutation()));
}

#[tokio::test]
async fn test_iops_ratio_is_rejected_before_any_call() {
    let env = TestEnv::with_instance(
        InstanceState::Running,
        vec![attached_volume("vol-f", "/dev/sdf", VolumeType::Standard, 10)],
    );
    let filter = VolumeFilter::device("/dev/sdf").unwrap();
    let request = MigrationRequest {
        volume_type: VolumeType::Io1,
        iops: Some(1000),
        dry_run: false,
    };

    let err = migrate(&env.ctx, &selector(), &filter, &request).await.unwrap_err();

    assert_eq!(
        err.to_string(),
        "IOPS/size ratio (100.00) for volume vol-f is not valid (must be lower or equal than 30)"
    );
    assert!(env.storage.calls().await.iter().all(|c| !c.kind.is_mutation()));
}

#[tokio::test]
async fn test_io1_migration_carries_iops() {
    let env = TestEnv::with_instance(
        InstanceState::Running,
        vec![attached_volume("vol-f", "/dev/sdf", VolumeType::Gp2, 100)],
    );
    let filter = VolumeFilter::device("/dev/sdf").unwrap();
    let request = MigrationRequest {
        volume_type: VolumeType::Io1,
        iops: Some(3000),
        dry_run: false,
    };

    let outcome = migrate(&env.ctx, &selector(), &filter, &request).await.unwrap();

    assert!(outcome.succeeded());
    let new_id = outcome.reports[0].new_volume_id.clone().unwrap();
    let volume = env.storage.volume(&new_id).await.unwrap();
    assert_eq!(volume.volume_type, VolumeType::Io1);
    assert_eq!(volume.iops, Some(3000));
    assert_eq!(volume.device(), Some("/dev/sdf"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_detach_failure_aborts_only_that_volume() {
    let env = three_volume_env(InstanceState::Running);
    env.storage.fail_on(CallKind::DetachVolume, "vol-g", "volume is busy").await;
    let filter = VolumeFilter::device("/dev/sd[fgh]").unwrap();

    let outcome = migrate(&env.ctx, &selector(), &filter, &to_gp2(false)).await.unwrap();

    assert!(!outcome.succeeded());
    assert_eq!(outcome.start, Some(StateChange::Changed));

    let failed = &outcome.reports[1];
    assert_eq!(failed.volume_id, "vol-g");
    let (step, cause) = failed.failure().unwrap();
    assert_eq!(step, MigrationStep::Detach);
    assert!(cause.contains("volume is busy"));
    for step in [MigrationStep::CreateReplacement, MigrationStep::Attach, MigrationStep::DeleteOld] {
        assert!(matches!(failed.outcome(step), Some(StepOutcome::Skipped(_))));
    }
    assert!(failed.new_volume_id.is_none());

    // the recovery snapshot stays, the original volume is untouched
    let snapshot_id = failed.snapshot_id.clone().unwrap();
    assert!(env.storage.snapshots().await.iter().any(|s| s.id == snapshot_id));
    let original = env.storage.volume("vol-g").await.unwrap();
    assert_eq!(original.device(), Some("/dev/sdg"));

    assert!(outcome.reports[0].succeeded());
    assert!(outcome.reports[2].succeeded());
    assert!(env.storage.volume("vol-f").await.is_none());

    let lines = env.rendered();
    assert!(lines.iter().any(|l| l.starts_with("[1] Failed to detach for vol-g")));
}

#[tokio::test]
async fn test_unmatched_device_pattern() {
    let env = three_volume_env(InstanceState::Running);
    let filter = VolumeFilter::device("/dev/xvd").unwrap();

    let err = migrate(&env.ctx, &selector(), &filter, &to_gp2(false)).await.unwrap_err();

    assert_eq!(
        err.to_string(),
        format!("Regex '/dev/xvd' does not match any volume device for instance {}", INSTANCE_ID)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_restart_keeps_volume_reports() {
    let env = TestEnv::with_instance(
        InstanceState::Running,
        vec![attached_volume("vol-f", "/dev/sdf", VolumeType::Standard, 100)],
    );
    env.storage
        .fail_on(CallKind::StartInstance, INSTANCE_ID, "insufficient capacity")
        .await;
    let filter = VolumeFilter::device("/dev/sdf").unwrap();

    let outcome = migrate(&env.ctx, &selector(), &filter, &to_gp2(false)).await.unwrap();

    assert!(!outcome.succeeded());
    assert_eq!(outcome.start, None);
    let cause = outcome.start_error.as_deref().unwrap();
    assert!(cause.contains("insufficient capacity"), "{}", cause);

    // the volume itself was migrated and its report survives
    assert_eq!(outcome.reports.len(), 1);
    let report = &outcome.reports[0];
    assert!(report.succeeded());
    assert!(report.snapshot_id.is_some());
    let new_volume_id = report.new_volume_id.clone().unwrap();
    assert!(env.storage.volume("vol-f").await.is_none());
    let replacement = env.storage.volume(&new_volume_id).await.unwrap();
    assert_eq!(replacement.volume_type, VolumeType::Gp2);
    assert_eq!(env.storage.snapshots().await.len(), 1);

    let instance = env.storage.instance(INSTANCE_ID).await.unwrap();
    assert_eq!(instance.state, InstanceState::Stopped);
    assert!(env.notices.notices().iter().any(|n| n.level == NoticeLevel::Error
        && n.message.contains("insufficient capacity")));
}
