//! Operator workflows
//!
//! Each workflow resolves its targets, rejects invalid requests before any
//! mutating call, and then drives the lifecycle operations. Batch work on
//! several volumes is fanned out with [`run_parallel`] and joined before the
//! workflow moves on.

use crate::context::Context;
use crate::instances::{
    resolve_instance, start_instance_and_wait, stop_instance_and_wait, InstanceSelector, StateChange,
};
use crate::migration::{check_migration_logic, MigrationReport, MigrationRequest, VolumeMigration};
use crate::parallel::{run_parallel, TaskOutcome};
use crate::progress::{Notice, NoticeLevel};
use crate::snapshots::{clean_snapshots, clean_synthetic, create_snapshot, CleanReport, SnapshotRequest};
use crate::volumes::{get_volume, select_volumes, VolumeFilter};
use chrono::{DateTime, Utc};
use ebsctl_common::{Error, InstanceState, Result, RetentionPolicy, Volume};
use serde::{Deserialize, Serialize};

/// Which volumes a workflow acts on
#[derive(Debug, Clone)]
pub enum VolumeTarget {
    /// A single volume, attached or not
    Volume(String),
    /// The volumes attached to an instance that match a filter
    Instance {
        selector: InstanceSelector,
        filter: VolumeFilter,
    },
}

async fn resolve_target(ctx: &Context, target: &VolumeTarget) -> Result<Vec<Volume>> {
    match target {
        VolumeTarget::Volume(id) => Ok(vec![get_volume(ctx, id).await?]),
        VolumeTarget::Instance { selector, filter } => {
            let instance = resolve_instance(ctx, selector).await?;
            select_volumes(ctx, &instance.id, filter).await
        }
    }
}

/// Remove the snapshots the policy does not keep, one volume after the other
///
/// Only target resolution aborts the workflow. A volume that cannot be
/// cleaned gets a report carrying the error and the next volume is cleaned;
/// failed deletions are recorded against their snapshots.
pub async fn clean(
    ctx: &Context,
    target: &VolumeTarget,
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
    dry_run: bool,
) -> Result<Vec<CleanReport>> {
    let volumes = resolve_target(ctx, target).await?;
    tracing::info!(volumes = volumes.len(), policy = %policy, dry_run, "Cleaning snapshots");

    let mut reports = Vec::with_capacity(volumes.len());
    for volume in &volumes {
        ctx.notify(
            Notice::new(
                NoticeLevel::Info,
                format!("Cleaning snapshots of volume {} ({})...", volume.id, policy),
            )
            .dry_run(dry_run),
        );
        let report = match clean_snapshots(ctx, &volume.id, policy, now, dry_run).await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(volume_id = %volume.id, error = %e, "Volume cleanup failed");
                ctx.notify(Notice::new(NoticeLevel::Error, e.to_string()).dry_run(dry_run));
                reports.push(CleanReport::aborted(&volume.id, dry_run, &e));
                continue;
            }
        };
        for entry in report.failures() {
            ctx.notify(
                Notice::new(NoticeLevel::Error, format!("Could not delete snapshot {}", entry.snapshot_id))
                    .dry_run(dry_run),
            );
        }
        reports.push(report);
    }
    Ok(reports)
}

/// Classify a synthetic history of `days` days; no provider is involved
pub fn clean_test(policy: &RetentionPolicy, now: DateTime<Utc>, days: u32) -> CleanReport {
    tracing::info!(days, policy = %policy, "Classifying synthetic snapshot history");
    clean_synthetic(policy, now, days)
}

/// Result of snapshotting one volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotResult {
    pub volume_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SnapshotResult {
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }
}

async fn snapshot_one(
    ctx: Context,
    task: Option<usize>,
    volume_id: String,
    request: SnapshotRequest,
    dry_run: bool,
) -> SnapshotResult {
    let say = |level, message: String| ctx.notify(Notice::new(level, message).task(task).dry_run(dry_run));

    say(NoticeLevel::Info, format!("Creating snapshot for volume {}...", volume_id));
    match create_snapshot(&ctx, &volume_id, &request, dry_run).await {
        Ok(Some(snapshot)) => {
            say(NoticeLevel::Ok, format!("Snapshot {} created for volume {}", snapshot.id, volume_id));
            SnapshotResult {
                volume_id,
                snapshot_id: Some(snapshot.id),
                error: None,
            }
        }
        Ok(None) => {
            say(
                NoticeLevel::Ok,
                format!("Snapshot for volume {} was not created because dry flag is enabled", volume_id),
            );
            SnapshotResult {
                volume_id,
                snapshot_id: None,
                error: None,
            }
        }
        Err(e) => {
            say(NoticeLevel::Error, e.to_string());
            SnapshotResult {
                volume_id,
                snapshot_id: None,
                error: Some(e.to_string()),
            }
        }
    }
}

/// Snapshot every targeted volume, concurrently or in sequence
///
/// Per-volume failures are reported in the results; lookup failures abort.
pub async fn create_snapshots(
    ctx: &Context,
    target: &VolumeTarget,
    request: &SnapshotRequest,
    parallel: bool,
    dry_run: bool,
) -> Result<Vec<SnapshotResult>> {
    let volumes = resolve_target(ctx, target).await?;

    if !parallel {
        let mut results = Vec::with_capacity(volumes.len());
        for volume in volumes {
            results.push(snapshot_one(ctx.clone(), None, volume.id, request.clone(), dry_run).await);
        }
        return Ok(results);
    }

    ctx.notify(Notice::new(NoticeLevel::Banner, "STARTING PARALLEL TASKS"));
    let ids: Vec<String> = volumes.into_iter().map(|v| v.id).collect();
    let units: Vec<_> = ids
        .iter()
        .enumerate()
        .map(|(task, id)| snapshot_one(ctx.clone(), Some(task), id.clone(), request.clone(), dry_run))
        .collect();
    let outcomes = run_parallel("snapshot", units).await;
    ctx.notify(Notice::new(NoticeLevel::Banner, "FINISHED PARALLEL TASKS"));

    Ok(ids
        .into_iter()
        .zip(outcomes)
        .map(|(volume_id, outcome)| match outcome {
            TaskOutcome::Finished(result) => result,
            TaskOutcome::Crashed(cause) => SnapshotResult {
                volume_id,
                snapshot_id: None,
                error: Some(cause),
            },
        })
        .collect())
}

/// Everything a migration run did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationOutcome {
    pub instance_id: String,
    pub dry_run: bool,
    pub stop: StateChange,
    /// `None` when the instance was not running before the migration or
    /// could not be started again
    pub start: Option<StateChange>,
    /// Why the instance could not be started again
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_error: Option<String>,
    pub reports: Vec<MigrationReport>,
}

impl MigrationOutcome {
    pub fn succeeded(&self) -> bool {
        self.start_error.is_none() && self.reports.iter().all(MigrationReport::succeeded)
    }
}

/// Migrate the volumes of an instance that match `filter`
///
/// The whole batch is validated before the instance is stopped. Every volume
/// then migrates in its own task; the instance is started again only after all
/// of them have finished, and only if it was running before. Once the instance
/// has been stopped the per-volume reports are always returned; a failed
/// restart is recorded in the outcome.
pub async fn migrate(
    ctx: &Context,
    selector: &InstanceSelector,
    filter: &VolumeFilter,
    request: &MigrationRequest,
) -> Result<MigrationOutcome> {
    request.validate()?;
    let instance = resolve_instance(ctx, selector).await?;
    let volumes = select_volumes(ctx, &instance.id, filter).await?;

    for warning in check_migration_logic(&volumes, request)? {
        ctx.warning(warning);
    }

    let migrations = volumes
        .into_iter()
        .enumerate()
        .map(|(task, volume)| VolumeMigration::new(task, &instance.id, volume, *request))
        .collect::<Result<Vec<_>>>()?;

    let dry_run = request.dry_run;
    let was_running = instance.state == InstanceState::Running;
    tracing::info!(
        instance_id = %instance.id,
        volumes = migrations.len(),
        target = %request.target_label(),
        dry_run,
        "Starting migration"
    );

    ctx.notify(
        Notice::new(NoticeLevel::Info, format!("Stopping instance {}...", instance.id)).dry_run(dry_run),
    );
    let stop = stop_instance_and_wait(ctx, &instance.id, dry_run).await?;
    let stopped = match stop {
        StateChange::Unchanged => format!("Instance {} was already stopped", instance.id),
        _ => format!("Instance {} was stopped", instance.id),
    };
    ctx.notify(Notice::new(NoticeLevel::Ok, stopped).dry_run(dry_run));

    ctx.notify(Notice::new(NoticeLevel::Banner, "STARTING PARALLEL TASKS"));
    let volume_ids: Vec<(String, String)> = migrations
        .iter()
        .map(|m| (m.volume_id().to_string(), m.device().to_string()))
        .collect();
    let units: Vec<_> = migrations.into_iter().map(|m| m.run(ctx.clone())).collect();
    let outcomes = run_parallel("migration", units).await;
    ctx.notify(Notice::new(NoticeLevel::Banner, "FINISHED PARALLEL TASKS"));

    let reports: Vec<MigrationReport> = outcomes
        .into_iter()
        .zip(volume_ids)
        .enumerate()
        .map(|(task, (outcome, (volume_id, device)))| match outcome {
            TaskOutcome::Finished(report) => report,
            TaskOutcome::Crashed(cause) => MigrationReport::crashed(task, volume_id, device, dry_run, cause),
        })
        .collect();

    let failed = reports.iter().filter(|r| !r.succeeded()).count();
    if failed == 0 {
        ctx.notify(
            Notice::new(NoticeLevel::Ok, format!("All volumes migrated to {}", request.target_label()))
                .dry_run(dry_run),
        );
    } else {
        ctx.notify(
            Notice::new(
                NoticeLevel::Error,
                format!("{} of {} volume migrations failed", failed, reports.len()),
            )
            .dry_run(dry_run),
        );
    }

    let mut start = None;
    let mut start_error = None;
    if was_running {
        ctx.notify(
            Notice::new(NoticeLevel::Info, format!("Starting instance {}...", instance.id)).dry_run(dry_run),
        );
        match start_instance_and_wait(ctx, &instance.id, dry_run).await {
            Ok(change) => {
                ctx.notify(
                    Notice::new(NoticeLevel::Ok, format!("Instance {} was started", instance.id)).dry_run(dry_run),
                );
                start = Some(change);
            }
            Err(e) => {
                tracing::error!(instance_id = %instance.id, error = %e, "Instance restart failed");
                ctx.notify(Notice::new(NoticeLevel::Error, e.to_string()).dry_run(dry_run));
                start_error = Some(e.to_string());
            }
        }
    }

    Ok(MigrationOutcome {
        instance_id: instance.id,
        dry_run,
        stop,
        start,
        start_error,
        reports,
    })
}

/// Parse the `--devices` / `--volume-name` pair into a filter
pub fn volume_filter(devices: Option<&str>, volume_name: Option<&str>) -> Result<VolumeFilter> {
    match (devices, volume_name) {
        (Some(_), Some(_)) => Err(Error::InvalidArgument {
            option: "devices".to_string(),
            reason: "cannot be combined with --volume-name".to_string(),
        }),
        (Some(pattern), None) => VolumeFilter::device(pattern),
        (None, Some(pattern)) => VolumeFilter::name(pattern),
        (None, None) => VolumeFilter::device(".*"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ebsctl_common::MatchField;

    #[test]
    fn test_volume_filter_options() {
        let filter = volume_filter(Some("/dev/sd[fg]"), None).unwrap();
        assert_eq!(filter.field(), MatchField::Device);

        let filter = volume_filter(None, Some("data")).unwrap();
        assert_eq!(filter.field(), MatchField::Name);

        let filter = volume_filter(None, None).unwrap();
        assert_eq!(filter.pattern(), ".*");

        assert!(matches!(
            volume_filter(Some("a"), Some("b")),
            Err(Error::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_snapshot_result_failed() {
        let result = SnapshotResult {
            volume_id: "vol-1".to_string(),
            snapshot_id: None,
            error: Some("boom".to_string()),
        };
        assert!(result.failed());
    }
}
