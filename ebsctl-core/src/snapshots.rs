//! Snapshot lifecycle operations and retention cleanup

use crate::context::Context;
use crate::instances::get_instance;
use crate::log_volume_operation;
use crate::poller::wait_until;
use crate::provider::{accept_dry_run, lookup_error};
use crate::retention::{synthetic_history, RetentionClassifier, RetentionSummary};
use crate::volumes::get_volume;
use chrono::{DateTime, Utc};
use ebsctl_common::{
    Error, Operation, ResourceKind, Result, RetentionClass, RetentionPolicy, Snapshot,
    SnapshotStatus, NAME_TAG,
};
use serde::{Deserialize, Serialize};

/// Description used when the volume has no attachment
pub const UNATTACHED_DESCRIPTION: &str = "Volume was not attached";

/// Optional overrides for a new snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRequest {
    /// Value of the `Name` tag; defaults to the volume's name
    pub name: Option<String>,
    /// Defaults to `"<instance> <device>"`
    pub description: Option<String>,
}

pub async fn get_snapshot(ctx: &Context, id: &str) -> Result<Snapshot> {
    ctx.storage()
        .get_snapshot(id)
        .await
        .map_err(|e| lookup_error(ResourceKind::Snapshot, id, Operation::FetchSnapshots, e))
}

/// Every snapshot of an existing volume; a volume without any is an error
pub async fn snapshots_of(ctx: &Context, volume_id: &str) -> Result<Vec<Snapshot>> {
    get_volume(ctx, volume_id).await?;

    let snapshots = ctx
        .storage()
        .list_snapshots_of(volume_id)
        .await
        .map_err(|e| Error::lifecycle(Operation::FetchSnapshots, volume_id, e))?;

    if snapshots.is_empty() {
        return Err(Error::NoSnapshots {
            volume_id: volume_id.to_string(),
        });
    }
    Ok(snapshots)
}

/// Create a snapshot of a volume and tag it with its name
///
/// Returns `None` for a dry run.
pub async fn create_snapshot(
    ctx: &Context,
    volume_id: &str,
    request: &SnapshotRequest,
    dry_run: bool,
) -> Result<Option<Snapshot>> {
    let volume = get_volume(ctx, volume_id).await?;

    let name = request
        .name
        .clone()
        .unwrap_or_else(|| volume.name().to_string());

    let description = match (&request.description, &volume.attachment) {
        (Some(description), _) => description.clone(),
        (None, Some(attachment)) => {
            let instance = get_instance(ctx, &attachment.instance_id).await?;
            format!("{} {}", instance.name(), attachment.device)
        }
        (None, None) => UNATTACHED_DESCRIPTION.to_string(),
    };

    log_volume_operation!(Operation::CreateSnapshot, volume_id, dry_run, description = description);

    let sent = ctx
        .storage()
        .create_snapshot(volume_id, &description, dry_run)
        .await;
    let Some(snapshot) = accept_dry_run(sent, dry_run, Operation::CreateSnapshot, volume_id)? else {
        return Ok(None);
    };

    ctx.storage()
        .tag_resource(&snapshot.id, NAME_TAG, &name)
        .await
        .map_err(|e| Error::lifecycle(Operation::TagResource, &snapshot.id, e))?;

    tracing::info!(snapshot_id = %snapshot.id, volume_id, name = %name, "Snapshot created");
    Ok(Some(snapshot))
}

/// Poll a snapshot until it is completed
pub async fn wait_for_snapshot(ctx: &Context, id: &str) -> Result<Snapshot> {
    let polling = ctx.polling();
    wait_until(polling.snapshot(), polling.max_attempts, Operation::CreateSnapshot, id, || async move {
        let snapshot = get_snapshot(ctx, id).await?;
        match snapshot.status {
            SnapshotStatus::Completed => Ok(Some(snapshot)),
            SnapshotStatus::Pending => Ok(None),
            SnapshotStatus::Error => Err(Error::lifecycle(
                Operation::CreateSnapshot,
                id,
                "snapshot status is error",
            )),
        }
    })
    .await
}

/// Delete a snapshot; returns `false` when only a dry-run probe was sent
pub async fn delete_snapshot(ctx: &Context, id: &str, dry_run: bool) -> Result<bool> {
    tracing::info!(snapshot_id = id, dry_run, "Deleting snapshot");
    let sent = ctx.storage().delete_snapshot(id, dry_run).await;
    Ok(accept_dry_run(sent, dry_run, Operation::DeleteSnapshot, id)?.is_some())
}

/// What happened to one snapshot during a cleanup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "error", rename_all = "kebab-case")]
pub enum DeletionOutcome {
    Kept,
    Deleted,
    /// Dry run or synthetic history: nothing was deleted
    Simulated,
    /// Not kept, but still pending and therefore left alone
    SkippedPending,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanEntry {
    pub snapshot_id: String,
    pub start_time: DateTime<Utc>,
    pub class: Option<RetentionClass>,
    #[serde(flatten)]
    pub outcome: DeletionOutcome,
}

/// Result of cleaning the snapshots of one volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanReport {
    /// `None` for a synthetic history
    pub volume_id: Option<String>,
    pub dry_run: bool,
    pub entries: Vec<CleanEntry>,
    /// Set when the volume could not be cleaned at all
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CleanReport {
    /// Report for a volume whose cleanup failed before any snapshot was classified
    pub fn aborted(volume_id: &str, dry_run: bool, cause: &Error) -> Self {
        Self {
            volume_id: Some(volume_id.to_string()),
            dry_run,
            entries: Vec::new(),
            error: Some(cause.to_string()),
        }
    }

    pub fn kept(&self) -> impl Iterator<Item = &CleanEntry> {
        self.entries.iter().filter(|e| e.class.is_some())
    }

    pub fn removed(&self) -> impl Iterator<Item = &CleanEntry> {
        self.entries.iter().filter(|e| e.class.is_none())
    }

    pub fn failures(&self) -> impl Iterator<Item = &CleanEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, DeletionOutcome::Failed(_)))
    }

    /// Failed deletions plus one for a volume that was not cleaned
    pub fn failure_count(&self) -> usize {
        self.failures().count() + usize::from(self.error.is_some())
    }

    pub fn has_failures(&self) -> bool {
        self.failure_count() > 0
    }

    pub fn summary(&self) -> RetentionSummary {
        RetentionSummary::tally(self.entries.iter().map(|entry| entry.class))
    }
}

/// Delete every snapshot of a volume the policy does not keep
///
/// A failed deletion is recorded against its snapshot and the cleanup goes on.
pub async fn clean_snapshots(
    ctx: &Context,
    volume_id: &str,
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
    dry_run: bool,
) -> Result<CleanReport> {
    let snapshots = snapshots_of(ctx, volume_id).await?;
    let classified = RetentionClassifier::new(now).classify(&snapshots, policy);

    let mut entries = Vec::with_capacity(classified.len());
    for item in classified {
        let outcome = if item.is_kept() {
            DeletionOutcome::Kept
        } else if item.status == SnapshotStatus::Pending {
            tracing::info!(snapshot_id = %item.snapshot_id, "Not deleting pending snapshot");
            DeletionOutcome::SkippedPending
        } else {
            match delete_snapshot(ctx, &item.snapshot_id, dry_run).await {
                Ok(true) => DeletionOutcome::Deleted,
                Ok(false) => DeletionOutcome::Simulated,
                Err(e) => {
                    tracing::error!(snapshot_id = %item.snapshot_id, error = %e, "Snapshot deletion failed");
                    DeletionOutcome::Failed(e.to_string())
                }
            }
        };

        entries.push(CleanEntry {
            snapshot_id: item.snapshot_id,
            start_time: item.start_time,
            class: item.class,
            outcome,
        });
    }

    Ok(CleanReport {
        volume_id: Some(volume_id.to_string()),
        dry_run,
        entries,
        error: None,
    })
}

/// Classify a synthetic history of `days` days without contacting a provider
pub fn clean_synthetic(policy: &RetentionPolicy, now: DateTime<Utc>, days: u32) -> CleanReport {
    let snapshots = synthetic_history(now, days, "vol-test");
    let entries = RetentionClassifier::new(now)
        .classify(&snapshots, policy)
        .into_iter()
        .map(|item| CleanEntry {
            outcome: if item.is_kept() {
                DeletionOutcome::Kept
            } else {
                DeletionOutcome::Simulated
            },
            snapshot_id: item.snapshot_id,
            start_time: item.start_time,
            class: item.class,
        })
        .collect();

    CleanReport {
        volume_id: None,
        dry_run: true,
        entries,
        error: None,
    }
}
