//! Volume migration state machine
//!
//! A volume moves to a new type (and IOPS) by being snapshotted, detached,
//! recreated from the snapshot and reattached at the same device, after which
//! the old volume is deleted. Steps run strictly in order and nothing is
//! rolled back: a failing step aborts that volume only and the snapshot taken
//! in the second step is always left in place.

use crate::context::Context;
use crate::progress::{Notice, NoticeLevel};
use crate::provider::CreateVolumeRequest;
use crate::snapshots::{create_snapshot, wait_for_snapshot, SnapshotRequest};
use crate::volumes::{
    attach_volume_and_wait, check_iops, create_volume_and_wait, delete_volume_and_wait,
    detach_volume_and_wait, tag_volume,
};
use ebsctl_common::{Error, Result, Volume, VolumeType, NAME_TAG};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Target configuration of a migration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRequest {
    pub volume_type: VolumeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iops: Option<u32>,
    pub dry_run: bool,
}

impl MigrationRequest {
    /// Check the target on its own, before any volume is looked at
    pub fn validate(&self) -> Result<()> {
        match (self.volume_type.is_provisioned(), self.iops) {
            (true, None) => Err(Error::IopsRequired(self.volume_type)),
            (false, Some(_)) => Err(Error::InvalidArgument {
                option: "iops".to_string(),
                reason: format!("only valid with --type {}", VolumeType::Io1),
            }),
            _ => Ok(()),
        }
    }

    /// `io1 (1000 IOPS)`, `gp2`
    pub fn target_label(&self) -> String {
        describe_type(self.volume_type, self.iops)
    }
}

fn describe_type(volume_type: VolumeType, iops: Option<u32>) -> String {
    match iops {
        Some(iops) if volume_type.is_provisioned() => format!("{} ({} IOPS)", volume_type, iops),
        _ => volume_type.to_string(),
    }
}

/// Reject a batch whose migration makes no sense; returns per-volume warnings
///
/// Fails when the target is invalid, when an IOPS value does not fit a
/// volume, or when every volume already has the requested configuration.
/// Individual volumes already in the target configuration only warn.
pub fn check_migration_logic(volumes: &[Volume], request: &MigrationRequest) -> Result<Vec<String>> {
    request.validate()?;

    let mut warnings = Vec::new();
    let mut same_type = 0;
    let mut same_iops = 0;

    for volume in volumes {
        match request.iops {
            Some(iops) if request.volume_type.is_provisioned() => {
                if volume.volume_type == request.volume_type && volume.iops == Some(iops) {
                    warnings.push(format!(
                        "{} will migrate from {} IOPS to {} IOPS which doesn't make too much sense",
                        volume.id, iops, iops
                    ));
                    same_iops += 1;
                }
                check_iops(volume, iops)?;
            }
            _ => {
                if volume.volume_type == request.volume_type {
                    warnings.push(format!(
                        "{} will migrate from {} type to {} type which doesn't make too much sense",
                        volume.id, volume.volume_type, request.volume_type
                    ));
                    same_type += 1;
                }
            }
        }
    }

    if !volumes.is_empty() {
        if same_type == volumes.len() {
            return Err(Error::AllVolumesSameType(request.volume_type));
        }
        if let Some(iops) = request.iops.filter(|_| same_iops == volumes.len()) {
            return Err(Error::AllVolumesSameIops(iops));
        }
    }

    Ok(warnings)
}

/// One step of a volume migration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MigrationStep {
    Validate,
    Snapshot,
    Detach,
    CreateReplacement,
    Attach,
    DeleteOld,
}

impl MigrationStep {
    pub const ALL: [MigrationStep; 6] = [
        MigrationStep::Validate,
        MigrationStep::Snapshot,
        MigrationStep::Detach,
        MigrationStep::CreateReplacement,
        MigrationStep::Attach,
        MigrationStep::DeleteOld,
    ];
}

impl fmt::Display for MigrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Validate => "validate",
            Self::Snapshot => "snapshot",
            Self::Detach => "detach",
            Self::CreateReplacement => "create replacement",
            Self::Attach => "attach",
            Self::DeleteOld => "delete old volume",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum StepOutcome {
    Done,
    /// Only a dry-run probe was sent
    Simulated,
    Skipped(String),
    Failed(String),
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Done => write!(f, "done"),
            Self::Simulated => write!(f, "simulated"),
            Self::Skipped(reason) => write!(f, "skipped ({})", reason),
            Self::Failed(cause) => write!(f, "failed: {}", cause),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: MigrationStep,
    #[serde(flatten)]
    pub outcome: StepOutcome,
}

/// Everything that happened to one volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationReport {
    pub task: usize,
    pub volume_id: String,
    pub device: String,
    pub dry_run: bool,
    pub snapshot_id: Option<String>,
    pub new_volume_id: Option<String>,
    pub steps: Vec<StepRecord>,
}

impl MigrationReport {
    pub fn outcome(&self, step: MigrationStep) -> Option<&StepOutcome> {
        self.steps.iter().find(|r| r.step == step).map(|r| &r.outcome)
    }

    pub fn failure(&self) -> Option<(MigrationStep, &str)> {
        self.steps.iter().find_map(|r| match &r.outcome {
            StepOutcome::Failed(cause) => Some((r.step, cause.as_str())),
            _ => None,
        })
    }

    pub fn succeeded(&self) -> bool {
        self.failure().is_none()
    }

    /// Report for a task that died without reporting anything itself
    pub fn crashed(task: usize, volume_id: String, device: String, dry_run: bool, cause: String) -> Self {
        Self {
            task,
            volume_id,
            device,
            dry_run,
            snapshot_id: None,
            new_volume_id: None,
            steps: vec![StepRecord {
                step: MigrationStep::Validate,
                outcome: StepOutcome::Failed(format!("task crashed: {}", cause)),
            }],
        }
    }
}

/// Migration of one attached volume
#[derive(Debug, Clone)]
pub struct VolumeMigration {
    task: usize,
    instance_id: String,
    device: String,
    volume: Volume,
    request: MigrationRequest,
}

impl VolumeMigration {
    /// The volume must be attached to `instance_id`
    pub fn new(task: usize, instance_id: &str, volume: Volume, request: MigrationRequest) -> Result<Self> {
        let device = volume
            .device()
            .ok_or_else(|| Error::VolumeNotAttached(volume.id.clone()))?
            .to_string();
        Ok(Self {
            task,
            instance_id: instance_id.to_string(),
            device,
            volume,
            request,
        })
    }

    pub fn volume_id(&self) -> &str {
        &self.volume.id
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// `Migration from standard to io1 (1000 IOPS) (i-1 /dev/sdf)`
    pub fn snapshot_description(&self) -> String {
        format!(
            "Migration from {} to {} ({} {})",
            describe_type(self.volume.volume_type, self.volume.iops),
            self.request.target_label(),
            self.instance_id,
            self.device
        )
    }

    fn say(&self, ctx: &Context, level: NoticeLevel, message: String) {
        ctx.notify(
            Notice::new(level, message)
                .task(Some(self.task))
                .dry_run(self.request.dry_run),
        );
    }

    /// Run every step; never returns early without a full report
    pub async fn run(self, ctx: Context) -> MigrationReport {
        let dry_run = self.request.dry_run;
        let mut report = MigrationReport {
            task: self.task,
            volume_id: self.volume.id.clone(),
            device: self.device.clone(),
            dry_run,
            snapshot_id: None,
            new_volume_id: None,
            steps: vec![StepRecord {
                step: MigrationStep::Validate,
                outcome: StepOutcome::Done,
            }],
        };

        if let Err((step, e)) = self.run_steps(&ctx, &mut report).await {
            self.say(&ctx, NoticeLevel::Error, format!("Failed to {} for {}: {}", step, self.volume.id, e));
            tracing::error!(
                task = self.task,
                volume_id = %self.volume.id,
                step = %step,
                error = %e,
                "Migration aborted"
            );
            report.steps.push(StepRecord {
                step,
                outcome: StepOutcome::Failed(e.to_string()),
            });
            for remaining in MigrationStep::ALL.iter().skip_while(|s| **s != step).skip(1) {
                report.steps.push(StepRecord {
                    step: *remaining,
                    outcome: StepOutcome::Skipped(format!("aborted after {} failed", step)),
                });
            }
        }

        report
    }

    async fn run_steps(
        &self,
        ctx: &Context,
        report: &mut MigrationReport,
    ) -> std::result::Result<(), (MigrationStep, Error)> {
        let dry_run = self.request.dry_run;
        let volume_id = self.volume.id.as_str();
        let record = |report: &mut MigrationReport, step: MigrationStep, outcome: StepOutcome| {
            tracing::info!(task = self.task, volume_id, step = %step, outcome = %outcome, dry_run, "Migration step");
            report.steps.push(StepRecord { step, outcome });
        };

        // Snapshot
        let description = self.snapshot_description();
        self.say(
            ctx,
            NoticeLevel::Info,
            format!("Creating snapshot for volume-id {}, description: {}...", volume_id, description),
        );
        let request = SnapshotRequest {
            name: None,
            description: Some(description),
        };
        let snapshot = create_snapshot(ctx, volume_id, &request, dry_run)
            .await
            .map_err(|e| (MigrationStep::Snapshot, e))?;
        let snapshot = match snapshot {
            Some(snapshot) => {
                self.say(ctx, NoticeLevel::Info, format!("Waiting for snapshot {} to be available...", snapshot.id));
                report.snapshot_id = Some(snapshot.id.clone());
                let completed = wait_for_snapshot(ctx, &snapshot.id)
                    .await
                    .map_err(|e| (MigrationStep::Snapshot, e))?;
                self.say(ctx, NoticeLevel::Ok, format!("Snapshot {} was created", completed.id));
                record(report, MigrationStep::Snapshot, StepOutcome::Done);
                Some(completed)
            }
            None => {
                self.say(ctx, NoticeLevel::Ok, "Snapshot was not created because dry flag is enabled".to_string());
                record(report, MigrationStep::Snapshot, StepOutcome::Simulated);
                None
            }
        };

        // Detach
        self.say(ctx, NoticeLevel::Info, format!("Detaching volume {}...", volume_id));
        let detached = detach_volume_and_wait(ctx, &self.volume, dry_run)
            .await
            .map_err(|e| (MigrationStep::Detach, e))?;
        if detached {
            self.say(ctx, NoticeLevel::Ok, format!("Volume {} was detached", volume_id));
            record(report, MigrationStep::Detach, StepOutcome::Done);
        } else {
            self.say(
                ctx,
                NoticeLevel::Ok,
                format!("Volume {} was not detached because dry flag is enabled", volume_id),
            );
            record(report, MigrationStep::Detach, StepOutcome::Simulated);
        }

        // Create replacement
        let snapshot_id = snapshot.as_ref().map(|s| s.id.clone());
        self.say(
            ctx,
            NoticeLevel::Info,
            format!(
                "Creating {} volume from snapshot {}...",
                self.request.target_label(),
                snapshot_id.as_deref().unwrap_or("(none)")
            ),
        );
        let create = CreateVolumeRequest {
            size_gb: self.volume.size_gb,
            zone: self.volume.zone.clone(),
            volume_type: self.request.volume_type,
            iops: self.request.iops,
            encrypted: snapshot.as_ref().map_or(self.volume.encrypted, |s| s.encrypted),
            snapshot_id,
        };
        let replacement = create_volume_and_wait(ctx, &create, dry_run)
            .await
            .map_err(|e| (MigrationStep::CreateReplacement, e))?;

        let Some(replacement) = replacement else {
            self.say(ctx, NoticeLevel::Ok, "Volume was not created because dry flag is enabled".to_string());
            record(report, MigrationStep::CreateReplacement, StepOutcome::Simulated);
            self.say(ctx, NoticeLevel::Ok, "Not attaching new volume, as this is a dry run".to_string());
            record(
                report,
                MigrationStep::Attach,
                StepOutcome::Skipped("no replacement volume in a dry run".to_string()),
            );
            return self.delete_old(ctx, report).await;
        };

        report.new_volume_id = Some(replacement.id.clone());
        let mut tags = self.volume.tags.clone();
        tags.insert(NAME_TAG.to_string(), self.volume.name().to_string());
        tag_volume(ctx, &replacement.id, &tags)
            .await
            .map_err(|e| (MigrationStep::CreateReplacement, e))?;
        self.say(
            ctx,
            NoticeLevel::Ok,
            format!("Volume {} was created from snapshot {}", replacement.id, create.snapshot_id.as_deref().unwrap_or("")),
        );
        record(report, MigrationStep::CreateReplacement, StepOutcome::Done);

        // Attach
        self.say(
            ctx,
            NoticeLevel::Info,
            format!("Attaching volume {} to {} as {}...", replacement.id, self.instance_id, self.device),
        );
        attach_volume_and_wait(ctx, &replacement.id, &self.instance_id, &self.device, dry_run)
            .await
            .map_err(|e| (MigrationStep::Attach, e))?;
        self.say(ctx, NoticeLevel::Ok, format!("Volume {} was attached", replacement.id));
        record(report, MigrationStep::Attach, StepOutcome::Done);

        self.delete_old(ctx, report).await
    }

    async fn delete_old(
        &self,
        ctx: &Context,
        report: &mut MigrationReport,
    ) -> std::result::Result<(), (MigrationStep, Error)> {
        let volume_id = self.volume.id.as_str();
        self.say(ctx, NoticeLevel::Info, format!("Deleting old volume {}...", volume_id));

        let deleted = delete_volume_and_wait(ctx, volume_id, self.request.dry_run)
            .await
            .map_err(|e| (MigrationStep::DeleteOld, e))?;

        let outcome = if deleted {
            self.say(
                ctx,
                NoticeLevel::Ok,
                format!(
                    "Old volume {} was deleted, but remember you still have its snapshot in case there're problems!",
                    volume_id
                ),
            );
            StepOutcome::Done
        } else {
            self.say(
                ctx,
                NoticeLevel::Ok,
                format!("Old volume {} was not deleted because dry flag is enabled", volume_id),
            );
            StepOutcome::Simulated
        };
        tracing::info!(task = self.task, volume_id, step = %MigrationStep::DeleteOld, outcome = %outcome, "Migration step");
        report.steps.push(StepRecord {
            step: MigrationStep::DeleteOld,
            outcome,
        });
        Ok(())
    }
}
