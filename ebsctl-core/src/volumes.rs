//! Volume lookup, selection and lifecycle operations

use crate::context::Context;
use crate::log_volume_operation;
use crate::poller::wait_until;
use crate::provider::{accept_dry_run, lookup_error, CreateVolumeRequest, ProviderError};
use ebsctl_common::{
    AttachmentStatus, Error, MatchField, Operation, ResourceKind, Result, Volume, VolumeStatus,
    MAX_IOPS, MAX_IOPS_RATIO, MIN_IOPS,
};
use regex::Regex;
use std::collections::BTreeMap;

/// Regular expression matched against the start of a volume's device path
/// or `Name` tag
#[derive(Debug, Clone)]
pub struct VolumeFilter {
    field: MatchField,
    pattern: String,
    regex: Regex,
}

impl VolumeFilter {
    pub fn new(field: MatchField, pattern: &str) -> Result<Self> {
        let regex = Regex::new(&format!("^(?:{})", pattern)).map_err(|e| Error::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            field,
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn device(pattern: &str) -> Result<Self> {
        Self::new(MatchField::Device, pattern)
    }

    pub fn name(pattern: &str) -> Result<Self> {
        Self::new(MatchField::Name, pattern)
    }

    pub fn field(&self) -> MatchField {
        self.field
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Volumes without the matched attribute never match
    pub fn matches(&self, volume: &Volume) -> bool {
        let value = match self.field {
            MatchField::Device => volume.device(),
            MatchField::Name => volume.tags.get(ebsctl_common::NAME_TAG).map(String::as_str),
        };
        value.is_some_and(|v| self.regex.is_match(v))
    }
}

pub async fn get_volume(ctx: &Context, id: &str) -> Result<Volume> {
    ctx.storage()
        .get_volume(id)
        .await
        .map_err(|e| lookup_error(ResourceKind::Volume, id, Operation::FetchVolumes, e))
}

/// Every volume attached to an instance; none at all is an error
pub async fn volumes_attached_to(ctx: &Context, instance_id: &str) -> Result<Vec<Volume>> {
    let volumes = ctx
        .storage()
        .list_volumes_attached_to(instance_id)
        .await
        .map_err(|e| lookup_error(ResourceKind::Instance, instance_id, Operation::FetchVolumes, e))?;

    if volumes.is_empty() {
        return Err(Error::NoVolumes {
            instance_id: instance_id.to_string(),
        });
    }
    Ok(volumes)
}

/// Volumes attached to an instance that match `filter`
pub async fn select_volumes(ctx: &Context, instance_id: &str, filter: &VolumeFilter) -> Result<Vec<Volume>> {
    let matched: Vec<Volume> = volumes_attached_to(ctx, instance_id)
        .await?
        .into_iter()
        .filter(|v| filter.matches(v))
        .collect();

    if matched.is_empty() {
        return Err(Error::NoMatchingVolumes {
            instance_id: instance_id.to_string(),
            field: filter.field(),
            pattern: filter.pattern().to_string(),
        });
    }

    tracing::debug!(
        instance_id,
        field = %filter.field(),
        pattern = filter.pattern(),
        count = matched.len(),
        "Selected volumes"
    );
    Ok(matched)
}

/// Check a provisioned IOPS value against the limits and the volume's size
pub fn check_iops(volume: &Volume, iops: u32) -> Result<()> {
    if !(MIN_IOPS..=MAX_IOPS).contains(&iops) {
        return Err(Error::InvalidIops(iops));
    }

    if u64::from(iops) > u64::from(volume.size_gb) * u64::from(MAX_IOPS_RATIO) {
        return Err(Error::InvalidIopsRatio {
            volume_id: volume.id.clone(),
            ratio: f64::from(iops) / f64::from(volume.size_gb.max(1)),
            max: MAX_IOPS_RATIO,
        });
    }
    Ok(())
}

/// Detach a volume and wait until the attachment is gone
///
/// Returns `false` when only a dry-run probe was sent.
pub async fn detach_volume_and_wait(ctx: &Context, volume: &Volume, dry_run: bool) -> Result<bool> {
    let Some(device) = volume.device() else {
        return Err(Error::VolumeNotAttached(volume.id.clone()));
    };
    log_volume_operation!(Operation::DetachVolume, volume.id, dry_run, device = device);

    let sent = ctx.storage().detach_volume(&volume.id, dry_run).await;
    if accept_dry_run(sent, dry_run, Operation::DetachVolume, &volume.id)?.is_none() {
        return Ok(false);
    }

    let polling = ctx.polling();
    let id = volume.id.as_str();
    wait_until(polling.settle(), polling.max_attempts, Operation::DetachVolume, id, || async move {
        let current = get_volume(ctx, id).await?;
        Ok(current.attachment.is_none().then_some(()))
    })
    .await?;
    Ok(true)
}

/// Attach a volume and wait until the attachment is reported as attached
pub async fn attach_volume_and_wait(
    ctx: &Context,
    id: &str,
    instance_id: &str,
    device: &str,
    dry_run: bool,
) -> Result<bool> {
    log_volume_operation!(Operation::AttachVolume, id, dry_run, instance_id = instance_id, device = device);

    let sent = ctx.storage().attach_volume(id, instance_id, device, dry_run).await;
    if accept_dry_run(sent, dry_run, Operation::AttachVolume, id)?.is_none() {
        return Ok(false);
    }

    let polling = ctx.polling();
    wait_until(polling.settle(), polling.max_attempts, Operation::AttachVolume, id, || async move {
        let current = get_volume(ctx, id).await?;
        let attached = current
            .attachment
            .as_ref()
            .is_some_and(|a| a.status == AttachmentStatus::Attached);
        Ok(attached.then_some(()))
    })
    .await?;
    Ok(true)
}

/// Delete a volume and wait until the provider no longer reports it
pub async fn delete_volume_and_wait(ctx: &Context, id: &str, dry_run: bool) -> Result<bool> {
    log_volume_operation!(Operation::DeleteVolume, id, dry_run);

    let sent = ctx.storage().delete_volume(id, dry_run).await;
    if accept_dry_run(sent, dry_run, Operation::DeleteVolume, id)?.is_none() {
        return Ok(false);
    }

    let polling = ctx.polling();
    wait_until(polling.settle(), polling.max_attempts, Operation::DeleteVolume, id, || async move {
        match ctx.storage().get_volume(id).await {
            Err(ProviderError::NotFound(_)) => Ok(Some(())),
            Ok(volume) if volume.status == VolumeStatus::Deleted => Ok(Some(())),
            Ok(_) => Ok(None),
            Err(e) => Err(Error::lifecycle(Operation::DeleteVolume, id, e)),
        }
    })
    .await?;
    Ok(true)
}

/// Create a volume and wait until it is available
///
/// Returns `None` when only a dry-run probe was sent.
pub async fn create_volume_and_wait(
    ctx: &Context,
    request: &CreateVolumeRequest,
    dry_run: bool,
) -> Result<Option<Volume>> {
    let source = request.snapshot_id.as_deref().unwrap_or("scratch");
    log_volume_operation!(
        Operation::CreateVolume,
        source,
        dry_run,
        volume_type = request.volume_type,
        zone = request.zone
    );

    let sent = ctx.storage().create_volume(request, dry_run).await;
    let Some(volume) = accept_dry_run(sent, dry_run, Operation::CreateVolume, source)? else {
        return Ok(None);
    };

    let polling = ctx.polling();
    let id = volume.id.as_str();
    let ready = wait_until(
        polling.volume_create(),
        polling.max_attempts,
        Operation::CreateVolume,
        id,
        || async move {
            let current = get_volume(ctx, id).await?;
            match current.status {
                VolumeStatus::Available => Ok(Some(current)),
                VolumeStatus::Creating => Ok(None),
                other => Err(Error::lifecycle(
                    Operation::CreateVolume,
                    id,
                    format!("volume status is {:?}", other).to_lowercase(),
                )),
            }
        },
    )
    .await?;
    Ok(Some(ready))
}

/// Apply tags to a volume, one call per tag
pub async fn tag_volume(ctx: &Context, id: &str, tags: &BTreeMap<String, String>) -> Result<()> {
    for (key, value) in tags {
        ctx.storage()
            .tag_resource(id, key, value)
            .await
            .map_err(|e| Error::lifecycle(Operation::TagResource, id, e))?;
    }
    Ok(())
}
