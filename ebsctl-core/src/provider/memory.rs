//! In-memory provider
//!
//! Behaves like the real provider closely enough to drive every workflow:
//! ids are validated, dry-run requests are checked for well-formed, existing
//! targets and answered with [`ProviderError::DryRun`], and state changes
//! settle over a poll or two the way they do remotely. Every call is recorded
//! for inspection.

use super::{BlockStorage, CreateVolumeRequest, ProviderError, ProviderResult};
use async_trait::async_trait;
use chrono::Utc;
use ebsctl_common::{
    Attachment, AttachmentStatus, DesiredRunState, Instance, InstanceState, Snapshot,
    SnapshotStatus, Volume, VolumeStatus, NAME_TAG,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Provider call, as recorded by [`MemoryBlockStorage`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallKind {
    GetInstance,
    FindInstance,
    StartInstance,
    StopInstance,
    ListVolumes,
    GetVolume,
    CreateVolume,
    DeleteVolume,
    AttachVolume,
    DetachVolume,
    TagResource,
    ListSnapshots,
    GetSnapshot,
    CreateSnapshot,
    DeleteSnapshot,
}

impl CallKind {
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            CallKind::GetInstance
                | CallKind::FindInstance
                | CallKind::ListVolumes
                | CallKind::GetVolume
                | CallKind::ListSnapshots
                | CallKind::GetSnapshot
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCall {
    pub kind: CallKind,
    pub target: String,
    pub dry_run: bool,
}

/// Initial world of a simulated provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryFixture {
    pub instances: Vec<Instance>,
    pub volumes: Vec<Volume>,
    pub snapshots: Vec<Snapshot>,
}

#[derive(Debug)]
struct PendingSnapshot {
    snapshot: Snapshot,
    polls_remaining: u32,
}

#[derive(Debug, Default)]
struct World {
    instances: BTreeMap<String, Instance>,
    volumes: BTreeMap<String, Volume>,
    snapshots: BTreeMap<String, PendingSnapshot>,
    calls: Vec<ProviderCall>,
    failures: HashMap<(CallKind, String), String>,
}

impl World {
    fn record(&mut self, kind: CallKind, target: &str, dry_run: bool) -> ProviderResult<()> {
        self.calls.push(ProviderCall {
            kind,
            target: target.to_string(),
            dry_run,
        });

        if dry_run {
            return Ok(());
        }
        match self.failures.get(&(kind, target.to_string())) {
            Some(message) => Err(ProviderError::api("InjectedFailure", message.clone())),
            None => Ok(()),
        }
    }

    fn instance_mut(&mut self, id: &str) -> ProviderResult<&mut Instance> {
        check_id(id, "i-")?;
        self.instances
            .get_mut(id)
            .ok_or_else(|| ProviderError::NotFound(id.to_string()))
    }

    fn volume_mut(&mut self, id: &str) -> ProviderResult<&mut Volume> {
        check_id(id, "vol-")?;
        self.volumes
            .get_mut(id)
            .ok_or_else(|| ProviderError::NotFound(id.to_string()))
    }

    fn snapshot_mut(&mut self, id: &str) -> ProviderResult<&mut PendingSnapshot> {
        check_id(id, "snap-")?;
        self.snapshots
            .get_mut(id)
            .ok_or_else(|| ProviderError::NotFound(id.to_string()))
    }

    /// Finish any transition a previous call started
    fn settle_instance(&mut self, id: &str) {
        if let Some(instance) = self.instances.get_mut(id) {
            instance.state = match instance.state {
                InstanceState::Pending => InstanceState::Running,
                InstanceState::Stopping => InstanceState::Stopped,
                InstanceState::ShuttingDown => InstanceState::Terminated,
                other => other,
            };
        }
    }

    fn settle_volume(&mut self, id: &str) {
        let Some(volume) = self.volumes.get_mut(id) else {
            return;
        };

        if volume.status == VolumeStatus::Deleting {
            self.volumes.remove(id);
            return;
        }
        if volume.status == VolumeStatus::Creating {
            volume.status = VolumeStatus::Available;
        }

        let settled = match volume.attachment.as_ref().map(|a| a.status) {
            Some(AttachmentStatus::Detaching) => Some(None),
            Some(AttachmentStatus::Attaching) => volume.attachment.take().map(|a| {
                Some(Attachment {
                    status: AttachmentStatus::Attached,
                    ..a
                })
            }),
            _ => None,
        };
        if let Some(attachment) = settled {
            volume.status = if attachment.is_some() {
                VolumeStatus::InUse
            } else {
                VolumeStatus::Available
            };
            volume.attachment = attachment;
        }
    }
}

fn check_id(id: &str, prefix: &str) -> ProviderResult<()> {
    let suffix = id.strip_prefix(prefix).unwrap_or_default();
    if suffix.is_empty() || !suffix.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ProviderError::Malformed(id.to_string()));
    }
    Ok(())
}

fn new_id(prefix: &str) -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("{}{}", prefix, &uuid[..17])
}

/// Simulated provider backed by in-memory state
#[derive(Debug)]
pub struct MemoryBlockStorage {
    world: RwLock<World>,
    snapshot_polls: u32,
}

impl MemoryBlockStorage {
    pub fn from_fixture(fixture: MemoryFixture) -> Self {
        let mut world = World::default();
        for instance in fixture.instances {
            world.instances.insert(instance.id.clone(), instance);
        }
        for volume in fixture.volumes {
            world.volumes.insert(volume.id.clone(), volume);
        }
        for snapshot in fixture.snapshots {
            world.snapshots.insert(
                snapshot.id.clone(),
                PendingSnapshot {
                    snapshot,
                    polls_remaining: 0,
                },
            );
        }

        Self {
            world: RwLock::new(world),
            snapshot_polls: 1,
        }
    }

    /// Load a fixture written as JSON
    pub fn from_json_file(path: &Path) -> ebsctl_common::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let fixture: MemoryFixture = serde_json::from_str(&content).map_err(|e| {
            ebsctl_common::Error::InvalidConfig(format!("fixture {}: {}", path.display(), e))
        })?;
        Ok(Self::from_fixture(fixture))
    }

    /// Number of status polls a new snapshot stays pending for
    pub fn with_snapshot_polls(mut self, polls: u32) -> Self {
        self.snapshot_polls = polls;
        self
    }

    /// Make every real (non dry-run) `kind` call on `target` fail
    pub async fn fail_on(&self, kind: CallKind, target: &str, message: &str) {
        self.world
            .write()
            .await
            .failures
            .insert((kind, target.to_string()), message.to_string());
    }

    pub async fn calls(&self) -> Vec<ProviderCall> {
        self.world.read().await.calls.clone()
    }

    /// Recorded calls that changed, or would have changed, state for real
    pub async fn mutations(&self) -> Vec<ProviderCall> {
        self.world
            .read()
            .await
            .calls
            .iter()
            .filter(|c| c.kind.is_mutation() && !c.dry_run)
            .cloned()
            .collect()
    }

    pub async fn instance(&self, id: &str) -> Option<Instance> {
        self.world.read().await.instances.get(id).cloned()
    }

    pub async fn volume(&self, id: &str) -> Option<Volume> {
        self.world.read().await.volumes.get(id).cloned()
    }

    pub async fn volumes(&self) -> Vec<Volume> {
        self.world.read().await.volumes.values().cloned().collect()
    }

    pub async fn snapshots(&self) -> Vec<Snapshot> {
        self.world
            .read()
            .await
            .snapshots
            .values()
            .map(|p| p.snapshot.clone())
            .collect()
    }
}

#[async_trait]
impl BlockStorage for MemoryBlockStorage {
    async fn get_instance(&self, id: &str) -> ProviderResult<Instance> {
        let mut world = self.world.write().await;
        world.record(CallKind::GetInstance, id, false)?;
        let instance = world.instance_mut(id)?.clone();
        world.settle_instance(id);
        Ok(instance)
    }

    async fn find_instance_by_name(&self, name: &str) -> ProviderResult<Instance> {
        let mut world = self.world.write().await;
        world.record(CallKind::FindInstance, name, false)?;
        world
            .instances
            .values()
            .find(|i| i.tags.get(NAME_TAG).map(String::as_str) == Some(name))
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(name.to_string()))
    }

    async fn set_instance_state(
        &self,
        id: &str,
        state: DesiredRunState,
        dry_run: bool,
    ) -> ProviderResult<()> {
        let kind = match state {
            DesiredRunState::Running => CallKind::StartInstance,
            DesiredRunState::Stopped => CallKind::StopInstance,
        };

        let mut world = self.world.write().await;
        world.record(kind, id, dry_run)?;
        let instance = world.instance_mut(id)?;
        if dry_run {
            return Err(ProviderError::DryRun);
        }

        let next = match (state, instance.state) {
            (DesiredRunState::Stopped, InstanceState::Running) => InstanceState::Stopping,
            (DesiredRunState::Running, InstanceState::Stopped) => InstanceState::Pending,
            (_, current) if current == state.as_instance_state() => current,
            (_, current) => {
                return Err(ProviderError::api(
                    "IncorrectInstanceState",
                    format!("instance {} is {}", id, current),
                ))
            }
        };
        instance.state = next;
        Ok(())
    }

    async fn list_volumes_attached_to(&self, instance_id: &str) -> ProviderResult<Vec<Volume>> {
        let mut world = self.world.write().await;
        world.record(CallKind::ListVolumes, instance_id, false)?;
        world.instance_mut(instance_id)?;

        Ok(world
            .volumes
            .values()
            .filter(|v| v.instance_id() == Some(instance_id))
            .cloned()
            .collect())
    }

    async fn get_volume(&self, id: &str) -> ProviderResult<Volume> {
        let mut world = self.world.write().await;
        world.record(CallKind::GetVolume, id, false)?;
        let volume = world.volume_mut(id)?.clone();
        world.settle_volume(id);
        Ok(volume)
    }

    async fn create_volume(
        &self,
        request: &CreateVolumeRequest,
        dry_run: bool,
    ) -> ProviderResult<Volume> {
        let target = request.snapshot_id.clone().unwrap_or_default();
        let mut world = self.world.write().await;
        world.record(CallKind::CreateVolume, &target, dry_run)?;

        if let Some(snapshot_id) = &request.snapshot_id {
            let pending = world.snapshot_mut(snapshot_id)?;
            if !dry_run && pending.snapshot.status != SnapshotStatus::Completed {
                return Err(ProviderError::api(
                    "IncorrectState",
                    format!("snapshot {} is {}", snapshot_id, pending.snapshot.status),
                ));
            }
        }
        if request.volume_type.is_provisioned() != request.iops.is_some() {
            return Err(ProviderError::api(
                "InvalidParameterCombination",
                "iops is only valid for provisioned volumes",
            ));
        }

        if dry_run {
            return Err(ProviderError::DryRun);
        }

        let volume = Volume {
            id: new_id("vol-"),
            size_gb: request.size_gb,
            volume_type: request.volume_type,
            iops: request.iops,
            zone: request.zone.clone(),
            encrypted: request.encrypted,
            status: VolumeStatus::Creating,
            attachment: None,
            tags: BTreeMap::new(),
        };
        world.volumes.insert(volume.id.clone(), volume.clone());
        Ok(volume)
    }

    async fn delete_volume(&self, id: &str, dry_run: bool) -> ProviderResult<()> {
        let mut world = self.world.write().await;
        world.record(CallKind::DeleteVolume, id, dry_run)?;
        let volume = world.volume_mut(id)?;
        if dry_run {
            return Err(ProviderError::DryRun);
        }

        if volume.attachment.is_some() {
            return Err(ProviderError::api(
                "VolumeInUse",
                format!("volume {} is attached", id),
            ));
        }
        volume.status = VolumeStatus::Deleting;
        Ok(())
    }

    async fn attach_volume(
        &self,
        id: &str,
        instance_id: &str,
        device: &str,
        dry_run: bool,
    ) -> ProviderResult<()> {
        let mut world = self.world.write().await;
        world.record(CallKind::AttachVolume, id, dry_run)?;
        world.instance_mut(instance_id)?;
        world.volume_mut(id)?;
        if dry_run {
            return Err(ProviderError::DryRun);
        }

        let device_taken = world
            .volumes
            .values()
            .any(|v| v.id != id && v.instance_id() == Some(instance_id) && v.device() == Some(device));
        if device_taken {
            return Err(ProviderError::api(
                "InvalidDevice.InUse",
                format!("device {} is already in use on {}", device, instance_id),
            ));
        }

        let volume = world.volume_mut(id)?;
        if volume.status != VolumeStatus::Available {
            return Err(ProviderError::api(
                "IncorrectState",
                format!("volume {} is not available", id),
            ));
        }
        volume.attachment = Some(Attachment {
            instance_id: instance_id.to_string(),
            device: device.to_string(),
            status: AttachmentStatus::Attaching,
        });
        Ok(())
    }

    async fn detach_volume(&self, id: &str, dry_run: bool) -> ProviderResult<()> {
        let mut world = self.world.write().await;
        world.record(CallKind::DetachVolume, id, dry_run)?;
        let volume = world.volume_mut(id)?;
        if dry_run {
            return Err(ProviderError::DryRun);
        }

        let Some(attachment) = volume.attachment.as_mut() else {
            return Err(ProviderError::api(
                "IncorrectState",
                format!("volume {} is not attached", id),
            ));
        };
        attachment.status = AttachmentStatus::Detaching;
        Ok(())
    }

    async fn tag_resource(&self, id: &str, key: &str, value: &str) -> ProviderResult<()> {
        let mut world = self.world.write().await;
        world.record(CallKind::TagResource, id, false)?;

        let tags = if id.starts_with("snap-") {
            &mut world.snapshot_mut(id)?.snapshot.tags
        } else if id.starts_with("vol-") {
            &mut world.volume_mut(id)?.tags
        } else {
            &mut world.instance_mut(id)?.tags
        };
        tags.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn list_snapshots_of(&self, volume_id: &str) -> ProviderResult<Vec<Snapshot>> {
        let mut world = self.world.write().await;
        world.record(CallKind::ListSnapshots, volume_id, false)?;
        check_id(volume_id, "vol-")?;

        Ok(world
            .snapshots
            .values()
            .filter(|p| p.snapshot.volume_id == volume_id)
            .map(|p| p.snapshot.clone())
            .collect())
    }

    async fn get_snapshot(&self, id: &str) -> ProviderResult<Snapshot> {
        let mut world = self.world.write().await;
        world.record(CallKind::GetSnapshot, id, false)?;
        let pending = world.snapshot_mut(id)?;

        if pending.snapshot.status == SnapshotStatus::Pending {
            if pending.polls_remaining == 0 {
                pending.snapshot.status = SnapshotStatus::Completed;
            } else {
                pending.polls_remaining -= 1;
            }
        }
        Ok(pending.snapshot.clone())
    }

    async fn create_snapshot(
        &self,
        volume_id: &str,
        description: &str,
        dry_run: bool,
    ) -> ProviderResult<Snapshot> {
        let mut world = self.world.write().await;
        world.record(CallKind::CreateSnapshot, volume_id, dry_run)?;
        let encrypted = world.volume_mut(volume_id)?.encrypted;

        if dry_run {
            return Err(ProviderError::DryRun);
        }

        let snapshot = Snapshot {
            id: new_id("snap-"),
            volume_id: volume_id.to_string(),
            start_time: Utc::now(),
            status: SnapshotStatus::Pending,
            description: description.to_string(),
            encrypted,
            tags: BTreeMap::new(),
        };
        world.snapshots.insert(
            snapshot.id.clone(),
            PendingSnapshot {
                snapshot: snapshot.clone(),
                polls_remaining: self.snapshot_polls.saturating_sub(1),
            },
        );
        Ok(snapshot)
    }

    async fn delete_snapshot(&self, id: &str, dry_run: bool) -> ProviderResult<()> {
        let mut world = self.world.write().await;
        world.record(CallKind::DeleteSnapshot, id, dry_run)?;
        world.snapshot_mut(id)?;

        if dry_run {
            return Err(ProviderError::DryRun);
        }
        world.snapshots.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ebsctl_common::VolumeType;

    fn fixture() -> MemoryFixture {
        MemoryFixture {
            instances: vec![Instance {
                id: "i-1".to_string(),
                state: InstanceState::Running,
                tags: [(NAME_TAG.to_string(), "web".to_string())].into_iter().collect(),
            }],
            volumes: vec![Volume {
                id: "vol-1".to_string(),
                size_gb: 10,
                volume_type: VolumeType::Standard,
                iops: None,
                zone: "zone-a".to_string(),
                encrypted: false,
                status: VolumeStatus::InUse,
                attachment: Some(Attachment {
                    instance_id: "i-1".to_string(),
                    device: "/dev/sdf".to_string(),
                    status: AttachmentStatus::Attached,
                }),
                tags: BTreeMap::new(),
            }],
            snapshots: vec![],
        }
    }

    #[tokio::test]
    async fn test_dry_run_does_not_mutate() {
        let storage = MemoryBlockStorage::from_fixture(fixture());

        let err = storage.detach_volume("vol-1", true).await.unwrap_err();
        assert!(err.is_dry_run());
        let err = storage.create_snapshot("vol-1", "probe", true).await.unwrap_err();
        assert!(err.is_dry_run());

        assert!(storage.mutations().await.is_empty());
        assert!(storage.snapshots().await.is_empty());
        assert!(storage.volume("vol-1").await.unwrap().attachment.is_some());
    }

    #[tokio::test]
    async fn test_dry_run_still_validates() {
        let storage = MemoryBlockStorage::from_fixture(fixture());

        let err = storage.delete_volume("vol-1", false).await.unwrap_err();
        assert_eq!(err, ProviderError::api("VolumeInUse", "volume vol-1 is attached"));
        assert!(storage.delete_volume("vol-1", true).await.unwrap_err().is_dry_run());
        assert!(matches!(
            storage.delete_volume("vol-9", true).await,
            Err(ProviderError::NotFound(_))
        ));

        let err = storage.get_volume("volume-1").await.unwrap_err();
        assert_eq!(err, ProviderError::Malformed("volume-1".to_string()));
        let err = storage.get_volume("vol-2").await.unwrap_err();
        assert_eq!(err, ProviderError::NotFound("vol-2".to_string()));
    }

    #[tokio::test]
    async fn test_transitions_settle_on_poll() {
        let storage = MemoryBlockStorage::from_fixture(fixture());

        storage.detach_volume("vol-1", false).await.unwrap();
        let volume = storage.get_volume("vol-1").await.unwrap();
        assert_eq!(volume.attachment.unwrap().status, AttachmentStatus::Detaching);
        let volume = storage.get_volume("vol-1").await.unwrap();
        assert!(volume.attachment.is_none());
        assert_eq!(volume.status, VolumeStatus::Available);

        storage
            .set_instance_state("i-1", DesiredRunState::Stopped, false)
            .await
            .unwrap();
        assert_eq!(storage.get_instance("i-1").await.unwrap().state, InstanceState::Stopping);
        assert_eq!(storage.get_instance("i-1").await.unwrap().state, InstanceState::Stopped);
    }

    #[tokio::test]
    async fn test_snapshot_completes_after_polls() {
        let storage = MemoryBlockStorage::from_fixture(fixture()).with_snapshot_polls(2);

        let snapshot = storage.create_snapshot("vol-1", "test", false).await.unwrap();
        assert_eq!(snapshot.status, SnapshotStatus::Pending);
        assert!(snapshot.id.starts_with("snap-"));

        assert_eq!(storage.get_snapshot(&snapshot.id).await.unwrap().status, SnapshotStatus::Pending);
        assert_eq!(
            storage.get_snapshot(&snapshot.id).await.unwrap().status,
            SnapshotStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_injected_failure_only_hits_real_calls() {
        let storage = MemoryBlockStorage::from_fixture(fixture());
        storage.fail_on(CallKind::DetachVolume, "vol-1", "busy").await;

        assert!(storage.detach_volume("vol-1", true).await.unwrap_err().is_dry_run());
        let err = storage.detach_volume("vol-1", false).await.unwrap_err();
        assert_eq!(err, ProviderError::api("InjectedFailure", "busy"));
    }

    #[tokio::test]
    async fn test_find_instance_by_name() {
        let storage = MemoryBlockStorage::from_fixture(fixture());
        assert_eq!(storage.find_instance_by_name("web").await.unwrap().id, "i-1");
        assert!(matches!(
            storage.find_instance_by_name("db").await,
            Err(ProviderError::NotFound(_))
        ));
    }
}
