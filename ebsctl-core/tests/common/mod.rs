//! Common test utilities and fixtures

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use ebsctl_common::{
    Attachment, AttachmentStatus, Instance, InstanceState, Snapshot, SnapshotStatus, Volume,
    VolumeStatus, VolumeType, NAME_TAG,
};
use ebsctl_core::config::PollingConfig;
use ebsctl_core::progress::CollectingSink;
use ebsctl_core::provider::{MemoryBlockStorage, MemoryFixture};
use ebsctl_core::Context;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const INSTANCE_ID: &str = "i-0a1b2c3d";

fn name_tags(name: &str) -> BTreeMap<String, String> {
    [(NAME_TAG.to_string(), name.to_string())].into_iter().collect()
}

pub fn instance(state: InstanceState) -> Instance {
    Instance {
        id: INSTANCE_ID.to_string(),
        state,
        tags: name_tags("db-primary"),
    }
}

/// Volume attached to the test instance
pub fn attached_volume(id: &str, device: &str, volume_type: VolumeType, size_gb: u32) -> Volume {
    Volume {
        id: id.to_string(),
        size_gb,
        volume_type,
        iops: volume_type.is_provisioned().then_some(size_gb * 10),
        zone: "us-east-1a".to_string(),
        encrypted: false,
        status: VolumeStatus::InUse,
        attachment: Some(Attachment {
            instance_id: INSTANCE_ID.to_string(),
            device: device.to_string(),
            status: AttachmentStatus::Attached,
        }),
        tags: name_tags(&format!("data-{}", &device[device.len() - 1..])),
    }
}

pub fn snapshot(id: &str, volume_id: &str, start_time: DateTime<Utc>) -> Snapshot {
    Snapshot {
        id: id.to_string(),
        volume_id: volume_id.to_string(),
        start_time,
        status: SnapshotStatus::Completed,
        description: String::new(),
        encrypted: false,
        tags: BTreeMap::new(),
    }
}

/// Test environment: in-memory provider, zero poll intervals, collected notices
pub struct TestEnv {
    pub storage: Arc<MemoryBlockStorage>,
    pub notices: Arc<CollectingSink>,
    pub ctx: Context,
}

impl TestEnv {
    pub fn new(fixture: MemoryFixture) -> Self {
        let storage = Arc::new(MemoryBlockStorage::from_fixture(fixture));
        let notices = Arc::new(CollectingSink::default());
        let ctx = Context::new(storage.clone(), PollingConfig::immediate()).with_progress(notices.clone());
        TestEnv { storage, notices, ctx }
    }

    /// Instance in `state` with `volumes` attached
    pub fn with_instance(state: InstanceState, volumes: Vec<Volume>) -> Self {
        Self::new(MemoryFixture {
            instances: vec![instance(state)],
            volumes,
            snapshots: Vec::new(),
        })
    }

    pub fn rendered(&self) -> Vec<String> {
        self.notices.rendered()
    }
}
