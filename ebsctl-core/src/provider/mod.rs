//! Block storage provider abstraction
//!
//! Everything the workflows need from the cloud provider goes through
//! [`BlockStorage`]. Two implementations ship: [`HttpBlockStorage`] talks to
//! a JSON gateway in front of the provider API, [`MemoryBlockStorage`] keeps
//! the whole world in memory for tests and simulated runs.

mod http;
mod memory;

pub use http::HttpBlockStorage;
pub use memory::{CallKind, MemoryBlockStorage, MemoryFixture, ProviderCall};

use async_trait::async_trait;
use ebsctl_common::{
    DesiredRunState, Error, Instance, Operation, ResourceKind, Snapshot, Volume, VolumeType,
};
use serde::{Deserialize, Serialize};

/// Errors reported by a provider
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// The request would have succeeded but was a validation-only probe
    #[error("Request would have succeeded, but the dry-run flag is set")]
    DryRun,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Malformed resource id: {0}")]
    Malformed(String),

    #[error("{code}: {message}")]
    Api { code: String, message: String },

    #[error("Transport error: {0}")]
    Transport(String),
}

impl ProviderError {
    pub fn is_dry_run(&self) -> bool {
        matches!(self, ProviderError::DryRun)
    }

    pub fn api(code: impl Into<String>, message: impl Into<String>) -> Self {
        ProviderError::Api {
            code: code.into(),
            message: message.into(),
        }
    }
}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Parameters of a new volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateVolumeRequest {
    pub size_gb: u32,
    pub zone: String,
    pub volume_type: VolumeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iops: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
    #[serde(default)]
    pub encrypted: bool,
}

/// Compute and block storage calls used by the workflows
///
/// Mutating calls take a `dry_run` flag; when set the provider validates the
/// request and answers [`ProviderError::DryRun`] instead of acting.
#[async_trait]
pub trait BlockStorage: Send + Sync {
    async fn get_instance(&self, id: &str) -> ProviderResult<Instance>;

    async fn find_instance_by_name(&self, name: &str) -> ProviderResult<Instance>;

    async fn set_instance_state(
        &self,
        id: &str,
        state: DesiredRunState,
        dry_run: bool,
    ) -> ProviderResult<()>;

    async fn list_volumes_attached_to(&self, instance_id: &str) -> ProviderResult<Vec<Volume>>;

    async fn get_volume(&self, id: &str) -> ProviderResult<Volume>;

    async fn create_volume(
        &self,
        request: &CreateVolumeRequest,
        dry_run: bool,
    ) -> ProviderResult<Volume>;

    async fn delete_volume(&self, id: &str, dry_run: bool) -> ProviderResult<()>;

    async fn attach_volume(
        &self,
        id: &str,
        instance_id: &str,
        device: &str,
        dry_run: bool,
    ) -> ProviderResult<()>;

    async fn detach_volume(&self, id: &str, dry_run: bool) -> ProviderResult<()>;

    async fn tag_resource(&self, id: &str, key: &str, value: &str) -> ProviderResult<()>;

    async fn list_snapshots_of(&self, volume_id: &str) -> ProviderResult<Vec<Snapshot>>;

    async fn get_snapshot(&self, id: &str) -> ProviderResult<Snapshot>;

    async fn create_snapshot(
        &self,
        volume_id: &str,
        description: &str,
        dry_run: bool,
    ) -> ProviderResult<Snapshot>;

    async fn delete_snapshot(&self, id: &str, dry_run: bool) -> ProviderResult<()>;
}

/// Map a failed lookup onto the domain error for `kind`
pub fn lookup_error(kind: ResourceKind, id: &str, operation: Operation, err: ProviderError) -> Error {
    match err {
        ProviderError::NotFound(_) => Error::NotFound {
            kind,
            id: id.to_string(),
        },
        ProviderError::Malformed(_) => Error::MalformedId {
            kind,
            id: id.to_string(),
        },
        other => Error::lifecycle(operation, id, other),
    }
}

/// Fold the outcome of a mutating call
///
/// A dry-run rejection to a dry-run request is success with no effect
/// (`Ok(None)`). The same rejection to a real request is a provider fault.
pub fn accept_dry_run<T>(
    result: ProviderResult<T>,
    dry_run: bool,
    operation: Operation,
    id: &str,
) -> ebsctl_common::Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(ProviderError::DryRun) if dry_run => Ok(None),
        Err(err) => Err(Error::lifecycle(operation, id, err)),
    }
}
