//! Common types and errors shared between ebsctl-core and ebsctl-cli

pub mod policy;

pub use policy::{MonthlyRetention, RetentionClass, RetentionPolicy};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Tag carrying the human label of instances, volumes and snapshots
pub const NAME_TAG: &str = "Name";

/// Lowest IOPS value accepted for provisioned-IOPS volumes
pub const MIN_IOPS: u32 = 100;

/// Highest IOPS value accepted for provisioned-IOPS volumes
pub const MAX_IOPS: u32 = 4000;

/// Highest IOPS / GB ratio accepted for provisioned-IOPS volumes
pub const MAX_IOPS_RATIO: u32 = 30;

/// Block storage volume type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum VolumeType {
    Standard, // magnetic
    Io1,      // provisioned IOPS SSD
    Gp2,      // general purpose SSD
}

impl VolumeType {
    pub const ALL: [VolumeType; 3] = [VolumeType::Standard, VolumeType::Io1, VolumeType::Gp2];

    /// Whether the type carries a provisioned IOPS value
    pub fn is_provisioned(&self) -> bool {
        matches!(self, VolumeType::Io1)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Io1 => "io1",
            Self::Gp2 => "gp2",
        }
    }
}

impl fmt::Display for VolumeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VolumeType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "standard" => Ok(Self::Standard),
            "io1" => Ok(Self::Io1),
            "gp2" => Ok(Self::Gp2),
            other => Err(Error::InvalidVolumeType(other.to_string())),
        }
    }
}

/// Volume lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum VolumeStatus {
    Creating,
    Available,
    InUse,
    Deleting,
    Deleted,
    Error,
}

/// Attachment status of a volume
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentStatus {
    Attaching,
    Attached,
    Detaching,
    Detached,
}

/// Where a volume is attached
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub instance_id: String,
    pub device: String,
    pub status: AttachmentStatus,
}

/// Block storage volume
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volume {
    pub id: String,
    pub size_gb: u32,
    pub volume_type: VolumeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iops: Option<u32>,
    pub zone: String,
    #[serde(default)]
    pub encrypted: bool,
    pub status: VolumeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl Volume {
    /// Human label: the Name tag, or the id when untagged
    pub fn name(&self) -> &str {
        self.tags.get(NAME_TAG).map(String::as_str).unwrap_or(&self.id)
    }

    pub fn device(&self) -> Option<&str> {
        self.attachment.as_ref().map(|a| a.device.as_str())
    }

    pub fn instance_id(&self) -> Option<&str> {
        self.attachment.as_ref().map(|a| a.instance_id.as_str())
    }
}

/// Instance run state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceState {
    Pending,
    Running,
    Stopping,
    Stopped,
    ShuttingDown,
    Terminated,
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
            Self::ShuttingDown => write!(f, "shutting-down"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// Run state an instance can be asked to reach
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DesiredRunState {
    Running,
    Stopped,
}

impl DesiredRunState {
    pub fn as_instance_state(&self) -> InstanceState {
        match self {
            Self::Running => InstanceState::Running,
            Self::Stopped => InstanceState::Stopped,
        }
    }
}

/// Compute instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub state: InstanceState,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl Instance {
    pub fn name(&self) -> &str {
        self.tags.get(NAME_TAG).map(String::as_str).unwrap_or(&self.id)
    }
}

/// Snapshot lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotStatus {
    Pending,
    Completed,
    Error,
}

impl fmt::Display for SnapshotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Completed => write!(f, "completed"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Point-in-time copy of a volume
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub volume_id: String,
    pub start_time: DateTime<Utc>,
    pub status: SnapshotStatus,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub encrypted: bool,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// Kind of provider resource, used in error messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Instance,
    Volume,
    Snapshot,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instance => write!(f, "instance"),
            Self::Volume => write!(f, "volume"),
            Self::Snapshot => write!(f, "snapshot"),
        }
    }
}

/// Mutating or fetching operation an error is tied to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    FetchInstance,
    FetchVolumes,
    FetchSnapshots,
    StartInstance,
    StopInstance,
    CreateSnapshot,
    DeleteSnapshot,
    TagResource,
    CreateVolume,
    DeleteVolume,
    AttachVolume,
    DetachVolume,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::FetchInstance => "fetching instance",
            Self::FetchVolumes => "fetching volumes",
            Self::FetchSnapshots => "fetching snapshots",
            Self::StartInstance => "starting instance",
            Self::StopInstance => "stopping instance",
            Self::CreateSnapshot => "creating snapshot",
            Self::DeleteSnapshot => "deleting snapshot",
            Self::TagResource => "tagging resource",
            Self::CreateVolume => "creating volume",
            Self::DeleteVolume => "deleting volume",
            Self::AttachVolume => "attaching volume",
            Self::DetachVolume => "detaching volume",
        };
        f.write_str(text)
    }
}

/// How volumes attached to an instance were matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchField {
    Device,
    Name,
}

impl fmt::Display for MatchField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device => write!(f, "device"),
            Self::Name => write!(f, "name"),
        }
    }
}

/// ebsctl error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{kind} {id} does not exist")]
    NotFound { kind: ResourceKind, id: String },

    #[error("{id} is an invalid {kind} id")]
    MalformedId { kind: ResourceKind, id: String },

    #[error("Invalid volume type: {0} (expected one of standard, io1, gp2)")]
    InvalidVolumeType(String),

    #[error("Volume type is {0}, an IOPS value is required")]
    IopsRequired(VolumeType),

    #[error("Invalid PIOPS value: {0} (must be between {} and {})", MIN_IOPS, MAX_IOPS)]
    InvalidIops(u32),

    #[error("IOPS/size ratio ({ratio:.2}) for volume {volume_id} is not valid (must be lower or equal than {max})")]
    InvalidIopsRatio {
        volume_id: String,
        ratio: f64,
        max: u32,
    },

    #[error("Instance {instance_id} does not have any volume attached")]
    NoVolumes { instance_id: String },

    #[error("Regex '{pattern}' does not match any volume {field} for instance {instance_id}")]
    NoMatchingVolumes {
        instance_id: String,
        field: MatchField,
        pattern: String,
    },

    #[error("Invalid regular expression '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Volume {volume_id} does not have snapshots")]
    NoSnapshots { volume_id: String },

    #[error("Volume {0} is not attached to any instance")]
    VolumeNotAttached(String),

    #[error("You are trying to migrate all volumes from {0} type to {0} type")]
    AllVolumesSameType(VolumeType),

    #[error("You are trying to migrate all volumes to the same IOPS value ({0})")]
    AllVolumesSameIops(u32),

    #[error("It is not possible to {action} instance {instance_id} with the state {state}")]
    InvalidInstanceState {
        instance_id: String,
        state: InstanceState,
        action: &'static str,
    },

    #[error("Error {operation} {id}: {cause}")]
    Lifecycle {
        operation: Operation,
        id: String,
        cause: String,
    },

    #[error("Timed out {operation} {id} after {attempts} polls")]
    Timeout {
        operation: Operation,
        id: String,
        attempts: u32,
    },

    #[error("--{option}: {reason}")]
    InvalidArgument { option: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn lifecycle(operation: Operation, id: impl Into<String>, cause: impl fmt::Display) -> Self {
        Error::Lifecycle {
            operation,
            id: id.into(),
            cause: cause.to_string(),
        }
    }

    /// Precondition errors reject a whole batch before any mutating call
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Error::InvalidVolumeType(_)
                | Error::IopsRequired(_)
                | Error::InvalidIops(_)
                | Error::InvalidIopsRatio { .. }
                | Error::NoVolumes { .. }
                | Error::NoMatchingVolumes { .. }
                | Error::InvalidPattern { .. }
                | Error::AllVolumesSameType(_)
                | Error::AllVolumesSameIops(_)
                | Error::VolumeNotAttached(_)
                | Error::InvalidInstanceState { .. }
                | Error::InvalidArgument { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_type_parsing() {
        assert_eq!("io1".parse::<VolumeType>().unwrap(), VolumeType::Io1);
        assert_eq!("gp2".parse::<VolumeType>().unwrap(), VolumeType::Gp2);
        assert!(matches!(
            "sc1".parse::<VolumeType>(),
            Err(Error::InvalidVolumeType(t)) if t == "sc1"
        ));
    }

    #[test]
    fn test_volume_name_falls_back_to_id() {
        let mut volume = Volume {
            id: "vol-1".to_string(),
            size_gb: 10,
            volume_type: VolumeType::Gp2,
            iops: None,
            zone: "eu-west-1a".to_string(),
            encrypted: false,
            status: VolumeStatus::Available,
            attachment: None,
            tags: BTreeMap::new(),
        };
        assert_eq!(volume.name(), "vol-1");

        volume.tags.insert(NAME_TAG.to_string(), "data".to_string());
        assert_eq!(volume.name(), "data");
    }

    #[test]
    fn test_wire_names() {
        let json = serde_json::to_string(&VolumeStatus::InUse).unwrap();
        assert_eq!(json, "\"in-use\"");

        let state: InstanceState = serde_json::from_str("\"shutting-down\"").unwrap();
        assert_eq!(state, InstanceState::ShuttingDown);
    }

    #[test]
    fn test_error_messages_carry_ids() {
        let err = Error::NotFound {
            kind: ResourceKind::Volume,
            id: "vol-404".to_string(),
        };
        assert_eq!(err.to_string(), "volume vol-404 does not exist");

        let err = Error::lifecycle(Operation::DetachVolume, "vol-1", "busy");
        assert_eq!(err.to_string(), "Error detaching volume vol-1: busy");
        assert!(!err.is_precondition());
        assert!(Error::AllVolumesSameType(VolumeType::Standard).is_precondition());
    }
}
