//! Volume and snapshot lifecycle automation
//!
//! The library drives a [`provider::BlockStorage`] implementation through the
//! workflows in [`tasks`]: retention cleanup, snapshot creation and volume
//! migration between storage types.

pub mod config;
pub mod context;
pub mod dates;
pub mod instances;
pub mod logging;
pub mod migration;
pub mod parallel;
pub mod poller;
pub mod progress;
pub mod provider;
pub mod retention;
pub mod snapshots;
pub mod tasks;
pub mod volumes;

pub use config::{ConfigError, EbsctlConfig};
pub use context::Context;
pub use ebsctl_common::{Error, Result};
pub use instances::InstanceSelector;
pub use migration::{MigrationReport, MigrationRequest};
pub use retention::RetentionClassifier;
pub use tasks::{MigrationOutcome, VolumeTarget};
