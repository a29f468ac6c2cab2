//! Command handlers

pub mod clean;
pub mod migrate;
pub mod snapshot;

use crate::output::{ConsoleSink, OutputFormat};
use crate::{GlobalOptions, InstanceArgs, VolumeMatchArgs};
use anyhow::{bail, Context as _, Result};
use ebsctl_core::config::PollingConfig;
use ebsctl_core::instances::InstanceSelector;
use ebsctl_core::logging::WorkerGuard;
use ebsctl_core::provider::{BlockStorage, HttpBlockStorage, MemoryBlockStorage};
use ebsctl_core::tasks::{volume_filter, VolumeTarget};
use ebsctl_core::{Context, EbsctlConfig};
use std::sync::Arc;

/// Everything a command needs to talk to the provider
pub struct Session {
    pub config: EbsctlConfig,
    pub ctx: Context,
    pub output: OutputFormat,
    /// Flushes the file log writer when the command returns
    _log_guard: Option<WorkerGuard>,
}

impl Session {
    /// Load configuration, start logging and connect to the provider
    pub fn open(globals: &GlobalOptions) -> Result<Self> {
        let mut config = match &globals.config {
            Some(path) => EbsctlConfig::load_with_file(path)?,
            None => EbsctlConfig::load()?,
        };
        if let Some(endpoint) = &globals.endpoint {
            config.provider.endpoint = endpoint.clone();
        }
        if let Some(region) = &globals.region {
            config.provider.region = region.clone();
        }
        config.validate()?;

        config.logging = config.logging.clone().with_verbosity(globals.verbose);
        let log_guard = config
            .logging
            .init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

        let (storage, polling): (Arc<dyn BlockStorage>, PollingConfig) = match &globals.simulate {
            Some(fixture) => {
                let storage = MemoryBlockStorage::from_json_file(fixture)
                    .with_context(|| format!("Failed to load fixture {}", fixture.display()))?;
                tracing::info!(fixture = %fixture.display(), "Using simulated provider");
                (Arc::new(storage), PollingConfig::immediate())
            }
            None => {
                let storage = HttpBlockStorage::new(&config.provider)?;
                (Arc::new(storage), config.polling.clone())
            }
        };

        let mut ctx = Context::new(storage, polling);
        if globals.output == OutputFormat::Table {
            ctx = ctx.with_progress(Arc::new(ConsoleSink::new()));
        }

        Ok(Self {
            config,
            ctx,
            output: globals.output,
            _log_guard: log_guard,
        })
    }
}

pub fn instance_selector(args: &InstanceArgs) -> Option<InstanceSelector> {
    match (&args.instance_id, &args.instance_name) {
        (Some(id), _) => Some(InstanceSelector::Id(id.clone())),
        (None, Some(name)) => Some(InstanceSelector::Name(name.clone())),
        (None, None) => None,
    }
}

/// `--volume-id`, or an instance plus a device / name pattern
pub fn volume_target(
    volume_id: Option<&str>,
    instance: &InstanceArgs,
    volumes: &VolumeMatchArgs,
) -> Result<VolumeTarget> {
    if let Some(id) = volume_id {
        return Ok(VolumeTarget::Volume(id.to_string()));
    }
    let Some(selector) = instance_selector(instance) else {
        bail!("one of --volume-id, --instance-id or --instance-name is required");
    };
    let filter = volume_filter(volumes.devices.as_deref(), volumes.volume_name.as_deref())?;
    Ok(VolumeTarget::Instance { selector, filter })
}
