//! Instance lookup and run-state changes

use crate::context::Context;
use crate::poller::wait_until;
use crate::provider::{accept_dry_run, lookup_error};
use ebsctl_common::{
    DesiredRunState, Error, Instance, InstanceState, Operation, ResourceKind, Result,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How the operator named an instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceSelector {
    Id(String),
    Name(String),
}

impl fmt::Display for InstanceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{}", id),
            Self::Name(name) => write!(f, "{} (by name)", name),
        }
    }
}

/// Result of asking an instance to change run state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StateChange {
    /// The instance reached the requested state
    Changed,
    /// A dry-run probe was accepted
    Simulated,
    /// The instance was already there; nothing was sent
    Unchanged,
}

impl StateChange {
    /// Whether the instance was (or would have been) moved
    pub fn acted(&self) -> bool {
        !matches!(self, StateChange::Unchanged)
    }
}

pub async fn get_instance(ctx: &Context, id: &str) -> Result<Instance> {
    ctx.storage()
        .get_instance(id)
        .await
        .map_err(|e| lookup_error(ResourceKind::Instance, id, Operation::FetchInstance, e))
}

pub async fn resolve_instance(ctx: &Context, selector: &InstanceSelector) -> Result<Instance> {
    match selector {
        InstanceSelector::Id(id) => get_instance(ctx, id).await,
        InstanceSelector::Name(name) => ctx
            .storage()
            .find_instance_by_name(name)
            .await
            .map_err(|e| lookup_error(ResourceKind::Instance, name, Operation::FetchInstance, e)),
    }
}

/// Stop an instance and wait until it is stopped
pub async fn stop_instance_and_wait(ctx: &Context, id: &str, dry_run: bool) -> Result<StateChange> {
    let instance = get_instance(ctx, id).await?;
    match instance.state {
        InstanceState::Stopped => Ok(StateChange::Unchanged),
        InstanceState::Running => change_state(ctx, id, DesiredRunState::Stopped, dry_run).await,
        // already on its way down
        InstanceState::Stopping if dry_run => Ok(StateChange::Simulated),
        InstanceState::Stopping => {
            wait_for_state(ctx, id, InstanceState::Stopped, Operation::StopInstance).await?;
            Ok(StateChange::Changed)
        }
        state => Err(Error::InvalidInstanceState {
            instance_id: id.to_string(),
            state,
            action: "stop",
        }),
    }
}

/// Start an instance and wait until it is running
pub async fn start_instance_and_wait(ctx: &Context, id: &str, dry_run: bool) -> Result<StateChange> {
    let instance = get_instance(ctx, id).await?;
    match instance.state {
        InstanceState::Running => Ok(StateChange::Unchanged),
        InstanceState::Stopped => change_state(ctx, id, DesiredRunState::Running, dry_run).await,
        InstanceState::Pending if dry_run => Ok(StateChange::Simulated),
        InstanceState::Pending => {
            wait_for_state(ctx, id, InstanceState::Running, Operation::StartInstance).await?;
            Ok(StateChange::Changed)
        }
        state => Err(Error::InvalidInstanceState {
            instance_id: id.to_string(),
            state,
            action: "start",
        }),
    }
}

async fn change_state(
    ctx: &Context,
    id: &str,
    desired: DesiredRunState,
    dry_run: bool,
) -> Result<StateChange> {
    let operation = match desired {
        DesiredRunState::Running => Operation::StartInstance,
        DesiredRunState::Stopped => Operation::StopInstance,
    };
    tracing::info!(instance_id = id, operation = %operation, dry_run, "Instance operation");

    let sent = ctx.storage().set_instance_state(id, desired, dry_run).await;
    if accept_dry_run(sent, dry_run, operation, id)?.is_none() {
        return Ok(StateChange::Simulated);
    }

    wait_for_state(ctx, id, desired.as_instance_state(), operation).await?;
    Ok(StateChange::Changed)
}

async fn wait_for_state(
    ctx: &Context,
    id: &str,
    target: InstanceState,
    operation: Operation,
) -> Result<()> {
    let polling = ctx.polling();
    wait_until(polling.instance(), polling.max_attempts, operation, id, || async move {
        let instance = get_instance(ctx, id).await?;
        Ok((instance.state == target).then_some(()))
    })
    .await
}
