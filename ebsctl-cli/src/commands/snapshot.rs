//! Snapshot creation command

use super::{volume_target, Session};
use crate::output::{self, print_success};
use crate::{GlobalOptions, SnapshotArgs};
use anyhow::{bail, Result};
use ebsctl_core::snapshots::SnapshotRequest;
use ebsctl_core::tasks::{create_snapshots, SnapshotResult};
use serde::Serialize;
use tabled::Tabled;

#[derive(Tabled, Serialize)]
struct SnapshotRow {
    volume: String,
    snapshot: String,
    result: String,
}

impl From<&SnapshotResult> for SnapshotRow {
    fn from(result: &SnapshotResult) -> Self {
        Self {
            volume: result.volume_id.clone(),
            snapshot: result.snapshot_id.clone().unwrap_or_else(|| "-".to_string()),
            result: match &result.error {
                Some(cause) => format!("failed: {}", cause),
                None if result.snapshot_id.is_some() => "created".to_string(),
                None => "dry run".to_string(),
            },
        }
    }
}

pub async fn handle_snapshot_command(args: SnapshotArgs, globals: &GlobalOptions) -> Result<()> {
    let session = Session::open(globals)?;
    let target = volume_target(args.volume_id.as_deref(), &args.instance, &args.volumes)?;
    let request = SnapshotRequest {
        name: args.name,
        description: args.description,
    };

    let results = create_snapshots(&session.ctx, &target, &request, args.parallel, args.dry_run).await?;

    if !output::print_machine(&results, session.output)? {
        let rows: Vec<SnapshotRow> = results.iter().map(SnapshotRow::from).collect();
        output::print_table(rows);
    }

    let failed = results.iter().filter(|r| r.failed()).count();
    if failed > 0 {
        bail!("{} of {} snapshots failed", failed, results.len());
    }
    if session.output == output::OutputFormat::Table {
        print_success(&format!("{} volumes processed", results.len()));
    }
    Ok(())
}
