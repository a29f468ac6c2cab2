//! Volume migration command

use super::{instance_selector, Session};
use crate::output::{self, print_error, print_info, print_success};
use crate::{GlobalOptions, MigrateArgs};
use anyhow::{bail, Result};
use dialoguer::Confirm;
use ebsctl_core::migration::{MigrationReport, MigrationRequest};
use ebsctl_core::tasks::migrate;
use ebsctl_core::volumes::VolumeFilter;
use serde::Serialize;
use tabled::Tabled;

#[derive(Tabled, Serialize)]
struct MigrationRow {
    task: usize,
    volume: String,
    device: String,
    snapshot: String,
    new_volume: String,
    result: String,
}

impl From<&MigrationReport> for MigrationRow {
    fn from(report: &MigrationReport) -> Self {
        let result = match report.failure() {
            Some((step, cause)) => format!("{} failed: {}", step, cause),
            None if report.dry_run => "simulated".to_string(),
            None => "migrated".to_string(),
        };
        Self {
            task: report.task,
            volume: report.volume_id.clone(),
            device: report.device.clone(),
            snapshot: report.snapshot_id.clone().unwrap_or_else(|| "-".to_string()),
            new_volume: report.new_volume_id.clone().unwrap_or_else(|| "-".to_string()),
            result,
        }
    }
}

pub async fn handle_migrate_command(args: MigrateArgs, globals: &GlobalOptions) -> Result<()> {
    let Some(selector) = instance_selector(&args.instance) else {
        bail!("one of --instance-id or --instance-name is required");
    };
    let filter = VolumeFilter::device(&args.devices)?;
    let request = MigrationRequest {
        volume_type: args.volume_type,
        iops: args.iops,
        dry_run: args.dry_run,
    };
    request.validate()?;

    if !args.dry_run && !args.yes {
        let confirm = Confirm::new()
            .with_prompt(format!(
                "Instance {} will be stopped and volumes matching '{}' replaced by {} volumes. Continue?",
                selector,
                args.devices,
                request.target_label()
            ))
            .default(false)
            .interact()?;

        if !confirm {
            print_info("Migration cancelled");
            return Ok(());
        }
    }

    let session = Session::open(globals)?;
    let outcome = migrate(&session.ctx, &selector, &filter, &request).await?;

    if !output::print_machine(&outcome, session.output)? {
        let rows: Vec<MigrationRow> = outcome.reports.iter().map(MigrationRow::from).collect();
        output::print_table(rows);
    }

    let failed: Vec<&MigrationReport> = outcome.reports.iter().filter(|r| !r.succeeded()).collect();
    for report in &failed {
        if let Some(snapshot_id) = &report.snapshot_id {
            print_info(&format!(
                "Volume {} can be recovered from snapshot {}",
                report.volume_id, snapshot_id
            ));
        }
    }
    if let Some(cause) = &outcome.start_error {
        print_error(&format!("Instance {} was not started again: {}", outcome.instance_id, cause));
    }
    if !failed.is_empty() {
        bail!("{} of {} volume migrations failed", failed.len(), outcome.reports.len());
    }
    if outcome.start_error.is_some() {
        bail!("volumes were migrated but instance {} is still stopped", outcome.instance_id);
    }

    if session.output == output::OutputFormat::Table {
        print_success(&format!(
            "{} volumes of {} migrated to {}",
            outcome.reports.len(),
            outcome.instance_id,
            request.target_label()
        ));
    }
    Ok(())
}
