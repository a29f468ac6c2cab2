//! Snapshot retention cleanup command

use super::{volume_target, Session};
use crate::output::{self, print_error, print_info, print_success, print_warning};
use crate::{CleanArgs, GlobalOptions};
use anyhow::{bail, Result};
use chrono::Utc;
use ebsctl_common::RetentionPolicy;
use ebsctl_core::dates::format_timestamp;
use ebsctl_core::snapshots::{CleanEntry, CleanReport, DeletionOutcome};
use ebsctl_core::tasks::{clean, clean_test};
use serde::Serialize;
use tabled::Tabled;

#[derive(Tabled, Serialize)]
struct SnapshotRow {
    snapshot: String,
    date: String,
    class: String,
    result: String,
}

impl From<&CleanEntry> for SnapshotRow {
    fn from(entry: &CleanEntry) -> Self {
        let result = match &entry.outcome {
            DeletionOutcome::Kept => "kept".to_string(),
            DeletionOutcome::Deleted => "deleted".to_string(),
            DeletionOutcome::Simulated => "would delete".to_string(),
            DeletionOutcome::SkippedPending => "pending, not deleted".to_string(),
            DeletionOutcome::Failed(cause) => format!("failed: {}", cause),
        };
        Self {
            snapshot: entry.snapshot_id.clone(),
            date: format_timestamp(entry.start_time),
            class: entry.class.map(|c| c.to_string()).unwrap_or_else(|| "-".to_string()),
            result,
        }
    }
}

/// Policy from the configuration with the command-line counts on top
fn effective_policy(defaults: RetentionPolicy, args: &CleanArgs) -> RetentionPolicy {
    RetentionPolicy {
        hourly: args.hourly.unwrap_or(defaults.hourly),
        daily: args.daily.unwrap_or(defaults.daily),
        weekly: args.weekly.unwrap_or(defaults.weekly),
        monthly: args.monthly.unwrap_or(defaults.monthly),
    }
}

fn print_report(report: &CleanReport) {
    if let Some(volume_id) = &report.volume_id {
        print_info(&format!("Snapshots of volume {}", volume_id));
    }
    if let Some(cause) = &report.error {
        print_error(&format!("Volume was not cleaned: {}", cause));
        return;
    }

    // kept first, then everything else
    let rows: Vec<SnapshotRow> = report
        .kept()
        .chain(report.removed())
        .map(SnapshotRow::from)
        .collect();
    output::print_table(rows);

    let summary = report.summary();
    let verb = if report.dry_run { "to delete" } else { "deleted" };
    print_success(&format!(
        "Kept {} snapshots (hourly {}, daily {}, weekly {}, monthly {}), {} {}",
        summary.kept(),
        summary.hourly,
        summary.daily,
        summary.weekly,
        summary.monthly,
        summary.delete,
        verb
    ));

    let failures = report.failures().count();
    if failures > 0 {
        print_warning(&format!("{} snapshots could not be deleted", failures));
    }
}

pub async fn handle_clean_command(args: CleanArgs, globals: &GlobalOptions) -> Result<()> {
    let session = Session::open(globals)?;
    let policy = effective_policy(session.config.retention, &args);
    let now = Utc::now();

    let reports = match args.test {
        Some(days) => vec![clean_test(&policy, now, days)],
        None => {
            let target = volume_target(args.volume_id.as_deref(), &args.instance, &args.volumes)?;
            clean(&session.ctx, &target, &policy, now, args.dry_run).await?
        }
    };

    if !output::print_machine(&reports, session.output)? {
        print_info(&format!("Retention policy: {}", policy));
        for report in &reports {
            print_report(report);
        }
    }

    let failed: usize = reports.iter().map(|r| r.failure_count()).sum();
    if failed > 0 {
        bail!("{} snapshot deletions or volume cleanups failed", failed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use ebsctl_common::MonthlyRetention;

    #[derive(Parser)]
    struct Wrapper {
        #[command(flatten)]
        args: CleanArgs,
    }

    #[test]
    fn test_flags_override_configured_policy() {
        let wrapper = Wrapper::parse_from(["clean", "--volume-id", "vol-1", "--hourly", "24", "--monthly", "none"]);
        let policy = effective_policy(RetentionPolicy::default(), &wrapper.args);
        assert_eq!(policy.hourly, 24);
        assert_eq!(policy.daily, 7);
        assert_eq!(policy.monthly, MonthlyRetention::NONE);
    }
}
