//! ebsctl
//!
//! Command-line interface for block storage volume and snapshot lifecycle tasks

mod commands;
mod output;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use ebsctl_common::{MonthlyRetention, VolumeType};
use output::OutputFormat;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file (defaults to $EBSCTL_CONFIG, /etc/ebsctl/config.toml, ./ebsctl.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Block storage gateway URL
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Region to operate in
    #[arg(short, long, global = true)]
    region: Option<String>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value = "table")]
    output: OutputFormat,

    /// Run against an in-memory provider seeded from a JSON fixture
    #[arg(long, global = true, value_name = "FIXTURE")]
    simulate: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Delete the snapshots a retention policy does not keep
    Clean(CleanArgs),
    /// Create snapshots of volumes
    Snapshot(SnapshotArgs),
    /// Move volumes to another volume type or IOPS value
    Migrate(MigrateArgs),
    /// Configuration helpers
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Generate shell completions
    Completions {
        /// Shell type
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Instance the volumes are attached to
#[derive(Args, Debug, Clone)]
#[group(required = false, multiple = false)]
pub struct InstanceArgs {
    /// Instance id
    #[arg(long)]
    pub instance_id: Option<String>,
    /// Instance Name tag
    #[arg(long)]
    pub instance_name: Option<String>,
}

/// Volumes of an instance to act on
#[derive(Args, Debug, Clone)]
pub struct VolumeMatchArgs {
    /// Regular expression matched against the device path (e.g. "/dev/sd[fg]")
    #[arg(long, conflicts_with = "volume_name")]
    pub devices: Option<String>,
    /// Regular expression matched against the volume Name tag
    #[arg(long)]
    pub volume_name: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct CleanArgs {
    /// Volume whose snapshots are cleaned
    #[arg(long, conflicts_with_all = ["instance_id", "instance_name", "devices", "volume_name"])]
    pub volume_id: Option<String>,

    #[command(flatten)]
    pub instance: InstanceArgs,

    #[command(flatten)]
    pub volumes: VolumeMatchArgs,

    /// Hourly snapshots to keep
    #[arg(long)]
    pub hourly: Option<u32>,
    /// Daily snapshots to keep
    #[arg(long)]
    pub daily: Option<u32>,
    /// Weekly snapshots to keep
    #[arg(long)]
    pub weekly: Option<u32>,
    /// Monthly snapshots to keep: a number, "all" or "none"
    #[arg(long)]
    pub monthly: Option<MonthlyRetention>,

    /// Ask the provider to validate deletions without performing them
    #[arg(long)]
    pub dry_run: bool,

    /// Classify a synthetic history of N days instead of contacting the provider
    #[arg(long, value_name = "DAYS", conflicts_with_all = ["volume_id", "instance_id", "instance_name", "dry_run"])]
    pub test: Option<u32>,
}

#[derive(Args, Debug, Clone)]
pub struct SnapshotArgs {
    /// Volume to snapshot
    #[arg(long, conflicts_with_all = ["instance_id", "instance_name", "devices", "volume_name"])]
    pub volume_id: Option<String>,

    #[command(flatten)]
    pub instance: InstanceArgs,

    #[command(flatten)]
    pub volumes: VolumeMatchArgs,

    /// Name tag of the snapshots (defaults to the volume name)
    #[arg(long)]
    pub name: Option<String>,

    /// Snapshot description (defaults to "<instance> <device>")
    #[arg(long)]
    pub description: Option<String>,

    /// Snapshot every volume concurrently
    #[arg(long)]
    pub parallel: bool,

    /// Ask the provider to validate the request without creating anything
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone)]
pub struct MigrateArgs {
    #[command(flatten)]
    pub instance: InstanceArgs,

    /// Regular expression matched against the device path of the volumes to migrate
    #[arg(long)]
    pub devices: String,

    /// Target volume type
    #[arg(short = 't', long = "type")]
    pub volume_type: VolumeType,

    /// Provisioned IOPS, required with --type io1
    #[arg(long)]
    pub iops: Option<u32>,

    /// Walk every step with validation-only requests
    #[arg(long)]
    pub dry_run: bool,

    /// Do not ask for confirmation
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print a configuration file with every default value
    Sample,
}

/// Settings shared by every command
pub struct GlobalOptions {
    pub config: Option<PathBuf>,
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub output: OutputFormat,
    pub simulate: Option<PathBuf>,
    pub verbose: u8,
}

async fn run(cli: Cli) -> Result<()> {
    let globals = GlobalOptions {
        config: cli.config,
        endpoint: cli.endpoint,
        region: cli.region,
        output: cli.output,
        simulate: cli.simulate,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Clean(args) => commands::clean::handle_clean_command(args, &globals).await,
        Commands::Snapshot(args) => commands::snapshot::handle_snapshot_command(args, &globals).await,
        Commands::Migrate(args) => commands::migrate::handle_migrate_command(args, &globals).await,
        Commands::Config { command } => match command {
            ConfigCommands::Sample => {
                print!("{}", ebsctl_core::EbsctlConfig::generate_sample());
                Ok(())
            }
        },
        Commands::Completions { shell } => {
            generate_completions(shell);
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::print_error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

/// Generate shell completions
fn generate_completions(shell: clap_complete::Shell) {
    use clap::CommandFactory;
    use clap_complete::generate;
    use std::io;

    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();

    generate(shell, &mut cmd, name, &mut io::stdout());
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_clean_with_policy() {
        let cli = Cli::parse_from([
            "ebsctl", "clean", "--instance-name", "db", "--devices", "/dev/sd[fg]", "--daily", "3",
            "--monthly", "all", "--dry-run",
        ]);
        let Commands::Clean(args) = cli.command else {
            panic!("expected clean");
        };
        assert_eq!(args.instance.instance_name.as_deref(), Some("db"));
        assert_eq!(args.daily, Some(3));
        assert_eq!(args.monthly, Some(MonthlyRetention::KeepAll));
        assert!(args.dry_run);
    }

    #[test]
    fn test_parse_migrate() {
        let cli = Cli::parse_from([
            "ebsctl", "-o", "json", "migrate", "--instance-id", "i-1", "--devices", "/dev/sdf", "--type",
            "io1", "--iops", "1000",
        ]);
        assert_eq!(cli.output, OutputFormat::Json);
        let Commands::Migrate(args) = cli.command else {
            panic!("expected migrate");
        };
        assert_eq!(args.volume_type, VolumeType::Io1);
        assert_eq!(args.iops, Some(1000));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(Cli::try_parse_from(["ebsctl", "clean", "--volume-id", "vol-1", "--hourly", "-1"]).is_err());
        assert!(Cli::try_parse_from(["ebsctl", "clean", "--volume-id", "vol-1", "--monthly", "some"]).is_err());
        assert!(Cli::try_parse_from([
            "ebsctl", "migrate", "--instance-id", "i-1", "--devices", "/dev/sdf", "--type", "sc1"
        ])
        .is_err());
        assert!(Cli::try_parse_from([
            "ebsctl", "clean", "--volume-id", "vol-1", "--instance-id", "i-1"
        ])
        .is_err());
    }
}
