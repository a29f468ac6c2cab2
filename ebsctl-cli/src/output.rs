//! Output formatting for the CLI
//!
//! Command results go to stdout as a table, JSON or YAML. Progress notices
//! from the workflows are rendered as colored status lines.

use clap::ValueEnum;
use colored::Colorize;
use ebsctl_core::progress::{Notice, NoticeLevel, ProgressSink};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io::IsTerminal;
use std::time::Duration;
use tabled::{Table, Tabled};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
    Yaml,
}

/// Print a whole report in a machine format; returns `false` for table output
pub fn print_machine<T: Serialize>(data: &T, format: OutputFormat) -> anyhow::Result<bool> {
    match format {
        OutputFormat::Table => return Ok(false),
        OutputFormat::Json => print_json(data)?,
        OutputFormat::Yaml => print_yaml(data)?,
    }
    Ok(true)
}

pub fn print_table<T: Tabled>(data: Vec<T>) {
    if data.is_empty() {
        println!("{}", "No results found".yellow());
        return;
    }

    let table = Table::new(data);
    println!("{}", table);
}

pub fn print_json<T: Serialize>(data: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(data)?;
    println!("{}", json);
    Ok(())
}

pub fn print_yaml<T: Serialize>(data: &T) -> anyhow::Result<()> {
    let yaml = serde_yaml::to_string(data)?;
    println!("{}", yaml);
    Ok(())
}

/// Print a success message with green checkmark
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message.green());
}

/// Print an error message with red X
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message.red());
}

/// Print an info message with blue i
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Print a warning message with yellow triangle
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message.yellow());
}

fn print_banner(message: &str) {
    println!("{}", format!("==== {} ====", message).bold());
}

/// Renders workflow notices on the console
///
/// On a terminal a spinner shows the step currently being waited on; status
/// lines are printed above it.
pub struct ConsoleSink {
    spinner: Option<ProgressBar>,
}

impl ConsoleSink {
    pub fn new() -> Self {
        let spinner = std::io::stdout().is_terminal().then(|| {
            let spinner = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
                spinner.set_style(style);
            }
            spinner.enable_steady_tick(Duration::from_millis(100));
            spinner
        });
        Self { spinner }
    }

    pub fn finish(&self) {
        if let Some(spinner) = &self.spinner {
            spinner.finish_and_clear();
        }
    }

    fn print(&self, notice: &Notice) {
        let line = notice.render();
        match notice.level {
            NoticeLevel::Info => print_info(&line),
            NoticeLevel::Ok => print_success(&line),
            NoticeLevel::Warning => print_warning(&line),
            NoticeLevel::Error => print_error(&line),
            NoticeLevel::Banner => print_banner(&line),
        }
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for ConsoleSink {
    fn notify(&self, notice: Notice) {
        match &self.spinner {
            Some(spinner) => {
                spinner.suspend(|| self.print(&notice));
                if notice.level == NoticeLevel::Info {
                    spinner.set_message(notice.render());
                }
            }
            None => self.print(&notice),
        }
    }
}

impl Drop for ConsoleSink {
    fn drop(&mut self) {
        self.finish();
    }
}
