//! Logging configuration module
//!
//! Console output goes to stderr so that machine-readable command output on
//! stdout stays clean. An optional file layer writes daily-rotated logs.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
pub use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "ebsctl.log";

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Directory for rotated log files
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
    /// Enable file logging
    pub file_logging_enabled: bool,
    /// Write file logs as JSON lines
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            log_dir: None,
            file_logging_enabled: false,
            json: true,
        }
    }
}

impl LoggingConfig {
    /// Raise the level for `-v` flags given on the command line
    pub fn with_verbosity(mut self, verbose: u8) -> Self {
        self.level = match verbose {
            0 => self.level,
            1 => "info".to_string(),
            2 => "debug".to_string(),
            _ => "trace".to_string(),
        };
        self
    }

    /// Directory the file layer writes to, if file logging is on
    pub fn file_dir(&self) -> Option<&PathBuf> {
        if self.file_logging_enabled {
            self.log_dir.as_ref()
        } else {
            None
        }
    }

    /// Initialize logging based on configuration
    ///
    /// The returned guard flushes the file writer on drop and must be held
    /// for the lifetime of the process.
    pub fn init(&self) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error + Send + Sync>> {
        // RUST_LOG wins over the configured level
        let env_filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.level))?;

        let console_layer = fmt::layer()
            .with_target(false)
            .with_level(true)
            .with_writer(io::stderr);

        let guard = if let Some(dir) = self.file_dir() {
            std::fs::create_dir_all(dir)?;
            let file_appender = rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = non_blocking(file_appender);

            if self.json {
                let file_layer = fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_ansi(false)
                    .json()
                    .with_writer(writer);

                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(console_layer)
                    .with(file_layer)
                    .try_init()?;
            } else {
                let file_layer = fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_ansi(false)
                    .with_writer(writer);

                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(console_layer)
                    .with(file_layer)
                    .try_init()?;
            }
            Some(guard)
        } else {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .try_init()?;
            None
        };

        tracing::debug!("Logging initialized - level: {}", self.level);

        Ok(guard)
    }
}

/// Log a volume operation with its dry-run flag
#[macro_export]
macro_rules! log_volume_operation {
    ($op:expr, $volume_id:expr, $dry_run:expr) => {
        tracing::info!(
            operation = %$op,
            volume_id = %$volume_id,
            dry_run = $dry_run,
            "Volume operation"
        )
    };
    ($op:expr, $volume_id:expr, $dry_run:expr, $($key:ident = $value:expr),+) => {
        tracing::info!(
            operation = %$op,
            volume_id = %$volume_id,
            dry_run = $dry_run,
            $($key = %$value),+,
            "Volume operation"
        )
    };
}
