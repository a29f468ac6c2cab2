//! Operator-facing progress notices
//!
//! Workflows announce each destructive step before and after it runs. The
//! binary renders notices as colored console lines; library users get them as
//! tracing events unless they install their own sink.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Severity of a notice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Ok,
    Warning,
    Error,
    /// Section banner around parallel work
    Banner,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub level: NoticeLevel,
    /// Parallel task the notice belongs to
    pub task: Option<usize>,
    pub dry_run: bool,
    pub message: String,
}

impl Notice {
    pub fn new(level: NoticeLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            task: None,
            dry_run: false,
            message: message.into(),
        }
    }

    pub fn task(mut self, task: Option<usize>) -> Self {
        self.task = task;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Message with its `[DRY]` and `[n]` prefixes
    pub fn render(&self) -> String {
        let mut line = String::new();
        if self.dry_run {
            line.push_str("[DRY] ");
        }
        if let Some(task) = self.task {
            line.push_str(&format!("[{}] ", task));
        }
        line.push_str(&self.message);
        line
    }
}

/// Receiver of progress notices
pub trait ProgressSink: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Forwards notices to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn notify(&self, notice: Notice) {
        let line = notice.render();
        match notice.level {
            NoticeLevel::Warning => tracing::warn!(task = ?notice.task, "{}", line),
            NoticeLevel::Error => tracing::error!(task = ?notice.task, "{}", line),
            NoticeLevel::Banner => tracing::debug!("{}", line),
            NoticeLevel::Info | NoticeLevel::Ok => tracing::info!(task = ?notice.task, "{}", line),
        }
    }
}

/// Keeps every notice, for tests and deferred rendering
#[derive(Debug, Default)]
pub struct CollectingSink {
    notices: Mutex<Vec<Notice>>,
}

impl CollectingSink {
    pub fn notices(&self) -> Vec<Notice> {
        self.notices
            .lock()
            .map(|n| n.clone())
            .unwrap_or_default()
    }

    pub fn rendered(&self) -> Vec<String> {
        self.notices().iter().map(Notice::render).collect()
    }
}

impl ProgressSink for CollectingSink {
    fn notify(&self, notice: Notice) {
        if let Ok(mut notices) = self.notices.lock() {
            notices.push(notice);
        }
    }
}
