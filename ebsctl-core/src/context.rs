//! Shared handles passed to every workflow

use crate::config::PollingConfig;
use crate::progress::{Notice, NoticeLevel, ProgressSink, TracingSink};
use crate::provider::BlockStorage;
use std::sync::Arc;

/// Provider client, poll intervals and progress sink of one invocation
///
/// Cheap to clone; every parallel task gets its own copy.
#[derive(Clone)]
pub struct Context {
    storage: Arc<dyn BlockStorage>,
    polling: PollingConfig,
    progress: Arc<dyn ProgressSink>,
}

impl Context {
    pub fn new(storage: Arc<dyn BlockStorage>, polling: PollingConfig) -> Self {
        Self {
            storage,
            polling,
            progress: Arc::new(TracingSink),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn storage(&self) -> &dyn BlockStorage {
        self.storage.as_ref()
    }

    pub fn polling(&self) -> &PollingConfig {
        &self.polling
    }

    pub fn notify(&self, notice: Notice) {
        self.progress.notify(notice);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.notify(Notice::new(NoticeLevel::Warning, message));
    }
}
