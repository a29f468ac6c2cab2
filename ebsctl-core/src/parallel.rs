//! Parallel fan-out and join
//!
//! Every unit of work runs as its own task of a `JoinSet` on the
//! multi-threaded runtime. The caller gets all outcomes back, in submission
//! order, only once every task has finished.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{error, info};

/// Outcome of one task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskOutcome<T> {
    Finished(T),
    /// The task panicked or was cancelled
    Crashed(String),
}

impl<T> TaskOutcome<T> {
    pub fn finished(self) -> Option<T> {
        match self {
            TaskOutcome::Finished(value) => Some(value),
            TaskOutcome::Crashed(_) => None,
        }
    }
}

/// Spawn every unit and wait for all of them
pub async fn run_parallel<T, Fut>(label: &str, units: Vec<Fut>) -> Vec<TaskOutcome<T>>
where
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    info!("Starting {} parallel {} tasks", units.len(), label);
    let start_time = Instant::now();

    let mut join_set = JoinSet::new();
    let mut slots = HashMap::with_capacity(units.len());
    for (index, unit) in units.into_iter().enumerate() {
        let handle = join_set.spawn(unit);
        slots.insert(handle.id(), index);
    }

    let mut outcomes: Vec<Option<TaskOutcome<T>>> = (0..slots.len()).map(|_| None).collect();
    while let Some(joined) = join_set.join_next_with_id().await {
        let (id, outcome) = match joined {
            Ok((id, value)) => (id, TaskOutcome::Finished(value)),
            Err(e) => {
                error!("Task of {} failed: {}", label, e);
                (e.id(), TaskOutcome::Crashed(e.to_string()))
            }
        };
        if let Some(&index) = slots.get(&id) {
            outcomes[index] = Some(outcome);
        }
    }
    let outcomes: Vec<TaskOutcome<T>> = outcomes
        .into_iter()
        .map(|outcome| outcome.unwrap_or_else(|| TaskOutcome::Crashed("task was not joined".to_string())))
        .collect();

    info!(
        "Parallel {} tasks completed: {} tasks in {:.2}s",
        label,
        outcomes.len(),
        start_time.elapsed().as_secs_f64()
    );
    outcomes
}
