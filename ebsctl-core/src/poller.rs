//! Status polling

use ebsctl_common::{Error, Operation, Result};
use std::future::Future;
use std::time::Duration;

/// Poll `check` until it yields a value
///
/// `check` returns `Ok(Some(_))` when the awaited state is reached, `Ok(None)`
/// to keep waiting and `Err(_)` for a terminal failure. The first check runs
/// immediately; later ones wait `interval`. With `max_attempts` set, running
/// out of checks is an [`Error::Timeout`].
pub async fn wait_until<T, F, Fut>(
    interval: Duration,
    max_attempts: Option<u32>,
    operation: Operation,
    id: &str,
    mut check: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let mut attempts: u32 = 0;
    loop {
        attempts += 1;
        if let Some(value) = check().await? {
            tracing::debug!(operation = %operation, id, attempts, "Wait finished");
            return Ok(value);
        }

        if max_attempts.is_some_and(|max| attempts >= max) {
            return Err(Error::Timeout {
                operation,
                id: id.to_string(),
                attempts,
            });
        }

        if interval.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(interval).await;
        }
    }
}
