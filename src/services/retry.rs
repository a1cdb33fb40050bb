use std::future::Future;
use std::time::Duration as StdDuration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::AppResult;

/// Delay before each attempt. The first attempt runs immediately.
pub const DEFAULT_BACKOFF: [StdDuration; 4] = [
    StdDuration::from_secs(0),
    StdDuration::from_secs(1),
    StdDuration::from_secs(2),
    StdDuration::from_secs(4),
];

/// Runs `operation` once per entry of `schedule`, stopping at the first success
/// or at the first error that is not retryable.
pub async fn with_backoff<T, F, Fut>(
    label: &str,
    schedule: &[StdDuration],
    mut operation: F,
) -> AppResult<T>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let attempts = schedule.len().max(1);
    let mut attempt = 0;
    loop {
        if let Some(delay) = schedule.get(attempt) {
            if !delay.is_zero() {
                sleep(*delay).await;
            }
        }

        debug!(target: "app::retry", label, attempt = attempt + 1, "attempting operation");
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => {
                let retryable = error.is_retryable();
                if !retryable || attempt + 1 >= attempts {
                    return Err(error);
                }
                warn!(
                    target: "app::retry",
                    label,
                    attempt = attempt + 1,
                    %error,
                    "retryable failure, backing off"
                );
            }
        }
        attempt += 1;
    }
}
