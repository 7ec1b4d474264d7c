//! Backoff for SQLite lock contention
//!
//! Every write transaction of the engine (batch progress, match results,
//! review decisions, price application) runs through [`retry_on_lock`].
//! The total wait is bounded by the `db_max_lock_wait_ms` setting.

use dcr_common::{Error, Result};
use std::time::{Duration, Instant};

const FIRST_DELAY: Duration = Duration::from_millis(10);
const MAX_DELAY: Duration = Duration::from_secs(1);

/// Delay before the next attempt: doubles from 10ms up to 1s, never past the
/// remaining budget
fn next_delay(previous: Option<Duration>, remaining: Duration) -> Duration {
    let doubled = previous.map_or(FIRST_DELAY, |d| (d * 2).min(MAX_DELAY));
    doubled.min(remaining)
}

/// Run `operation` until it succeeds, fails with anything but lock
/// contention, or `max_wait_ms` has elapsed.
///
/// The closure is called once per attempt, so it must open its own
/// transaction each time.
pub async fn retry_on_lock<F, Fut, T>(label: &str, max_wait_ms: u64, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let started = Instant::now();
    let budget = Duration::from_millis(max_wait_ms);
    let mut delay: Option<Duration> = None;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let err = match operation().await {
            Ok(value) => {
                if attempts > 1 {
                    tracing::debug!(
                        operation = label,
                        attempts,
                        waited_ms = started.elapsed().as_millis() as u64,
                        "Write went through after lock contention"
                    );
                }
                return Ok(value);
            }
            Err(err) if err.is_lock_contention() => err,
            Err(err) => return Err(err),
        };

        let remaining = budget.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            tracing::error!(
                operation = label,
                attempts,
                max_wait_ms,
                error = %err,
                "Giving up on locked database"
            );
            return Err(Error::Internal(format!(
                "{}: database stayed locked for {} ms ({} attempts)",
                label, max_wait_ms, attempts
            )));
        }

        let wait = next_delay(delay, remaining);
        tracing::warn!(
            operation = label,
            attempts,
            wait_ms = wait.as_millis() as u64,
            "Database locked, backing off"
        );
        tokio::time::sleep(wait).await;
        delay = Some(wait);
    }
}
