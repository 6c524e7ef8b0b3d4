//! Backoff builders shared by retrying operations.
//!
//! Uses `backon` for exponential backoff with jitter. Callers wrap their
//! fallible future with `.retry(builder)` and log from `.notify`.

use std::time::Duration;

use backon::ExponentialBuilder;

/// Backoff for TCP connections to peers that may not be listening yet.
///
/// - Min delay: 100ms
/// - Max delay: 5s
/// - Max attempts: 30
/// - Jitter enabled
pub fn connection_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(30)
        .with_jitter()
}

/// Backoff for database batch commits.
///
/// `max_attempts` counts the initial attempt, so a value of 1 never retries.
pub fn db_backoff(max_attempts: usize) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(50))
        .with_max_delay(Duration::from_secs(1))
        .with_max_times(max_attempts.saturating_sub(1))
        .with_jitter()
}
