//! Retry with exponential backoff for outbound HTTP calls

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, warn};

pub const MAX_RETRIES: u32 = 3;
pub const INITIAL_BACKOFF_MS: u64 = 1000;

/// Maximum backoff duration (60 seconds)
pub const MAX_BACKOFF_MS: u64 = 60_000;

/// Backoff before a given attempt (0-indexed).
/// Attempt 0: none, attempt 1: 1s, attempt 2: 2s, then doubling up to the cap.
#[inline]
pub fn calculate_backoff(attempt: u32) -> Duration {
    if attempt == 0 {
        Duration::ZERO
    } else {
        let shift = (attempt - 1).min(30);
        let backoff_ms = INITIAL_BACKOFF_MS.saturating_mul(1u64 << shift);
        Duration::from_millis(backoff_ms.min(MAX_BACKOFF_MS))
    }
}

/// Run `op` up to [`MAX_RETRIES`] times. Errors for which `is_transient`
/// returns false are returned immediately.
pub async fn with_backoff<T, E, F, Fut>(
    label: &str,
    mut op: F,
    is_transient: impl Fn(&E) -> bool,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        if attempt > 0 {
            let backoff = calculate_backoff(attempt);
            warn!("{} attempt {} failed, retrying in {:?}...", label, attempt, backoff);
            sleep(backoff).await;
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !is_transient(&e) => {
                error!("Permanent {} error, not retrying: {}", label, e);
                return Err(e);
            }
            Err(e) => {
                attempt += 1;
                if attempt >= MAX_RETRIES {
                    error!("{} failed after {} attempts: {}", label, MAX_RETRIES, e);
                    return Err(e);
                }
            }
        }
    }
}
