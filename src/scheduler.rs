/// Minute-boundary scheduler
/// Ticks at the start of every minute so reminders land on their exact minute

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Longest backlog of skipped minutes a tick catches up on
pub const MAX_CATCH_UP_MINUTES: i64 = 24 * 60;

/// Wait until the start of the next minute
pub fn time_until_next_minute() -> Duration {
    let now = Utc::now();
    time_until_next_minute_at(now.second(), now.nanosecond())
}

/// Testable version: wait from the given second and nanosecond within the minute.
/// Leap seconds (second 60, or nanos past 1e9) count as the last instant of the minute.
pub fn time_until_next_minute_at(second: u32, nanos: u32) -> Duration {
    let second = second.min(59);
    let nanos = nanos.min(999_999_999);
    let elapsed = Duration::from_secs(second as u64) + Duration::from_nanos(nanos as u64);
    Duration::from_secs(60).saturating_sub(elapsed)
}

/// `now` with seconds and sub-seconds dropped
pub fn minute_floor(now: DateTime<Utc>) -> DateTime<Utc> {
    now.with_nanosecond(0)
        .and_then(|t| t.with_second(0))
        .unwrap_or(now)
}

/// Minutes to process at `now` when `last` was the latest one already handled.
///
/// Every minute after `last` up to `minute_floor(now)` is returned, oldest
/// first, so a tick that was held up still sees the minutes it slept through.
/// With nothing handled yet, or after the clock moved backwards, only the
/// current minute is returned.
pub fn pending_minutes(last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Vec<DateTime<Utc>> {
    let current = minute_floor(now);
    let last = match last {
        Some(last) if last <= current => last,
        _ => return vec![current],
    };
    let behind = (current - last).num_minutes();
    if behind > MAX_CATCH_UP_MINUTES {
        warn!("Scheduler fell {} minutes behind, skipping the oldest", behind);
    }
    let count = behind.min(MAX_CATCH_UP_MINUTES);
    (0..count)
        .rev()
        .map(|back| current - chrono::Duration::minutes(back))
        .collect()
}

/// Refresh when nothing is loaded or the loaded day is not today
pub fn needs_refresh(loaded: Option<NaiveDate>, today: NaiveDate) -> bool {
    loaded != Some(today)
}

/// Run `tick` at every minute boundary until cancelled
pub async fn run_scheduler<F, Fut>(cancel_token: CancellationToken, mut tick: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    info!("Scheduler started (ticking every minute)");

    loop {
        let wait = time_until_next_minute();
        debug!("Next tick in {:?}", wait);

        tokio::select! {
            _ = sleep(wait) => {}
            _ = cancel_token.cancelled() => {
                info!("Scheduler shutting down");
                break;
            }
        }

        tick().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    // === time_until_next_minute_at tests ===

    #[test]
    fn test_time_until_next_minute_at_boundary() {
        assert_eq!(time_until_next_minute_at(0, 0), Duration::from_secs(60));
    }

    #[test]
    fn test_time_until_next_minute_at_midway() {
        assert_eq!(time_until_next_minute_at(30, 0), Duration::from_secs(30));
        assert_eq!(
            time_until_next_minute_at(59, 500_000_000),
            Duration::from_millis(500)
        );
    }

    #[test]
    fn test_time_until_next_minute_leap_second() {
        assert_eq!(time_until_next_minute_at(60, 0), Duration::from_secs(1));
        assert_eq!(
            time_until_next_minute_at(59, 1_500_000_000),
            Duration::from_nanos(1)
        );
    }

    #[test]
    fn test_time_until_next_minute_reasonable() {
        let wait = time_until_next_minute();
        assert!(wait <= Duration::from_secs(60));
        assert!(wait > Duration::ZERO);
    }

    // === minute_floor tests ===

    #[test]
    fn test_minute_floor() {
        let t = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 37).unwrap()
            + chrono::Duration::milliseconds(250);
        assert_eq!(minute_floor(t), Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap());
    }

    // === pending_minutes tests ===

    #[test]
    fn test_pending_minutes_first_tick() {
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 11, 43, 12).unwrap();
        assert_eq!(
            pending_minutes(None, now),
            vec![Utc.with_ymd_and_hms(2026, 3, 2, 11, 43, 0).unwrap()]
        );
    }

    #[test]
    fn test_pending_minutes_same_minute_is_empty() {
        let last = Utc.with_ymd_and_hms(2026, 3, 2, 11, 43, 0).unwrap();
        assert!(pending_minutes(Some(last), last + chrono::Duration::seconds(59)).is_empty());
    }

    #[test]
    fn test_pending_minutes_after_slow_tick() {
        let last = Utc.with_ymd_and_hms(2026, 3, 2, 11, 43, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 11, 46, 33).unwrap();
        let minutes: Vec<u32> = pending_minutes(Some(last), now)
            .iter()
            .map(|m| m.minute())
            .collect();
        assert_eq!(minutes, vec![44, 45, 46]);
    }

    #[test]
    fn test_pending_minutes_clock_moved_back() {
        let last = Utc.with_ymd_and_hms(2026, 3, 2, 11, 43, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 11, 40, 5).unwrap();
        assert_eq!(
            pending_minutes(Some(last), now),
            vec![Utc.with_ymd_and_hms(2026, 3, 2, 11, 40, 0).unwrap()]
        );
    }

    #[test]
    fn test_pending_minutes_backlog_is_capped() {
        let last = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 3, 4, 0, 0, 0).unwrap();
        let minutes = pending_minutes(Some(last), now);
        assert_eq!(minutes.len() as i64, MAX_CATCH_UP_MINUTES);
        assert_eq!(minutes.last(), Some(&now));
    }

    // === needs_refresh tests ===

    #[test]
    fn test_needs_refresh() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let yesterday = today.pred_opt().unwrap();
        assert!(needs_refresh(None, today));
        assert!(needs_refresh(Some(yesterday), today));
        assert!(!needs_refresh(Some(today), today));
    }

    // === run_scheduler tests ===

    #[tokio::test(start_paused = true)]
    async fn test_run_scheduler_ticks_until_cancelled() {
        let cancel = CancellationToken::new();
        let ticks = Arc::new(AtomicU32::new(0));

        let handle = {
            let cancel = cancel.clone();
            let ticks = ticks.clone();
            tokio::spawn(async move {
                run_scheduler(cancel, || {
                    let ticks = ticks.clone();
                    async move {
                        ticks.fetch_add(1, Ordering::SeqCst);
                    }
                })
                .await;
            })
        };

        tokio::time::sleep(Duration::from_secs(61)).await;
        cancel.cancel();
        handle.await.unwrap();

        let n = ticks.load(Ordering::SeqCst);
        assert!(n >= 1, "expected at least one tick within a minute");

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), n, "no ticks after cancellation");
    }

    #[tokio::test]
    async fn test_run_scheduler_stops_immediately_when_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let ticks = &AtomicU32::new(0);
        run_scheduler(cancel, move || async move {
            ticks.fetch_add(1, Ordering::SeqCst);
        })
        .await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
    }
}


/// Kani formal verification proofs
#[cfg(kani)]
mod kani_proofs {
    use super::*;

    #[kani::proof]
    fn wait_never_exceeds_a_minute() {
        let second: u32 = kani::any();
        let nanos: u32 = kani::any();
        let wait = time_until_next_minute_at(second, nanos);
        kani::assert(wait <= Duration::from_secs(60), "wait must be <= 60s");
    }
}
