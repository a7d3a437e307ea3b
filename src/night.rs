//! Last third of the night
//!
//! The night runs from Maghrib to the following Fajr. Its final third is the
//! preferred window for the optional night prayer. Everything here is pure:
//! invalid input yields `None`, never a partially filled record.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

pub const LABEL_BEFORE: &str = "The last third of the night has not started yet";
pub const LABEL_INSIDE: &str = "The last third of the night is underway";
pub const LABEL_AFTER: &str = "The last third of the night has ended";

/// Half-open interval `[start, end)` with `end > start`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Whole seconds between `start` and `end`
    pub duration_secs: i64,
}

impl TimeWindow {
    fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start,
            end,
            duration_secs: (end - start).num_seconds(),
        }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.end
    }
}

/// Where "now" sits relative to the window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NightPhase {
    BeforeWindow,
    InsideWindow,
    AfterWindow,
}

impl NightPhase {
    pub fn at(window: &TimeWindow, now: DateTime<Utc>) -> Self {
        if now < window.start {
            NightPhase::BeforeWindow
        } else if now < window.end {
            NightPhase::InsideWindow
        } else {
            NightPhase::AfterWindow
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            NightPhase::BeforeWindow => LABEL_BEFORE,
            NightPhase::InsideWindow => LABEL_INSIDE,
            NightPhase::AfterWindow => LABEL_AFTER,
        }
    }
}

/// Snapshot of the night-prayer window as seen from one instant.
/// Recreated on every evaluation; nothing is carried between calls.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NightPrayerStatus {
    pub window: TimeWindow,
    pub is_active: bool,
    /// `None` once the window has started
    pub seconds_until_start: Option<i64>,
    /// `None` once the window has ended
    pub seconds_until_end: Option<i64>,
    /// Fraction of the window elapsed, in `[0, 1]`
    pub progress: f64,
    pub phase: NightPhase,
    pub label: &'static str,
}

impl NightPrayerStatus {
    pub fn evaluate(window: TimeWindow, now: DateTime<Utc>) -> Self {
        let phase = NightPhase::at(&window, now);
        Self {
            window,
            is_active: window.contains(now),
            seconds_until_start: positive_seconds(window.start - now),
            seconds_until_end: positive_seconds(window.end - now),
            progress: progress_at(&window, now),
            phase,
            label: phase.label(),
        }
    }
}

fn positive_seconds(delta: Duration) -> Option<i64> {
    (delta > Duration::zero()).then(|| delta.num_seconds())
}

fn progress_at(window: &TimeWindow, now: DateTime<Utc>) -> f64 {
    if now < window.start {
        return 0.0;
    }
    let total = delta_nanos(window.duration()) as f64;
    let elapsed = delta_nanos(now - window.start) as f64;
    (elapsed / total).clamp(0.0, 1.0)
}

const NANOS_PER_SEC: i128 = 1_000_000_000;

/// Whole nanoseconds in `delta`; i128 holds any span chrono can represent
fn delta_nanos(delta: Duration) -> i128 {
    i128::from(delta.num_seconds()) * NANOS_PER_SEC + i128::from(delta.subsec_nanos())
}

/// Nanoseconds since the Unix epoch, over chrono's full date range
fn instant_nanos(instant: DateTime<Utc>) -> i128 {
    i128::from(instant.timestamp()) * NANOS_PER_SEC + i128::from(instant.timestamp_subsec_nanos())
}

fn from_instant_nanos(nanos: i128) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(nanos.div_euclid(NANOS_PER_SEC)).ok()?;
    let subsec = u32::try_from(nanos.rem_euclid(NANOS_PER_SEC)).ok()?;
    DateTime::from_timestamp(secs, subsec)
}

/// Integer core: bounds of the last third of `[start_ns, end_ns)`.
///
/// Returns `None` when `end_ns <= start_ns`. The third is truncated, so the
/// window can be up to 2ns longer than an exact third, but it is never empty.
pub fn last_third_bounds(start_ns: i128, end_ns: i128) -> Option<(i128, i128)> {
    if end_ns <= start_ns {
        return None;
    }
    let span = end_ns.checked_sub(start_ns)?;
    let third = span / 3;
    let window_start = start_ns.checked_add(third.checked_mul(2)?)?;
    Some((window_start, end_ns))
}

/// Last third of the night between `start` (Maghrib) and `end` (next Fajr)
pub fn last_third_of_night(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<TimeWindow> {
    let (window_start, _) = last_third_bounds(instant_nanos(start), instant_nanos(end))?;
    // Lies between two representable instants, so it converts back
    Some(TimeWindow::new(from_instant_nanos(window_start)?, end))
}

pub fn night_prayer_status(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<NightPrayerStatus> {
    last_third_of_night(start, end).map(|window| NightPrayerStatus::evaluate(window, now))
}

/// String front-end. `now` defaults to the current time; an unparseable
/// `now` is treated like any other invalid input.
pub fn night_prayer_status_str(
    start: &str,
    end: &str,
    now: Option<&str>,
) -> Option<NightPrayerStatus> {
    let start = parse_instant(start)?;
    let end = parse_instant(end)?;
    let now = match now {
        Some(raw) => parse_instant(raw)?,
        None => Utc::now(),
    };
    night_prayer_status(start, end, now)
}

/// Parse an absolute instant: RFC 3339, RFC 2822, or Unix seconds
pub fn parse_instant(input: &str) -> Option<DateTime<Utc>> {
    let s = input.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if s.bytes().all(|b| b.is_ascii_digit() || b == b'-') {
        if let Ok(secs) = s.parse::<i64>() {
            return DateTime::from_timestamp(secs, 0);
        }
    }
    None
}



/// Kani formal verification proofs
#[cfg(kani)]
mod kani_proofs {
    use super::*;

    #[kani::proof]
    fn bounds_never_panic() {
        let start: i128 = kani::any();
        let end: i128 = kani::any();
        let _ = last_third_bounds(start, end);
    }

    #[kani::proof]
    fn window_inside_night() {
        let start = i128::from(kani::any::<i64>());
        let end = i128::from(kani::any::<i64>());
        if let Some((ws, we)) = last_third_bounds(start, end) {
            kani::assert(ws >= start, "window starts inside the night");
            kani::assert(ws < we, "window is never empty");
            kani::assert(we == end, "window ends at the night's end");
        }
    }

    #[kani::proof]
    fn empty_night_rejected() {
        let start: i128 = kani::any();
        let end: i128 = kani::any();
        kani::assume(end <= start);
        kani::assert(last_third_bounds(start, end).is_none(), "end <= start is invalid");
    }
}
