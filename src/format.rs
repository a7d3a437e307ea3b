//! Human-readable text for durations and night-window status.
//!
//! Rounding policy for display lives here so the calculators stay numeric.

use crate::night::{NightPhase, NightPrayerStatus};

/// Format a countdown: `"1h 5m"`, `"4m 3s"`, `"9s"`. Negative input counts as zero.
pub fn format_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Whole minutes, rounded up so "30 seconds" reads as "1 minute"
fn minutes_ceil(seconds: i64) -> i64 {
    seconds.max(0).saturating_add(59) / 60
}

/// Whole hours, rounded to nearest
fn hours_rounded(seconds: i64) -> i64 {
    seconds.max(0).saturating_add(1800) / 3600
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("{} {}", n, unit)
    } else {
        format!("{} {}s", n, unit)
    }
}

pub fn describe_night_status(status: &NightPrayerStatus) -> String {
    match status.phase {
        NightPhase::BeforeWindow => {
            let secs = status.seconds_until_start.unwrap_or(0);
            if secs >= 3600 {
                format!(
                    "Last third of the night begins in about {}",
                    plural(hours_rounded(secs), "hour")
                )
            } else {
                format!(
                    "Last third of the night begins in {}",
                    plural(minutes_ceil(secs), "minute")
                )
            }
        }
        NightPhase::InsideWindow => {
            let secs = status.seconds_until_end.unwrap_or(0);
            format!(
                "Last third of the night: {} remaining",
                plural(minutes_ceil(secs), "minute")
            )
        }
        NightPhase::AfterWindow => status.label.to_string(),
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn format_duration_never_panics(secs in any::<i64>()) {
            let _ = format_duration(secs);
        }

        #[test]
        fn format_duration_has_unit(secs in 0i64..1_000_000) {
            let s = format_duration(secs);
            prop_assert!(s.ends_with('m') || s.ends_with('s'));
        }
    }
}
