//! Prayer engine: next prayer, countdowns, live rakah estimate, travel prediction
//!
//! Stateless apart from its timing configuration. Every operation takes
//! "now" explicitly so results are reproducible in tests.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::schedule::{DailySchedule, Prayer, PrayerName};

/// Average length of one rakah (2.4 minutes)
pub const DEFAULT_RAKAH_DURATION_SECS: i64 = 144;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub rakah_duration_secs: i64,
    /// Delay between the iqama time and the imam actually starting
    pub start_lag_secs: i64,
    /// How early to arrive before the prayer starts
    pub buffer_before_start_secs: i64,
    /// Time after the estimated end during which the prayer may still be finishing
    pub grace_secs: i64,
    /// How long an "ended N minutes ago" status is shown
    pub post_prayer_display_mins: i64,
    /// Window after the estimated end where a latecomer may still join
    pub catch_up_mins: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rakah_duration_secs: DEFAULT_RAKAH_DURATION_SECS,
            start_lag_secs: 0,
            buffer_before_start_secs: 30,
            grace_secs: 60,
            post_prayer_display_mins: 28,
            catch_up_mins: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NextPrayer {
    pub prayer: Prayer,
    pub seconds_until_adhan: i64,
    pub seconds_until_iqama: Option<i64>,
    pub is_tomorrow: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrayerCountdown {
    pub prayer: PrayerName,
    pub adhan: DateTime<Utc>,
    pub iqama: Option<DateTime<Utc>>,
    pub seconds_until_adhan: i64,
    pub seconds_until_iqama: Option<i64>,
    /// Adhan has been called and iqama is still ahead
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RakahStatus {
    NotStarted,
    InProgress,
    RecentlyFinished,
    LikelyFinished,
    NotAvailable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RakahEstimate {
    pub status: RakahStatus,
    pub current_rakah: Option<u32>,
    pub total_rakah: u32,
    pub elapsed_secs: Option<i64>,
    pub remaining_secs: Option<i64>,
    pub progress: f64,
    pub is_estimate: bool,
    pub ended_minutes_ago: Option<i64>,
    pub can_still_catch: bool,
}

impl RakahEstimate {
    fn not_available(total_rakah: u32) -> Self {
        Self {
            status: RakahStatus::NotAvailable,
            current_rakah: None,
            total_rakah,
            elapsed_secs: None,
            remaining_secs: None,
            progress: 0.0,
            is_estimate: false,
            ended_minutes_ago: None,
            can_still_catch: false,
        }
    }

    fn finished(status: RakahStatus, total_rakah: u32, elapsed: Duration) -> Self {
        Self {
            status,
            current_rakah: Some(total_rakah),
            total_rakah,
            elapsed_secs: Some(elapsed.num_seconds()),
            remaining_secs: None,
            progress: 1.0,
            is_estimate: true,
            ended_minutes_ago: None,
            can_still_catch: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrivalStatus {
    BeforeStart,
    InProgress,
    AfterEstimatedEnd,
    IqamaUnavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TravelPrediction {
    pub recommended_leave_time: DateTime<Utc>,
    pub arrival_time: DateTime<Utc>,
    /// 0 when arriving before the prayer starts
    pub arrival_rakah: Option<u32>,
    pub arrival_status: ArrivalStatus,
    pub should_leave_now: bool,
    pub seconds_until_leave: Option<i64>,
    pub is_late: bool,
}

pub struct PrayerEngine {
    config: EngineConfig,
}

impl PrayerEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(EngineConfig::default())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn next_prayer(&self, schedule: &DailySchedule, now: DateTime<Utc>) -> NextPrayer {
        for prayer in schedule.prayers() {
            if prayer.adhan > now {
                return NextPrayer {
                    prayer: prayer.clone(),
                    seconds_until_adhan: (prayer.adhan - now).num_seconds(),
                    seconds_until_iqama: prayer.iqama.map(|iq| (iq - now).num_seconds()),
                    is_tomorrow: false,
                };
            }

            // Adhan called, congregation not yet started
            if let Some(iqama) = prayer.iqama {
                if now < iqama {
                    return NextPrayer {
                        prayer: prayer.clone(),
                        seconds_until_adhan: 0,
                        seconds_until_iqama: Some((iqama - now).num_seconds()),
                        is_tomorrow: false,
                    };
                }
            }
        }

        let fajr = schedule.fajr.shifted_days(1);
        NextPrayer {
            seconds_until_adhan: (fajr.adhan - now).num_seconds(),
            seconds_until_iqama: fajr.iqama.map(|iq| (iq - now).num_seconds()),
            prayer: fajr,
            is_tomorrow: true,
        }
    }

    /// Latest prayer whose adhan has passed, `None` before Fajr
    pub fn current_prayer<'a>(
        &self,
        schedule: &'a DailySchedule,
        now: DateTime<Utc>,
    ) -> Option<&'a Prayer> {
        schedule
            .prayers()
            .into_iter()
            .rev()
            .find(|prayer| prayer.adhan <= now)
    }

    pub fn countdowns(&self, schedule: &DailySchedule, now: DateTime<Utc>) -> Vec<PrayerCountdown> {
        schedule
            .prayers()
            .into_iter()
            .map(|prayer| {
                let until_adhan = (prayer.adhan - now).num_seconds();
                let until_iqama = self.countdown_to_iqama(prayer, now);
                PrayerCountdown {
                    prayer: prayer.name,
                    adhan: prayer.adhan,
                    iqama: prayer.iqama,
                    seconds_until_adhan: until_adhan.max(0),
                    seconds_until_iqama: until_iqama,
                    is_active: until_adhan <= 0 && until_iqama.is_some_and(|t| t > 0),
                }
            })
            .collect()
    }

    /// Seconds until iqama, floored at zero; `None` without an iqama time
    pub fn countdown_to_iqama(&self, prayer: &Prayer, now: DateTime<Utc>) -> Option<i64> {
        prayer.iqama.map(|iq| (iq - now).num_seconds().max(0))
    }

    fn prayer_start(&self, iqama: DateTime<Utc>) -> DateTime<Utc> {
        iqama + Duration::seconds(self.config.start_lag_secs)
    }

    fn estimated_duration(&self, total_rakah: u32) -> Duration {
        Duration::seconds(total_rakah as i64 * self.config.rakah_duration_secs)
    }

    fn rakah_at(&self, elapsed: Duration, total_rakah: u32) -> u32 {
        let index = elapsed.num_seconds() / self.config.rakah_duration_secs.max(1) + 1;
        index.clamp(1, total_rakah.max(1) as i64) as u32
    }

    pub fn estimate_rakah(&self, prayer: &Prayer, now: DateTime<Utc>) -> RakahEstimate {
        let total_rakah = prayer.rakah_count();
        let Some(iqama) = prayer.iqama else {
            return RakahEstimate::not_available(total_rakah);
        };

        let start = self.prayer_start(iqama);
        let duration = self.estimated_duration(total_rakah);
        let end = start + duration;
        let grace_end = end + Duration::seconds(self.config.grace_secs);
        let display_end = end + Duration::minutes(self.config.post_prayer_display_mins);

        if now < start {
            return RakahEstimate {
                status: RakahStatus::NotStarted,
                current_rakah: None,
                total_rakah,
                elapsed_secs: None,
                remaining_secs: Some((start - now).num_seconds()),
                progress: 0.0,
                is_estimate: true,
                ended_minutes_ago: None,
                can_still_catch: false,
            };
        }

        let elapsed = now - start;

        if now <= end {
            let total = duration.num_seconds().max(1) as f64;
            return RakahEstimate {
                status: RakahStatus::InProgress,
                current_rakah: Some(self.rakah_at(elapsed, total_rakah)),
                total_rakah,
                elapsed_secs: Some(elapsed.num_seconds()),
                remaining_secs: Some((end - now).num_seconds()),
                progress: (elapsed.num_seconds() as f64 / total).clamp(0.0, 1.0),
                is_estimate: true,
                ended_minutes_ago: None,
                can_still_catch: false,
            };
        }

        // Past the estimate, the imam may still be finishing
        if now <= grace_end {
            return RakahEstimate {
                remaining_secs: Some(0),
                ..RakahEstimate::finished(RakahStatus::InProgress, total_rakah, elapsed)
            };
        }

        if now <= display_end {
            let since_end = (now - end).num_seconds();
            let catch_up_end = end + Duration::minutes(self.config.catch_up_mins);
            return RakahEstimate {
                ended_minutes_ago: Some((since_end + 59) / 60),
                can_still_catch: now <= catch_up_end,
                ..RakahEstimate::finished(RakahStatus::RecentlyFinished, total_rakah, elapsed)
            };
        }

        RakahEstimate::finished(RakahStatus::LikelyFinished, total_rakah, elapsed)
    }

    pub fn travel_prediction(
        &self,
        prayer: &Prayer,
        travel_secs: i64,
        now: DateTime<Utc>,
    ) -> TravelPrediction {
        let travel = Duration::seconds(travel_secs.max(0));
        let arrival_time = now + travel;

        let Some(iqama) = prayer.iqama else {
            return TravelPrediction {
                recommended_leave_time: now,
                arrival_time,
                arrival_rakah: None,
                arrival_status: ArrivalStatus::IqamaUnavailable,
                should_leave_now: false,
                seconds_until_leave: None,
                is_late: false,
            };
        };

        let total_rakah = prayer.rakah_count();
        let start = self.prayer_start(iqama);
        let end = start + self.estimated_duration(total_rakah);
        let recommended_leave =
            start - Duration::seconds(self.config.buffer_before_start_secs) - travel;

        let (arrival_rakah, arrival_status) = if arrival_time < start {
            (Some(0), ArrivalStatus::BeforeStart)
        } else if arrival_time > end {
            (None, ArrivalStatus::AfterEstimatedEnd)
        } else {
            (
                Some(self.rakah_at(arrival_time - start, total_rakah)),
                ArrivalStatus::InProgress,
            )
        };

        TravelPrediction {
            recommended_leave_time: recommended_leave,
            arrival_time,
            arrival_rakah,
            arrival_status,
            should_leave_now: now >= recommended_leave,
            seconds_until_leave: (now < recommended_leave)
                .then(|| (recommended_leave - now).num_seconds()),
            is_late: now > start,
        }
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::schedule::fixtures::sample_schedule;
    use proptest::prelude::*;

    proptest! {
        /// Current rakah always within [1, total] while in progress
        #[test]
        fn rakah_in_range(offset in 0i64..2000) {
            let schedule = sample_schedule();
            let engine = PrayerEngine::with_defaults();
            for prayer in schedule.prayers() {
                let now = prayer.iqama.unwrap() + Duration::seconds(offset);
                let estimate = engine.estimate_rakah(prayer, now);
                if let Some(rakah) = estimate.current_rakah {
                    prop_assert!(rakah >= 1 && rakah <= estimate.total_rakah);
                }
                prop_assert!((0.0..=1.0).contains(&estimate.progress));
            }
        }

        /// next_prayer never reports a negative wait
        #[test]
        fn next_prayer_non_negative(minute in 0i64..(24 * 60)) {
            let schedule = sample_schedule();
            let now = schedule.date.and_hms_opt(0, 0, 0).unwrap().and_utc() + Duration::minutes(minute);
            let next = PrayerEngine::with_defaults().next_prayer(&schedule, now);
            prop_assert!(next.seconds_until_adhan >= 0);
        }
    }
}
