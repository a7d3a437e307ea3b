//! Shared service state: loaded schedules and refresh counters
//!
//! Written by the scheduler, read by the HTTP API. Locks are never held
//! across an `.await`.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use crate::engine::{EngineConfig, NextPrayer, PrayerEngine, RakahEstimate, TravelPrediction};
use crate::format::format_duration;
use crate::night::NightPrayerStatus;
use crate::schedule::{DailySchedule, PrayerName};
use crate::scheduler::pending_minutes;

/// Yesterday, today and tomorrow for one mosque.
/// Yesterday's night runs into today's early hours.
#[derive(Debug, Clone, Default)]
pub struct Schedules {
    pub previous: Option<DailySchedule>,
    pub today: Option<DailySchedule>,
    pub tomorrow: Option<DailySchedule>,
}

impl Schedules {
    /// The night in progress or ahead at `now`
    pub fn night_status(&self, now: DateTime<Utc>) -> Option<NightPrayerStatus> {
        let today = self.today.as_ref()?;
        match &self.previous {
            Some(previous) if now < today.fajr.adhan => previous.night_status(Some(today), now),
            _ => today.night_status(self.tomorrow.as_ref(), now),
        }
    }

    /// Yesterday followed by today, today followed by tomorrow, and
    /// tomorrow alone: every pairing reminders are drawn from
    pub fn reminder_pairs(&self) -> Vec<(&DailySchedule, Option<&DailySchedule>)> {
        let mut pairs = Vec::new();
        if let (Some(previous), Some(today)) = (&self.previous, &self.today) {
            pairs.push((previous, Some(today)));
        }
        if let Some(today) = &self.today {
            pairs.push((today, self.tomorrow.as_ref()));
        }
        if let Some(tomorrow) = &self.tomorrow {
            pairs.push((tomorrow, None));
        }
        pairs
    }
}

/// What `/next` and `--once` report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Overview {
    pub mosque: String,
    pub next: NextPrayer,
    pub countdown: String,
    pub current: Option<PrayerName>,
    /// Live estimate for the prayer whose adhan most recently passed
    pub rakah: Option<RakahEstimate>,
    pub travel: TravelPrediction,
}

pub fn overview(
    engine: &PrayerEngine,
    schedules: &Schedules,
    travel_secs: i64,
    now: DateTime<Utc>,
) -> Option<Overview> {
    let today = schedules.today.as_ref()?;

    let mut next = engine.next_prayer(today, now);
    if next.is_tomorrow {
        if let Some(tomorrow) = &schedules.tomorrow {
            next = NextPrayer {
                is_tomorrow: true,
                ..engine.next_prayer(tomorrow, now)
            };
        }
    }

    let current = engine.current_prayer(today, now);
    let countdown = match next.seconds_until_iqama {
        Some(secs) if next.seconds_until_adhan == 0 => format!("iqama in {}", format_duration(secs)),
        _ => format!("adhan in {}", format_duration(next.seconds_until_adhan)),
    };

    Some(Overview {
        mosque: today.mosque_name.clone(),
        countdown,
        current: current.map(|p| p.name),
        rakah: current.map(|p| engine.estimate_rakah(p, now)),
        travel: engine.travel_prediction(&next.prayer, travel_secs, now),
        next,
    })
}

/// Refresh counters as reported by `/health` and `/metrics`
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshStatus {
    pub refreshes_successful: u64,
    pub refreshes_failed: u64,
    /// Unix epoch seconds, 0 before the first attempt
    pub last_refresh_time: u64,
    pub last_refresh_ok: bool,
    pub reminders_sent: u64,
}

pub struct AppState {
    schedules: RwLock<Schedules>,
    engine: PrayerEngine,
    travel_secs: i64,
    refreshes_successful: AtomicU64,
    refreshes_failed: AtomicU64,
    last_refresh_time: AtomicU64,
    last_refresh_ok: AtomicBool,
    reminders_sent: AtomicU64,
    /// Latest minute whose reminders were collected
    last_reminder_minute: Mutex<Option<DateTime<Utc>>>,
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl AppState {
    pub fn new(engine_config: EngineConfig, travel_secs: i64) -> Self {
        Self {
            schedules: RwLock::new(Schedules::default()),
            engine: PrayerEngine::new(engine_config),
            travel_secs,
            refreshes_successful: AtomicU64::new(0),
            refreshes_failed: AtomicU64::new(0),
            last_refresh_time: AtomicU64::new(0),
            last_refresh_ok: AtomicBool::new(true), // Assume healthy until proven otherwise
            reminders_sent: AtomicU64::new(0),
            last_reminder_minute: Mutex::new(None),
        }
    }

    pub fn engine(&self) -> &PrayerEngine {
        &self.engine
    }

    pub fn store(&self, schedules: Schedules) {
        *self.schedules.write().unwrap_or_else(PoisonError::into_inner) = schedules;
    }

    pub fn schedules(&self) -> Schedules {
        self.schedules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn today(&self) -> Option<DailySchedule> {
        self.schedules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .today
            .clone()
    }

    pub fn loaded_date(&self) -> Option<NaiveDate> {
        self.schedules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .today
            .as_ref()
            .map(|s| s.date)
    }

    pub fn overview(&self, now: DateTime<Utc>) -> Option<Overview> {
        let schedules = self.schedules.read().unwrap_or_else(PoisonError::into_inner);
        overview(&self.engine, &schedules, self.travel_secs, now)
    }

    pub fn night_status(&self, now: DateTime<Utc>) -> Option<NightPrayerStatus> {
        self.schedules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .night_status(now)
    }

    pub fn record_success(&self) {
        self.refreshes_successful.fetch_add(1, Ordering::Relaxed);
        self.last_refresh_time.store(unix_now(), Ordering::Relaxed);
        self.last_refresh_ok.store(true, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.refreshes_failed.fetch_add(1, Ordering::Relaxed);
        self.last_refresh_time.store(unix_now(), Ordering::Relaxed);
        self.last_refresh_ok.store(false, Ordering::Relaxed);
    }

    /// Minutes not yet handled at `now`, marked as handled
    pub fn claim_minutes(&self, now: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let mut last = self
            .last_reminder_minute
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let minutes = pending_minutes(*last, now);
        if let Some(&newest) = minutes.last() {
            *last = Some(newest);
        }
        minutes
    }

    pub fn record_reminder_sent(&self) {
        self.reminders_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn status(&self) -> RefreshStatus {
        RefreshStatus {
            refreshes_successful: self.refreshes_successful.load(Ordering::Relaxed),
            refreshes_failed: self.refreshes_failed.load(Ordering::Relaxed),
            last_refresh_time: self.last_refresh_time.load(Ordering::Relaxed),
            last_refresh_ok: self.last_refresh_ok.load(Ordering::Relaxed),
            reminders_sent: self.reminders_sent.load(Ordering::Relaxed),
        }
    }

    /// Ready once a schedule is loaded, or before the first refresh attempt
    pub fn is_ready(&self) -> bool {
        self.loaded_date().is_some() || self.status().last_refresh_time == 0
    }
}
