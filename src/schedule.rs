//! Normalized daily prayer schedule

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::night::{last_third_of_night, NightPrayerStatus, TimeWindow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PrayerName {
    Fajr,
    Dhuhr,
    Asr,
    Maghrib,
    Isha,
    Jumuah,
}

impl PrayerName {
    /// The five daily prayers in chronological order
    pub const DAILY: [PrayerName; 5] = [
        PrayerName::Fajr,
        PrayerName::Dhuhr,
        PrayerName::Asr,
        PrayerName::Maghrib,
        PrayerName::Isha,
    ];

    pub fn default_rakah_count(self) -> u32 {
        match self {
            PrayerName::Fajr => 2,
            PrayerName::Dhuhr => 4,
            PrayerName::Asr => 4,
            PrayerName::Maghrib => 3,
            PrayerName::Isha => 4,
            PrayerName::Jumuah => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PrayerName::Fajr => "Fajr",
            PrayerName::Dhuhr => "Dhuhr",
            PrayerName::Asr => "Asr",
            PrayerName::Maghrib => "Maghrib",
            PrayerName::Isha => "Isha",
            PrayerName::Jumuah => "Jumuah",
        }
    }
}

impl fmt::Display for PrayerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown prayer name '{0}'")]
pub struct UnknownPrayer(pub String);

impl FromStr for PrayerName {
    type Err = UnknownPrayer;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fajr" | "subh" => Ok(PrayerName::Fajr),
            "dhuhr" | "zuhr" | "duhr" => Ok(PrayerName::Dhuhr),
            "asr" => Ok(PrayerName::Asr),
            "maghrib" => Ok(PrayerName::Maghrib),
            "isha" => Ok(PrayerName::Isha),
            "jumuah" | "jumua" | "jumu'ah" => Ok(PrayerName::Jumuah),
            _ => Err(UnknownPrayer(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prayer {
    pub name: PrayerName,
    pub adhan: DateTime<Utc>,
    pub iqama: Option<DateTime<Utc>>,
    /// Overrides the name's default rakah count
    pub rakah_count: Option<u32>,
}

impl Prayer {
    pub fn new(name: PrayerName, adhan: DateTime<Utc>, iqama: Option<DateTime<Utc>>) -> Self {
        Self {
            name,
            adhan,
            iqama,
            rakah_count: None,
        }
    }

    pub fn rakah_count(&self) -> u32 {
        self.rakah_count.unwrap_or_else(|| self.name.default_rakah_count())
    }

    /// Same prayer shifted by whole days, used to project tomorrow's Fajr
    pub fn shifted_days(&self, days: i64) -> Self {
        let shift = Duration::days(days);
        Self {
            name: self.name,
            adhan: self.adhan + shift,
            iqama: self.iqama.map(|iq| iq + shift),
            rakah_count: self.rakah_count,
        }
    }
}

/// One mosque's prayers for one local date
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailySchedule {
    pub date: NaiveDate,
    /// IANA timezone the wall-clock times were read in
    pub timezone: String,
    pub mosque_slug: String,
    pub mosque_name: String,
    pub fajr: Prayer,
    pub shuruq: Option<DateTime<Utc>>,
    pub dhuhr: Prayer,
    pub asr: Prayer,
    pub maghrib: Prayer,
    pub isha: Prayer,
    pub jumuah: Option<Prayer>,
    pub fetched_at: DateTime<Utc>,
}

impl DailySchedule {
    pub fn prayers(&self) -> [&Prayer; 5] {
        [&self.fajr, &self.dhuhr, &self.asr, &self.maghrib, &self.isha]
    }

    pub fn get(&self, name: PrayerName) -> Option<&Prayer> {
        match name {
            PrayerName::Fajr => Some(&self.fajr),
            PrayerName::Dhuhr => Some(&self.dhuhr),
            PrayerName::Asr => Some(&self.asr),
            PrayerName::Maghrib => Some(&self.maghrib),
            PrayerName::Isha => Some(&self.isha),
            PrayerName::Jumuah => self.jumuah.as_ref(),
        }
    }

    /// Night after this day: Maghrib to the next day's Fajr.
    /// Without the next day's schedule, today's Fajr + 24h stands in.
    pub fn night_window(&self, next_day: Option<&DailySchedule>) -> Option<TimeWindow> {
        let next_fajr = match next_day {
            Some(next) => next.fajr.adhan,
            None => self.fajr.adhan + Duration::days(1),
        };
        last_third_of_night(self.maghrib.adhan, next_fajr)
    }

    pub fn night_status(
        &self,
        next_day: Option<&DailySchedule>,
        now: DateTime<Utc>,
    ) -> Option<NightPrayerStatus> {
        self.night_window(next_day)
            .map(|window| NightPrayerStatus::evaluate(window, now))
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::sample_schedule;
    use super::*;
    use crate::night::NightPhase;

    #[test]
    fn test_prayer_name_round_trip_display() {
        for name in PrayerName::DAILY {
            assert_eq!(name.to_string().parse::<PrayerName>(), Ok(name));
        }
    }

    #[test]
    fn test_prayer_name_aliases() {
        assert_eq!("zuhr".parse::<PrayerName>(), Ok(PrayerName::Dhuhr));
        assert_eq!(" ISHA ".parse::<PrayerName>(), Ok(PrayerName::Isha));
        assert_eq!("Jumua".parse::<PrayerName>(), Ok(PrayerName::Jumuah));
        assert!("tahajjud".parse::<PrayerName>().is_err());
    }

    #[test]
    fn test_unknown_prayer_error() {
        let err = "tahajjud".parse::<PrayerName>().unwrap_err();
        assert_eq!(err, UnknownPrayer("tahajjud".to_string()));
        assert_eq!(err.to_string(), "unknown prayer name 'tahajjud'");
        let boxed: Box<dyn std::error::Error + Send + Sync> = Box::new(err);
        assert!(boxed.source().is_none());
    }

    #[test]
    fn test_default_rakah_counts() {
        let schedule = sample_schedule();
        let counts: Vec<u32> = schedule.prayers().iter().map(|p| p.rakah_count()).collect();
        assert_eq!(counts, vec![2, 4, 4, 3, 4]);
    }

    #[test]
    fn test_rakah_override() {
        let mut schedule = sample_schedule();
        schedule.dhuhr.rakah_count = Some(2);
        assert_eq!(schedule.dhuhr.rakah_count(), 2);
    }

    #[test]
    fn test_prayers_are_chronological() {
        let schedule = sample_schedule();
        let prayers = schedule.prayers();
        assert!(prayers.windows(2).all(|w| w[0].adhan < w[1].adhan));
    }

    #[test]
    fn test_get_jumuah_absent() {
        let schedule = sample_schedule();
        assert!(schedule.get(PrayerName::Jumuah).is_none());
        assert_eq!(schedule.get(PrayerName::Asr).unwrap().name, PrayerName::Asr);
    }

    #[test]
    fn test_night_window_without_next_day() {
        let schedule = sample_schedule();
        // Maghrib 18:00 to projected Fajr 05:00 = 11h, last third starts 01:20
        let window = schedule.night_window(None).unwrap();
        assert_eq!(window.start, schedule.fajr.adhan + Duration::hours(20) + Duration::minutes(20));
        assert_eq!(window.end, schedule.fajr.adhan + Duration::days(1));
    }

    #[test]
    fn test_night_window_uses_next_day_fajr() {
        let today = sample_schedule();
        let mut tomorrow = sample_schedule();
        tomorrow.fajr = tomorrow.fajr.shifted_days(1);
        tomorrow.fajr.adhan -= Duration::minutes(3);
        let window = today.night_window(Some(&tomorrow)).unwrap();
        assert_eq!(window.end, tomorrow.fajr.adhan);
    }

    #[test]
    fn test_night_status_phase() {
        let schedule = sample_schedule();
        let now = schedule.isha.adhan;
        let status = schedule.night_status(None, now).unwrap();
        assert_eq!(status.phase, NightPhase::BeforeWindow);
    }
}
