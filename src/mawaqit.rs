//! Mawaqit mosque pages: fetch, extract `confData`, normalize into a [`DailySchedule`]
//!
//! A mosque page embeds its whole timetable as a JS object literal
//! (`let confData = {...};`). Today's times live in `times`; the full year
//! lives in `calendar` and `iqamaCalendar`, one map per month keyed by day.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::retry::with_backoff;
use crate::schedule::{DailySchedule, Prayer, PrayerName};

pub const DEFAULT_BASE_URL: &str = "https://mawaqit.net";

/// Used when a day has no `iqamaCalendar` entry
pub const DEFAULT_IQAMA_OFFSETS: [&str; 5] = ["+30", "+15", "+15", "+10", "+15"];

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 iqamah";

#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },
    #[error("mosque not found: {0}")]
    NotFound(String),
    #[error("could not find prayer times data (confData) in page")]
    MissingConfData,
    #[error("json error: {0}")]
    Json(String),
    #[error("no prayer times for {date}")]
    MissingDay { date: NaiveDate },
    #[error("invalid time: {0}")]
    InvalidTime(String),
    #[error("unknown timezone: '{0}'")]
    UnknownTimezone(String),
}

impl ScrapeError {
    /// Network failures, 429 and 5xx are worth retrying
    pub fn is_transient(&self) -> bool {
        match self {
            ScrapeError::Network(_) => true,
            ScrapeError::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

type DayTable = HashMap<String, Vec<String>>;

/// The subset of a page's `confData` this crate reads
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfData {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(rename = "countryCode", default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    /// Today: [Fajr, Dhuhr, Asr, Maghrib, Isha]
    #[serde(default)]
    pub times: Vec<String>,
    #[serde(default)]
    pub shuruq: Option<String>,
    #[serde(default)]
    pub jumua: Option<String>,
    /// One map per month, day -> [Fajr, Shuruq, Dhuhr, Asr, Maghrib, Isha]
    #[serde(default)]
    pub calendar: Vec<DayTable>,
    /// One map per month, day -> five iqama entries
    #[serde(rename = "iqamaCalendar", default)]
    pub iqama_calendar: Vec<DayTable>,
    #[serde(rename = "iqamaEnabled", default)]
    pub iqama_enabled: Option<bool>,
    #[serde(default)]
    pub timezone: Option<String>,
}

impl ConfData {
    fn day_entry<'a>(table: &'a [DayTable], date: NaiveDate) -> Option<&'a Vec<String>> {
        table
            .get(date.month0() as usize)
            .and_then(|month| month.get(&date.day().to_string()))
    }

    fn iqama_offsets(&self, date: NaiveDate) -> Vec<String> {
        Self::day_entry(&self.iqama_calendar, date)
            .cloned()
            .unwrap_or_else(|| DEFAULT_IQAMA_OFFSETS.iter().map(|s| s.to_string()).collect())
    }

    /// Six wall-clock entries for `date`: Fajr, Shuruq, Dhuhr, Asr, Maghrib, Isha.
    /// Shuruq is `None` when only today's `times` are known and `shuruq` is absent.
    fn wall_clock(&self, date: NaiveDate, today: NaiveDate) -> Option<[Option<String>; 6]> {
        if date == today && self.times.len() >= 5 {
            let t = &self.times;
            return Some([
                Some(t[0].clone()),
                self.shuruq.clone(),
                Some(t[1].clone()),
                Some(t[2].clone()),
                Some(t[3].clone()),
                Some(t[4].clone()),
            ]);
        }

        let day = Self::day_entry(&self.calendar, date)?;
        if day.len() < 6 {
            warn!(%date, entries = day.len(), "calendar day has fewer than 6 entries");
            return None;
        }
        Some([
            Some(day[0].clone()),
            Some(day[1].clone()),
            Some(day[2].clone()),
            Some(day[3].clone()),
            Some(day[4].clone()),
            Some(day[5].clone()),
        ])
    }
}

/// One entry from the country map endpoint
#[derive(Debug, Clone, Deserialize)]
struct MapEntry {
    slug: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(rename = "countryFullName", default)]
    country_full_name: Option<String>,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lng: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MosqueSummary {
    pub slug: String,
    pub name: String,
    pub address: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl MapEntry {
    fn matches(&self, query_lower: &str) -> bool {
        [&self.name, &self.city, &self.address]
            .into_iter()
            .flatten()
            .any(|field| field.to_lowercase().contains(query_lower))
    }

    fn into_summary(self) -> MosqueSummary {
        MosqueSummary {
            name: self.name.unwrap_or_else(|| self.slug.clone()),
            slug: self.slug,
            address: self.address,
            city: self.city,
            country: self.country_full_name,
            latitude: self.lat,
            longitude: self.lng,
        }
    }
}

fn conf_data_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"let\s+confData\s*=\s*(\{[\s\S]+?\});").ok())
        .as_ref()
}

pub fn extract_conf_data(html: &str) -> Result<ConfData, ScrapeError> {
    let json = conf_data_regex()
        .and_then(|re| re.captures(html))
        .and_then(|caps| caps.get(1))
        .ok_or(ScrapeError::MissingConfData)?
        .as_str();

    debug!("Extracted confData JSON, {} bytes", json.len());
    serde_json::from_str(json).map_err(|e| ScrapeError::Json(e.to_string()))
}

/// Parse a Mawaqit wall-clock entry such as `"05:42"`
pub fn parse_clock(s: &str) -> Result<NaiveTime, ScrapeError> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|_| ScrapeError::InvalidTime(s.to_string()))
}

/// Wall-clock time on `date` in `tz`, pushed to the next day when it would
/// land before `floor`. Ambiguous times take the earlier instant.
fn resolve_local(
    tz: Tz,
    date: NaiveDate,
    time: NaiveTime,
    floor: Option<DateTime<Utc>>,
) -> Result<DateTime<Utc>, ScrapeError> {
    let on = |day: NaiveDate| {
        tz.from_local_datetime(&day.and_time(time))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| {
                ScrapeError::InvalidTime(format!("{} {} does not exist in {}", day, time, tz.name()))
            })
    };

    let instant = on(date)?;
    match floor {
        Some(floor) if instant < floor => {
            let next = date
                .succ_opt()
                .ok_or_else(|| ScrapeError::InvalidTime(format!("{} has no next day", date)))?;
            on(next)
        }
        _ => Ok(instant),
    }
}

/// `"+N"` is N minutes after adhan, `"HH:MM"` a fixed time on the adhan's
/// local day. Blank or unparseable entries mean no iqama, as does a fixed
/// time earlier than the adhan.
fn resolve_iqama(tz: Tz, adhan: DateTime<Utc>, entry: &str) -> Option<DateTime<Utc>> {
    let entry = entry.trim();
    if let Some(minutes) = entry.strip_prefix('+') {
        return minutes
            .trim()
            .parse::<i64>()
            .ok()
            .map(|m| adhan + Duration::minutes(m));
    }
    if entry.is_empty() {
        return None;
    }
    let time = match parse_clock(entry) {
        Ok(time) => time,
        Err(_) => {
            debug!(entry, "ignoring unparseable iqama entry");
            return None;
        }
    };
    // An Isha past midnight has already moved to the next day
    let day = adhan.with_timezone(&tz).date_naive();
    let iqama = resolve_local(tz, day, time, None).ok()?;
    if iqama < adhan {
        debug!(entry, %adhan, "ignoring iqama earlier than its adhan");
        return None;
    }
    Some(iqama)
}

pub fn parse_timezone(name: &str) -> Result<Tz, ScrapeError> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| ScrapeError::UnknownTimezone(name.to_string()))
}

/// Build the schedule for `date`. `today` (in the mosque's timezone) decides
/// whether the page's live `times` or the yearly `calendar` is used.
pub fn normalize(
    conf: &ConfData,
    slug: &str,
    date: NaiveDate,
    today: NaiveDate,
    tz_override: Option<Tz>,
) -> Result<DailySchedule, ScrapeError> {
    let tz = match tz_override {
        Some(tz) => tz,
        None => parse_timezone(conf.timezone.as_deref().unwrap_or(""))?,
    };

    let [fajr, shuruq, dhuhr, asr, maghrib, isha] = conf
        .wall_clock(date, today)
        .ok_or(ScrapeError::MissingDay { date })?;

    let iqama_enabled = conf.iqama_enabled.unwrap_or(true);
    let offsets = conf.iqama_offsets(date);

    let mut floor = None;
    let mut prayers = Vec::with_capacity(5);
    let mut shuruq_at = None;

    let daily = [
        (Some(PrayerName::Fajr), fajr),
        (None, shuruq),
        (Some(PrayerName::Dhuhr), dhuhr),
        (Some(PrayerName::Asr), asr),
        (Some(PrayerName::Maghrib), maghrib),
        (Some(PrayerName::Isha), isha),
    ];

    for (name, clock) in daily {
        let Some(name) = name else {
            // Shuruq takes part in the rollover order only when present
            if let Some(clock) = clock.filter(|c| !c.trim().is_empty()) {
                let at = resolve_local(tz, date, parse_clock(&clock)?, floor)?;
                shuruq_at = Some(at);
                floor = Some(at);
            }
            continue;
        };

        let clock = clock.ok_or(ScrapeError::MissingDay { date })?;
        let adhan = resolve_local(tz, date, parse_clock(&clock)?, floor)?;
        floor = Some(adhan);

        let iqama = if iqama_enabled {
            offsets
                .get(prayers.len())
                .and_then(|entry| resolve_iqama(tz, adhan, entry))
        } else {
            None
        };
        prayers.push(Prayer::new(name, adhan, iqama));
    }

    let [fajr, dhuhr, asr, maghrib, isha]: [Prayer; 5] = prayers
        .try_into()
        .map_err(|_| ScrapeError::MissingDay { date })?;

    let jumuah = match conf.jumua.as_deref().map(str::trim) {
        Some(clock) if date.weekday() == Weekday::Fri && !clock.is_empty() => {
            let adhan = resolve_local(tz, date, parse_clock(clock)?, None)?;
            Some(Prayer::new(PrayerName::Jumuah, adhan, None))
        }
        _ => None,
    };

    Ok(DailySchedule {
        date,
        timezone: tz.name().to_string(),
        mosque_slug: slug.to_string(),
        mosque_name: conf.name.clone(),
        fajr,
        shuruq: shuruq_at,
        dhuhr,
        asr,
        maghrib,
        isha,
        jumuah,
        fetched_at: Utc::now(),
    })
}

struct CachedConf {
    conf: ConfData,
    fetched: Instant,
}

pub struct MawaqitClient {
    http: reqwest::Client,
    base_url: String,
    cache_ttl: std::time::Duration,
    timezone: Option<Tz>,
    cache: Mutex<HashMap<String, CachedConf>>,
}

impl MawaqitClient {
    pub fn new(
        base_url: &str,
        timeout: std::time::Duration,
        cache_ttl: std::time::Duration,
    ) -> Result<Self, ScrapeError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ScrapeError::Network(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            cache_ttl,
            timezone: None,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Read wall-clock times in `tz` instead of the page's own timezone
    pub fn with_timezone(mut self, tz: Option<Tz>) -> Self {
        self.timezone = tz;
        self
    }

    pub fn page_url(&self, slug: &str) -> String {
        format!("{}/en/{}", self.base_url, urlencoding::encode(slug))
    }

    fn cached(&self, slug: &str) -> Option<ConfData> {
        let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache
            .get(slug)
            .filter(|entry| entry.fetched.elapsed() < self.cache_ttl)
            .map(|entry| entry.conf.clone())
    }

    pub fn clear_cache(&self) {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    async fn get_text(&self, url: &str, slug: &str) -> Result<String, ScrapeError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ScrapeError::Network(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ScrapeError::NotFound(slug.to_string()));
        }
        if !status.is_success() {
            return Err(ScrapeError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        response
            .text()
            .await
            .map_err(|e| ScrapeError::Network(e.to_string()))
    }

    /// Page `confData`, served from the cache while fresh
    pub async fn fetch_conf(&self, slug: &str) -> Result<ConfData, ScrapeError> {
        if let Some(conf) = self.cached(slug) {
            debug!(slug, "Using cached mosque data");
            return Ok(conf);
        }

        let url = self.page_url(slug);
        info!("Fetching mosque page: {}", url);

        let html = with_backoff(
            "Mawaqit page",
            || self.get_text(&url, slug),
            ScrapeError::is_transient,
        )
        .await?;
        let conf = extract_conf_data(&html)?;

        info!(
            slug,
            name = %conf.name,
            months = conf.calendar.len(),
            "Extracted confData"
        );

        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                slug.to_string(),
                CachedConf {
                    conf: conf.clone(),
                    fetched: Instant::now(),
                },
            );
        Ok(conf)
    }

    pub async fn fetch_schedule(
        &self,
        slug: &str,
        date: NaiveDate,
    ) -> Result<DailySchedule, ScrapeError> {
        let conf = self.fetch_conf(slug).await?;
        let tz = match self.timezone {
            Some(tz) => tz,
            None => parse_timezone(conf.timezone.as_deref().unwrap_or(""))?,
        };
        let today = Utc::now().with_timezone(&tz).date_naive();
        normalize(&conf, slug, date, today, Some(tz))
    }

    /// Mosques in `country` whose name, city or address contains `query`
    pub async fn search_mosques(
        &self,
        country: &str,
        query: &str,
    ) -> Result<Vec<MosqueSummary>, ScrapeError> {
        let url = format!(
            "{}/api/2.0/mosque/map/{}",
            self.base_url,
            urlencoding::encode(country)
        );
        info!("Searching mosques in {} for '{}'", country, query);

        let body = with_backoff(
            "Mawaqit search",
            || self.get_text(&url, country),
            ScrapeError::is_transient,
        )
        .await?;
        let entries: Vec<MapEntry> =
            serde_json::from_str(&body).map_err(|e| ScrapeError::Json(e.to_string()))?;

        let query_lower = query.trim().to_lowercase();
        Ok(entries
            .into_iter()
            .filter(|entry| entry.matches(&query_lower))
            .map(MapEntry::into_summary)
            .collect())
    }
}
