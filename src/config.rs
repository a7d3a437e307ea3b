use anyhow::{bail, Context, Result};
use chrono_tz::Tz;
#[cfg(test)]
use std::collections::HashMap;
use std::env;
use std::time::Duration;

use crate::engine::{EngineConfig, DEFAULT_RAKAH_DURATION_SECS};
use crate::mawaqit::{parse_timezone, DEFAULT_BASE_URL};

#[derive(Debug, Clone)]
pub struct Config {
    // Mosque
    pub mosque_slug: String,
    pub mawaqit_base_url: String,
    /// Country code used by `--search`
    pub mawaqit_country: String,
    /// IANA timezone override; the page's own timezone is used when unset
    pub timezone: Option<String>,

    // Fetching
    pub http_timeout_secs: u64,
    pub cache_ttl_mins: u64,

    // Reminders, in minutes before each adhan/iqama/last third
    pub reminder_minutes: Vec<u32>,

    // Engine
    pub rakah_duration_secs: i64,
    pub travel_time_secs: i64,

    // Pushover notifications (optional, both or neither)
    pub pushover_user_key: Option<String>,
    pub pushover_api_token: Option<String>,

    // HTTP API port (optional, disabled if not set)
    // When set, exposes /health, /ready, /metrics, /times, /next and /night
    pub http_port: Option<u16>,
}

/// Comma-separated minute list such as `"15,5"`; blank entries are skipped
pub fn parse_minutes_list(raw: &str) -> Result<Vec<u32>> {
    let mut minutes = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u32>()
                .with_context(|| format!("'{}' is not a whole number of minutes", s))
        })
        .collect::<Result<Vec<u32>>>()?;
    minutes.sort_unstable_by(|a, b| b.cmp(a));
    minutes.dedup();
    Ok(minutes)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env if present, ignore if missing
        Self::from_getter(|key| env::var(key).ok())
    }

    /// Parse config from a custom getter function (for testing)
    pub fn from_getter<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Config {
            mosque_slug: non_empty(get("MOSQUE_SLUG")).context("MOSQUE_SLUG not set")?,
            mawaqit_base_url: non_empty(get("MAWAQIT_BASE_URL"))
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            mawaqit_country: non_empty(get("MAWAQIT_COUNTRY"))
                .unwrap_or_else(|| "FR".to_string())
                .to_uppercase(),
            timezone: non_empty(get("TIMEZONE")),

            http_timeout_secs: get("HTTP_TIMEOUT_SECS")
                .unwrap_or_else(|| "30".to_string())
                .trim()
                .parse()
                .context("HTTP_TIMEOUT_SECS must be a whole number of seconds")?,
            cache_ttl_mins: get("CACHE_TTL_MINS")
                .unwrap_or_else(|| "60".to_string())
                .trim()
                .parse()
                .context("CACHE_TTL_MINS must be a whole number of minutes")?,

            reminder_minutes: parse_minutes_list(
                &get("REMINDER_MINUTES").unwrap_or_else(|| "15,5".to_string()),
            )
            .context("REMINDER_MINUTES must be a comma-separated list of minutes")?,

            rakah_duration_secs: get("RAKAH_DURATION_SECS")
                .map(|s| s.trim().parse::<i64>())
                .transpose()
                .context("RAKAH_DURATION_SECS must be a whole number of seconds")?
                .unwrap_or(DEFAULT_RAKAH_DURATION_SECS),
            travel_time_secs: get("TRAVEL_TIME_SECS")
                .map(|s| s.trim().parse::<i64>())
                .transpose()
                .context("TRAVEL_TIME_SECS must be a whole number of seconds")?
                .unwrap_or(0),

            pushover_user_key: non_empty(get("PUSHOVER_USER_KEY")),
            pushover_api_token: non_empty(get("PUSHOVER_API_TOKEN")),

            http_port: get("HTTP_PORT")
                .filter(|s| !s.trim().is_empty())
                .map(|s| s.trim().parse::<u16>())
                .transpose()
                .context("HTTP_PORT must be a valid port number")?,
        })
    }

    /// Create config from a HashMap (convenience for testing)
    #[cfg(test)]
    pub fn from_map(map: &HashMap<&str, &str>) -> Result<Self> {
        Self::from_getter(|key| map.get(key).map(|v| v.to_string()))
    }

    /// Validate configuration values at startup.
    /// Returns Ok(()) if all validations pass, or Err listing every problem.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if !Self::is_valid_slug(&self.mosque_slug) {
            errors.push(format!(
                "MOSQUE_SLUG '{}' invalid. Use the last path segment of the mosque's Mawaqit URL.",
                self.mosque_slug
            ));
        }

        if !(self.mawaqit_base_url.starts_with("http://")
            || self.mawaqit_base_url.starts_with("https://"))
        {
            errors.push(format!(
                "MAWAQIT_BASE_URL '{}' must start with http:// or https://.",
                self.mawaqit_base_url
            ));
        }

        if self.mawaqit_country.len() != 2
            || !self.mawaqit_country.chars().all(|c| c.is_ascii_alphabetic())
        {
            errors.push(format!(
                "MAWAQIT_COUNTRY '{}' invalid. Expected a two-letter country code.",
                self.mawaqit_country
            ));
        }

        if let Some(tz) = &self.timezone {
            if parse_timezone(tz).is_err() {
                errors.push(format!("TIMEZONE '{}' is not a known IANA timezone.", tz));
            }
        }

        if self.http_timeout_secs == 0 {
            errors.push("HTTP_TIMEOUT_SECS must be greater than 0.".to_string());
        } else if self.http_timeout_secs > 300 {
            errors.push(format!(
                "HTTP_TIMEOUT_SECS={} seems too long (max recommended: 300).",
                self.http_timeout_secs
            ));
        }

        if self.cache_ttl_mins > 24 * 60 {
            errors.push(format!(
                "CACHE_TTL_MINS={} seems too long (max: 1440).",
                self.cache_ttl_mins
            ));
        }

        if let Some(m) = self.reminder_minutes.iter().find(|&&m| m > 180) {
            errors.push(format!(
                "REMINDER_MINUTES entry {} seems too long (max: 180).",
                m
            ));
        }

        if !(30..=600).contains(&self.rakah_duration_secs) {
            errors.push(format!(
                "RAKAH_DURATION_SECS={} out of range (30-600).",
                self.rakah_duration_secs
            ));
        }

        if !(0..=4 * 3600).contains(&self.travel_time_secs) {
            errors.push(format!(
                "TRAVEL_TIME_SECS={} out of range (0-14400).",
                self.travel_time_secs
            ));
        }

        if self.pushover_user_key.is_some() != self.pushover_api_token.is_some() {
            errors.push(
                "PUSHOVER_USER_KEY and PUSHOVER_API_TOKEN must be set together.".to_string(),
            );
        }

        if self.http_port == Some(0) {
            errors.push("HTTP_PORT must not be 0.".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )
        }
    }

    /// Mawaqit slugs are lowercase words joined by dashes, e.g. `mosquee-de-paris`
    pub fn is_valid_slug(slug: &str) -> bool {
        !slug.is_empty()
            && slug.len() <= 200
            && slug
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_mins.saturating_mul(60))
    }

    pub fn timezone_override(&self) -> Result<Option<Tz>> {
        self.timezone
            .as_deref()
            .map(parse_timezone)
            .transpose()
            .context("TIMEZONE is not a known IANA timezone")
    }

    /// Credentials when both are configured
    pub fn pushover(&self) -> Option<(&str, &str)> {
        match (&self.pushover_user_key, &self.pushover_api_token) {
            (Some(user), Some(token)) => Some((user.as_str(), token.as_str())),
            _ => None,
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            rakah_duration_secs: self.rakah_duration_secs,
            ..EngineConfig::default()
        }
    }
}



/// Kani formal verification proofs
#[cfg(kani)]
mod kani_proofs {
    use super::*;

    #[kani::proof]
    fn port_parsing_never_panics() {
        let port_str: [u8; 8] = kani::any();
        if let Ok(s) = std::str::from_utf8(&port_str) {
            let _ = s.parse::<u16>();
        }
    }

    /// Proves: a slug containing '/' is never accepted
    #[kani::proof]
    #[kani::unwind(6)]
    fn slash_slug_invalid() {
        let bytes: [u8; 4] = kani::any();
        kani::assume(bytes.iter().all(|b| b.is_ascii()));
        let mut slug = String::from_utf8_lossy(&bytes).into_owned();
        slug.push('/');
        kani::assert(!Config::is_valid_slug(&slug), "slug with '/' must be invalid");
    }
}
