use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::mawaqit::parse_timezone;
use crate::retry::with_backoff;
use crate::schedule::{DailySchedule, PrayerName};

/// Pushover API endpoint
pub const PUSHOVER_API_URL: &str = "https://api.pushover.net/1/messages.json";

/// Pushover's message length limit
pub const MAX_MESSAGE_LENGTH: usize = 1024;

/// A reminder fires when its instant falls inside this window after "now"
pub const FIRE_WINDOW_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderKind {
    Adhan,
    Iqama,
    LastThird,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reminder {
    /// `None` for the last third of the night
    pub prayer: Option<PrayerName>,
    pub kind: ReminderKind,
    pub minutes_before: u32,
    pub event_at: DateTime<Utc>,
    pub fire_at: DateTime<Utc>,
    /// Event time as "HH:MM" in the mosque's timezone
    pub local_time: String,
}

impl Reminder {
    pub fn title(&self) -> String {
        match (self.kind, self.prayer) {
            (ReminderKind::LastThird, _) | (_, None) => "Last third of the night".to_string(),
            (ReminderKind::Adhan, Some(p)) => format!("{} adhan", p),
            (ReminderKind::Iqama, Some(p)) => format!("{} iqama", p),
        }
    }

    pub fn message(&self) -> String {
        let when = match self.minutes_before {
            0 => "now".to_string(),
            1 => "in 1 minute".to_string(),
            m => format!("in {} minutes", m),
        };
        match self.kind {
            ReminderKind::LastThird => {
                format!("The last third of the night begins {} ({})", when, self.local_time)
            }
            _ => format!("{} {} ({})", self.title(), when, self.local_time),
        }
    }
}

/// Reminders whose fire instant lies in [now, now + 60s).
///
/// Covers every prayer's adhan and iqama (Jumuah included) and the start of
/// the last third of the night following `schedule`.
pub fn due_reminders(
    schedule: &DailySchedule,
    next_day: Option<&DailySchedule>,
    minutes_before: &[u32],
    now: DateTime<Utc>,
) -> Vec<Reminder> {
    let tz = parse_timezone(&schedule.timezone).unwrap_or(Tz::UTC);
    let window_end = now + Duration::seconds(FIRE_WINDOW_SECS);

    let mut events: Vec<(Option<PrayerName>, ReminderKind, DateTime<Utc>)> = Vec::new();
    for prayer in schedule.prayers().into_iter().chain(schedule.jumuah.as_ref()) {
        events.push((Some(prayer.name), ReminderKind::Adhan, prayer.adhan));
        if let Some(iqama) = prayer.iqama {
            events.push((Some(prayer.name), ReminderKind::Iqama, iqama));
        }
    }
    if let Some(window) = schedule.night_window(next_day) {
        events.push((None, ReminderKind::LastThird, window.start));
    }

    let mut due = Vec::new();
    for (prayer, kind, event_at) in events {
        for &m in minutes_before {
            let fire_at = event_at - Duration::minutes(m as i64);
            if fire_at >= now && fire_at < window_end {
                due.push(Reminder {
                    prayer,
                    kind,
                    minutes_before: m,
                    event_at,
                    fire_at,
                    local_time: event_at.with_timezone(&tz).format("%H:%M").to_string(),
                });
            }
        }
    }
    due.sort_by_key(|r| r.fire_at);
    due
}

/// Truncate message to fit Pushover's length limit.
/// Returns the original message if it fits, or a truncated version with "..." suffix.
pub fn truncate_message(message: &str) -> String {
    if message.len() <= MAX_MESSAGE_LENGTH {
        return message.to_string();
    }

    // Leave room for "..."
    let mut truncate_at = MAX_MESSAGE_LENGTH - 3;
    while truncate_at > 0 && !message.is_char_boundary(truncate_at) {
        truncate_at -= 1;
    }

    let truncated = &message[..truncate_at];
    let truncated = truncated
        .rfind(' ')
        .filter(|&pos| pos > truncate_at / 2)
        .map(|pos| &truncated[..pos])
        .unwrap_or(truncated);

    format!("{}...", truncated)
}

/// Form body for the Pushover API (credentials stay out of the URL)
pub fn build_pushover_params(
    api_token: &str,
    user_key: &str,
    title: &str,
    message: &str,
) -> [(&'static str, String); 4] {
    [
        ("token", api_token.to_string()),
        ("user", user_key.to_string()),
        ("title", title.to_string()),
        ("message", message.to_string()),
    ]
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct PushoverResponse {
    pub status: i32,
    #[serde(default)]
    pub errors: Vec<String>,
}

/// Pushover error types for retry decisions
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    /// Network failure, 429 or 5xx - safe to retry
    #[error("transient Pushover error: {0}")]
    Transient(String),
    /// Rejected request (bad token, bad user key) - don't retry
    #[error("Pushover rejected message: {0}")]
    Permanent(String),
}

impl PushError {
    pub fn is_transient(&self) -> bool {
        matches!(self, PushError::Transient(_))
    }
}

struct Credentials {
    user_key: String,
    api_token: String,
}

pub struct Notifier {
    client: reqwest::Client,
    api_url: String,
    credentials: Option<Credentials>,
}

impl Notifier {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            api_url: PUSHOVER_API_URL.to_string(),
            credentials: config.pushover().map(|(user, token)| Credentials {
                user_key: user.to_string(),
                api_token: token.to_string(),
            }),
        })
    }

    /// Point at a different endpoint (mock servers in tests)
    pub fn with_api_url(mut self, url: &str) -> Self {
        self.api_url = url.to_string();
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.credentials.is_some()
    }

    pub async fn send_reminder(&self, reminder: &Reminder) -> Result<()> {
        self.send(&reminder.title(), &reminder.message()).await
    }

    pub async fn send(&self, title: &str, message: &str) -> Result<()> {
        let message = if message.len() > MAX_MESSAGE_LENGTH {
            let truncated = truncate_message(message);
            debug!("Message truncated from {} to {} bytes", message.len(), truncated.len());
            truncated
        } else {
            message.to_string()
        };

        let Some(credentials) = &self.credentials else {
            info!("Reminder (Pushover not configured): {}: {}", title, message);
            return Ok(());
        };

        info!("Sending notification: {}: {}", title, message);

        with_backoff(
            "Pushover",
            || self.try_send(credentials, title, &message),
            PushError::is_transient,
        )
        .await
        .context("Failed to send Pushover notification")?;

        info!("Notification sent");
        Ok(())
    }

    async fn try_send(
        &self,
        credentials: &Credentials,
        title: &str,
        message: &str,
    ) -> Result<(), PushError> {
        let params =
            build_pushover_params(&credentials.api_token, &credentials.user_key, title, message);

        let response = self
            .client
            .post(&self.api_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| PushError::Transient(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(PushError::Transient(format!("HTTP {}", status)));
        }

        let body: Option<PushoverResponse> = response.json().await.ok();
        let errors = body
            .as_ref()
            .map(|b| b.errors.join(", "))
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| format!("HTTP {}", status));

        if status.is_client_error() {
            return Err(PushError::Permanent(errors));
        }

        match body {
            Some(b) if b.status == 1 => Ok(()),
            Some(_) => Err(PushError::Permanent(errors)),
            None => {
                warn!("Pushover returned {} with an unreadable body", status);
                Ok(())
            }
        }
    }
}
