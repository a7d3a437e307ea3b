//! Service orchestration
//!
//! Keeps yesterday/today/tomorrow loaded for the configured mosque and sends
//! reminders as their minute arrives.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::mawaqit::{parse_timezone, MawaqitClient};
use crate::notify::{due_reminders, Notifier, Reminder};
use crate::scheduler::{minute_floor, needs_refresh};
use crate::state::{AppState, Schedules};

/// Mosque-local date at `now`. The timezone comes from the override, else
/// from the loaded schedule, else from the mosque page.
pub async fn local_today(
    client: &MawaqitClient,
    config: &Config,
    state: &AppState,
    now: DateTime<Utc>,
) -> Result<NaiveDate> {
    let tz: Tz = match config.timezone_override()? {
        Some(tz) => tz,
        None => match state.today().and_then(|s| parse_timezone(&s.timezone).ok()) {
            Some(tz) => tz,
            None => {
                let conf = client
                    .fetch_conf(&config.mosque_slug)
                    .await
                    .with_context(|| format!("Failed to load mosque '{}'", config.mosque_slug))?;
                parse_timezone(conf.timezone.as_deref().unwrap_or(""))?
            }
        },
    };
    Ok(now.with_timezone(&tz).date_naive())
}

/// Load today's schedule plus its neighbours into `state`.
/// Today is required; a failed neighbour is logged and left empty.
pub async fn refresh(
    client: &MawaqitClient,
    config: &Config,
    state: &AppState,
    today: NaiveDate,
) -> Result<()> {
    let slug = &config.mosque_slug;
    info!("Refreshing prayer times for {} on {}", slug, today);

    let today_schedule = match client.fetch_schedule(slug, today).await {
        Ok(schedule) => schedule,
        Err(e) => {
            state.record_failure();
            return Err(e).with_context(|| format!("Failed to fetch prayer times for {}", today));
        }
    };

    let neighbour = |date: Option<NaiveDate>| async move {
        let date = date?;
        match client.fetch_schedule(slug, date).await {
            Ok(schedule) => Some(schedule),
            Err(e) => {
                warn!("Could not fetch prayer times for {}: {}", date, e);
                None
            }
        }
    };
    let previous = neighbour(today.pred_opt()).await;
    let tomorrow = neighbour(today.succ_opt()).await;

    info!(
        "Loaded {}: Fajr {} Dhuhr {} Asr {} Maghrib {} Isha {}",
        today_schedule.mosque_name,
        today_schedule.fajr.adhan,
        today_schedule.dhuhr.adhan,
        today_schedule.asr.adhan,
        today_schedule.maghrib.adhan,
        today_schedule.isha.adhan
    );

    state.store(Schedules {
        previous,
        today: Some(today_schedule),
        tomorrow,
    });
    state.record_success();
    Ok(())
}

/// Reminders due in the minute starting at `now`, across every loaded day
pub fn collect_due(schedules: &Schedules, minutes_before: &[u32], now: DateTime<Utc>) -> Vec<Reminder> {
    let now = minute_floor(now);
    let mut due: Vec<Reminder> = schedules
        .reminder_pairs()
        .into_iter()
        .flat_map(|(schedule, next)| due_reminders(schedule, next, minutes_before, now))
        .collect();
    due.sort_by_key(|r| r.fire_at);
    due.dedup_by(|a, b| a.kind == b.kind && a.event_at == b.event_at && a.minutes_before == b.minutes_before);
    due
}

/// Reminders due in any of `minutes`, oldest first
pub fn collect_due_in(
    schedules: &Schedules,
    minutes_before: &[u32],
    minutes: &[DateTime<Utc>],
) -> Vec<Reminder> {
    minutes
        .iter()
        .flat_map(|&minute| collect_due(schedules, minutes_before, minute))
        .collect()
}

/// Send what fell due since the previous tick and return it
async fn send_due(
    config: &Config,
    state: &AppState,
    notifier: &Notifier,
    now: DateTime<Utc>,
) -> Vec<Reminder> {
    let minutes = state.claim_minutes(now);
    let due = collect_due_in(&state.schedules(), &config.reminder_minutes, &minutes);
    for reminder in &due {
        match notifier.send_reminder(reminder).await {
            Ok(()) => state.record_reminder_sent(),
            Err(e) => {
                error!("Failed to send reminder: {:#}", e);
                // Keep the reminder text in the log
                error!("Original reminder: {}", reminder.message());
            }
        }
    }
    due
}

/// One scheduler tick: send due reminders, then refresh when the day changed.
/// Returns the reminders that fell due during this tick.
pub async fn tick(
    client: &MawaqitClient,
    config: &Config,
    state: &AppState,
    notifier: &Notifier,
    now: DateTime<Utc>,
) -> Vec<Reminder> {
    // A refresh can spend minutes in backoff, so reminders go first
    let was_loaded = state.loaded_date().is_some();
    let mut due = if was_loaded {
        send_due(config, state, notifier, now).await
    } else {
        Vec::new()
    };

    match local_today(client, config, state, now).await {
        Ok(today) if needs_refresh(state.loaded_date(), today) => {
            if let Err(e) = refresh(client, config, state, today).await {
                error!("Refresh failed: {:#}", e);
            }
        }
        Ok(_) => {}
        Err(e) => {
            state.record_failure();
            error!("Could not determine the mosque's date: {:#}", e);
        }
    }

    if !was_loaded && state.loaded_date().is_some() {
        due = send_due(config, state, notifier, now).await;
    }
    due
}
