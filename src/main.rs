use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use iqamah::cli::{parse_args, print_help, NightArgs};
use iqamah::config::Config;
use iqamah::format::describe_night_status;
use iqamah::mawaqit::{parse_timezone, MawaqitClient};
use iqamah::night::night_prayer_status_str;
use iqamah::notify::Notifier;
use iqamah::orchestrator;
use iqamah::schedule::{DailySchedule, Prayer};
use iqamah::scheduler::run_scheduler;
use iqamah::server;
use iqamah::state::{AppState, Overview};

#[tokio::main]
async fn main() -> Result<()> {
    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{:#}", e);
            std::process::exit(2);
        }
    };

    if args.help {
        print_help();
        return Ok(());
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("iqamah=info".parse()?),
        )
        .init();

    // The calculator needs neither config nor network
    if let Some(night) = &args.night {
        return run_night(night, args.json);
    }

    info!("iqamah v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::from_env()?;
    info!("Configuration loaded");
    info!("  Mosque: {}", config.mosque_slug);
    info!("  Source: {}", config.mawaqit_base_url);
    info!("  Reminders: {:?} minutes before", config.reminder_minutes);
    info!(
        "  Pushover: {}",
        if config.pushover().is_some() { "enabled" } else { "disabled (log only)" }
    );

    if let Err(e) = config.validate() {
        error!("{}", e);
        std::process::exit(1);
    }

    let client = MawaqitClient::new(
        &config.mawaqit_base_url,
        config.http_timeout(),
        config.cache_ttl(),
    )?
    .with_timezone(config.timezone_override()?);

    // Handle --validate mode
    if args.validate {
        info!("Configuration is valid, checking that the mosque page can be read...");
        return match print_schedule(&client, &config, None, false).await {
            Ok(()) => {
                info!("Mosque page OK");
                Ok(())
            }
            Err(e) => {
                error!("{:#}", e);
                std::process::exit(1);
            }
        };
    }

    if let Some(query) = &args.search {
        return run_search(&client, &config, query, args.json).await;
    }

    if args.once || args.date.is_some() {
        return print_schedule(&client, &config, args.date, args.json).await;
    }

    run_service(client, config).await
}

fn run_night(night: &NightArgs, json: bool) -> Result<()> {
    let Some(status) = night_prayer_status_str(&night.start, &night.end, night.now.as_deref())
    else {
        eprintln!("Could not compute the night window: START and END must be valid instants with END after START");
        std::process::exit(1);
    };

    if json {
        let body = serde_json::json!({
            "status": status,
            "description": describe_night_status(&status),
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        println!(
            "Last third: {} to {}",
            status.window.start.to_rfc3339(),
            status.window.end.to_rfc3339()
        );
        println!("{}", describe_night_status(&status));
        println!("Progress: {:.0}%", status.progress * 100.0);
    }
    Ok(())
}

async fn run_search(client: &MawaqitClient, config: &Config, query: &str, json: bool) -> Result<()> {
    let mosques = client
        .search_mosques(&config.mawaqit_country, query)
        .await
        .with_context(|| format!("Search in {} failed", config.mawaqit_country))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&mosques)?);
        return Ok(());
    }

    if mosques.is_empty() {
        println!("No mosques in {} match '{}'", config.mawaqit_country, query);
    }
    for mosque in &mosques {
        println!(
            "{:<40} {} ({})",
            mosque.slug,
            mosque.name,
            mosque.city.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

/// Fetch one day, print it, and for today also print what comes next
async fn print_schedule(
    client: &MawaqitClient,
    config: &Config,
    date: Option<NaiveDate>,
    json: bool,
) -> Result<()> {
    let state = AppState::new(config.engine_config(), config.travel_time_secs);
    let now = Utc::now();
    let today = orchestrator::local_today(client, config, &state, now).await?;
    let date = date.unwrap_or(today);

    orchestrator::refresh(client, config, &state, date).await?;
    let schedule = state
        .today()
        .with_context(|| format!("No prayer times loaded for {}", date))?;

    let (overview, night) = if date == today {
        (state.overview(now), state.night_status(now))
    } else {
        (None, None)
    };

    if json {
        let body = serde_json::json!({
            "schedule": schedule,
            "overview": overview,
            "night": night.as_ref().map(|status| serde_json::json!({
                "status": status,
                "description": describe_night_status(status),
            })),
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    let tz = parse_timezone(&schedule.timezone)?;
    print_day(&schedule, tz);
    if let Some(view) = &overview {
        print_overview(view, tz);
    }
    if let Some(status) = &night {
        println!("\n{}", describe_night_status(status));
    }
    Ok(())
}

fn hhmm(instant: DateTime<Utc>, tz: Tz) -> String {
    instant.with_timezone(&tz).format("%H:%M").to_string()
}

fn print_prayer(prayer: &Prayer, tz: Tz) {
    match prayer.iqama {
        Some(iqama) => println!(
            "  {:<8} {}  iqama {}",
            prayer.name,
            hhmm(prayer.adhan, tz),
            hhmm(iqama, tz)
        ),
        None => println!("  {:<8} {}", prayer.name, hhmm(prayer.adhan, tz)),
    }
}

fn print_day(schedule: &DailySchedule, tz: Tz) {
    println!(
        "{} ({}) - {} [{}]",
        schedule.mosque_name, schedule.mosque_slug, schedule.date, schedule.timezone
    );
    print_prayer(&schedule.fajr, tz);
    if let Some(shuruq) = schedule.shuruq {
        println!("  {:<8} {}", "Shuruq", hhmm(shuruq, tz));
    }
    for prayer in [&schedule.dhuhr, &schedule.asr, &schedule.maghrib, &schedule.isha] {
        print_prayer(prayer, tz);
    }
    if let Some(jumuah) = &schedule.jumuah {
        print_prayer(jumuah, tz);
    }
}

fn print_overview(view: &Overview, tz: Tz) {
    println!(
        "\nNext: {}{} ({})",
        view.next.prayer.name,
        if view.next.is_tomorrow { " tomorrow" } else { "" },
        view.countdown
    );
    if let (Some(current), Some(rakah)) = (view.current, &view.rakah) {
        match rakah.current_rakah {
            Some(n) if rakah.remaining_secs.is_some() => println!(
                "Now: {} in progress, rakah {} of {} (estimate)",
                current, n, rakah.total_rakah
            ),
            _ => {}
        }
    }
    if view.travel.should_leave_now {
        println!("Leave now to reach {}", view.next.prayer.name);
    } else if let Some(secs) = view.travel.seconds_until_leave {
        if secs > 0 {
            println!(
                "Leave by {} to arrive at {}",
                hhmm(view.travel.recommended_leave_time, tz),
                hhmm(view.travel.arrival_time, tz)
            );
        }
    }
}

/// Long-running mode: minute ticks, reminders and the optional HTTP API
async fn run_service(client: MawaqitClient, config: Config) -> Result<()> {
    let notifier = Arc::new(Notifier::new(&config)?);
    if !notifier.is_enabled() {
        warn!("Pushover not configured, reminders will only be logged");
    }

    let state = Arc::new(AppState::new(config.engine_config(), config.travel_time_secs));
    let client = Arc::new(client);
    let config = Arc::new(config);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown requested");
                cancel.cancel();
            }
        });
    }

    // Start HTTP API if configured
    if let Some(port) = config.http_port {
        let state = state.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            server::run_server(port, state, cancel).await;
        });
    }

    // Load today right away instead of waiting for the first minute boundary
    orchestrator::tick(&client, &config, &state, &notifier, Utc::now()).await;

    run_scheduler(cancel.clone(), || {
        let client = client.clone();
        let config = config.clone();
        let state = state.clone();
        let notifier = notifier.clone();
        async move {
            orchestrator::tick(&client, &config, &state, &notifier, Utc::now()).await;
        }
    })
    .await;

    cancel.cancel();
    Ok(())
}
