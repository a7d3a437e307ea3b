//! Command-line argument parsing for iqamah

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;

/// Inputs for the standalone night calculator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NightArgs {
    pub start: String,
    pub end: String,
    pub now: Option<String>,
}

/// Parse command line arguments
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Args {
    pub once: bool,
    pub validate: bool,
    pub help: bool,
    pub json: bool,
    pub date: Option<NaiveDate>,
    pub search: Option<String>,
    pub night: Option<NightArgs>,
}

pub fn parse_args() -> Result<Args> {
    let args: Vec<String> = std::env::args().collect();
    parse_args_from(&args)
}

fn value_for<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str> {
    match args.get(i) {
        Some(value) if !value.starts_with("--") => Ok(value),
        _ => bail!("{} requires a value", flag),
    }
}

/// Testable version: `args[0]` is the program name
pub fn parse_args_from(args: &[String]) -> Result<Args> {
    let mut result = Args::default();
    let mut night_now = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--once" => result.once = true,
            "--validate" => result.validate = true,
            "--json" => result.json = true,
            "--help" | "-h" => result.help = true,
            "--date" => {
                i += 1;
                let raw = value_for(args, i, "--date")?;
                let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                    .with_context(|| format!("--date expects YYYY-MM-DD, got '{}'", raw))?;
                result.date = Some(date);
            }
            "--search" => {
                i += 1;
                result.search = Some(value_for(args, i, "--search")?.to_string());
            }
            "--night" => {
                let start = value_for(args, i + 1, "--night")?.to_string();
                let end = value_for(args, i + 2, "--night")?.to_string();
                i += 2;
                result.night = Some(NightArgs {
                    start,
                    end,
                    now: None,
                });
            }
            "--now" => {
                i += 1;
                night_now = Some(value_for(args, i, "--now")?.to_string());
            }
            other => bail!("Unknown argument '{}' (see --help)", other),
        }
        i += 1;
    }

    match (&mut result.night, night_now) {
        (Some(night), now) => night.now = now,
        (None, Some(_)) => bail!("--now is only valid together with --night"),
        (None, None) => {}
    }

    Ok(result)
}

pub fn print_help() {
    println!("iqamah - mosque prayer times, iqama reminders and night-prayer window\n");
    println!("USAGE:");
    println!("    iqamah [OPTIONS]\n");
    println!("OPTIONS:");
    println!("    --once                  Fetch today's schedule, print it and exit");
    println!("    --date YYYY-MM-DD       Like --once, for another date");
    println!("    --validate              Validate configuration, fetch once and exit");
    println!("    --search QUERY          Find mosques in MAWAQIT_COUNTRY by name or city");
    println!("    --night START END       Last third of the night between two instants");
    println!("    --now T                 Reference time for --night (default: now)");
    println!("    --json                  Print machine-readable JSON");
    println!("    --help, -h              Show this help message\n");
    println!("Instants accept RFC 3339, RFC 2822 or Unix seconds.\n");
    println!("ENVIRONMENT:");
    println!("    See .env.example for configuration variables");
}
