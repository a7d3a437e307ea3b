//! Adversarial Property-Based Tests for Configuration Parsing
//!
//! # Attack Plan
//!
//! 1. **Number Attacks**: Negative numbers, overflow, floats, scientific
//!    notation and unicode digits for every numeric variable.
//!
//! 2. **Slug Bypass**: Path traversal, query strings, whitespace, unicode
//!    and control characters in MOSQUE_SLUG.
//!
//! 3. **Reminder Lists**: Empty entries, duplicates, negative and huge
//!    minute values, separators other than commas.
//!
//! 4. **Empty vs Missing Fields**: Blank optional values behave as unset.
//!
//! 5. **Half-configured Pushover**: One credential without the other.
//!
//! # Invariants
//!
//! - from_getter never panics on any input
//! - validate() never panics (may return Err)
//! - reminder_minutes is always sorted descending without duplicates
//! - mawaqit_country is always uppercase
//! - A missing MOSQUE_SLUG returns Err naming the variable

use proptest::prelude::*;
use std::collections::HashMap;

use iqamah::config::{parse_minutes_list, Config};

// ============================================================================
// ADVERSARIAL GENERATORS
// ============================================================================

/// Generate malformed numeric strings
fn malformed_number() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("-1".to_string()),
        Just("-0".to_string()),
        Just("0".to_string()),
        Just("65535".to_string()),
        Just("65536".to_string()),
        Just("18446744073709551616".to_string()), // u64::MAX + 1
        Just("9223372036854775808".to_string()),  // i64::MAX + 1
        Just("30.5".to_string()),
        Just("1e3".to_string()),
        Just("".to_string()),
        Just("   ".to_string()),
        Just("abc".to_string()),
        Just("NaN".to_string()),
        Just("٣٠".to_string()),  // Arabic-Indic digits
        Just("３０".to_string()), // Fullwidth digits
        Just("30\x00".to_string()),
        Just(" 30 ".to_string()),
        Just("+30".to_string()),
    ]
}

/// Generate hostile slugs
fn dangerous_slug() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("mosquee-de-paris".to_string()),
        Just("../../etc/passwd".to_string()),
        Just("mosque?x=1".to_string()),
        Just("mosque#frag".to_string()),
        Just("mosque/../admin".to_string()),
        Just("mosque name".to_string()),
        Just("mosquée".to_string()),
        Just("mosque\u{200B}".to_string()),
        Just("mosque\r\nHost: evil".to_string()),
        Just("a".repeat(10_000)),
    ]
}

/// Generate reminder lists
fn reminder_list() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("15,5".to_string()),
        Just("5,15,5,15".to_string()),
        Just(",,,".to_string()),
        Just("".to_string()),
        Just("0".to_string()),
        Just("-5".to_string()),
        Just("15;5".to_string()),
        Just("15 5".to_string()),
        Just("4294967296".to_string()),
        prop::collection::vec(0u32..500, 0..20).prop_map(|v| {
            v.iter().map(u32::to_string).collect::<Vec<_>>().join(",")
        }),
    ]
}

// ============================================================================
// HELPER: Create base valid config
// ============================================================================

fn base_valid_config() -> HashMap<&'static str, String> {
    let mut m = HashMap::new();
    m.insert("MOSQUE_SLUG", "mosquee-de-paris".to_string());
    m
}

fn load(env: &HashMap<&'static str, String>) -> anyhow::Result<Config> {
    Config::from_getter(|key| env.get(key).cloned())
}

// ============================================================================
// INVARIANT: from_getter NEVER PANICS
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn prop_from_getter_never_panics_with_malformed_numbers(
        key in prop::sample::select(vec![
            "HTTP_TIMEOUT_SECS",
            "CACHE_TTL_MINS",
            "RAKAH_DURATION_SECS",
            "TRAVEL_TIME_SECS",
            "HTTP_PORT",
        ]),
        value in malformed_number(),
    ) {
        let mut env = base_valid_config();
        env.insert(key, value);
        if let Ok(config) = load(&env) {
            let _ = config.validate();
            let _ = config.cache_ttl();
        }
    }

    #[test]
    fn prop_from_getter_never_panics_with_arbitrary_values(
        slug in ".*",
        base_url in ".*",
        country in ".*",
        timezone in ".*",
        reminders in ".*",
        user in ".*",
        token in ".*",
    ) {
        let mut env: HashMap<&str, String> = HashMap::new();
        env.insert("MOSQUE_SLUG", slug);
        env.insert("MAWAQIT_BASE_URL", base_url);
        env.insert("MAWAQIT_COUNTRY", country);
        env.insert("TIMEZONE", timezone);
        env.insert("REMINDER_MINUTES", reminders);
        env.insert("PUSHOVER_USER_KEY", user);
        env.insert("PUSHOVER_API_TOKEN", token);

        if let Ok(config) = load(&env) {
            let _ = config.validate();
            let _ = config.timezone_override();
        }
    }

    #[test]
    fn prop_hostile_slugs_rejected_by_validation(slug in dangerous_slug()) {
        let mut env = base_valid_config();
        env.insert("MOSQUE_SLUG", slug.clone());
        let config = load(&env).unwrap();
        let valid = config.validate().is_ok();
        prop_assert_eq!(valid, slug == "mosquee-de-paris", "slug {:?}", slug);
    }
}

// ============================================================================
// INVARIANT: reminder minutes SORTED DESCENDING, NO DUPLICATES
// ============================================================================

proptest! {
    #[test]
    fn prop_reminder_minutes_sorted_and_unique(raw in reminder_list()) {
        if let Ok(minutes) = parse_minutes_list(&raw) {
            prop_assert!(minutes.windows(2).all(|w| w[0] > w[1]), "{:?}", minutes);
        }
    }

    #[test]
    fn prop_country_always_uppercase(country in "[A-Za-z]{0,4}") {
        let mut env = base_valid_config();
        env.insert("MAWAQIT_COUNTRY", country.clone());
        let config = load(&env).unwrap();
        if !country.is_empty() {
            prop_assert_eq!(config.mawaqit_country, country.to_uppercase());
        }
    }
}

// ============================================================================
// NEGATIVE ASSERTIONS: REQUIRED FIELDS
// ============================================================================

#[test]
fn test_missing_slug() {
    let env: HashMap<&'static str, String> = HashMap::new();
    let err = load(&env).unwrap_err().to_string();
    assert!(err.contains("MOSQUE_SLUG"), "{}", err);
}

#[test]
fn test_blank_slug_counts_as_missing() {
    let mut env = base_valid_config();
    env.insert("MOSQUE_SLUG", "   ".to_string());
    assert!(load(&env).is_err());
}

#[test]
fn test_blank_optionals_are_unset() {
    let mut env = base_valid_config();
    env.insert("TIMEZONE", "".to_string());
    env.insert("HTTP_PORT", "  ".to_string());
    env.insert("PUSHOVER_USER_KEY", "".to_string());
    let config = load(&env).unwrap();
    assert!(config.timezone.is_none());
    assert!(config.http_port.is_none());
    assert!(config.pushover_user_key.is_none());
    assert!(config.validate().is_ok());
}

// ============================================================================
// BOUNDARY STRESS: NUMBERS
// ============================================================================

#[test]
fn test_port_boundary_values() {
    for (port, ok) in [("1", true), ("8080", true), ("65535", true), ("65536", false), ("-1", false), ("80.0", false)] {
        let mut env = base_valid_config();
        env.insert("HTTP_PORT", port.to_string());
        assert_eq!(load(&env).is_ok(), ok, "port {}", port);
    }

    let mut env = base_valid_config();
    env.insert("HTTP_PORT", "0".to_string());
    let err = load(&env).unwrap().validate().unwrap_err().to_string();
    assert!(err.contains("HTTP_PORT"));
}

#[test]
fn test_rakah_duration_bounds() {
    for (secs, ok) in [("29", false), ("30", true), ("144", true), ("600", true), ("601", false)] {
        let mut env = base_valid_config();
        env.insert("RAKAH_DURATION_SECS", secs.to_string());
        let config = load(&env).unwrap();
        assert_eq!(config.validate().is_ok(), ok, "rakah {}", secs);
    }
}

#[test]
fn test_travel_time_bounds() {
    for (secs, ok) in [("-1", false), ("0", true), ("14400", true), ("14401", false)] {
        let mut env = base_valid_config();
        env.insert("TRAVEL_TIME_SECS", secs.to_string());
        let config = load(&env).unwrap();
        assert_eq!(config.validate().is_ok(), ok, "travel {}", secs);
    }
}

#[test]
fn test_timeout_bounds() {
    for (secs, ok) in [("0", false), ("1", true), ("300", true), ("301", false)] {
        let mut env = base_valid_config();
        env.insert("HTTP_TIMEOUT_SECS", secs.to_string());
        let config = load(&env).unwrap();
        assert_eq!(config.validate().is_ok(), ok, "timeout {}", secs);
    }
}

#[test]
fn test_huge_cache_ttl_does_not_overflow() {
    let mut env = base_valid_config();
    env.insert("CACHE_TTL_MINS", u64::MAX.to_string());
    let config = load(&env).unwrap();
    assert!(config.validate().is_err());
    assert_eq!(config.cache_ttl().as_secs(), u64::MAX);
}

// ============================================================================
// CROSS-FIELD RULES
// ============================================================================

#[test]
fn test_half_configured_pushover() {
    let mut env = base_valid_config();
    env.insert("PUSHOVER_USER_KEY", "u123".to_string());
    let config = load(&env).unwrap();
    assert!(config.pushover().is_none());
    let err = config.validate().unwrap_err().to_string();
    assert!(err.contains("PUSHOVER_USER_KEY and PUSHOVER_API_TOKEN"));

    env.insert("PUSHOVER_API_TOKEN", "t456".to_string());
    let config = load(&env).unwrap();
    assert_eq!(config.pushover(), Some(("u123", "t456")));
    assert!(config.validate().is_ok());
}

#[test]
fn test_validation_reports_every_problem() {
    let mut env = base_valid_config();
    env.insert("MOSQUE_SLUG", "bad slug".to_string());
    env.insert("MAWAQIT_BASE_URL", "ftp://mawaqit.net".to_string());
    env.insert("TIMEZONE", "Mars/Olympus_Mons".to_string());
    env.insert("REMINDER_MINUTES", "500".to_string());
    let err = load(&env).unwrap().validate().unwrap_err().to_string();
    for field in ["MOSQUE_SLUG", "MAWAQIT_BASE_URL", "TIMEZONE", "REMINDER_MINUTES"] {
        assert!(err.contains(field), "missing {} in: {}", field, err);
    }
}

#[test]
fn test_unknown_timezone_override_is_an_error() {
    let mut env = base_valid_config();
    env.insert("TIMEZONE", "Europe/Atlantis".to_string());
    assert!(load(&env).unwrap().timezone_override().is_err());

    env.insert("TIMEZONE", "Europe/Paris".to_string());
    let tz = load(&env).unwrap().timezone_override().unwrap();
    assert_eq!(tz, Some(chrono_tz::Europe::Paris));
}

#[test]
fn test_reminder_list_rejects_garbage() {
    assert!(parse_minutes_list("15;5").is_err());
    assert!(parse_minutes_list("-5").is_err());
    assert_eq!(parse_minutes_list(" 5 , 15 ,, 5").unwrap(), vec![15, 5]);
    assert!(parse_minutes_list("").unwrap().is_empty());
}
