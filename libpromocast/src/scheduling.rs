//! Time parsing and calendar helpers
//!
//! Parses the human-readable times accepted by `promo-queue schedule` and
//! `promo-queue configure`, and computes the local calendar day that the daily
//! posting cap is counted against.

use chrono::{DateTime, Duration, FixedOffset, NaiveTime, Offset, Utc};

use crate::error::{Result, SchedulingError};
use crate::random::RandomSource;

const MIN_RANDOM_SECONDS: i64 = 30;
const MAX_RANDOM_SECONDS: i64 = 30 * 24 * 3600;

fn invalid(msg: impl Into<String>) -> crate::error::PromocastError {
    SchedulingError::InvalidTime(msg.into()).into()
}

/// Parse a schedule string into an absolute time.
///
/// Accepted forms, tried in order:
/// - `random:MIN-MAX` windows such as `random:10m-2h`
/// - durations from now: `"30m"`, `"2h"`, `"1 day"`
/// - RFC 3339 timestamps: `"2025-11-20T15:00:00-03:00"`
/// - natural language: `"tomorrow 3pm"`, `"next monday 10am"`
///
/// Past times are returned as-is; the orchestrator fires them immediately.
pub fn parse_schedule(input: &str, rng: &dyn RandomSource) -> Result<DateTime<Utc>> {
    let input = input.trim();
    if input.is_empty() {
        return Err(invalid("schedule string cannot be empty"));
    }

    if let Some(range) = input.strip_prefix("random:") {
        return parse_random_schedule(range, rng);
    }

    if let Ok(duration) = parse_duration(input) {
        return Ok(Utc::now() + duration);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc));
    }

    chrono_english::parse_date_string(input, Utc::now(), chrono_english::Dialect::Us)
        .map_err(|_| invalid(format!("could not parse schedule string: {}", input)))
}

fn parse_duration(input: &str) -> Result<Duration> {
    let std_duration = humantime::parse_duration(input)
        .map_err(|e| invalid(format!("could not parse duration '{}': {}", input, e)))?;
    Duration::from_std(std_duration).map_err(|_| invalid("duration out of range"))
}

fn parse_random_schedule(range: &str, rng: &dyn RandomSource) -> Result<DateTime<Utc>> {
    let (min_str, max_str) = range
        .split_once('-')
        .ok_or_else(|| invalid("random format must be random:MIN-MAX"))?;

    let min = parse_duration(min_str.trim())?.num_seconds();
    let max = parse_duration(max_str.trim())?.num_seconds();

    if min < MIN_RANDOM_SECONDS {
        return Err(invalid(format!(
            "minimum random interval must be at least {} seconds",
            MIN_RANDOM_SECONDS
        )));
    }
    if max > MAX_RANDOM_SECONDS {
        return Err(invalid(format!(
            "maximum random interval cannot exceed {} days",
            MAX_RANDOM_SECONDS / (24 * 3600)
        )));
    }
    if min >= max {
        return Err(invalid("minimum must be less than maximum"));
    }

    // Bounds checked above, both fit in u32
    let secs = rng.range(min as u32..=max as u32);
    Ok(Utc::now() + Duration::seconds(i64::from(secs)))
}

/// Parse a posting interval such as `"6h"` or `"6"` into whole hours
pub fn parse_interval_hours(input: &str) -> Result<u32> {
    let input = input.trim();
    let hours = match input.parse::<u32>() {
        Ok(hours) => hours,
        Err(_) => {
            let duration = humantime::parse_duration(input)
                .map_err(|e| invalid(format!("could not parse interval '{}': {}", input, e)))?;
            let secs = duration.as_secs();
            if secs % 3600 != 0 {
                return Err(invalid(format!(
                    "interval '{}' must be a whole number of hours",
                    input
                )));
            }
            u32::try_from(secs / 3600).map_err(|_| invalid("interval out of range"))?
        }
    };

    if hours == 0 {
        return Err(invalid("interval must be at least one hour"));
    }
    Ok(hours)
}

/// Validate and normalize an `HH:MM` posting time
pub fn parse_posting_time(input: &str) -> Result<String> {
    let time = NaiveTime::parse_from_str(input.trim(), "%H:%M")
        .map_err(|_| invalid(format!("posting time '{}' must be HH:MM", input)))?;
    Ok(time.format("%H:%M").to_string())
}

/// Unix-second bounds `[start, end)` of the calendar day containing `now`,
/// in a zone `utc_offset_hours` away from UTC.
pub fn day_window(now: DateTime<Utc>, utc_offset_hours: i32) -> (i64, i64) {
    let offset = FixedOffset::east_opt(utc_offset_hours * 3600).unwrap_or_else(|| Utc.fix());
    let local_date = now.with_timezone(&offset).date_naive();
    let start = local_date
        .and_time(NaiveTime::MIN)
        .and_local_timezone(offset)
        .single()
        .map(|dt| dt.timestamp())
        .unwrap_or_else(|| now.timestamp() - now.timestamp().rem_euclid(86_400));
    (start, start + 86_400)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::{ScriptedRandom, SeededRandom};
    use chrono::TimeZone;

    fn minutes_from_now(dt: DateTime<Utc>) -> i64 {
        (dt - Utc::now()).num_minutes()
    }

    #[test]
    fn test_parse_duration_forms() {
        let rng = SeededRandom::new(1);
        let diff = minutes_from_now(parse_schedule("30m", &rng).unwrap());
        assert!((29..=30).contains(&diff), "Expected ~30 minutes, got {}", diff);

        let diff = minutes_from_now(parse_schedule("1 hour", &rng).unwrap());
        assert!((59..=60).contains(&diff), "Expected ~60 minutes, got {}", diff);
    }

    #[test]
    fn test_parse_rfc3339() {
        let rng = SeededRandom::new(1);
        let dt = parse_schedule("2030-05-01T12:00:00-03:00", &rng).unwrap();
        assert_eq!(dt.to_rfc3339(), "2030-05-01T15:00:00+00:00");
    }

    #[test]
    fn test_parse_past_time_is_kept() {
        let rng = SeededRandom::new(1);
        let dt = parse_schedule("2001-01-01T00:00:00Z", &rng).unwrap();
        assert!(dt < Utc::now());
    }

    #[test]
    fn test_parse_natural_language() {
        let rng = SeededRandom::new(1);
        let dt = parse_schedule("tomorrow", &rng).unwrap();
        let hours = (dt - Utc::now()).num_hours();
        assert!((0..=48).contains(&hours), "Expected within two days, got {}", hours);
    }

    #[test]
    fn test_parse_random_window_uses_source() {
        let low = ScriptedRandom::constant(0.0);
        let diff = minutes_from_now(parse_schedule("random:10m-20m", &low).unwrap());
        assert!((9..=10).contains(&diff));

        let high = ScriptedRandom::constant(1.0);
        let diff = minutes_from_now(parse_schedule("random:10m-20m", &high).unwrap());
        assert!((19..=20).contains(&diff));
    }

    #[test]
    fn test_parse_random_rejects_bad_windows() {
        let rng = SeededRandom::new(1);
        assert!(parse_schedule("random:invalid", &rng).is_err());
        assert!(parse_schedule("random:2h-1h", &rng).is_err());
        assert!(parse_schedule("random:1s-10s", &rng).is_err());
        assert!(parse_schedule("random:1d-40d", &rng).is_err());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let rng = SeededRandom::new(1);
        assert!(parse_schedule("", &rng).is_err());
        let err = parse_schedule("whenever you like", &rng).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_parse_interval_hours() {
        assert_eq!(parse_interval_hours("6").unwrap(), 6);
        assert_eq!(parse_interval_hours("6h").unwrap(), 6);
        assert_eq!(parse_interval_hours("1d").unwrap(), 24);
        assert!(parse_interval_hours("0").is_err());
        assert!(parse_interval_hours("90m").is_err());
        assert!(parse_interval_hours("often").is_err());
    }

    #[test]
    fn test_parse_posting_time() {
        assert_eq!(parse_posting_time("09:00").unwrap(), "09:00");
        assert_eq!(parse_posting_time("9:05").unwrap(), "09:05");
        assert!(parse_posting_time("25:00").is_err());
        assert!(parse_posting_time("noon").is_err());
    }

    #[test]
    fn test_day_window_utc() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 15, 30, 0).unwrap();
        let (start, end) = day_window(now, 0);
        assert_eq!(start, Utc.with_ymd_and_hms(2025, 3, 10, 0, 0, 0).unwrap().timestamp());
        assert_eq!(end - start, 86_400);
    }

    #[test]
    fn test_day_window_with_negative_offset() {
        // 01:00 UTC on the 10th is still the 9th at UTC-3
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 1, 0, 0).unwrap();
        let (start, _) = day_window(now, -3);
        assert_eq!(start, Utc.with_ymd_and_hms(2025, 3, 9, 3, 0, 0).unwrap().timestamp());
    }
}
