//! Cron expression evaluation.
//! Supports the classic 5-field form "MIN HOUR DOM MON DOW" and the 6/7-field
//! form with seconds (and year). Wildcards, lists, ranges, steps and names.
//! Example: "0 8 * * MON-FRI" = weekdays at 8:00 in the schedule's timezone.

use std::str::FromStr;

use agentforge_core::{ForgeError, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;

const DOW_NAMES: [&str; 8] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT", "SUN"];

/// Parse an IANA timezone name ("UTC", "Europe/Berlin", ...).
pub fn parse_timezone(name: &str) -> Result<Tz> {
    Tz::from_str(name.trim())
        .map_err(|_| ForgeError::invalid(format!("unknown timezone '{name}'")))
}

/// Check that `expression` is a cron rule we can evaluate.
pub fn validate_cron(expression: &str) -> Result<()> {
    parse_schedule(expression).map(|_| ())
}

/// Next fire time strictly after `after`, evaluating the rule in `timezone`.
pub fn next_run_from_cron(
    expression: &str,
    timezone: &str,
    after: DateTime<Utc>,
) -> Result<DateTime<Utc>> {
    let schedule = parse_schedule(expression)?;
    let tz = parse_timezone(timezone)?;
    schedule
        .after(&after.with_timezone(&tz))
        .next()
        .map(|next| next.with_timezone(&Utc))
        .ok_or_else(|| {
            ForgeError::invalid(format!("cron expression '{expression}' never fires again"))
        })
}

fn parse_schedule(expression: &str) -> Result<cron::Schedule> {
    let normalized = normalize(expression)?;
    cron::Schedule::from_str(&normalized)
        .map_err(|e| ForgeError::invalid(format!("invalid cron expression '{expression}': {e}")))
}

/// Rewrite a 5-field rule into the seconds-first form, translating numeric
/// day-of-week values (0-7, Sunday = 0 or 7) into names.
fn normalize(expression: &str) -> Result<String> {
    let parts: Vec<&str> = expression.split_whitespace().collect();
    match parts.len() {
        5 => {
            let dow = translate_dow(parts[4])
                .map_err(|e| ForgeError::invalid(format!("invalid cron expression '{expression}': {e}")))?;
            Ok(format!("0 {} {} {} {} {}", parts[0], parts[1], parts[2], parts[3], dow))
        }
        6 | 7 => Ok(parts.join(" ")),
        n => Err(ForgeError::invalid(format!(
            "invalid cron expression '{expression}': expected 5 fields (MIN HOUR DOM MON DOW), got {n}"
        ))),
    }
}

fn translate_dow(field: &str) -> std::result::Result<String, String> {
    let items: std::result::Result<Vec<String>, String> = field
        .split(',')
        .map(|item| {
            let (range, step) = match item.split_once('/') {
                Some((range, step)) => (range, Some(step)),
                None => (item, None),
            };
            let range = match range.split_once('-') {
                Some((start, end)) => match (start.parse::<usize>(), end.parse::<usize>()) {
                    (Ok(start), Ok(end)) => return expand_dow_range(start, end, step),
                    _ => format!("{}-{}", dow_token(start)?, dow_token(end)?),
                },
                None => dow_token(range)?,
            };
            Ok(match step {
                Some(step) => format!("{range}/{step}"),
                None => range,
            })
        })
        .collect();
    Ok(items?.join(","))
}

/// Numeric ranges become explicit name lists: `5-7` is `FRI,SAT,SUN`, not a wrapping `FRI-SUN`.
fn expand_dow_range(start: usize, end: usize, step: Option<&str>) -> std::result::Result<String, String> {
    if end >= DOW_NAMES.len() {
        return Err(format!("day-of-week {end} out of range 0-7"));
    }
    if start > end {
        return Err(format!("day-of-week range {start}-{end} runs backwards"));
    }
    let step = match step {
        Some(step) => step
            .parse::<usize>()
            .ok()
            .filter(|s| *s > 0)
            .ok_or_else(|| format!("invalid day-of-week step '{step}'"))?,
        None => 1,
    };
    let mut names: Vec<&str> = Vec::new();
    for n in (start..=end).step_by(step) {
        if !names.contains(&DOW_NAMES[n]) {
            names.push(DOW_NAMES[n]);
        }
    }
    Ok(names.join(","))
}

fn dow_token(token: &str) -> std::result::Result<String, String> {
    match token.parse::<usize>() {
        Ok(n) => DOW_NAMES
            .get(n)
            .map(|name| name.to_string())
            .ok_or_else(|| format!("day-of-week {n} out of range 0-7")),
        Err(_) => Ok(token.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike, Weekday};

    #[test]
    fn test_every_hour() {
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 10, 30, 0).unwrap();
        let next = next_run_from_cron("0 * * * *", "UTC", after).unwrap();
        assert_eq!(next.hour(), 11);
        assert_eq!(next.minute(), 0);
    }

    #[test]
    fn test_specific_time() {
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 7, 0, 0).unwrap();
        let next = next_run_from_cron("0 8 * * *", "UTC", after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 2, 22, 8, 0, 0).unwrap());
    }

    #[test]
    fn test_every_15_minutes() {
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 10, 2, 0).unwrap();
        let next = next_run_from_cron("*/15 * * * *", "UTC", after).unwrap();
        assert_eq!(next.minute(), 15);
    }

    #[test]
    fn test_strictly_after() {
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 10, 15, 0).unwrap();
        let next = next_run_from_cron("*/15 * * * *", "UTC", after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 2, 22, 10, 30, 0).unwrap());
    }

    #[test]
    fn test_timezone_is_normalized_to_utc() {
        // 07:00 in New York (EST, UTC-5)
        let after = Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap();
        let next = next_run_from_cron("0 9 * * *", "America/New_York", after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 15, 14, 0, 0).unwrap());
    }

    #[test]
    fn test_numeric_day_of_week() {
        // 2026-02-22 is a Sunday
        let sunday = Utc.with_ymd_and_hms(2026, 2, 22, 12, 0, 0).unwrap();
        let monday = next_run_from_cron("0 9 * * 1", "UTC", sunday).unwrap();
        assert_eq!(monday.weekday(), Weekday::Mon);
        assert_eq!(monday.day(), 23);

        let next_sunday = next_run_from_cron("0 9 * * 0", "UTC", monday).unwrap();
        assert_eq!(next_sunday.weekday(), Weekday::Sun);
        let also_sunday = next_run_from_cron("0 9 * * 7", "UTC", monday).unwrap();
        assert_eq!(also_sunday, next_sunday);

        let weekday = next_run_from_cron("30 6 * * 1-5", "UTC", sunday).unwrap();
        assert_eq!(weekday.weekday(), Weekday::Mon);
    }

    #[test]
    fn test_numeric_range_ending_on_sunday() {
        // 2026-02-23 is a Monday
        let monday = Utc.with_ymd_and_hms(2026, 2, 23, 12, 0, 0).unwrap();
        let next = next_run_from_cron("0 9 * * 5-7", "UTC", monday).unwrap();
        assert_eq!(next.weekday(), Weekday::Fri);
        let next = next_run_from_cron("0 9 * * 5-7", "UTC", next).unwrap();
        assert_eq!(next.weekday(), Weekday::Sat);
        let next = next_run_from_cron("0 9 * * 5-7", "UTC", next).unwrap();
        assert_eq!(next.weekday(), Weekday::Sun);
        assert_eq!(next.day(), 1);

        let daily = next_run_from_cron("0 9 * * 1-7", "UTC", monday).unwrap();
        assert_eq!(daily.weekday(), Weekday::Tue);
        let odd = next_run_from_cron("0 9 * * 0-7/2", "UTC", monday).unwrap();
        assert_eq!(odd.weekday(), Weekday::Tue);

        assert_eq!(translate_dow("5-7").unwrap(), "FRI,SAT,SUN");
        assert_eq!(translate_dow("0-7").unwrap(), "SUN,MON,TUE,WED,THU,FRI,SAT");
        assert!(translate_dow("5-1").is_err());
        assert!(translate_dow("1-8").is_err());
    }

    #[test]
    fn test_seconds_field_passthrough() {
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 10, 0, 10).unwrap();
        let next = next_run_from_cron("30 * * * * *", "UTC", after).unwrap();
        assert_eq!(next.second(), 30);
        assert_eq!(next.minute(), 0);
    }

    #[test]
    fn test_invalid_expression() {
        let after = Utc::now();
        assert!(matches!(
            next_run_from_cron("bad", "UTC", after),
            Err(ForgeError::InvalidArgument(_))
        ));
        assert!(validate_cron("61 * * * *").is_err());
        assert!(validate_cron("0 9 * * 8").is_err());
        assert!(validate_cron("*/5 * * * *").is_ok());
    }

    #[test]
    fn test_unknown_timezone() {
        let err = next_run_from_cron("* * * * *", "Mars/Olympus", Utc::now()).unwrap_err();
        assert!(err.to_string().contains("Mars/Olympus"));
    }
}
