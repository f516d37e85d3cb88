//! Schedule spec parsing: turns the user-facing "when" into a UTC due time.
//!
//! Accepted forms:
//! - `cron:<expr>` or an explicit cron rule → next fire time in the timezone
//! - `in:<N><s|m|h>` → relative offset from now ("in:30m")
//! - ISO-8601 timestamp: with an offset it is absolute, without one it is
//!   read as local time in the schedule's timezone

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;

use agentforge_core::{ForgeError, Result};

use crate::cron;
use crate::tasks::NewSchedule;

const CRON_PREFIX: &str = "cron:";
const RELATIVE_PREFIX: &str = "in:";

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// A parsed schedule, ready to be stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleSpec {
    /// First due time (UTC).
    pub run_at: DateTime<Utc>,
    pub cron_expression: Option<String>,
    pub timezone: String,
    pub max_runs: Option<u32>,
}

impl ScheduleSpec {
    /// Attach a description to get a storable definition.
    pub fn into_new_schedule(self, description: impl Into<String>) -> NewSchedule {
        let schedule = match self.cron_expression {
            Some(expr) => NewSchedule::cron(description, self.run_at, expr),
            None => NewSchedule::once(description, self.run_at),
        }
        .timezone(self.timezone);
        match self.max_runs {
            Some(max) => schedule.max_runs(max),
            None => schedule,
        }
    }
}

/// Parse a schedule from a time value and/or a cron rule.
pub fn parse_schedule_spec(
    value: Option<&str>,
    cron_expression: Option<&str>,
    timezone: &str,
    max_runs: Option<u32>,
) -> Result<ScheduleSpec> {
    parse_schedule_spec_at(Utc::now(), value, cron_expression, timezone, max_runs)
}

/// Same as [`parse_schedule_spec`] with an injected clock.
pub fn parse_schedule_spec_at(
    now: DateTime<Utc>,
    value: Option<&str>,
    cron_expression: Option<&str>,
    timezone: &str,
    max_runs: Option<u32>,
) -> Result<ScheduleSpec> {
    let timezone = timezone.trim();
    let tz = cron::parse_timezone(timezone)?;
    if max_runs == Some(0) {
        return Err(ForgeError::invalid("max_runs must be >= 1"));
    }

    let value = value.map(str::trim).filter(|v| !v.is_empty());
    let cron_expression = cron_expression
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .or_else(|| value.and_then(|v| v.strip_prefix(CRON_PREFIX)).map(str::trim));

    if let Some(expr) = cron_expression {
        let run_at = cron::next_run_from_cron(expr, timezone, now)?;
        return Ok(ScheduleSpec {
            run_at,
            cron_expression: Some(expr.to_string()),
            timezone: timezone.to_string(),
            max_runs,
        });
    }

    let value = value.ok_or_else(|| {
        ForgeError::invalid("a schedule needs a time (ISO-8601 or in:<N><s|m|h>) or a cron expression")
    })?;
    let run_at = match value.strip_prefix(RELATIVE_PREFIX) {
        Some(offset) => now
            .checked_add_signed(parse_relative(offset)?)
            .ok_or_else(|| ForgeError::invalid(format!("'{value}' is too far in the future")))?,
        None => parse_timestamp(value, &tz)?,
    };
    Ok(ScheduleSpec {
        run_at,
        cron_expression: None,
        timezone: timezone.to_string(),
        max_runs,
    })
}

/// "30s", "15m", "2h".
fn parse_relative(offset: &str) -> Result<Duration> {
    let bad = || ForgeError::invalid(format!("relative schedules look like in:30m (s/m/h), got 'in:{offset}'"));
    let offset = offset.trim();
    let unit = offset.chars().last().ok_or_else(bad)?;
    let quantity: i64 = offset[..offset.len() - unit.len_utf8()].parse().map_err(|_| bad())?;
    if quantity < 0 {
        return Err(bad());
    }
    let duration = match unit {
        's' => Duration::try_seconds(quantity),
        'm' => Duration::try_minutes(quantity),
        'h' => Duration::try_hours(quantity),
        _ => return Err(bad()),
    };
    duration.ok_or_else(|| ForgeError::invalid(format!("offset 'in:{offset}' is out of range")))
}

fn parse_timestamp<Tz: TimeZone>(value: &str, tz: &Tz) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }

    let naive = NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| {
            ForgeError::invalid(format!(
                "cannot parse '{value}' as a time; use ISO-8601 (2026-03-01T09:00) or in:<N><s|m|h>"
            ))
        })?;

    match tz.from_local_datetime(&naive) {
        LocalResult::Single(ts) => Ok(ts.with_timezone(&Utc)),
        // DST fall-back: take the first occurrence
        LocalResult::Ambiguous(earliest, _) => Ok(earliest.with_timezone(&Utc)),
        LocalResult::None => Err(ForgeError::invalid(format!(
            "'{value}' does not exist in that timezone (DST gap)"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_relative_schedule() {
        let spec = parse_schedule_spec_at(now(), Some("in:10s"), None, "UTC", None).unwrap();
        assert_eq!(spec.run_at, now() + Duration::seconds(10));
        assert!(spec.cron_expression.is_none());

        let spec = parse_schedule_spec_at(now(), Some("in:2h"), None, "UTC", None).unwrap();
        assert_eq!(spec.run_at, now() + Duration::hours(2));
    }

    #[test]
    fn test_bad_relative_unit() {
        for value in ["in:10d", "in:m", "in:", "in:-5m"] {
            let err = parse_schedule_spec_at(now(), Some(value), None, "UTC", None).unwrap_err();
            assert!(matches!(err, ForgeError::InvalidArgument(_)), "{value}");
        }
    }

    #[test]
    fn test_huge_relative_offset_is_rejected() {
        for value in ["in:9999999999999999h", "in:9000000000000000s", "in:153722867280912930m"] {
            let err = parse_schedule_spec_at(now(), Some(value), None, "UTC", None).unwrap_err();
            assert!(matches!(err, ForgeError::InvalidArgument(_)), "{value}");
        }
    }

    #[test]
    fn test_parse_cron_schedule() {
        let spec = parse_schedule_spec_at(now(), None, Some("*/5 * * * *"), "UTC", None).unwrap();
        assert_eq!(spec.cron_expression.as_deref(), Some("*/5 * * * *"));
        assert_eq!(spec.run_at, now() + Duration::minutes(5));
    }

    #[test]
    fn test_cron_prefix_on_value() {
        let spec =
            parse_schedule_spec_at(now(), Some("cron: 0 9 * * *"), None, "Europe/Berlin", Some(3)).unwrap();
        assert_eq!(spec.cron_expression.as_deref(), Some("0 9 * * *"));
        // 09:00 CET is 08:00 UTC, already past at noon
        assert_eq!(spec.run_at, Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap());
        assert_eq!(spec.max_runs, Some(3));
    }

    #[test]
    fn test_iso_timestamps() {
        let absolute = parse_schedule_spec_at(now(), Some("2026-03-05T10:30:00+02:00"), None, "UTC", None).unwrap();
        assert_eq!(absolute.run_at, Utc.with_ymd_and_hms(2026, 3, 5, 8, 30, 0).unwrap());

        let local = parse_schedule_spec_at(now(), Some("2026-03-05 10:30"), None, "America/New_York", None).unwrap();
        assert_eq!(local.run_at, Utc.with_ymd_and_hms(2026, 3, 5, 15, 30, 0).unwrap());
        assert_eq!(local.timezone, "America/New_York");

        let date_only = parse_schedule_spec_at(now(), Some("2026-03-05"), None, "UTC", None).unwrap();
        assert_eq!(date_only.run_at, Utc.with_ymd_and_hms(2026, 3, 5, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_dst_edges() {
        // 2026-03-08 02:30 does not exist in New York
        assert!(parse_schedule_spec_at(now(), Some("2026-03-08T02:30:00"), None, "America/New_York", None).is_err());
        // 2026-11-01 01:30 happens twice; the EDT one comes first
        let spec = parse_schedule_spec_at(now(), Some("2026-11-01T01:30:00"), None, "America/New_York", None).unwrap();
        assert_eq!(spec.run_at, Utc.with_ymd_and_hms(2026, 11, 1, 5, 30, 0).unwrap());
    }

    #[test]
    fn test_rejects_invalid_input() {
        assert!(parse_schedule_spec_at(now(), None, None, "UTC", None).is_err());
        assert!(parse_schedule_spec_at(now(), Some("tomorrow-ish"), None, "UTC", None).is_err());
        assert!(parse_schedule_spec_at(now(), Some("in:5m"), None, "Atlantis/Lost", None).is_err());
        assert!(parse_schedule_spec_at(now(), None, Some("* * * * *"), "UTC", Some(0)).is_err());
        assert!(parse_schedule_spec_at(now(), None, Some("every day"), "UTC", None).is_err());
    }

    #[test]
    fn test_into_new_schedule() {
        let spec = parse_schedule_spec_at(now(), None, Some("0 * * * *"), "UTC", Some(2)).unwrap();
        let schedule = spec.into_new_schedule("hourly report");
        assert_eq!(schedule.description, "hourly report");
        assert_eq!(schedule.cron_expression.as_deref(), Some("0 * * * *"));
        assert_eq!(schedule.max_runs, Some(2));
        assert_eq!(schedule.timezone.as_deref(), Some("UTC"));
    }
}
