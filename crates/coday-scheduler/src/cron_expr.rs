// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use anyhow::{bail, Context};
use chrono::{DateTime, Datelike, Duration, Timelike, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Any,
    Exact(u32),
    Step(u32),
}

impl Field {
    fn matches(self, value: u32) -> bool {
        match self {
            Field::Any => true,
            Field::Exact(n) => n == value,
            Field::Step(n) => n != 0 && value % n == 0,
        }
    }

    fn parse(raw: &str, max: u32) -> anyhow::Result<Self> {
        if raw == "*" {
            return Ok(Field::Any);
        }
        if let Some(step) = raw.strip_prefix("*/") {
            let n: u32 = step.parse().with_context(|| format!("invalid step '{raw}'"))?;
            if n == 0 || n > max {
                bail!("step '{raw}' out of range 1..={max}");
            }
            return Ok(Field::Step(n));
        }
        let n: u32 = raw.parse().with_context(|| format!("invalid field '{raw}'"))?;
        if n > max {
            bail!("value '{raw}' out of range 0..={max}");
        }
        Ok(Field::Exact(n))
    }
}

/// A 5-field cron expression (`minute hour day month weekday`), evaluated in
/// UTC. Supports `*`, a bare integer, and `*/N` per field; no lists or
/// ranges, matching the minimal grammar the scheduler actually needs.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    minute: Field,
    hour: Field,
    day: Field,
    month: Field,
    weekday: Field,
    raw: String,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> anyhow::Result<Self> {
        let parts: Vec<&str> = expr.split_whitespace().collect();
        let [minute, hour, day, month, weekday] = parts.as_slice() else {
            bail!("cron expression '{expr}' must have exactly 5 fields, found {}", parts.len());
        };
        Ok(Self {
            minute: Field::parse(minute, 59)?,
            hour: Field::parse(hour, 23)?,
            day: Field::parse(day, 31)?,
            month: Field::parse(month, 12)?,
            weekday: Field::parse(weekday, 6)?,
            raw: expr.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    fn matches(&self, at: DateTime<Utc>) -> bool {
        self.minute.matches(at.minute())
            && self.hour.matches(at.hour())
            && self.day.matches(at.day())
            && self.month.matches(at.month())
            && self.weekday.matches(at.weekday().num_days_from_sunday())
    }

    /// The next instant strictly after `from` at which this schedule fires.
    /// Monotonically non-decreasing in `from` by construction: advancing the
    /// search start forward can only advance (or hold steady relative to)
    /// the returned instant.
    pub fn next_after(&self, from: DateTime<Utc>) -> anyhow::Result<DateTime<Utc>> {
        let start = from
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(from)
            + Duration::minutes(1);

        let mut candidate = start;
        // Four years covers every month/day/weekday combination, including
        // Feb 29 on a day-of-month match.
        let limit = start + Duration::days(4 * 366);
        while candidate < limit {
            if self.matches(candidate) {
                return Ok(candidate);
            }
            candidate += Duration::minutes(1);
        }
        bail!("cron expression '{}' never matches within four years of {}", self.raw, from);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn every_minute_fires_one_minute_later() {
        let sched = CronSchedule::parse("* * * * *").unwrap();
        let from = Utc.with_ymd_and_hms(2026, 1, 1, 12, 30, 15).unwrap();
        let next = sched.next_after(from).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 1, 12, 31, 0).unwrap());
    }

    #[test]
    fn daily_at_nine_skips_to_next_day_once_past() {
        let sched = CronSchedule::parse("0 9 * * *").unwrap();
        let from = Utc.with_ymd_and_hms(2026, 3, 5, 10, 0, 0).unwrap();
        let next = sched.next_after(from).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 6, 9, 0, 0).unwrap());
    }

    #[test]
    fn step_field_matches_multiples() {
        let sched = CronSchedule::parse("*/15 * * * *").unwrap();
        let from = Utc.with_ymd_and_hms(2026, 1, 1, 0, 1, 0).unwrap();
        let next = sched.next_after(from).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 1, 0, 15, 0).unwrap());
    }

    #[test]
    fn weekday_field_selects_matching_day() {
        // 2026-03-02 is a Monday; weekday field 1 = Monday.
        let sched = CronSchedule::parse("0 8 * * 1").unwrap();
        let from = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let next = sched.next_after(from).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap());
    }

    #[test]
    fn next_run_is_strictly_greater_than_reference() {
        let sched = CronSchedule::parse("30 14 * * *").unwrap();
        let from = Utc.with_ymd_and_hms(2026, 3, 5, 14, 30, 0).unwrap();
        let next = sched.next_after(from).unwrap();
        assert!(next > from);
    }

    #[test]
    fn wrong_field_count_is_rejected() {
        assert!(CronSchedule::parse("* * * *").is_err());
    }

    #[test]
    fn out_of_range_value_is_rejected() {
        assert!(CronSchedule::parse("60 * * * *").is_err());
    }
}
