//! Calendar crontab expressions
//!
//! A crontab has exactly four space-separated fields: minute, hour,
//! day-of-month and weekday. Each field is `*` or a comma-separated list of
//! integers; values above the field maximum are truncated to the maximum.
//! Weekdays count from `0` = Sunday to `6` = Saturday.
//!
//! When both day-of-month and weekday are restricted, the matching days are
//! the union of both sets, not the intersection.

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike};
use std::str::FromStr;

use crate::error::{SchedulerError, SchedulerResult};

/// One parsed field; `None` is `*`
type Field = Option<Vec<u32>>;

/// A parsed `minute hour day weekday` expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSpec {
    minutes: Field,
    hours: Field,
    days: Field,
    weekdays: Field,
}

impl FromStr for CronSpec {
    type Err = SchedulerError;

    fn from_str(expr: &str) -> SchedulerResult<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        let [minute, hour, day, weekday] = fields.as_slice() else {
            return Err(SchedulerError::InvalidCron {
                expr: expr.to_string(),
                reason: format!("expected 4 fields, found {}", fields.len()),
            });
        };

        Ok(Self {
            minutes: parse_field(expr, minute, 59)?,
            hours: parse_field(expr, hour, 23)?,
            days: parse_field(expr, day, 31)?,
            weekdays: parse_field(expr, weekday, 6)?,
        })
    }
}

fn parse_field(expr: &str, field: &str, max: u32) -> SchedulerResult<Field> {
    if field == "*" {
        return Ok(None);
    }
    let mut values = field
        .split(',')
        .map(|v| {
            v.trim()
                .parse::<u32>()
                .map(|v| v.min(max))
                .map_err(|_| SchedulerError::InvalidCron {
                    expr: expr.to_string(),
                    reason: format!("'{v}' is not a number"),
                })
        })
        .collect::<SchedulerResult<Vec<u32>>>()?;
    values.sort_unstable();
    values.dedup();
    Ok(Some(values))
}

fn expand(field: &Field, max: u32) -> Vec<u32> {
    match field {
        None => (0..=max).collect(),
        Some(values) => values.clone(),
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (y, m) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(y, m, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}

impl CronSpec {
    /// Matching days of the given month, ascending
    pub fn days_of_month(&self, year: i32, month: u32) -> Vec<u32> {
        let mdays = days_in_month(year, month);
        let by_weekday = |weekdays: &[u32]| -> Vec<u32> {
            (1..=mdays)
                .filter(|d| {
                    NaiveDate::from_ymd_opt(year, month, *d)
                        .is_some_and(|date| weekdays.contains(&date.weekday().num_days_from_sunday()))
                })
                .collect()
        };
        let by_day = |days: &[u32]| -> Vec<u32> {
            days.iter()
                .filter(|d| **d >= 1)
                .map(|d| (*d).min(mdays))
                .collect()
        };

        let mut days = match (&self.days, &self.weekdays) {
            (None, None) => (1..=mdays).collect(),
            (None, Some(weekdays)) => by_weekday(weekdays),
            (Some(days), None) => by_day(days),
            (Some(days), Some(weekdays)) => {
                let mut all = by_weekday(weekdays);
                all.extend(by_day(days));
                all
            }
        };
        days.sort_unstable();
        days.dedup();
        days
    }

    /// Candidate `(day, hour, minute)` triples of a month, ascending
    fn candidates(&self, year: i32, month: u32) -> Vec<(u32, u32, u32)> {
        let hours = expand(&self.hours, 23);
        let minutes = expand(&self.minutes, 59);
        let mut out = Vec::new();
        for day in self.days_of_month(year, month) {
            for hour in &hours {
                for minute in &minutes {
                    out.push((day, *hour, *minute));
                }
            }
        }
        out
    }

    /// First matching minute strictly after `now`
    ///
    /// The current month is searched first; when nothing remains the
    /// earliest match of the following months is used. Candidates that do
    /// not exist in the local timezone (DST gaps) are skipped.
    pub fn next_after<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let tz = now.timezone();
        let current = (now.day(), now.hour(), now.minute());
        let (mut year, mut month) = (now.year(), now.month());

        for first in [true].into_iter().chain(std::iter::repeat(false).take(12)) {
            for (day, hour, minute) in self.candidates(year, month) {
                if first && (day, hour, minute) <= current {
                    continue;
                }
                let resolved = tz
                    .with_ymd_and_hms(year, month, day, hour, minute, 0)
                    .earliest();
                if let Some(dt) = resolved {
                    return Some(dt);
                }
            }
            (year, month) = if month == 12 {
                (year + 1, 1)
            } else {
                (year, month + 1)
            };
        }
        None
    }
}
