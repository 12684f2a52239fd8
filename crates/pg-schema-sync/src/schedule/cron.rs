//! Cron expression parsing and next-run computation.
//!
//! Supports the five standard fields (minute, hour, day-of-month, month,
//! day-of-week) with `*`, `*/step`, ranges, and comma lists. Day-of-month
//! and day-of-week combine the standard cron way: when both are restricted,
//! a time matches if either does.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};

use crate::error::{Result, SyncError};

/// How far `next_run` searches before giving up.
const MAX_SEARCH_MINUTES: i64 = 366 * 24 * 60;

/// A parsed cron schedule.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    minutes: [bool; 60],
    hours: [bool; 24],
    days_of_month: [bool; 31],
    months: [bool; 12],
    days_of_week: [bool; 7],
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronSchedule {
    /// Parse a five-field cron expression.
    pub fn parse(expr: &str) -> Result<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(SyncError::Schedule(format!(
                "cron expression must have 5 fields, got {} in '{}'",
                fields.len(),
                expr
            )));
        }

        let minutes = parse_field::<60>(fields[0], 0)?;
        let hours = parse_field::<24>(fields[1], 0)?;
        let days_of_month = parse_field::<31>(fields[2], 1)?;
        let months = parse_field::<12>(fields[3], 1)?;
        let days_of_week = parse_dow(fields[4])?;

        Ok(Self {
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            dom_restricted: fields[2] != "*",
            dow_restricted: fields[4] != "*",
        })
    }

    /// Whether an instant (truncated to the minute) matches.
    pub fn matches(&self, t: DateTime<Utc>) -> bool {
        if !self.minutes[t.minute() as usize]
            || !self.hours[t.hour() as usize]
            || !self.months[(t.month() - 1) as usize]
        {
            return false;
        }

        let dom = self.days_of_month[(t.day() - 1) as usize];
        let dow = self.days_of_week[t.weekday().num_days_from_sunday() as usize];

        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }

    /// First matching instant strictly after `from`, searching forward
    /// minute by minute up to one year.
    pub fn next_run(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = from
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(from)
            + Duration::minutes(1);

        (0..MAX_SEARCH_MINUTES)
            .map(|i| start + Duration::minutes(i))
            .find(|t| self.matches(*t))
    }
}

/// Parse one field into a presence table of size N, where `offset` is the
/// value of index 0 (0 for minute/hour, 1 for day/month).
fn parse_field<const N: usize>(field: &str, offset: u32) -> Result<[bool; N]> {
    let mut set = [false; N];
    let min = offset;
    let max = offset + N as u32 - 1;

    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step.parse().map_err(|_| {
                    SyncError::Schedule(format!("invalid step in cron item '{}'", item))
                })?;
                if step == 0 {
                    return Err(SyncError::Schedule(format!(
                        "step must be positive in cron item '{}'",
                        item
                    )));
                }
                (range, step)
            }
            None => (item, 1),
        };

        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((lo, hi)) = range.split_once('-') {
            let lo: u32 = lo.parse().map_err(|_| {
                SyncError::Schedule(format!("invalid range in cron item '{}'", item))
            })?;
            let hi: u32 = hi.parse().map_err(|_| {
                SyncError::Schedule(format!("invalid range in cron item '{}'", item))
            })?;
            (lo, hi)
        } else {
            let v: u32 = range.parse().map_err(|_| {
                SyncError::Schedule(format!("invalid value in cron item '{}'", item))
            })?;
            (v, v)
        };

        if lo < min || hi > max || lo > hi {
            return Err(SyncError::Schedule(format!(
                "cron item '{}' out of range {}-{}",
                item, min, max
            )));
        }

        let mut v = lo;
        while v <= hi {
            set[(v - offset) as usize] = true;
            v += step;
        }
    }

    Ok(set)
}

/// Day-of-week field; 7 is accepted as an alias for Sunday.
fn parse_dow(field: &str) -> Result<[bool; 7]> {
    let wide = parse_field::<8>(field, 0)?;
    let mut set = [false; 7];
    for (day, present) in wide.iter().enumerate() {
        if *present {
            set[day % 7] = true;
        }
    }
    Ok(set)
}
