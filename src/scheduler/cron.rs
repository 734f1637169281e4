//! Crontab evaluation
//!
//! Feeds carry classic 5-field crontab expressions (`min hour dom month dow`).
//! The `cron` crate wants a leading seconds field and numbers weekdays 1-7
//! starting at Sunday, where crontab uses 0-7 with both 0 and 7 meaning
//! Sunday. [`normalize`] bridges the two; weekday names are resolved to
//! crontab numbers first:
//!
//! ```text
//! "30 9 * * 1-5"    ──►  "0 30 9 * * 2,3,4,5,6"
//! "0 8 * * 5-7"     ──►  "0 0 8 * * 1,6,7"
//! "0 9 * * 1,TUE"   ──►  "0 0 9 * * 2,3"
//! ```
//!
//! When both day-of-month and day-of-week are restricted, crontab fires on
//! days matching either field while the `cron` crate requires both. Such
//! expressions are split into two schedules and the earlier occurrence wins.

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;

use super::error::{SchedulerError, SchedulerResult};

const DAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// Parsed crontab expression
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expr: String,
    schedules: Vec<Schedule>,
}

impl CronSchedule {
    /// Original 5-field expression
    pub fn expr(&self) -> &str {
        &self.expr
    }

    /// First occurrence strictly after `now`, evaluated in `tz`
    pub fn next_after(&self, now: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        let local = now.with_timezone(&tz);
        self.schedules
            .iter()
            .filter_map(|schedule| schedule.after(&local).next())
            .map(|next| next.with_timezone(&Utc))
            .min()
    }
}

/// Translate a 5-field crontab expression into the `cron` crate's syntax
///
/// Day-of-month and day-of-week are combined with AND here; use
/// [`parse_schedule`] for crontab's OR rule.
pub fn normalize(expr: &str) -> SchedulerResult<String> {
    let fields = split_fields(expr)?;
    let dow = translate_day_of_week(fields[4]).map_err(|reason| SchedulerError::invalid_cron(expr, reason))?;
    Ok(format!(
        "0 {} {} {} {} {}",
        fields[0], fields[1], fields[2], fields[3], dow
    ))
}

/// Parse a 5-field crontab expression
pub fn parse_schedule(expr: &str) -> SchedulerResult<CronSchedule> {
    let fields = split_fields(expr)?;
    let dow = translate_day_of_week(fields[4]).map_err(|reason| SchedulerError::invalid_cron(expr, reason))?;
    let (minute, hour, dom, month) = (fields[0], fields[1], fields[2], fields[3]);

    let variants = if is_restricted(dom) && is_restricted(fields[4]) {
        vec![
            format!("0 {minute} {hour} {dom} {month} *"),
            format!("0 {minute} {hour} * {month} {dow}"),
        ]
    } else {
        vec![format!("0 {minute} {hour} {dom} {month} {dow}")]
    };

    let schedules = variants
        .iter()
        .map(|v| Schedule::from_str(v).map_err(|e| SchedulerError::invalid_cron(expr, e.to_string())))
        .collect::<SchedulerResult<Vec<_>>>()?;

    Ok(CronSchedule {
        expr: expr.to_string(),
        schedules,
    })
}

/// First occurrence strictly after `now`, evaluated in `tz`
pub fn next_after(expr: &str, now: DateTime<Utc>, tz: Tz) -> SchedulerResult<DateTime<Utc>> {
    parse_schedule(expr)?
        .next_after(now, tz)
        .ok_or_else(|| SchedulerError::NoUpcomingRun {
            expr: expr.to_string(),
        })
}

/// Next run as epoch milliseconds; `None` when the expression is unusable
pub fn next_run_at(expr: &str, now: DateTime<Utc>, tz: Tz) -> Option<i64> {
    match next_after(expr, now, tz) {
        Ok(next) => Some(next.timestamp_millis()),
        Err(e) => {
            tracing::warn!(schedule = expr, error = %e, "Cannot compute next run");
            None
        }
    }
}

/// Parse an IANA timezone name
pub fn parse_timezone(name: &str) -> SchedulerResult<Tz> {
    Tz::from_str(name).map_err(|_| SchedulerError::invalid_timezone(name))
}

fn split_fields(expr: &str) -> SchedulerResult<Vec<&str>> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(SchedulerError::invalid_cron(
            expr,
            format!("expected 5 fields, found {}", fields.len()),
        ));
    }
    Ok(fields)
}

/// Crontab treats a day field starting with `*` as unrestricted
fn is_restricted(field: &str) -> bool {
    !field.starts_with('*') && field != "?"
}

fn translate_day_of_week(field: &str) -> Result<String, String> {
    if field == "*" || field == "?" {
        return Ok(field.to_string());
    }

    let mut days = BTreeSet::new();
    for item in field.split(',') {
        let (base, step) = match item.split_once('/') {
            Some((base, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("invalid step '{step}' in day-of-week"))?;
                if step == 0 {
                    return Err("day-of-week step must be positive".to_string());
                }
                (base, step)
            }
            None => (item, 1),
        };

        let (start, end) = match base {
            "*" => (0, 7),
            _ => match base.split_once('-') {
                Some((a, b)) => (parse_dow(a)?, parse_dow(b)?),
                // "5/2" means from 5 to the end of the range
                None if step > 1 => (parse_dow(base)?, 7),
                None => {
                    let day = parse_dow(base)?;
                    (day, day)
                }
            },
        };
        if start > end {
            return Err(format!("day-of-week range {start}-{end} is reversed"));
        }

        days.extend((start..=end).step_by(step as usize).map(|d| d % 7));
    }

    if days.len() == 7 {
        return Ok("*".to_string());
    }
    Ok(days
        .iter()
        .map(|d| (d + 1).to_string())
        .collect::<Vec<_>>()
        .join(","))
}

/// Crontab day number (0-7) from a number or a three-letter name
fn parse_dow(value: &str) -> Result<u32, String> {
    if let Some(index) = DAY_NAMES
        .iter()
        .position(|name| name.eq_ignore_ascii_case(value))
    {
        return Ok(index as u32);
    }
    match value.parse::<u32>() {
        Ok(day) if day <= 7 => Ok(day),
        _ => Err(format!("invalid day-of-week '{value}'")),
    }
}
