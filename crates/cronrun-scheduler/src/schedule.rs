use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::error::{Result, SchedulerError};
use crate::types::Job;

/// Day names indexed by classic cron day-of-week numbers (0 and 7 = Sunday).
const WEEKDAYS: [&str; 8] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT", "SUN"];

/// Parse a cron expression.
///
/// Accepts the classic five-field form (`min hour dom mon dow`, Sunday = 0),
/// the seconds-first six and seven-field forms, and `@daily`-style macros.
pub fn parse(expression: &str) -> Result<Schedule> {
    let normalized = normalize(expression)?;
    Schedule::from_str(&normalized)
        .map_err(|e| SchedulerError::InvalidSchedule(format!("'{expression}': {e}")))
}

/// Compute the first instant of `expression` strictly after `after`.
pub fn next_run(expression: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
    parse(expression)?
        .after(&after)
        .next()
        .ok_or_else(|| SchedulerError::InvalidSchedule(format!("'{expression}' never fires")))
}

/// Whether `job` should run at `now`.
///
/// `execute_immediately` short-circuits the schedule. Otherwise the job is due
/// once the first occurrence after its last execution lies in the past; a job
/// that never ran is measured from the Unix epoch.
pub fn is_due(job: &Job, now: DateTime<Utc>) -> Result<bool> {
    if job.execute_immediately {
        return Ok(true);
    }
    let after = job.last_execution.unwrap_or(DateTime::UNIX_EPOCH);
    Ok(next_run(&job.cron_expression, after)? < now)
}

fn normalize(expression: &str) -> Result<String> {
    let trimmed = expression.trim();
    if trimmed.starts_with('@') {
        return Ok(trimmed.to_string());
    }

    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    match fields.len() {
        5 => {
            let dow = classic_day_of_week(fields[4])?;
            Ok(format!("0 {} {} {} {} {dow}", fields[0], fields[1], fields[2], fields[3]))
        }
        6 | 7 => Ok(fields.join(" ")),
        n => Err(SchedulerError::InvalidSchedule(format!(
            "'{expression}': expected 5, 6 or 7 fields, got {n}"
        ))),
    }
}

/// Rewrite numeric day-of-week tokens (0-7, Sunday = 0 or 7) as names so the
/// parser, which numbers days from 1, reads them the classic way.
fn classic_day_of_week(field: &str) -> Result<String> {
    let items = field
        .split(',')
        .map(|item| {
            let (base, step) = match item.split_once('/') {
                Some((base, step)) => (base, Some(step)),
                None => (item, None),
            };
            let base = base
                .split('-')
                .map(weekday_name)
                .collect::<Result<Vec<_>>>()?
                .join("-");
            Ok(match step {
                Some(step) => format!("{base}/{step}"),
                None => base,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(items.join(","))
}

fn weekday_name(token: &str) -> Result<String> {
    if !token.chars().all(|c| c.is_ascii_digit()) || token.is_empty() {
        return Ok(token.to_string());
    }
    token
        .parse::<usize>()
        .ok()
        .and_then(|n| WEEKDAYS.get(n))
        .map(|name| name.to_string())
        .ok_or_else(|| SchedulerError::InvalidSchedule(format!("day of week out of range: {token}")))
}
