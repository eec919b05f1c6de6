//! Cron-lite: five-field expressions where only minute and hour may be
//! literals.
//!
//! `minute hour day-of-month month day-of-week`. Minute and hour accept a
//! number or `*`; any other syntax there (ranges, steps, lists) is reported
//! as a warning and treated as `*`. The last three fields accept only `*`;
//! anything else is a warning and ignored. Matching is delegated to the
//! `cron` crate on the normalized expression.

use crate::error::{JobError, JobResult};
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::fmt;
use std::str::FromStr;

const FIELD_NAMES: [&str; 5] = ["minute", "hour", "day-of-month", "month", "day-of-week"];

/// A parsed cron-lite expression.
#[derive(Clone)]
pub struct CronLite {
    expression: String,
    minute: Option<u32>,
    hour: Option<u32>,
    warnings: Vec<String>,
    schedule: Schedule,
}

impl CronLite {
    /// Parses an expression. Fails on a wrong field count or an
    /// out-of-range minute/hour literal; unsupported syntax only warns.
    pub fn parse(expression: &str) -> JobResult<Self> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(JobError::ScheduleValidation(format!(
                "cron expression '{expression}' must have exactly 5 fields, found {}",
                fields.len()
            )));
        }

        let mut warnings = Vec::new();
        let minute = literal_field(fields[0], FIELD_NAMES[0], 59, &mut warnings)?;
        let hour = literal_field(fields[1], FIELD_NAMES[1], 23, &mut warnings)?;
        for (field, name) in fields[2..].iter().zip(&FIELD_NAMES[2..]) {
            if *field != "*" {
                warnings.push(format!("{name} field '{field}' is not supported and is treated as '*'"));
            }
        }

        let normalized = format!(
            "0 {} {} * * *",
            minute.map_or_else(|| "*".to_string(), |m| m.to_string()),
            hour.map_or_else(|| "*".to_string(), |h| h.to_string()),
        );
        let schedule = Schedule::from_str(&normalized)
            .map_err(|e| JobError::Internal(format!("Invalid normalized cron expression '{normalized}': {e}")))?;

        Ok(Self {
            expression: expression.to_string(),
            minute,
            hour,
            warnings,
            schedule,
        })
    }

    /// The expression as given.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Literal minute, if any.
    pub fn minute(&self) -> Option<u32> {
        self.minute
    }

    /// Literal hour, if any.
    pub fn hour(&self) -> Option<u32> {
        self.hour
    }

    /// Validation warnings produced while parsing.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// First match strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }
}

impl fmt::Debug for CronLite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CronLite")
            .field("expression", &self.expression)
            .field("minute", &self.minute)
            .field("hour", &self.hour)
            .field("warnings", &self.warnings)
            .finish()
    }
}

fn literal_field(field: &str, name: &str, max: u32, warnings: &mut Vec<String>) -> JobResult<Option<u32>> {
    if field == "*" {
        return Ok(None);
    }
    if !field.chars().all(|c| c.is_ascii_digit()) {
        warnings.push(format!("{name} field '{field}' is not supported and is treated as '*'"));
        return Ok(None);
    }
    match field.parse::<u32>() {
        Ok(value) if value <= max => Ok(Some(value)),
        _ => Err(JobError::ScheduleValidation(format!(
            "{name} field '{field}' is out of range 0-{max}"
        ))),
    }
}

/// Common cron-lite expressions.
pub mod cron_expressions {
    /// Every minute.
    pub const EVERY_MINUTE: &str = "* * * * *";

    /// Every hour on the hour.
    pub const EVERY_HOUR: &str = "0 * * * *";

    /// Every day at midnight.
    pub const DAILY_MIDNIGHT: &str = "0 0 * * *";

    /// Every day at 6 AM.
    pub const DAILY_6AM: &str = "0 6 * * *";
}
