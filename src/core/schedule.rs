//! Cron expression parsing and next-occurrence calculation.
//!
//! Supports the standard 5-field grammar (minute, hour, day-of-month, month,
//! day-of-week) plus named descriptors (@daily, @hourly, etc.). "Next" is
//! always strictly after the reference instant, never equal to it.

use chrono::{DateTime, Utc};
use cron::Schedule as CronSchedule;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur when parsing or evaluating schedules.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// Invalid cron expression.
    #[error("invalid cron: {0}")]
    InvalidCron(String),

    /// The schedule has no future occurrence.
    #[error("no upcoming occurrence")]
    NoUpcomingOccurrence,
}

/// A parsed recurring schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    /// The original expression string, as the user wrote it.
    expression: String,
    #[serde(skip)]
    parsed: Option<Box<CronSchedule>>,
}

impl Schedule {
    /// Parse a schedule expression.
    ///
    /// Accepts:
    /// - Standard 5-field cron: `minute hour day month weekday`
    /// - Descriptors: `@yearly`/`@annually`, `@monthly`, `@weekly`,
    ///   `@daily`/`@midnight`, `@hourly`
    pub fn parse(expression: impl Into<String>) -> Result<Self, ScheduleError> {
        let expression = expression.into();
        let parsed = Self::parse_expression(&expression)?;
        Ok(Self {
            expression,
            parsed: Some(Box::new(parsed)),
        })
    }

    fn parse_expression(expression: &str) -> Result<CronSchedule, ScheduleError> {
        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Err(ScheduleError::InvalidCron("empty expression".into()));
        }

        if trimmed.starts_with('@') {
            return Self::parse_descriptor(trimmed);
        }

        Self::parse_cron(trimmed)
    }

    /// Parse a named descriptor (@daily, @hourly, etc.).
    fn parse_descriptor(expression: &str) -> Result<CronSchedule, ScheduleError> {
        match expression.to_lowercase().as_str() {
            "@yearly" | "@annually" => Self::parse_cron("0 0 1 1 *"),
            "@monthly" => Self::parse_cron("0 0 1 * *"),
            "@weekly" => Self::parse_cron("0 0 * * SUN"),
            "@daily" | "@midnight" => Self::parse_cron("0 0 * * *"),
            "@hourly" => Self::parse_cron("0 * * * *"),
            _ => Err(ScheduleError::InvalidCron(format!(
                "unknown descriptor: {expression}"
            ))),
        }
    }

    fn parse_cron(expression: &str) -> Result<CronSchedule, ScheduleError> {
        let fields = expression.split_whitespace().count();
        if fields != 5 {
            return Err(ScheduleError::InvalidCron(format!(
                "expected 5 fields, got {fields}"
            )));
        }

        // The cron crate expects a leading seconds field; pin it to zero so
        // the grammar stays minute-granular.
        let with_seconds = format!("0 {expression}");
        CronSchedule::from_str(&with_seconds)
            .map_err(|e| ScheduleError::InvalidCron(e.to_string()))
    }

    /// Get the next occurrence strictly after the given instant.
    pub fn next_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
        let parsed = match &self.parsed {
            Some(p) => p,
            // A deserialized Schedule carries only the expression; re-parse.
            None => return Self::parse(self.expression.clone())?.next_after(after),
        };

        parsed
            .after(&after)
            .next()
            .ok_or(ScheduleError::NoUpcomingOccurrence)
    }

    /// Get the next occurrence from now.
    pub fn next(&self) -> Result<DateTime<Utc>, ScheduleError> {
        self.next_after(Utc::now())
    }

    /// Get the original expression string.
    pub fn expression(&self) -> &str {
        &self.expression
    }
}
