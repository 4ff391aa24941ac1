//! Firing-instant enumeration for cron and fixed-rate schedules.

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use cron::Schedule as CronSchedule;
use thiserror::Error;

use crate::schedule::{RateUnit, Schedule, ScheduleKind};

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("invalid cron expression {expression:?}: {source}")]
    InvalidCron {
        expression: String,
        #[source]
        source: cron::error::Error,
    },

    #[error("fixed rate amount must be greater than zero")]
    ZeroRate,
}

/// A parsed firing rule. Parsing happens once per schedule; enumeration and
/// live ticking reuse the parsed form.
#[derive(Debug)]
pub enum Trigger {
    Cron(CronSchedule),
    FixedRate(Duration),
}

impl Trigger {
    pub fn for_schedule(schedule: &Schedule) -> Result<Self, TriggerError> {
        match &schedule.kind {
            ScheduleKind::Cron { expression } => {
                let normalized = normalize_cron(expression);
                let parsed = CronSchedule::from_str(&normalized).map_err(|source| {
                    TriggerError::InvalidCron {
                        expression: expression.clone(),
                        source,
                    }
                })?;
                Ok(Self::Cron(parsed))
            }
            ScheduleKind::FixedRate { amount, unit } => {
                if *amount == 0 {
                    return Err(TriggerError::ZeroRate);
                }
                Ok(Self::FixedRate(rate_period(*amount, *unit)))
            }
        }
    }

    /// All instants in `(from, to]`, in ascending order.
    ///
    /// Cron instants come from the expression (UTC, strictly after `from`).
    /// Fixed-rate instants form the arithmetic progression anchored at
    /// `from`: the first candidate is `from + period`, never `from` itself.
    /// `from >= to` yields an empty enumeration.
    pub fn instants_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        match self {
            Self::Cron(schedule) => schedule.after(&from).take_while(|t| *t <= to).collect(),
            Self::FixedRate(period) => {
                let mut instants = Vec::new();
                let mut next = from + *period;
                while next <= to {
                    instants.push(next);
                    next = next + *period;
                }
                instants
            }
        }
    }

    /// The next live firing instant strictly after `now`, if any.
    pub fn next_fire(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Cron(schedule) => schedule.after(&now).next(),
            Self::FixedRate(period) => Some(now + *period),
        }
    }
}

/// Normalize a standard 5-field cron expression into the 6-field form the
/// parser wants by prepending a seconds field. `@hourly`-style aliases and
/// expressions that already carry seconds pass through untouched.
fn normalize_cron(expression: &str) -> String {
    let trimmed = expression.trim();
    if trimmed.starts_with('@') {
        return trimmed.to_string();
    }
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    }
}

fn rate_period(amount: u32, unit: RateUnit) -> Duration {
    match unit {
        RateUnit::Minute => Duration::minutes(i64::from(amount)),
        RateUnit::Hour => Duration::hours(i64::from(amount)),
        RateUnit::Day => Duration::days(i64::from(amount)),
    }
}
