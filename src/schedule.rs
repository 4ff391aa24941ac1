//! Schedule model shared by the repositories, trigger engine, and dispatcher.

use chrono::{DateTime, Utc};

/// Unit of a fixed-rate period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateUnit {
    Minute,
    Hour,
    Day,
}

impl RateUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "minute" => Some(Self::Minute),
            "hour" => Some(Self::Hour),
            "day" => Some(Self::Day),
            _ => None,
        }
    }
}

/// When a schedule fires: a cron expression or a fixed repetition period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleKind {
    Cron { expression: String },
    FixedRate { amount: u32, unit: RateUnit },
}

/// A launch-plan schedule as persisted by the admin API layer.
///
/// The scheduler is read-only against these records. `updated_at` changes on,
/// and only on, active/inactive transitions; catch-up bounds its replay window
/// with it.
#[derive(Debug, Clone)]
pub struct Schedule {
    pub project: String,
    pub domain: String,
    pub name: String,
    pub version: String,
    pub kind: ScheduleKind,
    /// Input parameter the scheduled instant is injected into on each fire.
    pub kickoff_time_input_arg: String,
    pub active: bool,
    pub updated_at: DateTime<Utc>,
}

impl Schedule {
    /// Stable watermark key derived from the launch-plan identity.
    ///
    /// Re-registering a schedule with the same identity maps onto the same
    /// key, so watermarks survive deactivation and re-activation.
    pub fn schedule_name(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.project, self.domain, self.name, self.version
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_name_is_stable_across_clones() {
        let schedule = Schedule {
            project: "flytesnacks".to_string(),
            domain: "development".to_string(),
            name: "hourly_report".to_string(),
            version: "v1".to_string(),
            kind: ScheduleKind::Cron {
                expression: "0 * * * *".to_string(),
            },
            kickoff_time_input_arg: "kickoff_time".to_string(),
            active: true,
            updated_at: Utc::now(),
        };

        assert_eq!(
            schedule.schedule_name(),
            "flytesnacks/development/hourly_report/v1"
        );
        assert_eq!(schedule.schedule_name(), schedule.clone().schedule_name());
    }

    #[test]
    fn rate_unit_round_trips_through_strings() {
        for unit in [RateUnit::Minute, RateUnit::Hour, RateUnit::Day] {
            assert_eq!(RateUnit::parse(unit.as_str()), Some(unit));
        }
        assert_eq!(RateUnit::parse("fortnight"), None);
    }
}
