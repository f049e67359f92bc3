//! Periodic trigger rules
//!
//! A [`PeriodicTrigger`] is anchored to the time of day (and weekday or day
//! of month) of its `start_at`. All arithmetic is in UTC.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::{SchedulerError, SchedulerResult};
use crate::calendar::Month;

/// Highest day of month that exists in every month
const LAST_SAFE_DAY: u32 = 28;

// ============================================================================
// Trigger Configuration
// ============================================================================

/// Recurrence interval of a periodic trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Interval {
    Daily,
    Weekly,
    Monthly,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            _ => Err(SchedulerError::unsupported_interval(s)),
        }
    }
}

impl TryFrom<String> for Interval {
    type Error = SchedulerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Interval> for String {
    fn from(interval: Interval) -> Self {
        interval.as_str().to_string()
    }
}

/// Per-tenant periodic harvest trigger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodicTrigger {
    pub tenant_id: String,
    pub interval: Interval,
    pub start_at: DateTime<Utc>,
    #[serde(default)]
    pub last_triggered_at: Option<DateTime<Utc>>,
}

impl PeriodicTrigger {
    pub fn new(tenant_id: impl Into<String>, interval: Interval, start_at: DateTime<Utc>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            interval,
            start_at,
            last_triggered_at: None,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> SchedulerResult<()> {
        if self.tenant_id.trim().is_empty() {
            return Err(SchedulerError::trigger_config(
                "tenant_id",
                "Tenant id cannot be empty",
            ));
        }
        Ok(())
    }

    /// Instant from which the next occurrence is searched
    ///
    /// `start_at`, unless the trigger already fired at or after it, in which
    /// case the instant right after the last firing.
    pub fn effective_start(&self) -> DateTime<Utc> {
        match self.last_triggered_at {
            Some(last) if last >= self.start_at => last + Duration::nanoseconds(1),
            _ => self.start_at,
        }
    }
}

// ============================================================================
// Recurring Rules
// ============================================================================

/// Concrete recurrence derived from a trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecurringRule {
    Daily { time: NaiveTime },
    Weekly { weekday: Weekday, time: NaiveTime },
    /// `day` is at most 28
    Monthly { day: u32, time: NaiveTime },
    MonthlyLastDay { time: NaiveTime },
}

impl RecurringRule {
    pub fn time(&self) -> NaiveTime {
        match self {
            Self::Daily { time }
            | Self::Weekly { time, .. }
            | Self::Monthly { time, .. }
            | Self::MonthlyLastDay { time } => *time,
        }
    }

    /// Earliest occurrence at or after `t`
    pub fn first_at_or_after(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        let time = self.time();
        let date = t.date_naive();
        match *self {
            Self::Daily { .. } => {
                let candidate = at(date, time);
                if candidate >= t {
                    candidate
                } else {
                    candidate + Duration::days(1)
                }
            }
            Self::Weekly { weekday, .. } => {
                let ahead = (7 + weekday.num_days_from_monday() as i64
                    - date.weekday().num_days_from_monday() as i64)
                    % 7;
                let candidate = at(date, time) + Duration::days(ahead);
                if candidate >= t {
                    candidate
                } else {
                    candidate + Duration::weeks(1)
                }
            }
            Self::Monthly { day, .. } => {
                let month = Month::from_date(date);
                let candidate = at(day_of(month, day), time);
                if candidate >= t {
                    candidate
                } else {
                    at(day_of(month.succ(), day), time)
                }
            }
            Self::MonthlyLastDay { .. } => {
                let month = Month::from_date(date);
                let candidate = at(month.last_day(), time);
                if candidate >= t {
                    candidate
                } else {
                    at(month.succ().last_day(), time)
                }
            }
        }
    }
}

impl fmt::Display for RecurringRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let time = self.time().format("%H:%M");
        match self {
            Self::Daily { .. } => write!(f, "daily at {time} UTC"),
            Self::Weekly { weekday, .. } => write!(f, "weekly on {weekday} at {time} UTC"),
            Self::Monthly { day, .. } => write!(f, "monthly on day {day} at {time} UTC"),
            Self::MonthlyLastDay { .. } => write!(f, "monthly on the last day at {time} UTC"),
        }
    }
}

fn at(date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    date.and_time(time).and_utc()
}

fn day_of(month: Month, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(month.year(), month.month(), day).unwrap_or_else(|| month.last_day())
}

/// Derive the recurring rule anchored to `trigger.start_at`
pub fn build_schedule(trigger: &PeriodicTrigger) -> RecurringRule {
    let anchor = trigger.start_at;
    let time = NaiveTime::from_hms_opt(anchor.hour(), anchor.minute(), 0).unwrap_or(NaiveTime::MIN);
    match trigger.interval {
        Interval::Daily => RecurringRule::Daily { time },
        Interval::Weekly => RecurringRule::Weekly {
            weekday: anchor.weekday(),
            time,
        },
        Interval::Monthly if anchor.day() > LAST_SAFE_DAY => RecurringRule::MonthlyLastDay { time },
        Interval::Monthly => RecurringRule::Monthly {
            day: anchor.day(),
            time,
        },
    }
}

/// Next instant the trigger should fire, as seen at `after`
///
/// An occurrence missed while the scheduler was unavailable fires once,
/// immediately (`after` is returned).
pub fn next_fire_time(trigger: &PeriodicTrigger, after: DateTime<Utc>) -> DateTime<Utc> {
    let candidate = build_schedule(trigger).first_at_or_after(trigger.effective_start());
    candidate.max(after)
}

/// Up to `count` upcoming fire times assuming every firing succeeds
pub fn upcoming_fire_times(
    trigger: &PeriodicTrigger,
    after: DateTime<Utc>,
    count: usize,
) -> Vec<DateTime<Utc>> {
    let rule = build_schedule(trigger);
    let mut times = Vec::with_capacity(count);
    if count == 0 {
        return times;
    }
    let mut next = next_fire_time(trigger, after);
    times.push(next);
    while times.len() < count {
        next = rule.first_at_or_after(next + Duration::nanoseconds(1));
        times.push(next);
    }
    times
}

// ============================================================================
// Tests
// ============================================================================
