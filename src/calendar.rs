//! Month arithmetic for report harvesting
//!
//! Usage reports are keyed by calendar month. This module provides the
//! [`Month`] value type plus the two range helpers the planner relies on:
//! [`months_between`] and [`clamp_end`].

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors produced by calendar input handling
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CalendarError {
    /// A range bound was absent or could not be parsed
    #[error("Invalid range: {reason}")]
    InvalidRange { reason: String },
}

impl CalendarError {
    /// Create an invalid range error
    pub fn invalid_range(reason: impl Into<String>) -> Self {
        Self::InvalidRange {
            reason: reason.into(),
        }
    }
}

/// A calendar year + month, without a day component
///
/// Field order matters: the derived `Ord` compares year first, then month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Month {
    year: i32,
    month: u32,
}

impl Month {
    /// Create a month, validating that `month` is in 1..=12
    pub fn new(year: i32, month: u32) -> Result<Self, CalendarError> {
        if !(1..=12).contains(&month) {
            return Err(CalendarError::invalid_range(format!(
                "month {month} out of range 1-12"
            )));
        }
        // Reject years chrono cannot represent so first_day/last_day stay total.
        if NaiveDate::from_ymd_opt(year, month, 1).is_none() {
            return Err(CalendarError::invalid_range(format!(
                "year {year} out of range"
            )));
        }
        Ok(Self { year, month })
    }

    /// Month containing the given date
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// The last fully completed month as of `today`
    pub fn last_completed(today: NaiveDate) -> Self {
        Self::from_date(today).pred()
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// The following month
    pub fn succ(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// The preceding month
    pub fn pred(&self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    /// Add (or subtract, for negative values) whole months
    pub fn add_months(&self, months: i32) -> Self {
        let index = self.index() + months;
        Self {
            year: index.div_euclid(12),
            month: (index.rem_euclid(12) + 1) as u32,
        }
    }

    /// First calendar day of the month
    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    /// Last calendar day of the month
    pub fn last_day(&self) -> NaiveDate {
        self.succ()
            .first_day()
            .pred_opt()
            .unwrap_or(NaiveDate::MAX)
    }

    /// Number of days in the month
    pub fn days(&self) -> u32 {
        self.last_day().day()
    }

    /// Signed difference in months: `other - self`
    pub fn months_until(&self, other: Month) -> i32 {
        other.index() - self.index()
    }

    fn index(&self) -> i32 {
        self.year * 12 + (self.month as i32 - 1)
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Month {
    type Err = CalendarError;

    /// Parse `YYYY-MM` (a trailing `-DD` day component is accepted and ignored)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let mut parts = s.splitn(3, '-');
        let year = parts
            .next()
            .filter(|p| !p.is_empty())
            .and_then(|p| p.parse::<i32>().ok());
        let month = parts.next().and_then(|p| p.parse::<u32>().ok());

        match (year, month) {
            (Some(year), Some(month)) => Self::new(year, month),
            _ => Err(CalendarError::invalid_range(format!(
                "cannot parse '{s}' as YYYY-MM"
            ))),
        }
    }
}

impl TryFrom<String> for Month {
    type Error = CalendarError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Month> for String {
    fn from(value: Month) -> Self {
        value.to_string()
    }
}

/// All months from `start` to `end`, inclusive and ascending
///
/// Empty when `start > end`.
pub fn months_between(start: Month, end: Month) -> Vec<Month> {
    let len = start.months_until(end) + 1;
    if len <= 0 {
        return Vec::new();
    }

    let mut months = Vec::with_capacity(len as usize);
    let mut current = start;
    while current <= end {
        months.push(current);
        current = current.succ();
    }
    months
}

/// Fallible variant of [`months_between`] for raw, possibly absent bounds
pub fn parse_months_between(
    start: Option<&str>,
    end: Option<&str>,
) -> Result<Vec<Month>, CalendarError> {
    let start = start
        .ok_or_else(|| CalendarError::invalid_range("start month is missing"))?
        .parse::<Month>()?;
    let end = end
        .ok_or_else(|| CalendarError::invalid_range("end month is missing"))?
        .parse::<Month>()?;
    Ok(months_between(start, end))
}

/// Clamp a requested end month so it never exceeds `max_allowed`
pub fn clamp_end(requested_end: Option<Month>, max_allowed: Month) -> Month {
    match requested_end {
        Some(end) if end <= max_allowed => end,
        _ => max_allowed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(s: &str) -> Month {
        s.parse().unwrap()
    }

    #[test]
    fn test_single_month_range() {
        assert_eq!(months_between(m("2018-01"), m("2018-01")), vec![m("2018-01")]);
    }

    #[test]
    fn test_inverted_range_is_empty() {
        assert!(months_between(m("2018-02"), m("2018-01")).is_empty());
    }

    #[test]
    fn test_range_crosses_year() {
        let months = months_between(m("2019-11"), m("2020-02"));
        let labels: Vec<_> = months.iter().map(ToString::to_string).collect();
        assert_eq!(labels, vec!["2019-11", "2019-12", "2020-01", "2020-02"]);
    }

    #[test]
    fn test_parse_months_between_missing_bound() {
        let err = parse_months_between(None, Some("2020-01")).unwrap_err();
        assert!(matches!(err, CalendarError::InvalidRange { .. }));
    }

    #[test]
    fn test_parse_months_between_garbage() {
        assert!(parse_months_between(Some("2020-13"), Some("2020-01")).is_err());
        assert!(parse_months_between(Some("yesterday"), Some("2020-01")).is_err());
        assert_eq!(
            parse_months_between(Some("2020-01"), Some("2020-03"))
                .unwrap()
                .len(),
            3
        );
    }

    #[test]
    fn test_clamp_end() {
        let max = m("2020-05");
        assert_eq!(clamp_end(None, max), max);
        assert_eq!(clamp_end(Some(m("2021-01")), max), max);
        assert_eq!(clamp_end(Some(m("2020-02")), max), m("2020-02"));
    }

    #[test]
    fn test_first_and_last_day() {
        assert_eq!(m("2020-02").last_day(), NaiveDate::from_ymd_opt(2020, 2, 29).unwrap());
        assert_eq!(m("2019-02").days(), 28);
        assert_eq!(m("2019-12").first_day(), NaiveDate::from_ymd_opt(2019, 12, 1).unwrap());
    }

    #[test]
    fn test_last_completed_month() {
        let today = NaiveDate::from_ymd_opt(2021, 1, 15).unwrap();
        assert_eq!(Month::last_completed(today), m("2020-12"));
    }

    #[test]
    fn test_month_arithmetic() {
        assert_eq!(m("2020-01").months_until(m("2021-03")), 14);
        assert_eq!(m("2020-01").add_months(-1), m("2019-12"));
        assert_eq!(m("2020-11").add_months(14), m("2022-01"));
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&m("2020-03")).unwrap();
        assert_eq!(json, "\"2020-03\"");
        let back: Month = serde_json::from_str("\"2020-03-01\"").unwrap();
        assert_eq!(back, m("2020-03"));
    }
}
