// Core data structures for the usage harvester

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::calendar::{months_between, CalendarError, Month};

/// A contiguous span of months to fetch for one report type
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FetchRange {
    pub report_type: String,
    pub begin: Month,
    pub end: Month,
}

impl FetchRange {
    /// Create a range, rejecting `begin > end`
    pub fn new(report_type: impl Into<String>, begin: Month, end: Month) -> Result<Self, CalendarError> {
        if begin > end {
            return Err(CalendarError::invalid_range(format!(
                "begin {begin} is after end {end}"
            )));
        }
        Ok(Self {
            report_type: report_type.into(),
            begin,
            end,
        })
    }

    /// A range covering exactly one month
    pub fn single(report_type: impl Into<String>, month: Month) -> Self {
        Self {
            report_type: report_type.into(),
            begin: month,
            end: month,
        }
    }

    /// Every month spanned, ascending
    pub fn months(&self) -> Vec<Month> {
        months_between(self.begin, self.end)
    }

    /// Number of months spanned (at least 1)
    pub fn len_months(&self) -> u32 {
        (self.begin.months_until(self.end) + 1).max(1) as u32
    }

    pub fn is_single_month(&self) -> bool {
        self.begin == self.end
    }
}

impl fmt::Display for FetchRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_single_month() {
            write!(f, "{}[{}]", self.report_type, self.begin)
        } else {
            write!(f, "{}[{}..{}]", self.report_type, self.begin, self.end)
        }
    }
}

/// One harvested (or failed) report for a provider, report type and month
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRecord {
    pub provider_id: String,
    pub report_type: String,
    pub month: Month,

    /// Opaque report body; absent on failure placeholders
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,

    /// Human readable reason; present only on failure placeholders
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    /// Consecutive failed attempts for this month
    #[serde(default)]
    pub attempt_count: u32,
}

impl ReportRecord {
    /// A successfully fetched month
    pub fn success(
        provider_id: impl Into<String>,
        report_type: impl Into<String>,
        month: Month,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            report_type: report_type.into(),
            month,
            payload: Some(payload),
            failure_reason: None,
            attempt_count: 0,
        }
    }

    /// A failure placeholder for one month
    pub fn failure(
        provider_id: impl Into<String>,
        report_type: impl Into<String>,
        month: Month,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            report_type: report_type.into(),
            month,
            payload: None,
            failure_reason: Some(reason.into()),
            attempt_count: 1,
        }
    }

    /// Payload present and no failure recorded
    pub fn is_satisfied(&self) -> bool {
        self.payload.is_some() && self.failure_reason.is_none()
    }

    pub fn is_failure(&self) -> bool {
        self.failure_reason.is_some()
    }

    /// Failure placeholder that reached the retry limit
    pub fn is_exhausted(&self, max_failed_attempts: u32) -> bool {
        self.is_failure() && self.attempt_count >= max_failed_attempts
    }

    /// Upsert key
    pub fn key(&self) -> (&str, &str, Month) {
        (&self.provider_id, &self.report_type, self.month)
    }

    /// Combine an incoming record with the stored one for the same key
    ///
    /// Returns `None` when the stored record must be kept as is. A failure
    /// never replaces a satisfied record, and a repeated failure bumps the
    /// attempt counter.
    pub fn merge_onto(mut self, existing: Option<&ReportRecord>) -> Option<ReportRecord> {
        let Some(existing) = existing else {
            return Some(self);
        };

        if self.is_failure() {
            if existing.is_satisfied() {
                return None;
            }
            if existing.is_failure() {
                self.attempt_count = existing.attempt_count.saturating_add(1);
            }
        } else {
            self.attempt_count = 0;
        }

        Some(self)
    }
}

/// Whether harvesting is enabled for a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HarvestStatus {
    #[default]
    Active,
    Inactive,
}

/// Per-run snapshot of a provider's harvesting configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderHarvestConfig {
    pub provider_id: String,

    pub tenant_id: String,

    /// Selects the [`ReportFetcher`](crate::harvest::ReportFetcher) implementation
    #[serde(default = "default_service_type")]
    pub service_type: String,

    /// Base URL of the remote report source
    #[serde(default)]
    pub base_url: String,

    pub requested_report_types: BTreeSet<String>,

    pub range_start: Month,

    /// Absent means "up to the last completed month"
    #[serde(default)]
    pub range_end: Option<Month>,

    #[serde(default)]
    pub status: HarvestStatus,

    #[serde(default = "default_max_failed_attempts")]
    pub max_failed_attempts: u32,

    /// Extra query parameters (credentials, customer ids, ...)
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

fn default_service_type() -> String {
    "http_json".to_string()
}

fn default_max_failed_attempts() -> u32 {
    5
}

impl ProviderHarvestConfig {
    /// Minimal active config, mostly for tests and CLI use
    pub fn new(
        tenant_id: impl Into<String>,
        provider_id: impl Into<String>,
        report_types: impl IntoIterator<Item = impl Into<String>>,
        range_start: Month,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            tenant_id: tenant_id.into(),
            service_type: default_service_type(),
            base_url: String::new(),
            requested_report_types: report_types.into_iter().map(Into::into).collect(),
            range_start,
            range_end: None,
            status: HarvestStatus::Active,
            max_failed_attempts: default_max_failed_attempts(),
            params: BTreeMap::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == HarvestStatus::Active
    }
}
