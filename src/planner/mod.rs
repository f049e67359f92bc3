//! Fetch window planning
//!
//! Decides which `(report type, month)` combinations still need harvesting for
//! a provider, then groups those gap months into multi-month [`FetchRange`]s.
//!
//! # Algorithm
//!
//! 1. Inactive providers are rejected with [`PlanError::HarvestingNotActive`].
//! 2. For each requested report type the full month sequence from
//!    `range_start` to the clamped end is computed. Months with a satisfied
//!    record, or with a failure placeholder that reached
//!    `max_failed_attempts`, are removed.
//! 3. The remaining gap months are [`collapse`]d into contiguous runs of at
//!    most `max_range_months`. Report types that only accept single-month
//!    queries (`TR`) are never grouped.
//!
//! [`expand`] is the inverse of step 3 and is used by the harvest pipeline to
//! narrow a failed range.

use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;

use crate::calendar::{clamp_end, months_between, Month};
use crate::models::{FetchRange, ProviderHarvestConfig, ReportRecord};

/// Longest span a single fetch may cover
pub const MAX_RANGE_MONTHS: u32 = 12;

/// Report types whose remote sources only accept one month per request
pub const SINGLE_MONTH_REPORT_TYPES: &[&str] = &["TR"];

/// Planning errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// The provider is switched off; callers skip it
    #[error("Harvesting is not active for provider '{provider_id}'")]
    HarvestingNotActive { provider_id: String },
}

/// Tunables for range compression
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    pub max_range_months: u32,
    pub single_month_report_types: BTreeSet<String>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_range_months: MAX_RANGE_MONTHS,
            single_month_report_types: SINGLE_MONTH_REPORT_TYPES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl PlannerConfig {
    /// Whether a report type may be requested over several months at once
    pub fn is_compressible(&self, report_type: &str) -> bool {
        !self.single_month_report_types.contains(report_type)
    }
}

/// Plans fetch ranges for providers
#[derive(Debug, Clone, Default)]
pub struct Planner {
    config: PlannerConfig,
}

impl Planner {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Plan against the last month completed as of today (UTC)
    pub fn plan(
        &self,
        config: &ProviderHarvestConfig,
        existing: &[ReportRecord],
    ) -> Result<Vec<FetchRange>, PlanError> {
        let last_completed = Month::last_completed(Utc::now().date_naive());
        self.plan_at(config, existing, last_completed)
    }

    /// Plan against an explicit "last completed month"
    pub fn plan_at(
        &self,
        config: &ProviderHarvestConfig,
        existing: &[ReportRecord],
        last_completed: Month,
    ) -> Result<Vec<FetchRange>, PlanError> {
        if !config.is_active() {
            return Err(PlanError::HarvestingNotActive {
                provider_id: config.provider_id.clone(),
            });
        }

        let gaps = gap_months(config, existing, last_completed);
        let singles: Vec<FetchRange> = gaps
            .into_iter()
            .flat_map(|(report_type, months)| {
                months
                    .into_iter()
                    .map(move |month| FetchRange::single(report_type.clone(), month))
            })
            .collect();

        let ranges = self.collapse(&singles);
        tracing::debug!(
            provider = %config.provider_id,
            gap_months = singles.len(),
            ranges = ranges.len(),
            "Planned fetch ranges"
        );
        Ok(ranges)
    }

    /// Group ranges into maximal contiguous runs per report type
    ///
    /// Input ranges may overlap or arrive in any order; they are expanded to
    /// months first. Output is sorted by report type, then begin month.
    pub fn collapse(&self, ranges: &[FetchRange]) -> Vec<FetchRange> {
        let mut by_type: BTreeMap<&str, BTreeSet<Month>> = BTreeMap::new();
        for range in ranges {
            by_type
                .entry(range.report_type.as_str())
                .or_default()
                .extend(range.months());
        }

        let mut out = Vec::new();
        for (report_type, months) in by_type {
            if !self.config.is_compressible(report_type) {
                out.extend(months.into_iter().map(|m| FetchRange::single(report_type, m)));
                continue;
            }

            let mut run: Option<FetchRange> = None;
            for month in months {
                run = match run.take() {
                    Some(mut current)
                        if current.end.succ() == month
                            && current.len_months() < self.config.max_range_months =>
                    {
                        current.end = month;
                        Some(current)
                    }
                    Some(closed) => {
                        out.push(closed);
                        Some(FetchRange::single(report_type, month))
                    }
                    None => Some(FetchRange::single(report_type, month)),
                };
            }
            out.extend(run);
        }
        out
    }
}

/// Gap months per requested report type, ascending
pub fn gap_months(
    config: &ProviderHarvestConfig,
    existing: &[ReportRecord],
    last_completed: Month,
) -> BTreeMap<String, Vec<Month>> {
    let end = clamp_end(config.range_end, last_completed);
    let all_months = months_between(config.range_start, end);

    let mut done: HashMap<&str, BTreeSet<Month>> = HashMap::new();
    for record in existing {
        if record.provider_id != config.provider_id {
            continue;
        }
        if record.is_satisfied() || record.is_exhausted(config.max_failed_attempts) {
            done.entry(record.report_type.as_str())
                .or_default()
                .insert(record.month);
        }
    }

    config
        .requested_report_types
        .iter()
        .map(|report_type| {
            let skip = done.get(report_type.as_str());
            let months = all_months
                .iter()
                .copied()
                .filter(|m| skip.map_or(true, |s| !s.contains(m)))
                .collect();
            (report_type.clone(), months)
        })
        .collect()
}

/// Collapse with the default planner settings
pub fn collapse(ranges: &[FetchRange]) -> Vec<FetchRange> {
    Planner::default().collapse(ranges)
}

/// Split a range into one single-month range per month it spans
pub fn expand(range: &FetchRange) -> Vec<FetchRange> {
    range
        .months()
        .into_iter()
        .map(|month| FetchRange::single(range.report_type.clone(), month))
        .collect()
}
