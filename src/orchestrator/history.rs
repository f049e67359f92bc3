//! Job audit trail
//!
//! Recording is fire-and-forget: a sink must not fail or block the job it
//! describes.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Mutex;
use uuid::Uuid;

use super::jobs::JobSummary;
use super::registry::JobKey;

/// Who asked for a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobOrigin {
    Manual,
    Periodic,
}

impl fmt::Display for JobOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Periodic => write!(f, "periodic"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobDescriptor {
    pub job_id: Uuid,
    pub key: JobKey,
    pub origin: JobOrigin,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum JobOutcome {
    Started,
    Finished(JobSummary),
    Failed { reason: String },
}

impl JobOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Finished(summary) if summary.cancelled => "cancelled",
            Self::Finished(_) => "finished",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Receives job start/finish events
pub trait JobHistorySink: Send + Sync {
    fn record(&self, job: &JobDescriptor, outcome: &JobOutcome);
}

/// Writes job events to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingJobHistory;

impl JobHistorySink for TracingJobHistory {
    fn record(&self, job: &JobDescriptor, outcome: &JobOutcome) {
        match outcome {
            JobOutcome::Started => tracing::info!(
                job_id = %job.job_id,
                job = %job.key,
                origin = %job.origin,
                "Job started"
            ),
            JobOutcome::Finished(summary) => tracing::info!(
                job_id = %job.job_id,
                job = %job.key,
                origin = %job.origin,
                status = outcome.label(),
                providers = summary.providers.len(),
                failed_providers = summary.failed_providers.len(),
                records = summary.records_written(),
                elapsed_ms = (summary.finished_at - job.started_at).num_milliseconds(),
                "Job finished"
            ),
            JobOutcome::Failed { reason } => tracing::error!(
                job_id = %job.job_id,
                job = %job.key,
                origin = %job.origin,
                reason = %reason,
                "Job failed"
            ),
        }
    }
}

/// Keeps job events in memory
#[derive(Debug, Default)]
pub struct MemoryJobHistory {
    entries: Mutex<Vec<(JobDescriptor, JobOutcome)>>,
}

impl MemoryJobHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(JobDescriptor, JobOutcome)> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Outcome labels recorded for one job, in order
    pub fn labels_for(&self, job_id: Uuid) -> Vec<&'static str> {
        self.entries()
            .iter()
            .filter(|(job, _)| job.job_id == job_id)
            .map(|(_, outcome)| outcome.label())
            .collect()
    }
}

impl JobHistorySink for MemoryJobHistory {
    fn record(&self, job: &JobDescriptor, outcome: &JobOutcome) {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((job.clone(), outcome.clone()));
    }
}
