//! Orchestration errors
//!
//! Admission conflicts are run-admission failures: they never touch report
//! records and are surfaced to the caller as-is.

use thiserror::Error;
use uuid::Uuid;

use crate::error::ErrorCategory;
use crate::harvest::HarvestError;
use crate::scheduler::SchedulerError;
use crate::storage::StoreError;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Some job already runs for the tenant
    #[error("A harvest is already in progress for tenant '{tenant_id}'")]
    AlreadyInProgress { tenant_id: String },

    /// The exact provider already has a running job
    #[error("A harvest is already scheduled for provider '{provider_id}' of tenant '{tenant_id}'")]
    AlreadyScheduled {
        tenant_id: String,
        provider_id: String,
    },

    #[error("Provider '{provider_id}' not found for tenant '{tenant_id}'")]
    ProviderNotFound {
        tenant_id: String,
        provider_id: String,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Harvest(#[from] HarvestError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// The job task ended without a result
    #[error("Job {job_id} aborted: {reason}")]
    JobAborted { job_id: Uuid, reason: String },
}

impl OrchestratorError {
    pub fn provider_not_found(tenant_id: impl Into<String>, provider_id: impl Into<String>) -> Self {
        Self::ProviderNotFound {
            tenant_id: tenant_id.into(),
            provider_id: provider_id.into(),
        }
    }

    /// Admission conflict (the caller may try again later)
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::AlreadyInProgress { .. } | Self::AlreadyScheduled { .. }
        )
    }

    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::AlreadyInProgress { .. } | Self::AlreadyScheduled { .. } => true,
            Self::Store(e) => e.is_transient(),
            Self::Scheduler(e) => e.is_recoverable(),
            Self::ProviderNotFound { .. } | Self::Harvest(_) | Self::JobAborted { .. } => false,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::AlreadyInProgress { .. } | Self::AlreadyScheduled { .. } => {
                ErrorCategory::Admission
            }
            Self::ProviderNotFound { .. } | Self::Harvest(_) => ErrorCategory::Config,
            Self::Store(_) => ErrorCategory::Storage,
            Self::Scheduler(_) => ErrorCategory::Scheduler,
            Self::JobAborted { .. } => ErrorCategory::Other,
        }
    }
}
