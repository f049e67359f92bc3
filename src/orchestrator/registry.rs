//! Job uniqueness registry
//!
//! The only state shared across every job in the process. Admission is a
//! single check-and-insert under one lock; the returned [`JobGuard`] removes
//! the key when dropped, whether the job succeeded, failed or panicked.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use super::error::OrchestratorError;
use crate::metrics;

// ============================================================================
// Job Keys
// ============================================================================

/// What a job harvests
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "scope", content = "provider_id", rename_all = "lowercase")]
pub enum JobScope {
    /// Every active provider of the tenant
    Tenant,
    /// One provider
    Provider(String),
}

impl JobScope {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Tenant => "tenant",
            Self::Provider(_) => "provider",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct JobKey {
    pub tenant_id: String,
    pub scope: JobScope,
}

impl JobKey {
    pub fn tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            scope: JobScope::Tenant,
        }
    }

    pub fn provider(tenant_id: impl Into<String>, provider_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            scope: JobScope::Provider(provider_id.into()),
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            JobScope::Tenant => write!(f, "{}/*", self.tenant_id),
            JobScope::Provider(provider_id) => write!(f, "{}/{}", self.tenant_id, provider_id),
        }
    }
}

/// A job currently holding its key
#[derive(Debug, Clone)]
pub struct RunningJob {
    pub job_id: Uuid,
    pub key: JobKey,
    pub started_at: DateTime<Utc>,
}

// ============================================================================
// Registry
// ============================================================================

/// Process-wide set of running job keys
#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<Mutex<HashMap<JobKey, RunningJob>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobKey, RunningJob>> {
        // The map stays consistent even if a holder panicked
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Admit a job for `key` or report the conflicting one
    ///
    /// - A tenant job conflicts with any running job of that tenant
    ///   ([`OrchestratorError::AlreadyInProgress`]).
    /// - A provider job conflicts with the same provider
    ///   ([`OrchestratorError::AlreadyScheduled`]) and with a running tenant
    ///   job of that tenant ([`OrchestratorError::AlreadyInProgress`]).
    pub fn try_acquire(&self, key: JobKey) -> Result<JobGuard, OrchestratorError> {
        let mut jobs = self.lock();

        let conflict = match &key.scope {
            JobScope::Tenant => jobs
                .keys()
                .any(|k| k.tenant_id == key.tenant_id)
                .then(|| OrchestratorError::AlreadyInProgress {
                    tenant_id: key.tenant_id.clone(),
                }),
            JobScope::Provider(provider_id) => {
                if jobs.contains_key(&key) {
                    Some(OrchestratorError::AlreadyScheduled {
                        tenant_id: key.tenant_id.clone(),
                        provider_id: provider_id.clone(),
                    })
                } else if jobs.contains_key(&JobKey::tenant(key.tenant_id.clone())) {
                    Some(OrchestratorError::AlreadyInProgress {
                        tenant_id: key.tenant_id.clone(),
                    })
                } else {
                    None
                }
            }
        };

        if let Some(err) = conflict {
            let result = match err {
                OrchestratorError::AlreadyScheduled { .. } => "scheduled",
                _ => "in_progress",
            };
            metrics::record_job_admission(key.scope.label(), result);
            return Err(err);
        }

        let job = RunningJob {
            job_id: Uuid::new_v4(),
            key: key.clone(),
            started_at: Utc::now(),
        };
        jobs.insert(key, job.clone());
        metrics::record_job_admission(job.key.scope.label(), "accepted");
        metrics::set_running_jobs(jobs.len());

        Ok(JobGuard {
            registry: self.clone(),
            job,
        })
    }

    /// Snapshot of running jobs
    pub fn running(&self) -> Vec<RunningJob> {
        let mut jobs: Vec<RunningJob> = self.lock().values().cloned().collect();
        jobs.sort_by_key(|j| j.started_at);
        jobs
    }

    pub fn is_running(&self, key: &JobKey) -> bool {
        self.lock().contains_key(key)
    }

    fn release(&self, job: &RunningJob) {
        let mut jobs = self.lock();
        if jobs.get(&job.key).is_some_and(|j| j.job_id == job.job_id) {
            jobs.remove(&job.key);
        }
        metrics::set_running_jobs(jobs.len());
    }
}

/// Holds a job key until dropped
#[derive(Debug)]
pub struct JobGuard {
    registry: JobRegistry,
    job: RunningJob,
}

impl JobGuard {
    pub fn job(&self) -> &RunningJob {
        &self.job
    }

    pub fn job_id(&self) -> Uuid {
        self.job.job_id
    }

    pub fn key(&self) -> &JobKey {
        &self.job.key
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.registry.release(&self.job);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_job_conflicts_with_itself() {
        let registry = JobRegistry::new();
        let _first = registry.try_acquire(JobKey::provider("acme", "p1")).unwrap();
        let err = registry.try_acquire(JobKey::provider("acme", "p1")).unwrap_err();
        assert!(matches!(err, OrchestratorError::AlreadyScheduled { .. }));
    }

    #[test]
    fn test_distinct_providers_coexist() {
        let registry = JobRegistry::new();
        let _p1 = registry.try_acquire(JobKey::provider("acme", "p1")).unwrap();
        let _p2 = registry.try_acquire(JobKey::provider("acme", "p2")).unwrap();
        let _other = registry.try_acquire(JobKey::provider("globex", "p1")).unwrap();
        assert_eq!(registry.running().len(), 3);
    }

    #[test]
    fn test_tenant_job_conflicts_with_provider_job() {
        let registry = JobRegistry::new();
        let _p1 = registry.try_acquire(JobKey::provider("acme", "p1")).unwrap();
        let err = registry.try_acquire(JobKey::tenant("acme")).unwrap_err();
        assert!(matches!(err, OrchestratorError::AlreadyInProgress { .. }));
        assert!(registry.try_acquire(JobKey::tenant("globex")).is_ok());
    }

    #[test]
    fn test_provider_job_blocked_by_tenant_job() {
        let registry = JobRegistry::new();
        let _tenant = registry.try_acquire(JobKey::tenant("acme")).unwrap();
        let err = registry.try_acquire(JobKey::provider("acme", "p1")).unwrap_err();
        assert!(matches!(err, OrchestratorError::AlreadyInProgress { .. }));
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let registry = JobRegistry::new();
        let key = JobKey::tenant("acme");
        {
            let guard = registry.try_acquire(key.clone()).unwrap();
            assert!(registry.is_running(guard.key()));
        }
        assert!(!registry.is_running(&key));
        assert!(registry.try_acquire(key).is_ok());
    }

    #[test]
    fn test_concurrent_acquire_admits_exactly_one() {
        let registry = JobRegistry::new();
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    registry
                        .try_acquire(JobKey::provider("acme", "p1"))
                        .map(std::mem::forget)
                        .is_ok()
                })
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 1);
    }
}
