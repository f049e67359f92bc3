//! Tenant and provider harvest jobs
//!
//! A job owns its [`JobGuard`] for its whole lifetime, so its key is released
//! whether the job completes, fails or panics. A tenant job runs one
//! provider sub-run per active provider as internal concurrent tasks, not as
//! separate registry entries.
//!
//! Records coming out of a provider's pipeline are written one at a time in
//! arrival order, which keeps per-month writes sequenced for the store.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::error::OrchestratorError;
use super::history::{JobDescriptor, JobHistorySink, JobOrigin, JobOutcome, TracingJobHistory};
use super::registry::{JobGuard, JobKey, JobRegistry, RunningJob};
use crate::config::HarvestConfig;
use crate::harvest::{FetcherRegistry, HarvestPipeline, StatsSnapshot};
use crate::models::{ProviderHarvestConfig, ReportRecord};
use crate::planner::{PlanError, Planner};
use crate::storage::{ProviderRegistry, ReportStore, StoreError};
use crate::utils::retry::{with_retry_if, RetryConfig};

// ============================================================================
// Summaries
// ============================================================================

/// Result of one provider sub-run
#[derive(Debug, Clone, Default)]
pub struct ProviderRunSummary {
    pub provider_id: String,
    pub ranges_planned: usize,
    pub stats: StatsSnapshot,
    pub records_written: u64,
    pub write_failures: u64,
    /// Harvesting was not active for the provider
    pub skipped: bool,
}

impl ProviderRunSummary {
    fn empty(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            ..Default::default()
        }
    }

    fn skipped(provider_id: impl Into<String>) -> Self {
        Self {
            skipped: true,
            ..Self::empty(provider_id)
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobSummary {
    pub job_id: Uuid,
    pub key: JobKey,
    pub providers: Vec<ProviderRunSummary>,
    /// Providers whose sub-run failed, with the reason
    pub failed_providers: Vec<(String, String)>,
    /// Providers not started because the job was cancelled
    pub not_started: Vec<String>,
    pub cancelled: bool,
    pub finished_at: DateTime<Utc>,
}

impl JobSummary {
    fn new(job: &JobDescriptor) -> Self {
        Self {
            job_id: job.job_id,
            key: job.key.clone(),
            providers: Vec::new(),
            failed_providers: Vec::new(),
            not_started: Vec::new(),
            cancelled: false,
            finished_at: Utc::now(),
        }
    }

    pub fn records_written(&self) -> u64 {
        self.providers.iter().map(|p| p.records_written).sum()
    }

    pub fn placeholders(&self) -> u64 {
        self.providers.iter().map(|p| p.stats.placeholder_records).sum()
    }

    /// Format as display string
    pub fn display(&self) -> String {
        let mut output = format!("Job {} ({})\n", self.job_id, self.key);
        output.push_str(&format!("{:-<40}\n", ""));
        for run in &self.providers {
            if run.skipped {
                output.push_str(&format!("{}: skipped (not active)\n", run.provider_id));
                continue;
            }
            output.push_str(&format!(
                "{}: {} ranges, {} ok, {} placeholders, {} written, concurrency {}\n",
                run.provider_id,
                run.ranges_planned,
                run.stats.success_records,
                run.stats.placeholder_records,
                run.records_written,
                run.stats.final_concurrency,
            ));
        }
        for (provider_id, reason) in &self.failed_providers {
            output.push_str(&format!("{provider_id}: failed: {reason}\n"));
        }
        for provider_id in &self.not_started {
            output.push_str(&format!("{provider_id}: not started (cancelled)\n"));
        }
        output
    }
}

// ============================================================================
// Job Ticket
// ============================================================================

/// Handle to an accepted job
///
/// Dropping the ticket detaches the job; it keeps running.
#[derive(Debug)]
pub struct JobTicket {
    pub job_id: Uuid,
    pub key: JobKey,
    pub origin: JobOrigin,
    cancel: CancellationToken,
    handle: JoinHandle<Result<JobSummary, OrchestratorError>>,
}

impl JobTicket {
    /// Stop starting new provider sub-runs; running ones finish
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the job to end
    pub async fn wait(self) -> Result<JobSummary, OrchestratorError> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(OrchestratorError::JobAborted {
                job_id: self.job_id,
                reason: e.to_string(),
            }),
        }
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

struct PeriodicJob {
    job_id: Uuid,
    token: CancellationToken,
}

/// Admits and runs harvest jobs
#[derive(Clone)]
pub struct Orchestrator {
    registry: JobRegistry,
    providers: Arc<dyn ProviderRegistry>,
    reports: Arc<dyn ReportStore>,
    fetchers: Arc<FetcherRegistry>,
    planner: Planner,
    pipeline: HarvestPipeline,
    history: Arc<dyn JobHistorySink>,
    max_concurrent_providers: usize,
    store_retry: RetryConfig,
    periodic: Arc<Mutex<HashMap<String, PeriodicJob>>>,
}

impl Orchestrator {
    pub fn new(
        providers: Arc<dyn ProviderRegistry>,
        reports: Arc<dyn ReportStore>,
        fetchers: FetcherRegistry,
    ) -> Self {
        Self {
            registry: JobRegistry::new(),
            providers,
            reports,
            fetchers: Arc::new(fetchers),
            planner: Planner::default(),
            pipeline: HarvestPipeline::default(),
            history: Arc::new(TracingJobHistory),
            max_concurrent_providers: 2,
            store_retry: RetryConfig::with_delays(3, 100, 2_000),
            periodic: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Apply planner, pipeline and provider-concurrency settings
    pub fn with_config(mut self, config: &HarvestConfig) -> Self {
        self.planner = Planner::new(config.planner());
        self.pipeline = HarvestPipeline::new(config.pipeline());
        self.max_concurrent_providers = config.max_concurrent_providers.max(1);
        self
    }

    pub fn with_history(mut self, history: Arc<dyn JobHistorySink>) -> Self {
        self.history = history;
        self
    }

    pub fn with_store_retry(mut self, retry: RetryConfig) -> Self {
        self.store_retry = retry;
        self
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn planner(&self) -> &Planner {
        &self.planner
    }

    pub fn running_jobs(&self) -> Vec<RunningJob> {
        self.registry.running()
    }

    /// Start a job harvesting every active provider of a tenant
    pub fn start_tenant_job(
        &self,
        tenant_id: &str,
        origin: JobOrigin,
    ) -> Result<JobTicket, OrchestratorError> {
        let guard = self.registry.try_acquire(JobKey::tenant(tenant_id))?;
        let token = CancellationToken::new();
        let descriptor = describe(&guard, origin);

        if origin == JobOrigin::Periodic {
            self.periodic_jobs().insert(
                tenant_id.to_string(),
                PeriodicJob {
                    job_id: descriptor.job_id,
                    token: token.clone(),
                },
            );
        }
        self.history.record(&descriptor, &JobOutcome::Started);

        let this = self.clone();
        let job_token = token.clone();
        let job = descriptor.clone();
        let handle = tokio::spawn(async move {
            let result = this.run_tenant(&job, &job_token).await;
            if job.origin == JobOrigin::Periodic {
                this.forget_periodic(&job);
            }
            this.record_finish(&job, &result);
            drop(guard);
            result
        });

        Ok(JobTicket {
            job_id: descriptor.job_id,
            key: descriptor.key,
            origin,
            cancel: token,
            handle,
        })
    }

    /// Start a job harvesting one provider
    pub async fn start_provider_job(
        &self,
        tenant_id: &str,
        provider_id: &str,
    ) -> Result<JobTicket, OrchestratorError> {
        let provider = self
            .providers
            .by_id(tenant_id, provider_id)
            .await?
            .ok_or_else(|| OrchestratorError::provider_not_found(tenant_id, provider_id))?;

        let guard = self
            .registry
            .try_acquire(JobKey::provider(tenant_id, provider_id))?;
        let token = CancellationToken::new();
        let descriptor = describe(&guard, JobOrigin::Manual);
        self.history.record(&descriptor, &JobOutcome::Started);

        let this = self.clone();
        let job = descriptor.clone();
        let handle = tokio::spawn(async move {
            let result = this.run_provider(provider).await.map(|run| {
                let mut summary = JobSummary::new(&job);
                summary.providers.push(run);
                summary.finished_at = Utc::now();
                summary
            });
            this.record_finish(&job, &result);
            drop(guard);
            result
        });

        Ok(JobTicket {
            job_id: descriptor.job_id,
            key: descriptor.key,
            origin: JobOrigin::Manual,
            cancel: token,
            handle,
        })
    }

    /// Cancel the running periodic-origin tenant job, if any
    ///
    /// Provider sub-runs already in flight finish; no new ones start.
    pub fn cancel_periodic_job(&self, tenant_id: &str) -> bool {
        match self.periodic_jobs().remove(tenant_id) {
            Some(job) => {
                job.token.cancel();
                tracing::info!(
                    tenant = %tenant_id,
                    job_id = %job.job_id,
                    "Cancelled periodic harvest job"
                );
                true
            }
            None => false,
        }
    }

    async fn run_tenant(
        &self,
        job: &JobDescriptor,
        token: &CancellationToken,
    ) -> Result<JobSummary, OrchestratorError> {
        let tenant_id = &job.key.tenant_id;
        let providers = self.providers.active_providers(tenant_id).await?;
        if providers.is_empty() {
            tracing::info!(tenant = %tenant_id, job_id = %job.job_id, "No active providers");
        }

        let outcomes: Vec<(String, Option<Result<ProviderRunSummary, OrchestratorError>>)> =
            stream::iter(providers)
                .map(|provider| async move {
                    let provider_id = provider.provider_id.clone();
                    if token.is_cancelled() {
                        return (provider_id, None);
                    }
                    (provider_id, Some(self.run_provider(provider).await))
                })
                .buffer_unordered(self.max_concurrent_providers)
                .collect()
                .await;

        let mut summary = JobSummary::new(job);
        for (provider_id, outcome) in outcomes {
            match outcome {
                None => summary.not_started.push(provider_id),
                Some(Ok(run)) => summary.providers.push(run),
                Some(Err(e)) => {
                    tracing::warn!(
                        tenant = %tenant_id,
                        provider = %provider_id,
                        error = %e,
                        "Provider harvest failed"
                    );
                    summary.failed_providers.push((provider_id, e.to_string()));
                }
            }
        }
        summary.providers.sort_by(|a, b| a.provider_id.cmp(&b.provider_id));
        summary.not_started.sort();
        summary.cancelled = token.is_cancelled();
        summary.finished_at = Utc::now();
        Ok(summary)
    }

    /// Plan, fetch and persist one provider
    pub async fn run_provider(
        &self,
        provider: ProviderHarvestConfig,
    ) -> Result<ProviderRunSummary, OrchestratorError> {
        let provider_id = provider.provider_id.clone();

        let mut existing = Vec::new();
        for report_type in &provider.requested_report_types {
            existing.extend(self.reports.existing(&provider_id, report_type).await?);
        }

        let ranges = match self.planner.plan(&provider, &existing) {
            Ok(ranges) => ranges,
            Err(PlanError::HarvestingNotActive { .. }) => {
                tracing::info!(
                    tenant = %provider.tenant_id,
                    provider = %provider_id,
                    "Harvesting not active, skipping provider"
                );
                return Ok(ProviderRunSummary::skipped(provider_id));
            }
        };
        if ranges.is_empty() {
            tracing::debug!(provider = %provider_id, "Nothing to harvest");
            return Ok(ProviderRunSummary::empty(provider_id));
        }

        let fetcher = self.fetchers.create(&provider)?;
        let ranges_planned = ranges.len();
        tracing::info!(
            tenant = %provider.tenant_id,
            provider = %provider_id,
            ranges = ranges_planned,
            "Harvesting provider"
        );

        let mut run = self.pipeline.run(provider_id.clone(), fetcher, ranges);
        let mut records_written = 0;
        let mut write_failures = 0;
        while let Some(record) = run.next().await {
            match self.persist(&record).await {
                Ok(()) => records_written += 1,
                Err(e) => {
                    write_failures += 1;
                    tracing::error!(
                        provider = %provider_id,
                        report_type = %record.report_type,
                        month = %record.month,
                        error = %e,
                        "Failed to persist report record"
                    );
                }
            }
        }
        let stats = run.finish().await;

        tracing::info!(
            provider = %provider_id,
            success = stats.success_records,
            placeholders = stats.placeholder_records,
            rate_limited = stats.rate_limited,
            written = records_written,
            "Provider harvest finished"
        );

        Ok(ProviderRunSummary {
            provider_id,
            ranges_planned,
            stats,
            records_written,
            write_failures,
            skipped: false,
        })
    }

    async fn persist(&self, record: &ReportRecord) -> Result<(), StoreError> {
        let reports = &self.reports;
        with_retry_if(
            &self.store_retry,
            move || reports.upsert(record.clone()),
            StoreError::is_transient,
        )
        .await
    }

    fn record_finish(&self, job: &JobDescriptor, result: &Result<JobSummary, OrchestratorError>) {
        let outcome = match result {
            Ok(summary) => JobOutcome::Finished(summary.clone()),
            Err(e) => JobOutcome::Failed {
                reason: e.to_string(),
            },
        };
        self.history.record(job, &outcome);
    }

    fn periodic_jobs(&self) -> MutexGuard<'_, HashMap<String, PeriodicJob>> {
        self.periodic
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn forget_periodic(&self, job: &JobDescriptor) {
        let mut periodic = self.periodic_jobs();
        if periodic
            .get(&job.key.tenant_id)
            .is_some_and(|p| p.job_id == job.job_id)
        {
            periodic.remove(&job.key.tenant_id);
        }
    }
}

fn describe(guard: &JobGuard, origin: JobOrigin) -> JobDescriptor {
    let job = guard.job();
    JobDescriptor {
        job_id: job.job_id,
        key: job.key.clone(),
        origin,
        started_at: job.started_at,
    }
}
