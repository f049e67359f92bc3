//! Harvest service facade
//!
//! Entry points an outer API layer calls, plus the loop that turns periodic
//! trigger fires into tenant-wide job requests.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::history::JobOrigin;
use super::jobs::{JobTicket, Orchestrator};
use crate::error::Result;
use crate::scheduler::{Interval, TriggerFired, TriggerScheduler};

#[derive(Clone)]
pub struct HarvestService {
    orchestrator: Orchestrator,
    scheduler: TriggerScheduler,
}

impl HarvestService {
    pub fn new(orchestrator: Orchestrator, scheduler: TriggerScheduler) -> Self {
        Self {
            orchestrator,
            scheduler,
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn scheduler(&self) -> &TriggerScheduler {
        &self.scheduler
    }

    /// Accept a harvest of every active provider of a tenant
    pub fn request_tenant_harvest(&self, tenant_id: &str) -> Result<JobTicket> {
        Ok(self
            .orchestrator
            .start_tenant_job(tenant_id, JobOrigin::Manual)?)
    }

    /// Accept a harvest of one provider
    pub async fn request_provider_harvest(
        &self,
        tenant_id: &str,
        provider_id: &str,
    ) -> Result<JobTicket> {
        Ok(self
            .orchestrator
            .start_provider_job(tenant_id, provider_id)
            .await?)
    }

    /// Create or replace a tenant's periodic trigger
    ///
    /// The previous `last_triggered_at` survives reconfiguration so a reload
    /// does not re-fire an occurrence that already ran. Returns the next fire
    /// time when the scheduler is running.
    pub async fn upsert_periodic_config(
        &self,
        tenant_id: &str,
        interval: Interval,
        start_at: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .scheduler
            .reconfigure(tenant_id, interval, start_at)
            .await?)
    }

    /// Remove a tenant's periodic trigger and cancel its running periodic job
    pub async fn delete_periodic_config(&self, tenant_id: &str) -> Result<()> {
        self.scheduler.delete(tenant_id).await?;
        self.orchestrator.cancel_periodic_job(tenant_id);
        Ok(())
    }

    /// Start a tenant job for every trigger fire until shutdown
    pub async fn run_trigger_loop(
        &self,
        mut fired: mpsc::Receiver<TriggerFired>,
        shutdown: CancellationToken,
    ) {
        tracing::info!("Trigger loop started");
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = fired.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            match self
                .orchestrator
                .start_tenant_job(&event.tenant_id, JobOrigin::Periodic)
            {
                Ok(ticket) => tracing::info!(
                    tenant = %event.tenant_id,
                    job_id = %ticket.job_id,
                    fire_time = %event.fire_time,
                    "Periodic harvest started"
                ),
                Err(e) => tracing::warn!(
                    tenant = %event.tenant_id,
                    fire_time = %event.fire_time,
                    error = %e,
                    "Periodic harvest not started"
                ),
            }
        }
        tracing::info!("Trigger loop stopped");
    }
}
