//! Trigger scheduler service
//!
//! Owns one timer task per tenant. When a trigger fires, the task records the
//! fire time as `last_triggered_at`, persists it, and emits a
//! [`TriggerFired`] event. It does not run the harvest itself.
//!
//! Replacing or deleting a trigger happens under the same lock the timer
//! tasks take before firing, and each task carries a generation number, so an
//! old and a new trigger for one tenant are never both able to fire.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use super::error::{SchedulerError, SchedulerResult};
use super::trigger::{next_fire_time, Interval, PeriodicTrigger};
use crate::metrics;
use crate::storage::TriggerStore;

/// Buffered fire events before timer tasks wait on the consumer
const FIRED_CHANNEL_SIZE: usize = 64;

/// Emitted when a periodic trigger fires
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerFired {
    pub tenant_id: String,
    pub interval: Interval,
    pub fire_time: DateTime<Utc>,
}

/// One scheduled tenant as reported by [`TriggerScheduler::status`]
#[derive(Debug, Clone)]
pub struct ScheduledTrigger {
    pub tenant_id: String,
    pub interval: Interval,
    pub next_fire_at: Option<DateTime<Utc>>,
    pub last_triggered_at: Option<DateTime<Utc>>,
}

/// Scheduler status information
#[derive(Debug, Clone)]
pub struct SchedulerStatus {
    pub is_running: bool,
    pub triggers: Vec<ScheduledTrigger>,
}

impl SchedulerStatus {
    /// Format as display string
    pub fn display(&self) -> String {
        let mut output = String::from("Scheduler Status\n");
        output.push_str(&format!("{:-<40}\n", ""));
        output.push_str(&format!("Running: {}\n", self.is_running));
        for trigger in &self.triggers {
            let next = trigger
                .next_fire_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "-".to_string());
            output.push_str(&format!(
                "{} ({}): next {}\n",
                trigger.tenant_id, trigger.interval, next
            ));
        }
        output
    }
}

struct TenantTask {
    generation: u64,
    trigger: PeriodicTrigger,
    next_fire_at: Option<DateTime<Utc>>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct SchedulerState {
    running: bool,
    next_generation: u64,
    tasks: HashMap<String, TenantTask>,
}

struct Inner {
    store: Arc<dyn TriggerStore>,
    state: Mutex<SchedulerState>,
    fired_tx: mpsc::Sender<TriggerFired>,
    shutdown_tx: watch::Sender<bool>,
}

/// Per-tenant periodic trigger scheduler with explicit start/stop lifecycle
#[derive(Clone)]
pub struct TriggerScheduler {
    inner: Arc<Inner>,
}

impl TriggerScheduler {
    /// Create a stopped scheduler and the receiver of its fire events
    pub fn new(store: Arc<dyn TriggerStore>) -> (Self, mpsc::Receiver<TriggerFired>) {
        let (fired_tx, fired_rx) = mpsc::channel(FIRED_CHANNEL_SIZE);
        let (shutdown_tx, _) = watch::channel(false);
        let scheduler = Self {
            inner: Arc::new(Inner {
                store,
                state: Mutex::new(SchedulerState::default()),
                fired_tx,
                shutdown_tx,
            }),
        };
        (scheduler, fired_rx)
    }

    /// Load every stored trigger and start its timer
    pub async fn start(&self) -> SchedulerResult<()> {
        let mut state = self.inner.state.lock().await;
        if state.running {
            return Ok(());
        }

        let triggers = self
            .inner
            .store
            .list()
            .await
            .map_err(|e| SchedulerError::store("list", e))?;

        self.inner.shutdown_tx.send_replace(false);
        state.running = true;
        for trigger in triggers {
            self.schedule_locked(&mut state, trigger);
        }

        tracing::info!(triggers = state.tasks.len(), "Trigger scheduler started");
        Ok(())
    }

    /// Stop every timer; stored triggers are kept
    pub async fn stop(&self) {
        let mut state = self.inner.state.lock().await;
        if !state.running {
            return;
        }
        state.running = false;
        self.inner.shutdown_tx.send_replace(true);
        for (_, task) in state.tasks.drain() {
            task.handle.abort();
        }
        tracing::info!("Trigger scheduler stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.inner.state.lock().await.running
    }

    /// Create or replace a tenant's trigger as given
    ///
    /// Returns the next fire time when the scheduler is running.
    pub async fn upsert(&self, trigger: PeriodicTrigger) -> SchedulerResult<Option<DateTime<Utc>>> {
        trigger.validate()?;

        let mut state = self.inner.state.lock().await;
        self.upsert_locked(&mut state, trigger).await
    }

    /// Create or replace a tenant's trigger, keeping its last fire time
    ///
    /// The previous `last_triggered_at` is read under the lock timer tasks
    /// take before firing, so a fire racing with the change is carried over
    /// and not repeated by the replacement timer.
    pub async fn reconfigure(
        &self,
        tenant_id: &str,
        interval: Interval,
        start_at: DateTime<Utc>,
    ) -> SchedulerResult<Option<DateTime<Utc>>> {
        let mut trigger = PeriodicTrigger::new(tenant_id, interval, start_at);
        trigger.validate()?;

        let mut state = self.inner.state.lock().await;
        let scheduled = state
            .tasks
            .get(tenant_id)
            .and_then(|task| task.trigger.last_triggered_at);
        let stored = self
            .inner
            .store
            .get(tenant_id)
            .await
            .map_err(|e| SchedulerError::store("get", e))?
            .and_then(|existing| existing.last_triggered_at);
        trigger.last_triggered_at = scheduled.max(stored);

        self.upsert_locked(&mut state, trigger).await
    }

    async fn upsert_locked(
        &self,
        state: &mut SchedulerState,
        trigger: PeriodicTrigger,
    ) -> SchedulerResult<Option<DateTime<Utc>>> {
        self.inner
            .store
            .put(&trigger)
            .await
            .map_err(|e| SchedulerError::store("put", e))?;

        tracing::info!(
            tenant = %trigger.tenant_id,
            interval = %trigger.interval,
            start_at = %trigger.start_at,
            "Periodic trigger configured"
        );

        if !state.running {
            return Ok(None);
        }
        let next = next_fire_time(&trigger, Utc::now());
        self.schedule_locked(state, trigger);
        Ok(Some(next))
    }

    /// Remove a tenant's trigger and its timer
    pub async fn delete(&self, tenant_id: &str) -> SchedulerResult<()> {
        let mut state = self.inner.state.lock().await;
        let existed = self
            .inner
            .store
            .delete(tenant_id)
            .await
            .map_err(|e| SchedulerError::store("delete", e))?;

        let had_task = match state.tasks.remove(tenant_id) {
            Some(task) => {
                task.handle.abort();
                true
            }
            None => false,
        };

        if !existed && !had_task {
            return Err(SchedulerError::not_found(tenant_id));
        }
        tracing::info!(tenant = %tenant_id, "Periodic trigger deleted");
        Ok(())
    }

    /// Stored trigger for a tenant
    pub async fn get(&self, tenant_id: &str) -> SchedulerResult<Option<PeriodicTrigger>> {
        self.inner
            .store
            .get(tenant_id)
            .await
            .map_err(|e| SchedulerError::store("get", e))
    }

    /// Next fire time of a tenant's trigger as of now
    pub async fn next_fire(&self, tenant_id: &str) -> SchedulerResult<DateTime<Utc>> {
        let trigger = self
            .get(tenant_id)
            .await?
            .ok_or_else(|| SchedulerError::not_found(tenant_id))?;
        Ok(next_fire_time(&trigger, Utc::now()))
    }

    /// Get scheduler status
    pub async fn status(&self) -> SchedulerStatus {
        let state = self.inner.state.lock().await;
        let mut triggers: Vec<ScheduledTrigger> = state
            .tasks
            .iter()
            .map(|(tenant_id, task)| ScheduledTrigger {
                tenant_id: tenant_id.clone(),
                interval: task.trigger.interval,
                next_fire_at: task.next_fire_at,
                last_triggered_at: task.trigger.last_triggered_at,
            })
            .collect();
        triggers.sort_by(|a, b| a.tenant_id.cmp(&b.tenant_id));

        SchedulerStatus {
            is_running: state.running,
            triggers,
        }
    }

    fn schedule_locked(&self, state: &mut SchedulerState, trigger: PeriodicTrigger) {
        state.next_generation += 1;
        let generation = state.next_generation;
        let tenant_id = trigger.tenant_id.clone();

        let handle = tokio::spawn(run_tenant_timer(
            Arc::clone(&self.inner),
            trigger.clone(),
            generation,
            self.inner.shutdown_tx.subscribe(),
        ));

        let replaced = state.tasks.insert(
            tenant_id.clone(),
            TenantTask {
                generation,
                trigger,
                next_fire_at: None,
                handle,
            },
        );
        if let Some(old) = replaced {
            old.handle.abort();
            tracing::debug!(tenant = %tenant_id, "Replaced periodic trigger timer");
        }
    }
}

async fn run_tenant_timer(
    inner: Arc<Inner>,
    mut trigger: PeriodicTrigger,
    generation: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let now = Utc::now();
        let fire_at = next_fire_time(&trigger, now);
        {
            let mut state = inner.state.lock().await;
            match state.tasks.get_mut(&trigger.tenant_id) {
                Some(task) if task.generation == generation => task.next_fire_at = Some(fire_at),
                _ => return,
            }
        }

        let wait = (fire_at - now).to_std().unwrap_or_default();
        tracing::debug!(
            tenant = %trigger.tenant_id,
            fire_at = %fire_at,
            wait_secs = wait.as_secs(),
            "Waiting for next trigger"
        );

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = shutdown.changed() => return,
        }

        {
            let mut state = inner.state.lock().await;
            let Some(task) = state.tasks.get_mut(&trigger.tenant_id) else {
                return;
            };
            if task.generation != generation {
                return;
            }

            trigger.last_triggered_at = Some(fire_at);
            task.trigger = trigger.clone();
            task.next_fire_at = None;
            if let Err(e) = inner.store.put(&trigger).await {
                tracing::error!(
                    tenant = %trigger.tenant_id,
                    error = %e,
                    "Failed to persist last trigger time"
                );
            }
        }

        metrics::record_trigger_fired(trigger.interval.as_str());
        tracing::info!(
            tenant = %trigger.tenant_id,
            interval = %trigger.interval,
            fire_time = %fire_at,
            "Periodic trigger fired"
        );

        let event = TriggerFired {
            tenant_id: trigger.tenant_id.clone(),
            interval: trigger.interval,
            fire_time: fire_at,
        };
        if inner.fired_tx.send(event).await.is_err() {
            tracing::warn!(tenant = %trigger.tenant_id, "Trigger consumer closed");
            return;
        }
    }
}
