//! Concurrent fetch pipeline for one provider run
//!
//! Executes a plan of [`FetchRange`]s against a [`ReportFetcher`] and streams
//! one [`ReportRecord`] per `(report type, month)` back to the caller.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐   pop    ┌─────────────┐  join   ┌─────────────┐  mpsc   ┌──────────┐
//! │  Worklist   │────────▶│  In-flight  │───────▶│  Classify   │───────▶│ Consumer │
//! │ (VecDeque)  │          │  (JoinSet)  │         │  outcome    │         │          │
//! └─────────────┘          └─────────────┘         └─────────────┘         └──────────┘
//!        ▲                                               │
//!        └───── rate-limit retry / narrowed ranges ──────┘
//! ```
//!
//! The number of in-flight fetches is bounded by a per-run
//! [`AdaptiveConcurrency`] limit, which drops to one on the first rate-limit
//! response and stays there for the rest of the run.
//!
//! Every month of every planned range ends up as exactly one emitted record,
//! either a success or a failure placeholder. A fetcher that panics, or a
//! fetch task that dies outside the fetcher, is treated like a generic failure.

use futures::FutureExt;
use std::any::Any;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{Id, JoinError, JoinHandle, JoinSet};

use super::error::FetchError;
use super::fetcher::ReportFetcher;
use super::throttle::AdaptiveConcurrency;
use crate::calendar::Month;
use crate::metrics;
use crate::models::{FetchRange, ReportRecord};
use crate::planner::expand;
use crate::utils::retry::RetryConfig;

/// Reason stored when a fetch succeeded but skipped a month
pub const MISSING_MONTH_REASON: &str = "no record returned for month";

// ============================================================================
// Configuration
// ============================================================================

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Initial bound on in-flight fetches
    pub max_concurrency: usize,

    /// Total attempts for a range the remote source keeps rate-limiting
    pub rate_limit_attempts: u32,

    /// Backoff applied before re-attempting a rate-limited range
    pub backoff: RetryConfig,

    /// Records buffered between the pipeline and its consumer
    pub channel_buffer_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            rate_limit_attempts: 3,
            backoff: RetryConfig::with_delays(3, 1000, 30_000),
            channel_buffer_size: 256,
        }
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Run statistics (thread-safe)
#[derive(Debug, Default)]
pub struct HarvestStats {
    pub ranges_fetched: AtomicU64,
    pub success_records: AtomicU64,
    pub placeholder_records: AtomicU64,
    pub rate_limited: AtomicU64,
    pub narrowed: AtomicU64,
}

impl HarvestStats {
    fn record_emitted(&self, record: &ReportRecord) {
        if record.is_failure() {
            self.placeholder_records.fetch_add(1, Ordering::Relaxed);
        } else {
            self.success_records.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self, final_concurrency: usize) -> StatsSnapshot {
        StatsSnapshot {
            ranges_fetched: self.ranges_fetched.load(Ordering::Relaxed),
            success_records: self.success_records.load(Ordering::Relaxed),
            placeholder_records: self.placeholder_records.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            narrowed: self.narrowed.load(Ordering::Relaxed),
            final_concurrency,
        }
    }
}

/// Snapshot of run statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Fetch calls that returned records
    pub ranges_fetched: u64,
    pub success_records: u64,
    pub placeholder_records: u64,
    /// Rate-limit responses seen
    pub rate_limited: u64,
    /// Multi-month ranges split after an invalid-report response
    pub narrowed: u64,
    /// Concurrency limit in force when the run ended
    pub final_concurrency: usize,
}

impl StatsSnapshot {
    pub fn total_records(&self) -> u64 {
        self.success_records + self.placeholder_records
    }
}

// ============================================================================
// Run handle
// ============================================================================

/// Handle to a running harvest
///
/// Records arrive in completion order. Dropping the handle stops the run
/// once its in-flight fetches notice the closed channel.
pub struct HarvestRun {
    records: mpsc::Receiver<ReportRecord>,
    handle: JoinHandle<StatsSnapshot>,
}

impl HarvestRun {
    /// Next emitted record, or `None` once the run is complete
    pub async fn next(&mut self) -> Option<ReportRecord> {
        self.records.recv().await
    }

    /// Wait for the run to end and return its statistics
    ///
    /// Records not yet received are discarded.
    pub async fn finish(self) -> StatsSnapshot {
        drop(self.records);
        match self.handle.await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::error!(error = %e, "Harvest run task failed");
                StatsSnapshot::default()
            }
        }
    }

    /// Drain every record, then return them with the run statistics
    pub async fn collect(mut self) -> (Vec<ReportRecord>, StatsSnapshot) {
        let mut records = Vec::new();
        while let Some(record) = self.next().await {
            records.push(record);
        }
        let stats = self.finish().await;
        (records, stats)
    }
}

// ============================================================================
// Pipeline
// ============================================================================

#[derive(Debug, Clone)]
struct WorkItem {
    range: FetchRange,
    rate_limit_attempts: u32,
}

type FetchOutcome = (WorkItem, Result<Vec<ReportRecord>, FetchError>);

/// Runs fetch plans with bounded, adaptive concurrency
#[derive(Debug, Clone, Default)]
pub struct HarvestPipeline {
    config: PipelineConfig,
}

impl HarvestPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Start harvesting `ranges` for a provider
    ///
    /// Must be called inside a Tokio runtime.
    pub fn run(
        &self,
        provider_id: impl Into<String>,
        fetcher: Arc<dyn ReportFetcher>,
        ranges: Vec<FetchRange>,
    ) -> HarvestRun {
        let (tx, rx) = mpsc::channel(self.config.channel_buffer_size.max(1));
        let run = RunState {
            provider_id: provider_id.into(),
            fetcher,
            config: self.config.clone(),
            limiter: AdaptiveConcurrency::new(self.config.max_concurrency),
            stats: HarvestStats::default(),
            tx,
        };
        let handle = tokio::spawn(run.drive(ranges));
        HarvestRun {
            records: rx,
            handle,
        }
    }
}

struct RunState {
    provider_id: String,
    fetcher: Arc<dyn ReportFetcher>,
    config: PipelineConfig,
    limiter: AdaptiveConcurrency,
    stats: HarvestStats,
    tx: mpsc::Sender<ReportRecord>,
}

impl RunState {
    async fn drive(self, ranges: Vec<FetchRange>) -> StatsSnapshot {
        let _timer = metrics::start_run_timer(&self.provider_id);
        tracing::info!(
            provider = %self.provider_id,
            ranges = ranges.len(),
            max_concurrency = self.limiter.initial(),
            "Starting harvest run"
        );

        let mut pending: VecDeque<WorkItem> = ranges
            .into_iter()
            .map(|range| WorkItem {
                range,
                rate_limit_attempts: 0,
            })
            .collect();
        let mut in_flight: JoinSet<FetchOutcome> = JoinSet::new();
        let mut launched: HashMap<Id, WorkItem> = HashMap::new();

        loop {
            while in_flight.len() < self.limiter.current() {
                let Some(item) = pending.pop_front() else {
                    break;
                };
                self.launch(&mut in_flight, &mut launched, item);
            }

            let Some(joined) = in_flight.join_next_with_id().await else {
                break;
            };

            let (item, result) = match joined {
                Ok((id, outcome)) => {
                    launched.remove(&id);
                    outcome
                }
                Err(e) => match launched.remove(&e.id()) {
                    Some(item) => {
                        tracing::error!(
                            provider = %self.provider_id,
                            range = %item.range,
                            error = %e,
                            "Fetch task died"
                        );
                        task_failure(item, &e)
                    }
                    None => {
                        tracing::error!(provider = %self.provider_id, error = %e, "Unknown fetch task died");
                        continue;
                    }
                },
            };

            if !self.handle_outcome(item, result, &mut pending).await {
                tracing::warn!(
                    provider = %self.provider_id,
                    "Record consumer went away, stopping run"
                );
                in_flight.shutdown().await;
                break;
            }
        }

        let snapshot = self.stats.snapshot(self.limiter.current());
        metrics::record_run_records(
            &self.provider_id,
            snapshot.success_records,
            snapshot.placeholder_records,
        );
        tracing::info!(
            provider = %self.provider_id,
            success = snapshot.success_records,
            placeholders = snapshot.placeholder_records,
            rate_limited = snapshot.rate_limited,
            narrowed = snapshot.narrowed,
            final_concurrency = snapshot.final_concurrency,
            "Harvest run completed"
        );
        snapshot
    }

    fn launch(
        &self,
        in_flight: &mut JoinSet<FetchOutcome>,
        launched: &mut HashMap<Id, WorkItem>,
        item: WorkItem,
    ) {
        let fetcher = Arc::clone(&self.fetcher);
        let delay = self.config.backoff.calculate_delay(item.rate_limit_attempts);
        tracing::debug!(
            provider = %self.provider_id,
            range = %item.range,
            attempt = item.rate_limit_attempts,
            "Fetching range"
        );

        let tracked = item.clone();
        let handle = in_flight.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let range = &item.range;
            let result = AssertUnwindSafe(fetcher.fetch(&range.report_type, range.begin, range.end))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    Err(FetchError::Failure(format!(
                        "fetcher panicked: {}",
                        panic_message(panic.as_ref())
                    )))
                });
            (item, result)
        });
        launched.insert(handle.id(), tracked);
    }

    /// Classify one fetch outcome; returns `false` if the consumer is gone
    async fn handle_outcome(
        &self,
        mut item: WorkItem,
        result: Result<Vec<ReportRecord>, FetchError>,
        pending: &mut VecDeque<WorkItem>,
    ) -> bool {
        let err = match result {
            Ok(records) => {
                metrics::record_fetch_outcome(&self.provider_id, "success");
                self.stats.ranges_fetched.fetch_add(1, Ordering::Relaxed);
                return self.emit_success(&item.range, records).await;
            }
            Err(err) => err,
        };

        let err = match err {
            FetchError::RateLimited => {
                metrics::record_fetch_outcome(&self.provider_id, "rate_limited");
                self.stats.rate_limited.fetch_add(1, Ordering::Relaxed);
                if self.limiter.throttle() {
                    metrics::record_throttled(&self.provider_id);
                    tracing::warn!(
                        provider = %self.provider_id,
                        range = %item.range,
                        "Rate limited by remote source, reducing concurrency to 1"
                    );
                }

                item.rate_limit_attempts += 1;
                if item.rate_limit_attempts < self.config.rate_limit_attempts {
                    pending.push_front(item);
                    return true;
                }
                FetchError::InvalidReport(format!(
                    "rate limited after {} attempts",
                    item.rate_limit_attempts
                ))
            }
            other => other,
        };

        match err {
            FetchError::InvalidReport(reason) => {
                metrics::record_fetch_outcome(&self.provider_id, "invalid_report");
                if item.range.is_single_month() {
                    tracing::debug!(
                        provider = %self.provider_id,
                        range = %item.range,
                        reason = %reason,
                        "Invalid report for single month"
                    );
                    self.emit_placeholders(&item.range, &reason).await
                } else {
                    self.stats.narrowed.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(
                        provider = %self.provider_id,
                        range = %item.range,
                        reason = %reason,
                        "Invalid report for range, narrowing to single months"
                    );
                    pending.extend(expand(&item.range).into_iter().map(|range| WorkItem {
                        range,
                        rate_limit_attempts: 0,
                    }));
                    true
                }
            }
            FetchError::Failure(message) => {
                metrics::record_fetch_outcome(&self.provider_id, "failure");
                tracing::warn!(
                    provider = %self.provider_id,
                    range = %item.range,
                    error = %message,
                    "Fetch failed"
                );
                self.emit_placeholders(&item.range, &message).await
            }
            FetchError::RateLimited => {
                self.emit_placeholders(&item.range, &FetchError::RateLimited.reason())
                    .await
            }
        }
    }

    async fn emit_success(&self, range: &FetchRange, records: Vec<ReportRecord>) -> bool {
        let mut by_month: BTreeMap<Month, ReportRecord> = BTreeMap::new();
        for mut record in records {
            if record.report_type != range.report_type
                || record.month < range.begin
                || record.month > range.end
            {
                tracing::debug!(
                    provider = %self.provider_id,
                    range = %range,
                    month = %record.month,
                    "Dropping record outside requested range"
                );
                continue;
            }
            record.provider_id.clone_from(&self.provider_id);
            by_month.insert(record.month, record);
        }

        for month in range.months() {
            let record = by_month.remove(&month).unwrap_or_else(|| {
                ReportRecord::failure(
                    self.provider_id.clone(),
                    range.report_type.clone(),
                    month,
                    MISSING_MONTH_REASON,
                )
            });
            if !self.emit(record).await {
                return false;
            }
        }
        true
    }

    async fn emit_placeholders(&self, range: &FetchRange, reason: &str) -> bool {
        for month in range.months() {
            let record = ReportRecord::failure(
                self.provider_id.clone(),
                range.report_type.clone(),
                month,
                reason,
            );
            if !self.emit(record).await {
                return false;
            }
        }
        true
    }

    async fn emit(&self, record: ReportRecord) -> bool {
        self.stats.record_emitted(&record);
        self.tx.send(record).await.is_ok()
    }
}

/// Outcome for a task that ended without returning its range
fn task_failure(item: WorkItem, err: &JoinError) -> FetchOutcome {
    let reason = if err.is_panic() {
        "fetch task panicked".to_string()
    } else {
        format!("fetch task failed: {err}")
    };
    (item, Err(FetchError::Failure(reason)))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl ReportFetcher for Echo {
        async fn fetch(
            &self,
            report_type: &str,
            begin: Month,
            end: Month,
        ) -> Result<Vec<ReportRecord>, FetchError> {
            Ok(crate::calendar::months_between(begin, end)
                .into_iter()
                .map(|m| ReportRecord::success("ignored", report_type, m, serde_json::json!([])))
                .collect())
        }
    }

    struct Panicky;

    #[async_trait]
    impl ReportFetcher for Panicky {
        async fn fetch(&self, _: &str, _: Month, _: Month) -> Result<Vec<ReportRecord>, FetchError> {
            panic!("decoder exploded");
        }
    }

    /// Panic payload that panics again when dropped
    struct Volatile;

    impl Drop for Volatile {
        fn drop(&mut self) {
            panic!("payload dropped");
        }
    }

    struct VolatilePanic;

    #[async_trait]
    impl ReportFetcher for VolatilePanic {
        async fn fetch(&self, _: &str, _: Month, _: Month) -> Result<Vec<ReportRecord>, FetchError> {
            std::panic::panic_any(Volatile)
        }
    }

    fn m(s: &str) -> Month {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_success_emits_one_record_per_month() {
        let range = FetchRange::new("DR", m("2020-01"), m("2020-03")).unwrap();
        let (records, stats) = HarvestPipeline::default()
            .run("p1", Arc::new(Echo), vec![range])
            .collect()
            .await;

        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.provider_id == "p1" && r.is_satisfied()));
        assert_eq!(stats.success_records, 3);
        assert_eq!(stats.final_concurrency, 4);
    }

    #[tokio::test]
    async fn test_empty_plan_completes() {
        let (records, stats) = HarvestPipeline::default()
            .run("p1", Arc::new(Echo), Vec::new())
            .collect()
            .await;
        assert!(records.is_empty());
        assert_eq!(stats.total_records(), 0);
    }

    #[tokio::test]
    async fn test_panicking_fetcher_yields_placeholders() {
        let range = FetchRange::new("DR", m("2020-01"), m("2020-02")).unwrap();
        let (records, stats) = HarvestPipeline::default()
            .run("p1", Arc::new(Panicky), vec![range])
            .collect()
            .await;

        assert_eq!(records.len(), 2);
        assert!(records.iter().all(ReportRecord::is_failure));
        assert!(records[0]
            .failure_reason
            .as_deref()
            .unwrap()
            .contains("decoder exploded"));
        assert_eq!(stats.placeholder_records, 2);
    }

    #[tokio::test]
    async fn test_dead_fetch_task_yields_placeholders() {
        let ranges = vec![
            FetchRange::new("DR", m("2020-01"), m("2020-03")).unwrap(),
            FetchRange::single("TR", m("2020-01")),
        ];
        let (records, stats) = HarvestPipeline::default()
            .run("p1", Arc::new(VolatilePanic), ranges)
            .collect()
            .await;

        assert_eq!(records.len(), 4);
        assert!(records.iter().all(|r| r.provider_id == "p1" && r.is_failure()));
        assert!(records
            .iter()
            .all(|r| r.failure_reason.as_deref() == Some("fetch task panicked")));
        let mut months: Vec<String> = records
            .iter()
            .map(|r| format!("{}:{}", r.report_type, r.month))
            .collect();
        months.sort();
        assert_eq!(months, vec!["DR:2020-01", "DR:2020-02", "DR:2020-03", "TR:2020-01"]);
        assert_eq!(stats.placeholder_records, 4);
    }

    #[tokio::test]
    async fn test_task_failure_keeps_range() {
        let err = tokio::spawn(async { panic!("boom") }).await.unwrap_err();
        let item = WorkItem {
            range: FetchRange::single("DR", m("2020-05")),
            rate_limit_attempts: 1,
        };

        let (item, result) = task_failure(item, &err);
        assert_eq!(item.range, FetchRange::single("DR", m("2020-05")));
        assert!(matches!(result, Err(FetchError::Failure(reason)) if reason == "fetch task panicked"));
    }

    #[test]
    fn test_panic_message_variants() {
        let boxed: Box<dyn Any + Send> = Box::new("static str");
        assert_eq!(panic_message(boxed.as_ref()), "static str");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
