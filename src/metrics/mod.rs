//! Prometheus metrics for the harvest engine
//!
//! Tracks fetch outcomes, placeholder writes, throttling events, job
//! admissions and trigger firings.
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, or is never attempted, metrics operations are no-ops.

use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

struct HarvestMetrics {
    fetch_outcomes: CounterVec,
    records_written: CounterVec,
    throttled_runs: CounterVec,
    run_duration: HistogramVec,
    jobs: CounterVec,
    running_jobs: Gauge,
    triggers_fired: CounterVec,
}

static HARVEST_METRICS: OnceLock<HarvestMetrics> = OnceLock::new();

static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Register all metrics with the default Prometheus registry
///
/// Idempotent; later calls return `Ok(())` without registering again.
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let metrics = HarvestMetrics {
        fetch_outcomes: register_counter_vec!(
            "harvester_fetch_outcomes_total",
            "Fetch attempts by provider and outcome",
            &["provider", "outcome"]
        )?,
        records_written: register_counter_vec!(
            "harvester_records_total",
            "Records emitted by kind (success, placeholder)",
            &["provider", "kind"]
        )?,
        throttled_runs: register_counter_vec!(
            "harvester_throttled_runs_total",
            "Provider runs whose concurrency dropped to one",
            &["provider"]
        )?,
        run_duration: register_histogram_vec!(
            "harvester_provider_run_duration_seconds",
            "Time spent harvesting one provider",
            &["provider"],
            vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0, 3600.0]
        )?,
        jobs: register_counter_vec!(
            "harvester_jobs_total",
            "Harvest job requests by scope and admission result",
            &["scope", "result"]
        )?,
        running_jobs: register_gauge!(
            "harvester_running_jobs",
            "Harvest jobs currently running"
        )?,
        triggers_fired: register_counter_vec!(
            "harvester_triggers_fired_total",
            "Periodic trigger firings by interval",
            &["interval"]
        )?,
    };

    HARVEST_METRICS
        .set(metrics)
        .map_err(|_| "Harvest metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

pub fn metrics_initialized() -> bool {
    HARVEST_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record the outcome of one fetch call
pub fn record_fetch_outcome(provider: &str, outcome: &str) {
    if let Some(m) = HARVEST_METRICS.get() {
        m.fetch_outcomes
            .with_label_values(&[provider, outcome])
            .inc();
    }
}

/// Record records emitted by a finished provider run
pub fn record_run_records(provider: &str, success: u64, placeholders: u64) {
    let Some(m) = HARVEST_METRICS.get() else {
        return;
    };

    if success > 0 {
        m.records_written
            .with_label_values(&[provider, "success"])
            .inc_by(success as f64);
    }
    if placeholders > 0 {
        m.records_written
            .with_label_values(&[provider, "placeholder"])
            .inc_by(placeholders as f64);
    }
}

pub fn record_throttled(provider: &str) {
    if let Some(m) = HARVEST_METRICS.get() {
        m.throttled_runs.with_label_values(&[provider]).inc();
    }
}

/// Record a job admission decision (`accepted`, `in_progress`, `scheduled`)
pub fn record_job_admission(scope: &str, result: &str) {
    if let Some(m) = HARVEST_METRICS.get() {
        m.jobs.with_label_values(&[scope, result]).inc();
    }
}

pub fn set_running_jobs(count: usize) {
    if let Some(m) = HARVEST_METRICS.get() {
        m.running_jobs.set(count as f64);
    }
}

pub fn record_trigger_fired(interval: &str) {
    if let Some(m) = HARVEST_METRICS.get() {
        m.triggers_fired.with_label_values(&[interval]).inc();
    }
}

/// Histogram timer guard that records duration on drop
pub struct MetricsTimer {
    timer: Option<prometheus::HistogramTimer>,
}

impl MetricsTimer {
    fn noop() -> Self {
        Self { timer: None }
    }
}

impl Drop for MetricsTimer {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop_and_record();
        }
    }
}

/// Start timing a provider run
pub fn start_run_timer(provider: &str) -> MetricsTimer {
    match HARVEST_METRICS.get() {
        Some(m) => MetricsTimer {
            timer: Some(m.run_duration.with_label_values(&[provider]).start_timer()),
        },
        None => MetricsTimer::noop(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_is_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
        assert!(metrics_initialized());
    }

    #[test]
    fn test_encode_metrics() {
        let _ = init_metrics();
        record_fetch_outcome("p1", "success");
        let text = encode_metrics().unwrap();
        assert!(text.contains("harvester_fetch_outcomes_total"));
    }

    #[test]
    fn test_recorders_do_not_panic() {
        record_fetch_outcome("p1", "rate_limited");
        record_run_records("p1", 10, 2);
        record_throttled("p1");
        record_job_admission("tenant", "accepted");
        set_running_jobs(1);
        record_trigger_fired("daily");
        let _timer = start_run_timer("p1");
    }
}
