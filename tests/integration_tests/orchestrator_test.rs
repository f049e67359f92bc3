//! Job orchestration integration tests
//!
//! Complete plan → fetch → store flow through the orchestrator, plus job
//! admission and periodic-job cancellation.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use usage_harvester::config::HarvestConfig;
use usage_harvester::error::{Error, ErrorCategory, HarvestErrorTrait};
use usage_harvester::harvest::{FetcherRegistry, ReportFetcher};
use usage_harvester::models::ProviderHarvestConfig;
use usage_harvester::orchestrator::{
    HarvestService, JobOrigin, MemoryJobHistory, Orchestrator, OrchestratorError,
};
use usage_harvester::scheduler::{Interval, TriggerFired, TriggerScheduler};
use usage_harvester::storage::{
    MemoryReportStore, MemoryTriggerStore, ReportStore, StaticProviderRegistry,
};

use super::fixtures::{Reply, ScriptedFetcher};
use crate::common::{m, provider};

struct Harness {
    orchestrator: Orchestrator,
    reports: Arc<MemoryReportStore>,
    history: Arc<MemoryJobHistory>,
}

fn scripted(tenant: &str, provider_id: &str) -> ProviderHarvestConfig {
    let mut config = provider(tenant, provider_id, &["DR"], "2020-01", "2020-03");
    config.service_type = "scripted".to_string();
    config
}

fn harness(providers: Vec<ProviderHarvestConfig>, fetcher: Arc<ScriptedFetcher>) -> Harness {
    let reports = Arc::new(MemoryReportStore::new());
    let history = Arc::new(MemoryJobHistory::new());

    let mut fetchers = FetcherRegistry::new();
    fetchers.register("scripted", move |_| Ok(fetcher.clone() as Arc<dyn ReportFetcher>));

    let harvest = HarvestConfig {
        max_concurrent_providers: 1,
        ..HarvestConfig::default()
    };
    let orchestrator = Orchestrator::new(
        Arc::new(StaticProviderRegistry::new(providers)),
        reports.clone(),
        fetchers,
    )
    .with_config(&harvest)
    .with_history(history.clone());

    Harness {
        orchestrator,
        reports,
        history,
    }
}

// ============================================================================
// Admission
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_provider_job_uniqueness() {
    let fetcher = ScriptedFetcher::healthy(Duration::from_secs(5));
    let h = harness(vec![scripted("acme", "p1"), scripted("acme", "p2")], fetcher);

    let first = h.orchestrator.start_provider_job("acme", "p1").await.unwrap();

    let err = h.orchestrator.start_provider_job("acme", "p1").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::AlreadyScheduled { .. }));

    // a distinct provider of the same tenant runs alongside
    let second = h.orchestrator.start_provider_job("acme", "p2").await.unwrap();

    let err = h
        .orchestrator
        .start_tenant_job("acme", JobOrigin::Manual)
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::AlreadyInProgress { .. }));

    // conflicts never touch report records
    assert!(h.reports.is_empty().await);

    first.wait().await.unwrap();
    second.wait().await.unwrap();
    assert!(h.orchestrator.running_jobs().is_empty());

    let summary = h
        .orchestrator
        .start_tenant_job("acme", JobOrigin::Manual)
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(summary.providers.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_key_released_after_failed_job() {
    let fetcher = ScriptedFetcher::healthy(Duration::from_millis(10));
    let mut broken = scripted("acme", "p1");
    broken.service_type = "counter4".to_string();
    let h = harness(vec![broken], fetcher);

    let err = h
        .orchestrator
        .start_provider_job("acme", "p1")
        .await
        .unwrap()
        .wait()
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Harvest(_)));

    // the key is free again
    assert!(h.orchestrator.start_provider_job("acme", "p1").await.is_ok());
}

// ============================================================================
// End to end
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_failed_month_retried_until_attempt_limit() {
    let fetcher = ScriptedFetcher::new(Duration::from_millis(10), |range, _| {
        if !range.is_single_month() {
            Reply::Invalid("3030: partial data")
        } else if range.begin == m("2020-02") {
            Reply::Fail("upstream returned 500")
        } else {
            Reply::Ok
        }
    });
    let mut config = scripted("acme", "p1");
    config.max_failed_attempts = 2;
    let h = harness(vec![config], fetcher.clone());

    // first run: narrowed range, one placeholder
    let summary = h
        .orchestrator
        .start_tenant_job("acme", JobOrigin::Manual)
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(summary.records_written(), 3);
    assert_eq!(summary.placeholders(), 1);
    assert_eq!(fetcher.calls().len(), 4);

    // second run only asks for the failed month
    let summary = h
        .orchestrator
        .start_tenant_job("acme", JobOrigin::Manual)
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(summary.providers[0].ranges_planned, 1);
    assert_eq!(fetcher.calls().len(), 5);

    let records = h.reports.existing("p1", "DR").await.unwrap();
    let failed = records.iter().find(|r| r.month == m("2020-02")).unwrap();
    assert_eq!(failed.attempt_count, 2);
    assert_eq!(records.iter().filter(|r| r.is_satisfied()).count(), 2);

    // attempt limit reached: nothing left to plan
    let summary = h
        .orchestrator
        .start_tenant_job("acme", JobOrigin::Manual)
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(summary.providers[0].ranges_planned, 0);
    assert_eq!(fetcher.calls().len(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_history_tracks_job_lifecycle() {
    let fetcher = ScriptedFetcher::healthy(Duration::from_millis(10));
    let h = harness(vec![scripted("acme", "p1")], fetcher);

    let ticket = h.orchestrator.start_tenant_job("acme", JobOrigin::Manual).unwrap();
    let job_id = ticket.job_id;
    ticket.wait().await.unwrap();

    assert_eq!(h.history.labels_for(job_id), vec!["started", "finished"]);
}

// ============================================================================
// Service facade
// ============================================================================

fn service(h: &Harness) -> (HarvestService, mpsc::Receiver<TriggerFired>) {
    let (scheduler, fired) = TriggerScheduler::new(Arc::new(MemoryTriggerStore::new()));
    (HarvestService::new(h.orchestrator.clone(), scheduler), fired)
}

#[tokio::test(start_paused = true)]
async fn test_deleting_periodic_config_cancels_periodic_job() {
    let fetcher = ScriptedFetcher::healthy(Duration::from_secs(1));
    let h = harness(vec![scripted("acme", "p1"), scripted("acme", "p2")], fetcher);
    let (service, _fired) = service(&h);

    let start_at = chrono::Utc::now() + chrono::Duration::days(1);
    service
        .upsert_periodic_config("acme", Interval::Daily, start_at)
        .await
        .unwrap();

    // what a trigger fire does
    let ticket = h
        .orchestrator
        .start_tenant_job("acme", JobOrigin::Periodic)
        .unwrap();
    service.delete_periodic_config("acme").await.unwrap();

    let summary = ticket.wait().await.unwrap();
    assert!(summary.cancelled);
    assert!(summary.not_started.contains(&"p2".to_string()));
    assert_eq!(h.history.labels_for(summary.job_id), vec!["started", "cancelled"]);
}

#[tokio::test]
async fn test_delete_unknown_periodic_config_is_not_found() {
    let h = harness(vec![], ScriptedFetcher::healthy(Duration::ZERO));
    let (service, _fired) = service(&h);

    let err = service.delete_periodic_config("ghost").await.unwrap_err();
    assert!(matches!(err, Error::Scheduler(_)));
    assert_eq!(err.category(), ErrorCategory::Scheduler);
}

#[tokio::test]
async fn test_provider_request_conflict_is_admission_error() {
    let h = harness(
        vec![scripted("acme", "p1")],
        ScriptedFetcher::healthy(Duration::from_secs(60)),
    );
    let (service, _fired) = service(&h);

    let _running = service.request_provider_harvest("acme", "p1").await.unwrap();
    let err = service
        .request_provider_harvest("acme", "p1")
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Admission);
    assert!(err.is_recoverable());

    let err = service
        .request_provider_harvest("acme", "ghost")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Orchestrator(OrchestratorError::ProviderNotFound { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_trigger_loop_starts_periodic_jobs() {
    let fetcher = ScriptedFetcher::healthy(Duration::from_millis(10));
    let h = harness(vec![scripted("acme", "p1")], fetcher);
    let (service, _fired) = service(&h);

    let (tx, rx) = mpsc::channel(4);
    tx.send(TriggerFired {
        tenant_id: "acme".to_string(),
        interval: Interval::Monthly,
        fire_time: chrono::Utc::now(),
    })
    .await
    .unwrap();
    drop(tx);

    service.run_trigger_loop(rx, CancellationToken::new()).await;

    while !h.orchestrator.running_jobs().is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let entries = h.history.entries();
    assert!(!entries.is_empty());
    assert!(entries.iter().all(|(job, _)| job.origin == JobOrigin::Periodic));
    assert_eq!(h.reports.len().await, 3);
}

#[tokio::test(start_paused = true)]
async fn test_trigger_fire_skipped_while_tenant_busy() {
    let fetcher = ScriptedFetcher::healthy(Duration::from_secs(60));
    let h = harness(vec![scripted("acme", "p1")], fetcher);
    let (service, _fired) = service(&h);

    let manual = service.request_provider_harvest("acme", "p1").await.unwrap();

    let (tx, rx) = mpsc::channel(4);
    tx.send(TriggerFired {
        tenant_id: "acme".to_string(),
        interval: Interval::Daily,
        fire_time: chrono::Utc::now(),
    })
    .await
    .unwrap();
    drop(tx);
    service.run_trigger_loop(rx, CancellationToken::new()).await;

    assert!(h
        .history
        .entries()
        .iter()
        .all(|(job, _)| job.origin == JobOrigin::Manual));
    manual.wait().await.unwrap();
}
