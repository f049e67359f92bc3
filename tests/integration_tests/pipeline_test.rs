//! Harvest pipeline integration tests
//!
//! Exercise narrowing, adaptive throttling and placeholder emission against
//! a scripted report source. Time is paused so fetch delays are virtual.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use usage_harvester::calendar::months_between;
use usage_harvester::harvest::{HarvestPipeline, ReportFetcher, MISSING_MONTH_REASON};
use usage_harvester::models::FetchRange;

use super::fixtures::{fast_pipeline, Reply, ScriptedFetcher};
use crate::common::m;

fn singles(report_type: &str, start: &str, end: &str) -> Vec<FetchRange> {
    months_between(m(start), m(end))
        .into_iter()
        .map(|month| FetchRange::single(report_type, month))
        .collect()
}

// ============================================================================
// Narrowing
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_invalid_range_narrows_to_single_months() {
    let fetcher = ScriptedFetcher::new(Duration::from_millis(20), |range, _| {
        if !range.is_single_month() {
            Reply::Invalid("3030: range not available")
        } else if range.begin == m("2020-02") {
            Reply::Invalid("3031: no usage for month")
        } else {
            Reply::Ok
        }
    });

    let range = FetchRange::new("DR", m("2020-01"), m("2020-03")).unwrap();
    let (records, stats) = HarvestPipeline::new(fast_pipeline(4))
        .run("p1", fetcher.clone() as Arc<dyn ReportFetcher>, vec![range])
        .collect()
        .await;

    assert_eq!(records.len(), 3);
    let failed: Vec<_> = records.iter().filter(|r| r.is_failure()).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].month, m("2020-02"));
    assert_eq!(failed[0].failure_reason.as_deref(), Some("3031: no usage for month"));
    assert!(records.iter().all(|r| r.provider_id == "p1"));

    // one multi-month call, then exactly three single-month calls
    let calls = fetcher.calls();
    assert_eq!(calls.len(), 4);
    assert!(calls[1..].iter().all(|c| c.range.is_single_month()));
    assert_eq!(stats.narrowed, 1);
    assert_eq!(stats.success_records, 2);
    assert_eq!(stats.placeholder_records, 1);
}

#[tokio::test(start_paused = true)]
async fn test_generic_failure_is_not_narrowed() {
    let fetcher = ScriptedFetcher::new(Duration::from_millis(20), |_, _| {
        Reply::Fail("connection reset by peer")
    });

    let range = FetchRange::new("DR", m("2020-01"), m("2020-04")).unwrap();
    let (records, stats) = HarvestPipeline::new(fast_pipeline(4))
        .run("p1", fetcher.clone() as Arc<dyn ReportFetcher>, vec![range])
        .collect()
        .await;

    assert_eq!(fetcher.calls().len(), 1);
    assert_eq!(records.len(), 4);
    assert!(records
        .iter()
        .all(|r| r.failure_reason.as_deref() == Some("connection reset by peer")));
    assert_eq!(stats.narrowed, 0);
}

#[tokio::test(start_paused = true)]
async fn test_missing_month_gets_placeholder() {
    let fetcher = ScriptedFetcher::new(Duration::from_millis(20), |_, _| {
        Reply::Partial(vec![m("2020-01"), m("2020-03")])
    });

    let range = FetchRange::new("DR", m("2020-01"), m("2020-03")).unwrap();
    let (records, _) = HarvestPipeline::new(fast_pipeline(4))
        .run("p1", fetcher as Arc<dyn ReportFetcher>, vec![range])
        .collect()
        .await;

    assert_eq!(records.len(), 3);
    let missing = records.iter().find(|r| r.month == m("2020-02")).unwrap();
    assert_eq!(missing.failure_reason.as_deref(), Some(MISSING_MONTH_REASON));
}

// ============================================================================
// Throttling
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_first_rate_limit_drops_concurrency_to_one() {
    let fetcher = ScriptedFetcher::new(Duration::from_millis(50), |range, attempt| {
        if range.begin == m("2020-01") && attempt == 1 {
            Reply::RateLimited
        } else {
            Reply::Ok
        }
    });

    let (records, stats) = HarvestPipeline::new(fast_pipeline(4))
        .run(
            "p1",
            fetcher.clone() as Arc<dyn ReportFetcher>,
            singles("TR", "2020-01", "2020-08"),
        )
        .collect()
        .await;

    assert_eq!(records.len(), 8);
    assert!(records.iter().all(|r| r.is_satisfied()));
    assert_eq!(stats.rate_limited, 1);
    assert_eq!(stats.final_concurrency, 1);

    let calls = fetcher.calls();
    assert_eq!(calls.len(), 9);
    assert_eq!(fetcher.max_in_flight(), 4);
    // the four initial fetches overlap; everything launched afterwards runs alone
    assert!(calls[4..].iter().all(|c| c.in_flight == 1), "{calls:?}");
}

#[tokio::test(start_paused = true)]
async fn test_throttling_is_scoped_to_one_run() {
    let throttled = ScriptedFetcher::new(Duration::from_millis(50), |range, attempt| {
        if range.begin == m("2020-01") && attempt == 1 {
            Reply::RateLimited
        } else {
            Reply::Ok
        }
    });
    let healthy = ScriptedFetcher::healthy(Duration::from_millis(50));

    let pipeline = HarvestPipeline::new(fast_pipeline(4));
    let run_a = pipeline.run(
        "a",
        throttled.clone() as Arc<dyn ReportFetcher>,
        singles("TR", "2020-01", "2020-08"),
    );
    let run_b = pipeline.run(
        "b",
        healthy.clone() as Arc<dyn ReportFetcher>,
        singles("TR", "2020-01", "2020-08"),
    );

    let ((records_a, stats_a), (records_b, stats_b)) = tokio::join!(run_a.collect(), run_b.collect());

    assert_eq!(records_a.len(), 8);
    assert_eq!(records_b.len(), 8);
    assert_eq!(stats_a.final_concurrency, 1);
    assert_eq!(stats_b.final_concurrency, 4);
    assert_eq!(stats_b.rate_limited, 0);
    assert_eq!(healthy.max_in_flight(), 4);
    assert!(healthy.calls()[4..].iter().any(|c| c.in_flight > 1));
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_exhaustion_narrows_then_persists_placeholders() {
    let fetcher = ScriptedFetcher::new(Duration::from_millis(20), |_, _| Reply::RateLimited);

    let range = FetchRange::new("DR", m("2020-01"), m("2020-02")).unwrap();
    let (records, stats) = HarvestPipeline::new(fast_pipeline(4))
        .run("p1", fetcher.clone() as Arc<dyn ReportFetcher>, vec![range])
        .collect()
        .await;

    // three attempts on the range, then three on each single month
    assert_eq!(fetcher.calls().len(), 9);
    assert_eq!(stats.rate_limited, 9);
    assert_eq!(stats.narrowed, 1);

    assert_eq!(records.len(), 2);
    for record in &records {
        assert_eq!(
            record.failure_reason.as_deref(),
            Some("rate limited after 3 attempts")
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_every_planned_month_emitted_once() {
    let fetcher = ScriptedFetcher::new(Duration::from_millis(5), |range, attempt| {
        match (range.report_type.as_str(), attempt) {
            ("JR1", _) if !range.is_single_month() => Reply::Invalid("too large"),
            ("DR", 1) => Reply::RateLimited,
            ("PR", _) => Reply::Fail("timeout"),
            _ => Reply::Ok,
        }
    });

    let plan = vec![
        FetchRange::new("JR1", m("2019-01"), m("2019-12")).unwrap(),
        FetchRange::new("DR", m("2019-01"), m("2019-06")).unwrap(),
        FetchRange::new("PR", m("2019-03"), m("2019-05")).unwrap(),
    ];
    let (records, stats) = HarvestPipeline::new(fast_pipeline(3))
        .run("p1", fetcher as Arc<dyn ReportFetcher>, plan)
        .collect()
        .await;

    let keys: BTreeSet<_> = records
        .iter()
        .map(|r| (r.report_type.clone(), r.month))
        .collect();
    assert_eq!(keys.len(), records.len());
    assert_eq!(records.len(), 12 + 6 + 3);
    assert_eq!(stats.placeholder_records, 3);
    assert_eq!(stats.total_records(), 21);
}
