//! Error scenario integration tests
//!
//! Runs the built-in HTTP fetcher end to end against a mock report source:
//! 1. Range rejected as a whole, single months partly unavailable
//! 2. Throttling answered with 429 then recovered
//! 3. Server errors persisted as placeholders without narrowing

use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use usage_harvester::config::{HarvestConfig, HttpConfig};
use usage_harvester::harvest::FetcherRegistry;
use usage_harvester::models::ProviderHarvestConfig;
use usage_harvester::orchestrator::{JobOrigin, Orchestrator};
use usage_harvester::storage::{MemoryReportStore, ReportStore, StaticProviderRegistry};

use crate::common::{m, provider};

fn http_provider(server: &MockServer) -> ProviderHarvestConfig {
    let mut config = provider("acme", "sushi", &["DR"], "2020-01", "2020-03");
    config.base_url = format!("{}/api/v5", server.uri());
    config
        .params
        .insert("customer_id".to_string(), "C-42".to_string());
    config
}

fn orchestrator(provider: ProviderHarvestConfig, reports: Arc<MemoryReportStore>) -> Orchestrator {
    let http = HttpConfig {
        requests_per_second: 100,
        request_timeout_secs: 5,
        ..HttpConfig::default()
    };
    let harvest = HarvestConfig {
        rate_limit_backoff_ms: 10,
        max_backoff_ms: 20,
        ..HarvestConfig::default()
    };
    Orchestrator::new(
        Arc::new(StaticProviderRegistry::new([provider])),
        reports,
        FetcherRegistry::with_builtin(http),
    )
    .with_config(&harvest)
}

fn month_body(month: &str) -> serde_json::Value {
    json!({ "items": [{ "month": month, "data": { "total_item_requests": 12 } }] })
}

async fn mount_range(server: &MockServer, begin: &str, end: &str, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path("/api/v5/reports/dr"))
        .and(query_param("begin_date", begin))
        .and(query_param("end_date", end))
        .and(query_param("customer_id", "C-42"))
        .respond_with(response)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_rejected_range_narrowed_over_http() {
    let server = MockServer::start().await;
    mount_range(
        &server,
        "2020-01",
        "2020-03",
        ResponseTemplate::new(400).set_body_string("range not supported"),
    )
    .await;
    mount_range(
        &server,
        "2020-01",
        "2020-01",
        ResponseTemplate::new(200).set_body_json(month_body("2020-01")),
    )
    .await;
    mount_range(
        &server,
        "2020-02",
        "2020-02",
        ResponseTemplate::new(200).set_body_json(json!({
            "exceptions": [{ "code": 3030, "message": "No usage available" }]
        })),
    )
    .await;
    mount_range(
        &server,
        "2020-03",
        "2020-03",
        ResponseTemplate::new(200).set_body_json(month_body("2020-03")),
    )
    .await;

    let reports = Arc::new(MemoryReportStore::new());
    let summary = orchestrator(http_provider(&server), reports.clone())
        .start_tenant_job("acme", JobOrigin::Manual)
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(summary.providers[0].stats.narrowed, 1);
    let records = reports.existing("sushi", "DR").await.unwrap();
    assert_eq!(records.len(), 3);

    let feb = records.iter().find(|r| r.month == m("2020-02")).unwrap();
    assert_eq!(feb.failure_reason.as_deref(), Some("3030: No usage available"));

    let jan = records.iter().find(|r| r.month == m("2020-01")).unwrap();
    assert_eq!(
        jan.payload,
        Some(json!([{ "total_item_requests": 12 }]))
    );
}

#[tokio::test]
async fn test_too_many_requests_recovers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v5/reports/dr"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v5/reports/dr"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                { "month": "2020-01", "data": { "total_item_requests": 1 } },
                { "month": "2020-02", "data": { "total_item_requests": 2 } },
                { "month": "2020-03", "data": { "total_item_requests": 3 } }
            ]
        })))
        .with_priority(2)
        .mount(&server)
        .await;

    let reports = Arc::new(MemoryReportStore::new());
    let summary = orchestrator(http_provider(&server), reports.clone())
        .start_tenant_job("acme", JobOrigin::Manual)
        .unwrap()
        .wait()
        .await
        .unwrap();

    let stats = &summary.providers[0].stats;
    assert_eq!(stats.rate_limited, 1);
    assert_eq!(stats.final_concurrency, 1);
    assert_eq!(stats.success_records, 3);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_server_error_persists_placeholders() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v5/reports/dr"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let reports = Arc::new(MemoryReportStore::new());
    let summary = orchestrator(http_provider(&server), reports.clone())
        .start_tenant_job("acme", JobOrigin::Manual)
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(summary.placeholders(), 3);
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
    for record in reports.all().await {
        assert_eq!(record.failure_reason.as_deref(), Some("HTTP 503: maintenance"));
        assert_eq!(record.attempt_count, 1);
    }
}
