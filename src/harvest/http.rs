//! Built-in HTTP/JSON report fetcher
//!
//! Requests `GET {base_url}/reports/{report_type}?begin_date=YYYY-MM&end_date=YYYY-MM`
//! and expects a body of the form
//!
//! ```json
//! {
//!   "items": [{ "month": "2020-01", "data": { ... } }],
//!   "exceptions": [{ "code": 3030, "message": "No usage available" }]
//! }
//! ```
//!
//! Response classification:
//! - 429, or exception code 1020 in the body: [`FetchError::RateLimited`]
//! - 400, 404, 422, or exceptions with no items: [`FetchError::InvalidReport`]
//! - any other non-success status, transport or decode error: [`FetchError::Failure`]

use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::num::NonZeroU32;
use url::Url;

use super::error::{FetchError, HarvestError};
use super::fetcher::ReportFetcher;
use crate::calendar::{months_between, Month};
use crate::config::HttpConfig;
use crate::models::{ProviderHarvestConfig, ReportRecord};

/// Exception code remote sources use to signal throttling
const RATE_LIMIT_EXCEPTION: u32 = 1020;

/// Longest response excerpt kept in a failure reason
const MAX_REASON_LEN: usize = 200;

#[derive(Debug, Deserialize)]
struct ReportResponse {
    #[serde(default)]
    items: Vec<MonthItem>,
    #[serde(default)]
    exceptions: Vec<ReportException>,
}

#[derive(Debug, Deserialize)]
struct MonthItem {
    month: Month,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ReportException {
    code: u32,
    #[serde(default)]
    message: String,
}

impl std::fmt::Display for ReportException {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Fetches usage reports over HTTP with per-fetcher rate limiting
pub struct HttpReportFetcher {
    client: Client,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    base_url: Url,
    provider_id: String,
    params: BTreeMap<String, String>,
}

impl std::fmt::Debug for HttpReportFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpReportFetcher")
            .field("base_url", &self.base_url.as_str())
            .field("provider_id", &self.provider_id)
            .finish_non_exhaustive()
    }
}

impl HttpReportFetcher {
    /// Build a fetcher for a provider
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::FetcherInit`] if the base URL is invalid or the
    /// HTTP client cannot be created.
    pub fn new(provider: &ProviderHarvestConfig, http: &HttpConfig) -> Result<Self, HarvestError> {
        let base_url = parse_base_url(&provider.base_url)
            .map_err(|reason| HarvestError::fetcher_init(&provider.provider_id, reason))?;

        let client = Client::builder()
            .timeout(http.request_timeout())
            .gzip(true)
            .user_agent(http.user_agent.clone())
            .build()
            .map_err(|e| HarvestError::fetcher_init(&provider.provider_id, e.to_string()))?;

        let rate = NonZeroU32::new(http.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_second(rate));

        Ok(Self {
            client,
            rate_limiter,
            base_url,
            provider_id: provider.provider_id.clone(),
            params: provider.params.clone(),
        })
    }

    fn report_url(&self, report_type: &str) -> Result<Url, FetchError> {
        self.base_url
            .join(&format!("reports/{}", report_type.to_lowercase()))
            .map_err(|e| FetchError::Failure(format!("invalid report url: {e}")))
    }

    fn split_by_month(
        &self,
        report_type: &str,
        begin: Month,
        end: Month,
        items: Vec<MonthItem>,
    ) -> Vec<ReportRecord> {
        let mut by_month: BTreeMap<Month, Vec<serde_json::Value>> = months_between(begin, end)
            .into_iter()
            .map(|m| (m, Vec::new()))
            .collect();

        for item in items {
            if let Some(bucket) = by_month.get_mut(&item.month) {
                bucket.push(item.data);
            }
        }

        by_month
            .into_iter()
            .map(|(month, data)| {
                ReportRecord::success(
                    self.provider_id.clone(),
                    report_type,
                    month,
                    serde_json::Value::Array(data),
                )
            })
            .collect()
    }
}

#[async_trait]
impl ReportFetcher for HttpReportFetcher {
    async fn fetch(
        &self,
        report_type: &str,
        begin: Month,
        end: Month,
    ) -> Result<Vec<ReportRecord>, FetchError> {
        self.rate_limiter.until_ready().await;

        let url = self.report_url(report_type)?;
        let begin_date = begin.to_string();
        let end_date = end.to_string();

        let response = self
            .client
            .get(url)
            .query(&[("begin_date", begin_date.as_str()), ("end_date", end_date.as_str())])
            .query(&self.params)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if let Some(err) = classify_status(status, &body) {
            tracing::debug!(
                provider = %self.provider_id,
                report_type,
                status = status.as_u16(),
                "Report request rejected"
            );
            return Err(err);
        }

        let parsed: ReportResponse = serde_json::from_str(&body)?;

        if parsed
            .exceptions
            .iter()
            .any(|e| e.code == RATE_LIMIT_EXCEPTION)
        {
            return Err(FetchError::RateLimited);
        }

        if parsed.items.is_empty() && !parsed.exceptions.is_empty() {
            let reason = parsed
                .exceptions
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(FetchError::InvalidReport(reason));
        }

        Ok(self.split_by_month(report_type, begin, end, parsed.items))
    }
}

fn parse_base_url(raw: &str) -> Result<Url, String> {
    if raw.trim().is_empty() {
        return Err("base_url is empty".to_string());
    }
    let mut url = Url::parse(raw).map_err(|e| format!("invalid base_url '{raw}': {e}"))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn classify_status(status: StatusCode, body: &str) -> Option<FetchError> {
    if status.is_success() {
        return None;
    }
    let excerpt: String = body.chars().take(MAX_REASON_LEN).collect();
    Some(match status {
        StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited,
        StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND | StatusCode::UNPROCESSABLE_ENTITY => {
            FetchError::InvalidReport(format!("HTTP {}: {excerpt}", status.as_u16()))
        }
        _ => FetchError::Failure(format!("HTTP {}: {excerpt}", status.as_u16())),
    })
}
