//! Test fixtures for integration tests
//!
//! Provides a scripted [`ReportFetcher`] that records every call together
//! with the number of fetches in flight when it started.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use usage_harvester::calendar::{months_between, Month};
use usage_harvester::harvest::{FetchError, PipelineConfig, ReportFetcher};
use usage_harvester::models::{FetchRange, ReportRecord};
use usage_harvester::utils::retry::RetryConfig;

/// What the scripted source answers for one call
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub enum Reply {
    /// One success record per month
    Ok,
    /// Success records for the listed months only
    Partial(Vec<Month>),
    RateLimited,
    Invalid(&'static str),
    Fail(&'static str),
}

type Script = dyn Fn(&FetchRange, usize) -> Reply + Send + Sync;

/// One observed fetch call
#[derive(Debug, Clone)]
pub struct Call {
    pub range: FetchRange,
    /// 1-based attempt number for this exact range
    pub attempt: usize,
    /// Fetches in flight when this one started, itself included
    pub in_flight: usize,
}

/// Fetcher driven by a closure of `(range, attempt) -> Reply`
///
/// Successful replies take `delay`; every other reply comes back after a
/// fifth of it.
pub struct ScriptedFetcher {
    script: Box<Script>,
    delay: Duration,
    calls: Mutex<Vec<Call>>,
    attempts: Mutex<HashMap<FetchRange, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

#[allow(dead_code)]
impl ScriptedFetcher {
    pub fn new(
        delay: Duration,
        script: impl Fn(&FetchRange, usize) -> Reply + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            delay,
            calls: Mutex::new(Vec::new()),
            attempts: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    /// Always answers with one record per month
    pub fn healthy(delay: Duration) -> Arc<Self> {
        Self::new(delay, |_, _| Reply::Ok)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReportFetcher for ScriptedFetcher {
    async fn fetch(
        &self,
        report_type: &str,
        begin: Month,
        end: Month,
    ) -> Result<Vec<ReportRecord>, FetchError> {
        let range = FetchRange::new(report_type, begin, end).unwrap();
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let count = attempts.entry(range.clone()).or_default();
            *count += 1;
            *count
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.calls.lock().unwrap().push(Call {
            range: range.clone(),
            attempt,
            in_flight: now,
        });

        let reply = (self.script)(&range, attempt);
        let delay = match reply {
            Reply::Ok | Reply::Partial(_) => self.delay,
            _ => self.delay / 5,
        };
        tokio::time::sleep(delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match reply {
            Reply::Ok => Ok(records(report_type, months_between(begin, end))),
            Reply::Partial(months) => Ok(records(report_type, months)),
            Reply::RateLimited => Err(FetchError::RateLimited),
            Reply::Invalid(reason) => Err(FetchError::InvalidReport(reason.to_string())),
            Reply::Fail(message) => Err(FetchError::Failure(message.to_string())),
        }
    }
}

fn records(report_type: &str, months: Vec<Month>) -> Vec<ReportRecord> {
    months
        .into_iter()
        .map(|month| {
            ReportRecord::success(
                "scripted",
                report_type,
                month,
                serde_json::json!([{ "month": month.to_string(), "total": 1 }]),
            )
        })
        .collect()
}

/// Pipeline settings with no backoff between rate-limited attempts
#[allow(dead_code)]
pub fn fast_pipeline(max_concurrency: usize) -> PipelineConfig {
    PipelineConfig {
        max_concurrency,
        rate_limit_attempts: 3,
        backoff: RetryConfig::immediate(3),
        channel_buffer_size: 16,
    }
}
