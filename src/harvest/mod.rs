//! Report harvesting
//!
//! - [`fetcher`]: the [`ReportFetcher`] capability and service-type registry
//! - [`http`]: built-in HTTP/JSON fetcher
//! - [`pipeline`]: concurrent execution of a fetch plan for one provider
//! - [`throttle`]: per-run adaptive concurrency limit

pub mod error;
pub mod fetcher;
pub mod http;
pub mod pipeline;
pub mod throttle;

pub use error::{FetchError, HarvestError};
pub use fetcher::{FetcherFactory, FetcherRegistry, ReportFetcher, HTTP_JSON_SERVICE};
pub use http::HttpReportFetcher;
pub use pipeline::{
    HarvestPipeline, HarvestRun, HarvestStats, PipelineConfig, StatsSnapshot, MISSING_MONTH_REASON,
};
pub use throttle::AdaptiveConcurrency;
