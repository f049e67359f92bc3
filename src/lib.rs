//! usage-harvester - Multi-tenant usage report harvester
//!
//! Plans which monthly usage reports are still missing per provider, fetches
//! them concurrently from remote report sources, persists one record per
//! `(provider, report type, month)`, and fires periodic tenant-wide harvests.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`calendar`] - Year-month arithmetic and range parsing
//! - [`models`] - Fetch ranges, report records and provider configuration
//! - [`planner`] - Gap detection and range compression
//! - [`harvest`] - Report fetchers and the adaptive fetch pipeline
//! - [`scheduler`] - Periodic triggers and the trigger scheduler service
//! - [`orchestrator`] - Job admission, tenant/provider jobs, service facade
//! - [`storage`] - Collaborator traits with in-memory and SQLite stores
//! - [`config`] - Configuration management and settings
//! - [`metrics`] - Prometheus metrics
//! - [`utils`] - Retry helpers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use usage_harvester::config::Config;
//! use usage_harvester::harvest::FetcherRegistry;
//! use usage_harvester::orchestrator::{JobOrigin, Orchestrator};
//! use usage_harvester::storage::{MemoryReportStore, StaticProviderRegistry};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let orchestrator = Orchestrator::new(
//!         Arc::new(StaticProviderRegistry::new(config.providers.clone())),
//!         Arc::new(MemoryReportStore::new()),
//!         FetcherRegistry::with_builtin(config.http.clone()),
//!     )
//!     .with_config(&config.harvest);
//!
//!     let summary = orchestrator
//!         .start_tenant_job("acme", JobOrigin::Manual)?
//!         .wait()
//!         .await?;
//!     println!("{}", summary.display());
//!     Ok(())
//! }
//! ```

pub mod calendar;
pub mod config;
pub mod error;
pub mod harvest;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod planner;
pub mod scheduler;
pub mod storage;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::calendar::{months_between, Month};
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorCategory, HarvestErrorTrait, Result};
    pub use crate::harvest::{FetchError, FetcherRegistry, HarvestPipeline, ReportFetcher};
    pub use crate::models::{FetchRange, ProviderHarvestConfig, ReportRecord};
    pub use crate::orchestrator::{HarvestService, JobOrigin, Orchestrator};
    pub use crate::planner::Planner;
    pub use crate::scheduler::{Interval, PeriodicTrigger, TriggerScheduler};
}

// Direct re-exports for convenience
pub use calendar::Month;
pub use models::{FetchRange, ReportRecord};
