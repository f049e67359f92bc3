//! Job orchestration
//!
//! - [`registry`]: process-wide job uniqueness (one lock, RAII release)
//! - [`jobs`]: tenant and provider jobs driving planner, pipeline and store
//! - [`history`]: job audit sinks
//! - [`service`]: the facade an outer API calls, and the trigger fire loop
//!
//! Admission rules:
//!
//! | Request            | Conflicts with                              | Error               |
//! |--------------------|---------------------------------------------|---------------------|
//! | tenant job         | any running job of the tenant               | `AlreadyInProgress` |
//! | provider job       | same `(tenant, provider)`                   | `AlreadyScheduled`  |
//! | provider job       | running tenant job of the tenant            | `AlreadyInProgress` |
//!
//! A trigger fire only requests a tenant job; the scheduler holds no job key.

pub mod error;
pub mod history;
pub mod jobs;
pub mod registry;
pub mod service;

pub use error::OrchestratorError;
pub use history::{
    JobDescriptor, JobHistorySink, JobOrigin, JobOutcome, MemoryJobHistory, TracingJobHistory,
};
pub use jobs::{JobSummary, JobTicket, Orchestrator, ProviderRunSummary};
pub use registry::{JobGuard, JobKey, JobRegistry, JobScope, RunningJob};
pub use service::HarvestService;
