//! Unified error handling for the usage harvester
//!
//! Each module keeps its own error enum. [`Error`] wraps them all so the
//! service facade and the CLI can return one type, and [`ErrorCategory`] tells
//! callers whether a failure is a run-admission conflict, a harvesting
//! problem or bad configuration.
//!
//! ```rust,ignore
//! use usage_harvester::error::{Error, ErrorCategory, HarvestErrorTrait};
//!
//! fn handle_error(err: Error) {
//!     match err.category() {
//!         ErrorCategory::Admission => println!("Busy: {err}"),
//!         _ if err.is_recoverable() => println!("Retrying: {err}"),
//!         _ => eprintln!("Fatal error: {err}"),
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

pub use crate::calendar::CalendarError;
pub use crate::harvest::{FetchError, HarvestError};
pub use crate::orchestrator::OrchestratorError;
pub use crate::planner::PlanError;
pub use crate::scheduler::SchedulerError;
pub use crate::storage::StoreError;

/// Common trait for harvester error types
pub trait HarvestErrorTrait: std::error::Error {
    /// Check if this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Invalid month or range input
    Calendar,
    /// Remote report source errors (HTTP, timeout, rate limit)
    Network,
    /// Storage and I/O errors
    Storage,
    /// Configuration and validation errors
    Config,
    /// Trigger scheduling errors
    Scheduler,
    /// Job admission conflicts
    Admission,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Calendar => "calendar",
            Self::Network => "network",
            Self::Storage => "storage",
            Self::Config => "config",
            Self::Scheduler => "scheduler",
            Self::Admission => "admission",
            Self::Other => "other",
        }
    }
}

/// Unified error type for the usage harvester
#[derive(Error, Debug)]
pub enum Error {
    #[error("Calendar error: {0}")]
    Calendar(#[from] CalendarError),

    #[error("Plan error: {0}")]
    Plan(#[from] PlanError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Harvest error: {0}")]
    Harvest(#[from] HarvestError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl HarvestErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Fetch(e) => !matches!(e, FetchError::InvalidReport(_)),
            Self::Store(e) => e.is_transient(),
            Self::Scheduler(e) => e.is_recoverable(),
            Self::Orchestrator(e) => e.is_recoverable(),
            Self::Io(_) => true,
            Self::Calendar(_)
            | Self::Plan(_)
            | Self::Harvest(_)
            | Self::Config(_)
            | Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Calendar(_) => ErrorCategory::Calendar,
            Self::Fetch(_) => ErrorCategory::Network,
            Self::Plan(_) | Self::Harvest(_) | Self::Config(_) => ErrorCategory::Config,
            Self::Store(_) | Self::Io(_) => ErrorCategory::Storage,
            Self::Scheduler(SchedulerError::Store { .. }) => ErrorCategory::Storage,
            Self::Scheduler(_) => ErrorCategory::Scheduler,
            Self::Orchestrator(e) => e.category(),
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: err.to_string(),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
