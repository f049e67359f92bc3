//! Error types for the scheduler module

use std::fmt;

use crate::storage::StoreError;

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Scheduler-specific errors
#[derive(Debug)]
pub enum SchedulerError {
    /// Interval name not recognised
    UnsupportedInterval {
        interval: String,
    },

    /// No trigger configured for tenant
    NotFound {
        tenant_id: String,
    },

    /// Trigger configuration error
    TriggerConfigError {
        field: String,
        reason: String,
    },

    /// Trigger store failure
    Store {
        operation: String,
        reason: String,
    },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedInterval { interval } => {
                write!(
                    f,
                    "Unsupported interval '{}'. Valid options: daily, weekly, monthly",
                    interval
                )
            }
            Self::NotFound { tenant_id } => {
                write!(f, "No periodic trigger configured for tenant '{}'", tenant_id)
            }
            Self::TriggerConfigError { field, reason } => {
                write!(f, "Trigger config error in '{}': {}", field, reason)
            }
            Self::Store { operation, reason } => {
                write!(f, "Trigger store error during '{}': {}", operation, reason)
            }
        }
    }
}

impl std::error::Error for SchedulerError {}

impl SchedulerError {
    pub fn unsupported_interval(interval: impl Into<String>) -> Self {
        Self::UnsupportedInterval {
            interval: interval.into(),
        }
    }

    pub fn not_found(tenant_id: impl Into<String>) -> Self {
        Self::NotFound {
            tenant_id: tenant_id.into(),
        }
    }

    /// Create a trigger config error
    pub fn trigger_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TriggerConfigError {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Wrap a trigger store failure with the operation that hit it
    pub fn store(operation: impl Into<String>, err: StoreError) -> Self {
        Self::Store {
            operation: operation.into(),
            reason: err.to_string(),
        }
    }

    /// Check if the error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Store { .. })
    }
}
