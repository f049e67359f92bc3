//! Storage collaborators
//!
//! Trait-based abstractions over everything the engine reads or persists,
//! with in-memory and SQLite implementations.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Planner / Orchestrator / Scheduler             │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │     ProviderRegistry   ReportStore   TriggerStore           │
//! └─────────────────────────────────────────────────────────────┘
//!                  │                          │
//!                  ▼                          ▼
//!        ┌─────────────────┐        ┌─────────────────┐
//!        │     Memory      │        │     SQLite      │
//!        └─────────────────┘        └─────────────────┘
//! ```
//!
//! Every [`ReportStore::upsert`] implementation applies
//! [`ReportRecord::merge_onto`], so a stale failure never overwrites a
//! satisfied month.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{ProviderHarvestConfig, ReportRecord};
use crate::scheduler::PeriodicTrigger;

pub use memory::{MemoryReportStore, MemoryTriggerStore, StaticProviderRegistry};
pub use sqlite::{SqliteReportStore, SqliteTriggerStore};

/// Storage errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt stored value: {0}")]
    Corrupt(String),

    #[error("Store lock poisoned")]
    Poisoned,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn corrupt(reason: impl Into<String>) -> Self {
        Self::Corrupt(reason.into())
    }

    /// Transient failures worth retrying
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Database(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            Self::Io(_) => true,
            _ => false,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

// ============================================================================
// Collaborator Traits
// ============================================================================

/// Source of provider harvesting configuration
#[async_trait]
pub trait ProviderRegistry: Send + Sync {
    /// Providers of a tenant whose harvesting status is active
    async fn active_providers(&self, tenant_id: &str) -> StoreResult<Vec<ProviderHarvestConfig>>;

    /// One provider of a tenant, whatever its status
    async fn by_id(
        &self,
        tenant_id: &str,
        provider_id: &str,
    ) -> StoreResult<Option<ProviderHarvestConfig>>;
}

/// Persisted report records
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// All records of one provider and report type
    async fn existing(&self, provider_id: &str, report_type: &str) -> StoreResult<Vec<ReportRecord>>;

    /// Insert or merge a record keyed by (provider, report type, month)
    async fn upsert(&self, record: ReportRecord) -> StoreResult<()>;
}

/// Persisted periodic triggers, one per tenant
#[async_trait]
pub trait TriggerStore: Send + Sync {
    async fn get(&self, tenant_id: &str) -> StoreResult<Option<PeriodicTrigger>>;

    async fn put(&self, trigger: &PeriodicTrigger) -> StoreResult<()>;

    /// Returns whether a trigger existed
    async fn delete(&self, tenant_id: &str) -> StoreResult<bool>;

    async fn list(&self) -> StoreResult<Vec<PeriodicTrigger>>;
}
