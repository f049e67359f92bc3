//! In-memory storage implementations
//!
//! Used by tests and by one-off CLI runs that should not touch a database.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::{ProviderRegistry, ReportStore, StoreResult, TriggerStore};
use crate::calendar::Month;
use crate::models::{ProviderHarvestConfig, ReportRecord};
use crate::scheduler::PeriodicTrigger;

// ============================================================================
// Provider Registry
// ============================================================================

/// Fixed provider list, typically loaded from the `[[providers]]` config
#[derive(Debug, Default)]
pub struct StaticProviderRegistry {
    providers: RwLock<BTreeMap<(String, String), ProviderHarvestConfig>>,
}

impl StaticProviderRegistry {
    pub fn new(providers: impl IntoIterator<Item = ProviderHarvestConfig>) -> Self {
        let providers = providers
            .into_iter()
            .map(|p| ((p.tenant_id.clone(), p.provider_id.clone()), p))
            .collect();
        Self {
            providers: RwLock::new(providers),
        }
    }

    /// Add or replace a provider
    pub async fn insert(&self, provider: ProviderHarvestConfig) {
        self.providers
            .write()
            .await
            .insert((provider.tenant_id.clone(), provider.provider_id.clone()), provider);
    }
}

#[async_trait]
impl ProviderRegistry for StaticProviderRegistry {
    async fn active_providers(&self, tenant_id: &str) -> StoreResult<Vec<ProviderHarvestConfig>> {
        Ok(self
            .providers
            .read()
            .await
            .values()
            .filter(|p| p.tenant_id == tenant_id && p.is_active())
            .cloned()
            .collect())
    }

    async fn by_id(
        &self,
        tenant_id: &str,
        provider_id: &str,
    ) -> StoreResult<Option<ProviderHarvestConfig>> {
        Ok(self
            .providers
            .read()
            .await
            .get(&(tenant_id.to_string(), provider_id.to_string()))
            .cloned())
    }
}

// ============================================================================
// Report Store
// ============================================================================

type RecordKey = (String, String, Month);

#[derive(Debug, Default)]
pub struct MemoryReportStore {
    records: RwLock<HashMap<RecordKey, ReportRecord>>,
}

impl MemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Every stored record, sorted by key
    pub async fn all(&self) -> Vec<ReportRecord> {
        let mut records: Vec<ReportRecord> = self.records.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.key().cmp(&b.key()));
        records
    }
}

#[async_trait]
impl ReportStore for MemoryReportStore {
    async fn existing(&self, provider_id: &str, report_type: &str) -> StoreResult<Vec<ReportRecord>> {
        let mut records: Vec<ReportRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.provider_id == provider_id && r.report_type == report_type)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.month);
        Ok(records)
    }

    async fn upsert(&self, record: ReportRecord) -> StoreResult<()> {
        let key = (
            record.provider_id.clone(),
            record.report_type.clone(),
            record.month,
        );
        let mut records = self.records.write().await;
        if let Some(merged) = record.merge_onto(records.get(&key)) {
            records.insert(key, merged);
        }
        Ok(())
    }
}

// ============================================================================
// Trigger Store
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryTriggerStore {
    triggers: RwLock<BTreeMap<String, PeriodicTrigger>>,
}

impl MemoryTriggerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TriggerStore for MemoryTriggerStore {
    async fn get(&self, tenant_id: &str) -> StoreResult<Option<PeriodicTrigger>> {
        Ok(self.triggers.read().await.get(tenant_id).cloned())
    }

    async fn put(&self, trigger: &PeriodicTrigger) -> StoreResult<()> {
        self.triggers
            .write()
            .await
            .insert(trigger.tenant_id.clone(), trigger.clone());
        Ok(())
    }

    async fn delete(&self, tenant_id: &str) -> StoreResult<bool> {
        Ok(self.triggers.write().await.remove(tenant_id).is_some())
    }

    async fn list(&self) -> StoreResult<Vec<PeriodicTrigger>> {
        Ok(self.triggers.read().await.values().cloned().collect())
    }
}
