//! Report fetcher capability and the service-type registry
//!
//! Each remote report protocol provides one [`ReportFetcher`]. Providers name
//! their protocol through `service_type`; the [`FetcherRegistry`] maps that
//! name to a factory, populated once at startup.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::error::{FetchError, HarvestError};
use super::http::HttpReportFetcher;
use crate::calendar::Month;
use crate::config::HttpConfig;
use crate::models::{ProviderHarvestConfig, ReportRecord};

/// Service type of the built-in HTTP/JSON fetcher
pub const HTTP_JSON_SERVICE: &str = "http_json";

/// Fetches usage reports from one remote source
#[async_trait]
pub trait ReportFetcher: Send + Sync {
    /// Fetch `report_type` for every month from `begin` to `end` inclusive
    ///
    /// On success, returns one record per month spanned. Splitting a
    /// multi-month response into months is the fetcher's job.
    async fn fetch(
        &self,
        report_type: &str,
        begin: Month,
        end: Month,
    ) -> Result<Vec<ReportRecord>, FetchError>;
}

/// Builds a fetcher for a provider
pub type FetcherFactory =
    Arc<dyn Fn(&ProviderHarvestConfig) -> Result<Arc<dyn ReportFetcher>, HarvestError> + Send + Sync>;

/// Static map from service type to fetcher factory
#[derive(Clone, Default)]
pub struct FetcherRegistry {
    factories: HashMap<String, FetcherFactory>,
}

impl fmt::Debug for FetcherRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetcherRegistry")
            .field("service_types", &self.service_types())
            .finish()
    }
}

impl FetcherRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in protocol registered
    pub fn with_builtin(http: HttpConfig) -> Self {
        let mut registry = Self::new();
        registry.register(HTTP_JSON_SERVICE, move |provider| {
            let fetcher = HttpReportFetcher::new(provider, &http)?;
            Ok(Arc::new(fetcher) as Arc<dyn ReportFetcher>)
        });
        registry
    }

    /// Register (or replace) the factory for a service type
    pub fn register<F>(&mut self, service_type: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&ProviderHarvestConfig) -> Result<Arc<dyn ReportFetcher>, HarvestError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(service_type.into(), Arc::new(factory));
        self
    }

    /// Build the fetcher matching the provider's service type
    pub fn create(&self, provider: &ProviderHarvestConfig) -> Result<Arc<dyn ReportFetcher>, HarvestError> {
        let factory = self.factories.get(&provider.service_type).ok_or_else(|| {
            HarvestError::UnknownServiceType {
                service_type: provider.service_type.clone(),
            }
        })?;
        factory(provider)
    }

    /// Registered service types, sorted
    pub fn service_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}
