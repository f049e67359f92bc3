//! Common test utilities

use usage_harvester::calendar::Month;
use usage_harvester::models::ProviderHarvestConfig;

/// Parse a `YYYY-MM` month
pub fn m(s: &str) -> Month {
    s.parse().unwrap()
}

/// Active provider with a fixed range
#[allow(dead_code)]
pub fn provider(
    tenant: &str,
    provider_id: &str,
    report_types: &[&str],
    start: &str,
    end: &str,
) -> ProviderHarvestConfig {
    let mut config =
        ProviderHarvestConfig::new(tenant, provider_id, report_types.iter().copied(), m(start));
    config.range_end = Some(m(end));
    config
}
