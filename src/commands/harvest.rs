use anyhow::Result;

use usage_harvester::config::Config;
use usage_harvester::error::{ErrorCategory, HarvestErrorTrait};

use super::{build_services, Services};

/// One-off harvest of a tenant or a single provider
pub async fn harvest(config: Config, tenant: String, provider: Option<String>) -> Result<()> {
    let Services { service, .. } = build_services(&config)?;

    let requested = match &provider {
        Some(provider) => service.request_provider_harvest(&tenant, provider).await,
        None => service.request_tenant_harvest(&tenant),
    };
    let ticket = match requested {
        Ok(ticket) => ticket,
        Err(e) if e.category() == ErrorCategory::Admission => {
            anyhow::bail!("Harvest not started: {e}")
        }
        Err(e) => return Err(e.into()),
    };

    println!("Accepted job {} ({})", ticket.job_id, ticket.key);
    let summary = ticket.wait().await?;
    println!("{}", summary.display());
    println!(
        "Total: {} records written, {} placeholders",
        summary.records_written(),
        summary.placeholders()
    );
    Ok(())
}
