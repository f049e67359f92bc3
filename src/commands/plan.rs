use anyhow::{Context, Result};
use chrono::Utc;

use usage_harvester::calendar::Month;
use usage_harvester::config::Config;
use usage_harvester::planner::Planner;
use usage_harvester::storage::{ReportStore, SqliteReportStore};

/// Print the fetch ranges a provider still needs
pub async fn plan(
    config: Config,
    tenant: String,
    provider: String,
    as_of: Option<String>,
) -> Result<()> {
    let provider_config = config
        .providers
        .iter()
        .find(|p| p.tenant_id == tenant && p.provider_id == provider)
        .cloned()
        .with_context(|| format!("Provider '{provider}' not configured for tenant '{tenant}'"))?;

    let last_completed = match as_of {
        Some(month) => month.parse::<Month>()?,
        None => Month::last_completed(Utc::now().date_naive()),
    };

    let store = SqliteReportStore::open(&config.database.sqlite_path)?;
    let mut existing = Vec::new();
    for report_type in &provider_config.requested_report_types {
        existing.extend(store.existing(&provider, report_type).await?);
    }

    let planner = Planner::new(config.harvest.planner());
    match planner.plan_at(&provider_config, &existing, last_completed) {
        Ok(ranges) if ranges.is_empty() => println!("Nothing to harvest up to {last_completed}"),
        Ok(ranges) => {
            println!("{} ranges up to {last_completed}:", ranges.len());
            for range in ranges {
                println!("  {range} ({} months)", range.len_months());
            }
        }
        Err(e) => println!("{e}"),
    }
    Ok(())
}
