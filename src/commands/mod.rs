pub mod harvest;
pub mod plan;
pub mod serve;
pub mod trigger;

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

use usage_harvester::config::Config;
use usage_harvester::harvest::FetcherRegistry;
use usage_harvester::orchestrator::{HarvestService, Orchestrator};
use usage_harvester::scheduler::{TriggerFired, TriggerScheduler};
use usage_harvester::storage::{SqliteReportStore, SqliteTriggerStore, StaticProviderRegistry};

// Re-export command functions for convenience
pub use harvest::harvest;
pub use plan::plan;
pub use serve::serve;
pub use trigger::{trigger, TriggerAction};

/// Load and validate configuration from a file, or from the environment
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Everything a command needs to talk to the engine
pub struct Services {
    pub service: HarvestService,
    pub fired: mpsc::Receiver<TriggerFired>,
}

/// Wire stores, fetchers, orchestrator and scheduler from configuration
pub fn build_services(config: &Config) -> Result<Services> {
    let sqlite_path = &config.database.sqlite_path;
    let reports = SqliteReportStore::open(sqlite_path)
        .with_context(|| format!("Failed to open report store at {}", sqlite_path.display()))?;
    let triggers = SqliteTriggerStore::open(sqlite_path)
        .with_context(|| format!("Failed to open trigger store at {}", sqlite_path.display()))?;

    let orchestrator = Orchestrator::new(
        Arc::new(StaticProviderRegistry::new(config.providers.clone())),
        Arc::new(reports),
        FetcherRegistry::with_builtin(config.http.clone()),
    )
    .with_config(&config.harvest);

    let (scheduler, fired) = TriggerScheduler::new(Arc::new(triggers));

    Ok(Services {
        service: HarvestService::new(orchestrator, scheduler),
        fired,
    })
}
