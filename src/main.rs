use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::TriggerAction;

#[derive(Parser)]
#[command(
    name = "harvester",
    version,
    about = "Multi-tenant usage report harvester with periodic triggers",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML); falls back to HARVESTER_* variables
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); defaults to the configured format
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the trigger scheduler until interrupted
    Serve,

    /// Harvest a tenant, or one of its providers, and wait for the result
    Harvest {
        /// Tenant to harvest
        #[arg(short, long)]
        tenant: String,

        /// Restrict the run to one provider
        #[arg(short, long)]
        provider: Option<String>,
    },

    /// Print the fetch ranges a provider still needs
    Plan {
        #[arg(short, long)]
        tenant: String,

        #[arg(short, long)]
        provider: String,

        /// Plan as if this were the last completed month (YYYY-MM)
        #[arg(long)]
        as_of: Option<String>,
    },

    /// Manage periodic harvest triggers
    Trigger {
        #[command(subcommand)]
        action: TriggerAction,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = commands::load_config(cli.config.as_deref())?;

    // Initialize tracing/logging
    let log_format = cli.log_format.as_deref().unwrap_or(&config.logging.format);
    setup_tracing(log_format, &config.logging.level, cli.verbose)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "usage-harvester starting");

    match cli.command {
        Commands::Serve => {
            tracing::info!(providers = config.providers.len(), "Starting serve command");
            commands::serve(config).await?;
        }

        Commands::Harvest { tenant, provider } => {
            tracing::info!(tenant = %tenant, provider = ?provider, "Starting harvest command");
            commands::harvest(config, tenant, provider).await?;
        }

        Commands::Plan {
            tenant,
            provider,
            as_of,
        } => {
            tracing::info!(tenant = %tenant, provider = %provider, "Starting plan command");
            commands::plan(config, tenant, provider, as_of).await?;
        }

        Commands::Trigger { action } => {
            commands::trigger(config, action).await?;
        }
    }

    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { level };
    let env_filter = tracing_subscriber::EnvFilter::try_new(format!(
        "usage_harvester={level},harvester={level},warn"
    ))?;

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
