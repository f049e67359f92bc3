use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Subcommand;

use usage_harvester::config::Config;
use usage_harvester::scheduler::{build_schedule, upcoming_fire_times, Interval};

use super::{build_services, Services};

#[derive(Subcommand)]
pub enum TriggerAction {
    /// Create or replace a tenant's trigger
    Set {
        #[arg(short, long)]
        tenant: String,

        /// daily, weekly or monthly
        #[arg(short, long)]
        interval: String,

        /// Anchor instant (RFC 3339); defaults to now
        #[arg(short, long)]
        start: Option<String>,
    },

    /// Remove a tenant's trigger
    Delete {
        #[arg(short, long)]
        tenant: String,
    },

    /// Show upcoming fire times
    Next {
        #[arg(short, long)]
        tenant: String,

        #[arg(short = 'n', long, default_value = "5")]
        count: usize,
    },
}

pub async fn trigger(config: Config, action: TriggerAction) -> Result<()> {
    let Services { service, .. } = build_services(&config)?;

    match action {
        TriggerAction::Set {
            tenant,
            interval,
            start,
        } => {
            let interval: Interval = interval.parse()?;
            let start_at = match start {
                Some(s) => DateTime::parse_from_rfc3339(&s)
                    .with_context(|| format!("Invalid start instant: {s}"))?
                    .with_timezone(&Utc),
                None => Utc::now(),
            };
            service
                .upsert_periodic_config(&tenant, interval, start_at)
                .await?;
            let next = service.scheduler().next_fire(&tenant).await?;
            println!("Trigger for '{tenant}' set: {interval} from {start_at}");
            println!("Next fire: {next}");
        }

        TriggerAction::Delete { tenant } => {
            service.delete_periodic_config(&tenant).await?;
            println!("Trigger for '{tenant}' deleted");
        }

        TriggerAction::Next { tenant, count } => {
            let trigger = service
                .scheduler()
                .get(&tenant)
                .await?
                .with_context(|| format!("No trigger configured for tenant '{tenant}'"))?;
            println!("Schedule: {}", build_schedule(&trigger));
            for fire_time in upcoming_fire_times(&trigger, Utc::now(), count) {
                println!("  {fire_time}");
            }
        }
    }
    Ok(())
}
