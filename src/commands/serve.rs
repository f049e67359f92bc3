use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use usage_harvester::config::Config;
use usage_harvester::metrics;

use super::{build_services, Services};

/// Run the trigger scheduler and turn fires into tenant jobs until Ctrl-C
pub async fn serve(config: Config) -> Result<()> {
    if let Err(e) = metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics disabled");
    }

    let Services { service, fired } = build_services(&config)?;
    service.scheduler().start().await?;
    println!("{}", service.scheduler().status().await.display());

    let shutdown = CancellationToken::new();
    let trigger_loop = {
        let service = service.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { service.run_trigger_loop(fired, shutdown).await })
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown requested");

    shutdown.cancel();
    service.scheduler().stop().await;
    if let Err(e) = trigger_loop.await {
        tracing::warn!(error = %e, "Trigger loop ended abnormally");
    }

    let running = service.orchestrator().running_jobs();
    if !running.is_empty() {
        tracing::warn!(jobs = running.len(), "Exiting with harvest jobs still running");
    }

    if metrics::metrics_initialized() {
        match metrics::encode_metrics() {
            Ok(text) => tracing::debug!(metrics = %text, "Final metrics"),
            Err(e) => tracing::warn!(error = %e, "Failed to encode metrics"),
        }
    }

    Ok(())
}
