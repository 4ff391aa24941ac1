//! Main entry point for the metronome scheduler service.
//!
//! Boot order:
//! - Connects to the database and runs migrations
//! - Connects to the admin service
//! - Replays instants missed while the scheduler was down
//! - Keeps live schedules ticking until SIGINT/SIGTERM

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use metronome::{
    Config, GrpcAdminClient, PostgresRepository, SchedulerMetrics, WorkflowExecutor,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "metronome=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("starting metronome scheduler");

    let config = Config::from_env()?;

    let repository = Arc::new(
        PostgresRepository::connect(&config.database_url)
            .await
            .context("failed to connect to database")?,
    );
    info!("connected to database");

    let admin = Arc::new(
        GrpcAdminClient::connect(config.admin_endpoint.clone())
            .await
            .with_context(|| {
                format!("failed to connect to admin service at {}", config.admin_endpoint)
            })?,
    );
    info!(endpoint = %config.admin_endpoint, "connected to admin service");

    let metrics_registry = prometheus::Registry::new();
    let metrics = SchedulerMetrics::new()?;
    metrics.register(&metrics_registry)?;

    let executor = WorkflowExecutor::new(
        repository.clone(),
        repository,
        admin,
        metrics,
        config.executor_config(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(err) = wait_for_shutdown().await {
            error!(error = %err, "shutdown signal listener failed");
            return;
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    executor.run(shutdown_rx).await?;

    info!("shutdown complete");
    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal as unix_signal, SignalKind};

        let mut terminate = unix_signal(SignalKind::terminate())?;
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Ctrl+C received");
            }
            _ = terminate.recv() => {
                info!("SIGTERM received");
            }
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!("Ctrl+C received");
        Ok(())
    }
}
