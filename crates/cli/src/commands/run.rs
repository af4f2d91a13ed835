//! `run` command implementation.

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::session::{Session, SessionConfig};

/// Execute the `run` command
pub async fn run_session(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    let mut config = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    // Apply CLI overrides
    if let Some(threads) = args.threads {
        if threads == 0 {
            anyhow::bail!("--threads must be >= 1");
        }
        info!(threads, "Overriding client thread count from CLI");
        config.client.thread_count = threads;
    }

    info!(
        threads = config.client.thread_count,
        subscriptions = config.subscriptions.len(),
        deserializers = config.deserializers.len(),
        "Configuration loaded"
    );

    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        for sub in &config.subscriptions {
            println!("  - {}", sub.topic_string());
        }
        return Ok(());
    }

    if args.metrics_port != 0 {
        observability::init_metrics_only(args.metrics_port)?;
        info!("Metrics endpoint available on port {}", args.metrics_port);
    }

    let session = Session::new(SessionConfig {
        config,
        publish_rate: args.publish_rate,
        drop_every: (args.drop_every > 0).then(|| Duration::from_secs(args.drop_every)),
    })
    .start()?;

    info!("Session running...");

    let duration = args.duration;
    let elapsed = async move {
        if duration == 0 {
            std::future::pending::<()>().await;
        } else {
            tokio::time::sleep(Duration::from_secs(duration)).await;
        }
    };

    tokio::select! {
        _ = elapsed => {
            info!(duration_secs = duration, "Session duration elapsed");
        }
        result = shutdown_signal() => {
            result?;
            warn!("Received shutdown signal, stopping session...");
        }
    }

    info!(rows_delivered = session.rows_delivered(), "Stopping session");

    // shutdown joins worker threads, keep it off the async runtime
    let stats = tokio::task::spawn_blocking(move || session.stop())
        .await
        .context("Session shutdown task failed")?;

    info!(
        rows_published = stats.rows_published,
        rows_delivered = stats.delivery.total_rows,
        handler_calls = stats.delivery.total_calls,
        duration_secs = stats.duration.as_secs_f64(),
        "Session completed"
    );
    stats.print_summary();

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .context("Failed to install SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("Failed to install Ctrl+C handler")?,
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("Failed to install Ctrl+C handler")?;

    Ok(())
}
