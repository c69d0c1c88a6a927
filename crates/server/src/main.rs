mod api;
mod bootstrap;
mod health;
mod scheduler;

use std::time::Duration;

use anyhow::Result;
use leadrelay_core::config::{AppConfig, LoadOptions};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::scheduler::SweepScheduler;

fn init_logging(config: &AppConfig) {
    use leadrelay_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let cancel = CancellationToken::new();

    let sweeper = SweepScheduler::new(
        app.engine.clone(),
        Duration::from_secs(app.config.cascade.sweep_interval_secs),
    )
    .spawn(cancel.clone());

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    let router = health::router(app.db_pool.clone(), app.engine.clone())
        .merge(api::router(app.engine.clone()));

    info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "leadrelay-server started"
    );

    tokio::spawn(wait_for_shutdown(cancel.clone()));
    let shutdown = cancel.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "leadrelay-server stopping"
    );

    // The server can also stop on its own; make sure the sweeper follows it.
    cancel.cancel();
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    if tokio::time::timeout(grace, sweeper).await.is_err() {
        warn!(
            event_name = "system.server.sweeper_timeout",
            correlation_id = "shutdown",
            grace_secs = grace.as_secs(),
            "escalation sweep did not stop within the grace period"
        );
    }
    app.db_pool.close().await;

    Ok(())
}

async fn wait_for_shutdown(cancel: CancellationToken) {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(
            event_name = "system.server.signal_error",
            correlation_id = "shutdown",
            error = %error,
            "could not listen for shutdown signal"
        );
        return;
    }
    cancel.cancel();
}
