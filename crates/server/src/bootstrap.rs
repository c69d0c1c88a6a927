use std::sync::Arc;

use leadrelay_core::config::{AppConfig, ConfigError, LoadOptions};
use leadrelay_core::{ApplicationError, CascadeEngine, EngineSettings};
use leadrelay_db::{
    connect_with_config, migrations, DbPool, SqlCascadeStore, SqlResponsibilityRecorder,
};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub engine: CascadeEngine,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("cascade engine settings rejected: {0}")]
    Engine(#[source] ApplicationError),
}

#[cfg(test)]
pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let settings = EngineSettings::try_from(&config.cascade).map_err(BootstrapError::Engine)?;

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let engine = CascadeEngine::new(
        Arc::new(SqlCascadeStore::new(db_pool.clone())),
        Arc::new(SqlResponsibilityRecorder::new(db_pool.clone())),
        settings,
    );
    info!(
        event_name = "system.bootstrap.engine_ready",
        correlation_id = "bootstrap",
        sweep_interval_secs = config.cascade.sweep_interval_secs,
        on_config_disabled = config.cascade.on_config_disabled.as_str(),
        "cascade engine ready"
    );

    Ok(Application { config, db_pool, engine })
}
