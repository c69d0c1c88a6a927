pub mod config;
pub mod doctor;
pub mod migrate;
pub mod report;
pub mod seed;
pub mod sweep;

use std::sync::Arc;

use leadrelay_core::config::{AppConfig, LoadOptions};
use leadrelay_core::{CascadeEngine, EngineSettings};
use leadrelay_db::{
    connect_with_config, migrations, DbPool, SqlCascadeStore, SqlResponsibilityRecorder,
};
use serde::Serialize;
use tokio::runtime::Runtime;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
        };
        Self { exit_code, output: serialize_payload(payload) }
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

/// `(error_class, message, exit_code)` carried out of an async command body.
pub(crate) type StepFailure = (&'static str, String, u8);

pub(crate) fn load_config(command: &str) -> Result<AppConfig, CommandResult> {
    AppConfig::load(LoadOptions::default()).map_err(|error| {
        CommandResult::failure(
            command,
            "config_validation",
            format!("configuration issue: {error}"),
            2,
        )
    })
}

pub(crate) fn build_runtime(command: &str) -> Result<Runtime, CommandResult> {
    tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
        CommandResult::failure(
            command,
            "runtime_init",
            format!("failed to initialize async runtime: {error}"),
            3,
        )
    })
}

/// Connects, applies pending migrations and wires the SQL-backed engine.
pub(crate) async fn open_engine(config: &AppConfig) -> Result<(DbPool, CascadeEngine), StepFailure> {
    let settings = EngineSettings::try_from(&config.cascade)
        .map_err(|error| ("config_validation", error.to_string(), 2u8))?;
    let pool = connect_with_config(&config.database)
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
    migrations::run_pending(&pool).await.map_err(|error| ("migration", error.to_string(), 5u8))?;

    let engine = CascadeEngine::new(
        Arc::new(SqlCascadeStore::new(pool.clone())),
        Arc::new(SqlResponsibilityRecorder::new(pool.clone())),
        settings,
    );
    Ok((pool, engine))
}
