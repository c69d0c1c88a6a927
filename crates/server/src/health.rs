use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use leadrelay_core::CascadeEngine;
use leadrelay_db::DbPool;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    engine: CascadeEngine,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub database: HealthCheck,
    /// Informational; a missing configuration does not make the service unready.
    pub cascade_config: HealthCheck,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool, engine: CascadeEngine) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool, engine })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let ready = database.status == "ready";
    let cascade_config =
        if ready { cascade_config_check(&state.engine).await } else { skipped_check() };

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "leadrelay-server runtime initialized".to_string(),
        },
        database,
        cascade_config,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

async fn cascade_config_check(engine: &CascadeEngine) -> HealthCheck {
    match engine.active_config().await {
        Ok(Some(config)) => HealthCheck {
            status: "ready",
            detail: format!(
                "config `{}` active with {} consultant(s)",
                config.id.0,
                config.queue.len()
            ),
        },
        Ok(None) => HealthCheck {
            status: "unconfigured",
            detail: "no active cascade configuration; new leads are not distributed".to_string(),
        },
        Err(error) => HealthCheck {
            status: "degraded",
            detail: format!("cascade configuration lookup failed: {error}"),
        },
    }
}

fn skipped_check() -> HealthCheck {
    HealthCheck { status: "skipped", detail: "database unavailable".to_string() }
}
