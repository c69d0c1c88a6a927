//! Cascade JSON API.
//!
//! Reporting:
//! - `GET  /cascade/metrics?start=&end=`          : totals and conversion rate
//! - `GET  /cascade/active`                       : open entries by urgency
//! - `GET  /cascade/ranking?start=&end=`          : per-consultant performance
//! - `GET  /cascade/stuck`                        : leads whose queue ran out
//! - `GET  /cascade/clients/{client_id}/entries`  : one client's cascade
//!
//! Operations:
//! - `POST /cascade/sweep`                        : run an escalation sweep now
//! - `POST /cascade/clients/{client_id}/reassign` : manual reassignment
//! - `GET  /cascade/config`, `PUT /cascade/config` : administrator configuration
//!
//! Lifecycle hooks (always `202 Accepted`):
//! - `POST /hooks/lead-created`
//! - `POST /hooks/appointment-booked`

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use leadrelay_core::cascade::{ActiveAssignment, CascadeMetrics, ConsultantRanking, StuckLead};
use leadrelay_core::{
    ApplicationError, CascadeConfig, CascadeConfigId, CascadeEngine, CascadeEntry,
    CascadeLifecycle, ClientId, ConsultantId, DistributionMethod, InterfaceError, LeadId,
    LeadLifecycleHooks, ReportingPeriod, ResponsibilityChange, SweepReport,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

const DEFAULT_PERIOD_DAYS: i64 = 30;

#[derive(Clone)]
pub struct ApiState {
    engine: CascadeEngine,
    lifecycle: CascadeLifecycle,
}

impl ApiState {
    pub fn new(engine: CascadeEngine) -> Self {
        let lifecycle = engine.lifecycle();
        Self { engine, lifecycle }
    }
}

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct PeriodQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub period: ReportingPeriod,
    pub metrics: CascadeMetrics,
}

#[derive(Debug, Serialize)]
pub struct RankingResponse {
    pub period: ReportingPeriod,
    pub consultants: Vec<ConsultantRanking>,
}

#[derive(Debug, Deserialize)]
pub struct LeadCreatedHook {
    pub lead_id: String,
    pub client_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AppointmentBookedHook {
    pub client_id: String,
    pub consultant_id: String,
}

#[derive(Debug, Serialize)]
pub struct HookAccepted {
    pub accepted: bool,
    pub correlation_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ReassignRequest {
    pub consultant_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ConfigUpdateRequest {
    pub id: Option<String>,
    pub active: Option<bool>,
    pub distribution_method: Option<DistributionMethod>,
    pub queue: Vec<String>,
    pub sla_hours_per_step: u32,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub correlation_id: String,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router(engine: CascadeEngine) -> Router {
    Router::new()
        .route("/cascade/metrics", get(metrics))
        .route("/cascade/active", get(active_assignments))
        .route("/cascade/ranking", get(ranking))
        .route("/cascade/stuck", get(stuck_leads))
        .route("/cascade/clients/{client_id}/entries", get(client_entries))
        .route("/cascade/clients/{client_id}/reassign", post(reassign))
        .route("/cascade/sweep", post(sweep))
        .route("/cascade/config", get(get_config).put(put_config))
        .route("/hooks/lead-created", post(lead_created))
        .route("/hooks/appointment-booked", post(appointment_booked))
        .with_state(ApiState::new(engine))
}

// ---------------------------------------------------------------------------
// Reporting
// ---------------------------------------------------------------------------

async fn metrics(
    State(state): State<ApiState>,
    Query(query): Query<PeriodQuery>,
) -> ApiResult<MetricsResponse> {
    let correlation_id = new_correlation_id();
    let period = resolve_period(&query, Utc::now()).map_err(|e| api_error(e, &correlation_id))?;
    let metrics = state.engine.metrics(period).await.map_err(|e| api_error(e, &correlation_id))?;

    Ok(Json(MetricsResponse { period, metrics }))
}

async fn active_assignments(State(state): State<ApiState>) -> ApiResult<Vec<ActiveAssignment>> {
    let correlation_id = new_correlation_id();
    let active =
        state.engine.active_assignments().await.map_err(|e| api_error(e, &correlation_id))?;

    Ok(Json(active))
}

async fn ranking(
    State(state): State<ApiState>,
    Query(query): Query<PeriodQuery>,
) -> ApiResult<RankingResponse> {
    let correlation_id = new_correlation_id();
    let period = resolve_period(&query, Utc::now()).map_err(|e| api_error(e, &correlation_id))?;
    let consultants =
        state.engine.user_ranking(period).await.map_err(|e| api_error(e, &correlation_id))?;

    Ok(Json(RankingResponse { period, consultants }))
}

async fn stuck_leads(State(state): State<ApiState>) -> ApiResult<Vec<StuckLead>> {
    let correlation_id = new_correlation_id();
    let stuck = state.engine.stuck_leads().await.map_err(|e| api_error(e, &correlation_id))?;

    Ok(Json(stuck))
}

async fn client_entries(
    Path(client_id): Path<String>,
    State(state): State<ApiState>,
) -> ApiResult<Vec<CascadeEntry>> {
    let correlation_id = new_correlation_id();
    let history = state
        .engine
        .client_history(&ClientId(client_id))
        .await
        .map_err(|e| api_error(e, &correlation_id))?;

    Ok(Json(history))
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

async fn sweep(State(state): State<ApiState>) -> ApiResult<SweepReport> {
    let correlation_id = new_correlation_id();
    let report = state.engine.sweep().await.map_err(|e| api_error(e, &correlation_id))?;

    info!(
        event_name = "cascade.api.sweep",
        correlation_id = %correlation_id,
        examined = report.examined,
        escalated = report.escalated,
        "on-demand sweep completed"
    );

    Ok(Json(report))
}

async fn reassign(
    Path(client_id): Path<String>,
    State(state): State<ApiState>,
    Json(body): Json<ReassignRequest>,
) -> ApiResult<ResponsibilityChange> {
    let correlation_id = new_correlation_id();
    let change = state
        .engine
        .reassign_manually(&ClientId(client_id), &ConsultantId(body.consultant_id))
        .await
        .map_err(|e| api_error(e, &correlation_id))?;

    Ok(Json(change))
}

async fn get_config(State(state): State<ApiState>) -> ApiResult<CascadeConfig> {
    let correlation_id = new_correlation_id();
    let config = state
        .engine
        .active_config()
        .await
        .map_err(|e| api_error(e, &correlation_id))?
        .ok_or_else(|| {
            api_error(ApplicationError::not_found("cascade config", "active"), &correlation_id)
        })?;

    Ok(Json(config))
}

async fn put_config(
    State(state): State<ApiState>,
    Json(body): Json<ConfigUpdateRequest>,
) -> ApiResult<CascadeConfig> {
    let correlation_id = new_correlation_id();
    let config = CascadeConfig {
        id: CascadeConfigId(body.id.unwrap_or_else(|| format!("cfg-{}", Uuid::new_v4()))),
        active: body.active.unwrap_or(true),
        distribution_method: body.distribution_method.unwrap_or(DistributionMethod::RoundRobin),
        queue: body.queue.into_iter().map(ConsultantId).collect(),
        sla_hours_per_step: body.sla_hours_per_step,
        updated_at: Utc::now(),
    };

    // Queue and SLA problems in the request body are reported as 400.
    state.engine.save_config(config.clone()).await.map_err(|error| match error {
        ApplicationError::Configuration(message) => {
            api_error(ApplicationError::validation(message), &correlation_id)
        }
        other => api_error(other, &correlation_id),
    })?;

    Ok(Json(config))
}

// ---------------------------------------------------------------------------
// Lifecycle hooks
// ---------------------------------------------------------------------------

async fn lead_created(
    State(state): State<ApiState>,
    Json(body): Json<LeadCreatedHook>,
) -> (StatusCode, Json<HookAccepted>) {
    let lead_id = LeadId(body.lead_id);
    let client_id = body.client_id.map(ClientId);
    state.lifecycle.on_lead_created(&lead_id, client_id.as_ref()).await;

    accepted(lead_id.0)
}

async fn appointment_booked(
    State(state): State<ApiState>,
    Json(body): Json<AppointmentBookedHook>,
) -> (StatusCode, Json<HookAccepted>) {
    let client_id = ClientId(body.client_id);
    state.lifecycle.on_appointment_booked(&client_id, &ConsultantId(body.consultant_id)).await;

    accepted(client_id.0)
}

fn accepted(correlation_id: String) -> (StatusCode, Json<HookAccepted>) {
    (StatusCode::ACCEPTED, Json(HookAccepted { accepted: true, correlation_id }))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn new_correlation_id() -> String {
    format!("req-{}", Uuid::new_v4())
}

/// Missing bounds default to the trailing thirty days ending now.
fn resolve_period(
    query: &PeriodQuery,
    now: DateTime<Utc>,
) -> Result<ReportingPeriod, ApplicationError> {
    let end = query.end.unwrap_or(now);
    let start = query.start.unwrap_or(end - Duration::days(DEFAULT_PERIOD_DAYS));
    ReportingPeriod::new(start, end)
}

fn api_error(error: ApplicationError, correlation_id: &str) -> (StatusCode, Json<ApiError>) {
    let interface = error.into_interface(correlation_id);
    let (status, message) = match &interface {
        InterfaceError::BadRequest { message, .. } => (StatusCode::BAD_REQUEST, message.clone()),
        InterfaceError::NotFound { message, .. } => (StatusCode::NOT_FOUND, message.clone()),
        InterfaceError::ServiceUnavailable { message, .. } => {
            error!(
                event_name = "cascade.api.unavailable",
                correlation_id = %correlation_id,
                error = %message,
                "cascade request failed"
            );
            (StatusCode::SERVICE_UNAVAILABLE, interface.user_message().to_string())
        }
        InterfaceError::Internal { message, .. } => {
            error!(
                event_name = "cascade.api.internal",
                correlation_id = %correlation_id,
                error = %message,
                "cascade request failed"
            );
            (StatusCode::INTERNAL_SERVER_ERROR, interface.user_message().to_string())
        }
    };

    if status.is_client_error() {
        warn!(
            event_name = "cascade.api.rejected",
            correlation_id = %correlation_id,
            status = status.as_u16(),
            error = %message,
            "cascade request rejected"
        );
    }

    (status, Json(ApiError { error: message, correlation_id: interface.correlation_id().to_string() }))
}
