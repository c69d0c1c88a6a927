//! Parallel cascade lead distribution.
//!
//! A lead's client is handed to the first consultant of the active queue with
//! an SLA budget; a sweep escalates overdue entries down the queue, and the
//! first qualifying booking finalizes every open entry of the client.

pub mod convergence;
pub mod escalation;
pub mod hooks;
pub mod memory;
pub mod metrics;
pub mod orchestrator;
pub mod sla;
pub mod store;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

pub use convergence::{ConvergenceHandler, FinalizeOutcome};
pub use escalation::{DisabledConfigPolicy, EscalationScheduler, EscalationSettings, SweepReport};
pub use hooks::{CascadeLifecycle, LeadLifecycleHooks};
pub use memory::{InMemoryCascadeStore, InMemoryResponsibilityRecorder};
pub use metrics::{
    ActiveAssignment, CascadeAggregator, CascadeMetrics, ConsultantRanking, ReportingPeriod,
    StuckLead,
};
pub use orchestrator::{CascadeOrchestrator, StartOutcome};
pub use sla::{SlaEvaluation, SlaThresholds, UrgencyBucket};
pub use store::{
    CascadeStore, DueCursor, DueQuery, EscalationOutcome, InsertOutcome,
    NoopResponsibilityRecorder, ResponsibilityRecorder,
};

use crate::config::CascadeSettings;
use crate::domain::assignment::ResponsibilityChange;
use crate::domain::cascade::{CascadeConfig, CascadeEntry, ClientId, ConsultantId, LeadId};
use crate::errors::ApplicationError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EngineSettings {
    pub thresholds: SlaThresholds,
    pub escalation: EscalationSettings,
}

impl TryFrom<&CascadeSettings> for EngineSettings {
    type Error = ApplicationError;

    fn try_from(settings: &CascadeSettings) -> Result<Self, Self::Error> {
        Ok(Self {
            thresholds: SlaThresholds::new(settings.warning_pct, settings.critical_pct)?,
            escalation: EscalationSettings {
                batch_size: settings.sweep_batch_size,
                on_config_disabled: settings.on_config_disabled,
            },
        })
    }
}

/// Wires the orchestrator, sweep and reporting surface over one store.
#[derive(Clone)]
pub struct CascadeEngine {
    store: Arc<dyn CascadeStore>,
    orchestrator: CascadeOrchestrator,
    scheduler: Arc<EscalationScheduler>,
    aggregator: CascadeAggregator,
}

impl CascadeEngine {
    pub fn new(
        store: Arc<dyn CascadeStore>,
        recorder: Arc<dyn ResponsibilityRecorder>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            orchestrator: CascadeOrchestrator::new(store.clone(), recorder.clone()),
            scheduler: Arc::new(EscalationScheduler::new(
                store.clone(),
                recorder,
                settings.escalation,
            )),
            aggregator: CascadeAggregator::new(store.clone(), settings.thresholds),
            store,
        }
    }

    pub fn in_memory(settings: EngineSettings) -> Self {
        Self::new(
            Arc::new(InMemoryCascadeStore::new()),
            Arc::new(NoopResponsibilityRecorder),
            settings,
        )
    }

    pub fn store(&self) -> &Arc<dyn CascadeStore> {
        &self.store
    }

    pub fn orchestrator(&self) -> &CascadeOrchestrator {
        &self.orchestrator
    }

    pub fn aggregator(&self) -> &CascadeAggregator {
        &self.aggregator
    }

    pub fn lifecycle(&self) -> CascadeLifecycle {
        CascadeLifecycle::new(self.orchestrator.clone())
    }

    pub async fn start_cascade(
        &self,
        lead_id: &LeadId,
        client_id: Option<&ClientId>,
    ) -> Result<StartOutcome, ApplicationError> {
        self.orchestrator.start_cascade(lead_id, client_id).await
    }

    pub async fn finalize_all(
        &self,
        client_id: &ClientId,
        triggering_consultant: &ConsultantId,
        reason: &str,
    ) -> Result<FinalizeOutcome, ApplicationError> {
        self.orchestrator.finalize_all(client_id, triggering_consultant, reason).await
    }

    pub async fn reassign_manually(
        &self,
        client_id: &ClientId,
        consultant_id: &ConsultantId,
    ) -> Result<ResponsibilityChange, ApplicationError> {
        self.orchestrator.reassign_manually_at(client_id, consultant_id, Utc::now()).await
    }

    pub async fn sweep(&self) -> Result<SweepReport, ApplicationError> {
        self.sweep_at(Utc::now()).await
    }

    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport, ApplicationError> {
        self.scheduler.sweep(now).await
    }

    pub async fn metrics(&self, period: ReportingPeriod) -> Result<CascadeMetrics, ApplicationError> {
        self.aggregator.metrics(period).await
    }

    pub async fn active_assignments(&self) -> Result<Vec<ActiveAssignment>, ApplicationError> {
        self.aggregator.active_assignments().await
    }

    pub async fn user_ranking(
        &self,
        period: ReportingPeriod,
    ) -> Result<Vec<ConsultantRanking>, ApplicationError> {
        self.aggregator.user_ranking(period).await
    }

    pub async fn stuck_leads(&self) -> Result<Vec<StuckLead>, ApplicationError> {
        self.aggregator.stuck_leads().await
    }

    pub async fn client_history(
        &self,
        client_id: &ClientId,
    ) -> Result<Vec<CascadeEntry>, ApplicationError> {
        self.aggregator.client_history(client_id).await
    }

    pub async fn active_config(&self) -> Result<Option<CascadeConfig>, ApplicationError> {
        self.store.active_config().await
    }

    /// Validates and stores an administrator edit. Open cascades keep the
    /// queue and SLA they captured at creation.
    pub async fn save_config(&self, config: CascadeConfig) -> Result<(), ApplicationError> {
        config.validate()?;
        let config_id = config.id.0.clone();
        let active = config.active;
        let queue_len = config.queue.len();
        self.store.save_config(config).await?;
        info!(
            event_name = "cascade.config.saved",
            correlation_id = %config_id,
            config_id = %config_id,
            active,
            queue_len,
            "cascade configuration saved"
        );
        Ok(())
    }
}
