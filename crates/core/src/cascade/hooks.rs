//! Post-commit hooks called by the lead and appointment write paths.
//!
//! Hooks never return an error: a failure inside the engine is logged and the
//! caller's business transaction proceeds.

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::cascade::orchestrator::{CascadeOrchestrator, StartOutcome};
use crate::domain::cascade::{ClientId, ConsultantId, LeadId, APPOINTMENT_CREATED_REASON};
use crate::errors::ApplicationError;

#[async_trait]
pub trait LeadLifecycleHooks: Send + Sync {
    /// Called after a lead has been persisted.
    async fn on_lead_created(&self, lead_id: &LeadId, client_id: Option<&ClientId>);

    /// Called after an appointment has been persisted.
    async fn on_appointment_booked(&self, client_id: &ClientId, consultant_id: &ConsultantId);
}

#[derive(Clone)]
pub struct CascadeLifecycle {
    orchestrator: CascadeOrchestrator,
}

impl CascadeLifecycle {
    pub fn new(orchestrator: CascadeOrchestrator) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl LeadLifecycleHooks for CascadeLifecycle {
    async fn on_lead_created(&self, lead_id: &LeadId, client_id: Option<&ClientId>) {
        match self.orchestrator.start_cascade(lead_id, client_id).await {
            Ok(StartOutcome::Started { .. }) | Ok(StartOutcome::AlreadyStarted) => {}
            Ok(outcome) => info!(
                event_name = "cascade.hook.lead_created.skipped",
                correlation_id = %lead_id.0,
                lead_id = %lead_id.0,
                outcome = ?outcome,
                "lead created without starting a cascade"
            ),
            Err(error) => log_hook_failure("lead_created", &lead_id.0, &error),
        }
    }

    async fn on_appointment_booked(&self, client_id: &ClientId, consultant_id: &ConsultantId) {
        if let Err(error) = self
            .orchestrator
            .finalize_all(client_id, consultant_id, APPOINTMENT_CREATED_REASON)
            .await
        {
            log_hook_failure("appointment_booked", &client_id.0, &error);
        }
    }
}

fn log_hook_failure(hook: &'static str, correlation_id: &str, error: &ApplicationError) {
    match error {
        ApplicationError::Domain(_) | ApplicationError::NotFound { .. } => warn!(
            event_name = "cascade.hook.failed",
            correlation_id,
            hook,
            error = %error,
            "cascade hook rejected input; caller continues"
        ),
        _ => error!(
            event_name = "cascade.hook.failed",
            correlation_id,
            hook,
            error = %error,
            "cascade hook failed; caller continues"
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use super::{CascadeLifecycle, LeadLifecycleHooks};
    use crate::cascade::memory::{InMemoryCascadeStore, InMemoryResponsibilityRecorder};
    use crate::cascade::orchestrator::CascadeOrchestrator;
    use crate::cascade::store::{CascadeStore, DueQuery, EscalationOutcome, InsertOutcome};
    use crate::domain::cascade::{
        CascadeConfig, CascadeConfigId, CascadeEntry, CascadeEntryId, CascadeEntryStatus, ClientId,
        ConsultantId, DistributionMethod, LeadId,
    };
    use crate::errors::ApplicationError;

    struct FailingStore;

    fn unavailable() -> ApplicationError {
        ApplicationError::Persistence("database is locked".to_string())
    }

    #[async_trait]
    impl CascadeStore for FailingStore {
        async fn active_config(&self) -> Result<Option<CascadeConfig>, ApplicationError> {
            Err(unavailable())
        }
        async fn find_config(
            &self,
            _id: &CascadeConfigId,
        ) -> Result<Option<CascadeConfig>, ApplicationError> {
            Err(unavailable())
        }
        async fn save_config(&self, _config: CascadeConfig) -> Result<(), ApplicationError> {
            Err(unavailable())
        }
        async fn insert_first_entry(
            &self,
            _entry: CascadeEntry,
        ) -> Result<InsertOutcome, ApplicationError> {
            Err(unavailable())
        }
        async fn find_entry(
            &self,
            _id: &CascadeEntryId,
        ) -> Result<Option<CascadeEntry>, ApplicationError> {
            Err(unavailable())
        }
        async fn entries_for_client(
            &self,
            _client_id: &ClientId,
        ) -> Result<Vec<CascadeEntry>, ApplicationError> {
            Err(unavailable())
        }
        async fn due_entries(&self, _query: &DueQuery) -> Result<Vec<CascadeEntry>, ApplicationError> {
            Err(unavailable())
        }
        async fn held_entry_count(&self, _now: DateTime<Utc>) -> Result<u64, ApplicationError> {
            Err(unavailable())
        }
        async fn escalate(
            &self,
            _entry_id: &CascadeEntryId,
            _successor: Option<CascadeEntry>,
        ) -> Result<EscalationOutcome, ApplicationError> {
            Err(unavailable())
        }
        async fn finalize_active(
            &self,
            _client_id: &ClientId,
            _finalized_by: &ConsultantId,
            _reason: &str,
            _now: DateTime<Utc>,
        ) -> Result<Vec<CascadeEntry>, ApplicationError> {
            Err(unavailable())
        }
        async fn has_finalized_success(&self, _client_id: &ClientId) -> Result<bool, ApplicationError> {
            Err(unavailable())
        }
        async fn entries_started_between(
            &self,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<Vec<CascadeEntry>, ApplicationError> {
            Err(unavailable())
        }
        async fn active_entries(&self) -> Result<Vec<CascadeEntry>, ApplicationError> {
            Err(unavailable())
        }
        async fn stuck_entries(&self) -> Result<Vec<CascadeEntry>, ApplicationError> {
            Err(unavailable())
        }
    }

    #[tokio::test]
    async fn hooks_swallow_engine_failures() {
        let orchestrator = CascadeOrchestrator::new(
            Arc::new(FailingStore),
            Arc::new(InMemoryResponsibilityRecorder::default()),
        );
        let hooks = CascadeLifecycle::new(orchestrator);

        hooks.on_lead_created(&LeadId("L".to_string()), Some(&ClientId("X".to_string()))).await;
        hooks.on_appointment_booked(&ClientId("X".to_string()), &ConsultantId("A".to_string())).await;
        hooks.on_appointment_booked(&ClientId(String::new()), &ConsultantId("A".to_string())).await;
    }

    #[tokio::test]
    async fn hooks_drive_start_and_convergence() {
        let store = Arc::new(InMemoryCascadeStore::new());
        store
            .save_config(CascadeConfig {
                id: CascadeConfigId("cfg-1".to_string()),
                active: true,
                distribution_method: DistributionMethod::Volume,
                queue: vec![ConsultantId("A".to_string()), ConsultantId("B".to_string())],
                sla_hours_per_step: 24,
                updated_at: Utc::now(),
            })
            .await
            .expect("save config");
        let hooks = CascadeLifecycle::new(CascadeOrchestrator::new(
            store.clone(),
            Arc::new(InMemoryResponsibilityRecorder::default()),
        ));
        let client = ClientId("X".to_string());

        hooks.on_lead_created(&LeadId("L".to_string()), Some(&client)).await;
        hooks.on_appointment_booked(&client, &ConsultantId("A".to_string())).await;

        let entries = store.entries_for_client(&client).await.expect("entries");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, CascadeEntryStatus::FinalizedSuccess);
        assert_eq!(entries[0].finalization_reason.as_deref(), Some("Agendamento_criado"));
    }
}
