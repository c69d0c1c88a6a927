use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cascade::convergence::{ConvergenceHandler, FinalizeOutcome};
use crate::cascade::store::{CascadeStore, InsertOutcome, ResponsibilityRecorder};
use crate::domain::assignment::{AssignmentSource, ResponsibilityChange};
use crate::domain::cascade::{CascadeEntry, CascadeEntryStatus, ClientId, ConsultantId, LeadId};
use crate::errors::ApplicationError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StartOutcome {
    Started { entry: CascadeEntry },
    AlreadyStarted,
    MissingClient,
    NoActiveConfig,
    EmptyQueue,
}

/// Entry point for cascade start (on lead creation) and convergence.
#[derive(Clone)]
pub struct CascadeOrchestrator {
    store: Arc<dyn CascadeStore>,
    recorder: Arc<dyn ResponsibilityRecorder>,
    convergence: ConvergenceHandler,
}

impl CascadeOrchestrator {
    pub fn new(store: Arc<dyn CascadeStore>, recorder: Arc<dyn ResponsibilityRecorder>) -> Self {
        let convergence = ConvergenceHandler::new(store.clone(), recorder.clone());
        Self { store, recorder, convergence }
    }

    pub async fn start_cascade(
        &self,
        lead_id: &LeadId,
        client_id: Option<&ClientId>,
    ) -> Result<StartOutcome, ApplicationError> {
        self.start_cascade_at(lead_id, client_id, Utc::now()).await
    }

    pub async fn start_cascade_at(
        &self,
        lead_id: &LeadId,
        client_id: Option<&ClientId>,
        now: DateTime<Utc>,
    ) -> Result<StartOutcome, ApplicationError> {
        let Some(client_id) = client_id.filter(|client_id| !client_id.0.trim().is_empty()) else {
            warn!(
                event_name = "cascade.start.missing_client",
                correlation_id = %lead_id.0,
                lead_id = %lead_id.0,
                "lead has no client id; cascade not started"
            );
            return Ok(StartOutcome::MissingClient);
        };

        let Some(config) = self.store.active_config().await? else {
            debug!(
                event_name = "cascade.start.no_active_config",
                correlation_id = %lead_id.0,
                lead_id = %lead_id.0,
                client_id = %client_id.0,
                "no active cascade configuration"
            );
            return Ok(StartOutcome::NoActiveConfig);
        };

        let existing = self.store.entries_for_client(client_id).await?;
        if existing.iter().any(|entry| entry.sequence == 1) {
            debug!(
                event_name = "cascade.start.already_started",
                correlation_id = %lead_id.0,
                lead_id = %lead_id.0,
                client_id = %client_id.0,
                "cascade already exists for client"
            );
            return Ok(StartOutcome::AlreadyStarted);
        }

        let Some(entry) = CascadeEntry::first_for(lead_id.clone(), client_id.clone(), &config, now)
        else {
            warn!(
                event_name = "cascade.start.empty_queue",
                correlation_id = %lead_id.0,
                config_id = %config.id.0,
                "active cascade configuration has an empty queue"
            );
            return Ok(StartOutcome::EmptyQueue);
        };

        // The store re-checks sequence 1 so concurrent starts cannot both insert.
        if self.store.insert_first_entry(entry.clone()).await? == InsertOutcome::AlreadyExists {
            return Ok(StartOutcome::AlreadyStarted);
        }

        info!(
            event_name = "cascade.start.seeded",
            correlation_id = %lead_id.0,
            lead_id = %lead_id.0,
            client_id = %client_id.0,
            consultant_id = %entry.consultant_id.0,
            entry_id = %entry.id.0,
            sequence = entry.sequence,
            expires_at = %entry.expires_at.to_rfc3339(),
            "cascade started"
        );

        let change = ResponsibilityChange::from_cascade(
            AssignmentSource::CascadeStart,
            client_id.clone(),
            entry.consultant_id.clone(),
            entry.id.clone(),
            now,
        );
        if let Err(error) = self.recorder.record(change).await {
            warn!(
                event_name = "cascade.responsibility.record_failed",
                correlation_id = %lead_id.0,
                client_id = %client_id.0,
                error = %error,
                "could not record responsible consultant at cascade start"
            );
        }

        Ok(StartOutcome::Started { entry })
    }

    pub async fn finalize_all(
        &self,
        client_id: &ClientId,
        triggering_consultant: &ConsultantId,
        reason: &str,
    ) -> Result<FinalizeOutcome, ApplicationError> {
        self.finalize_all_at(client_id, triggering_consultant, reason, Utc::now()).await
    }

    pub async fn finalize_all_at(
        &self,
        client_id: &ClientId,
        triggering_consultant: &ConsultantId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<FinalizeOutcome, ApplicationError> {
        self.convergence.finalize_all(client_id, triggering_consultant, reason, now).await
    }

    /// Records a manual change of the client's responsible consultant.
    ///
    /// Refused while the client has an active cascade entry: the cascade owns
    /// the responsibility field until it converges or runs out.
    pub async fn reassign_manually_at(
        &self,
        client_id: &ClientId,
        consultant_id: &ConsultantId,
        now: DateTime<Utc>,
    ) -> Result<ResponsibilityChange, ApplicationError> {
        if client_id.0.trim().is_empty() || consultant_id.0.trim().is_empty() {
            return Err(ApplicationError::validation(
                "client id and consultant id are required for manual reassignment",
            ));
        }

        let entries = self.store.entries_for_client(client_id).await?;
        if let Some(open) = entries.iter().find(|entry| entry.status == CascadeEntryStatus::Active) {
            return Err(ApplicationError::validation(format!(
                "client `{}` has an open cascade held by `{}`",
                client_id.0, open.consultant_id.0
            )));
        }

        let change = ResponsibilityChange::manual(client_id.clone(), consultant_id.clone(), now);
        self.recorder.record(change.clone()).await?;
        info!(
            event_name = "cascade.responsibility.manual",
            correlation_id = %client_id.0,
            client_id = %client_id.0,
            consultant_id = %consultant_id.0,
            "responsible consultant reassigned manually"
        );
        Ok(change)
    }
}
