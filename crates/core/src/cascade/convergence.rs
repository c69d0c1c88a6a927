use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cascade::store::{CascadeStore, ResponsibilityRecorder};
use crate::domain::assignment::{AssignmentSource, ResponsibilityChange};
use crate::domain::cascade::{CascadeEntry, ClientId, ConsultantId};
use crate::errors::ApplicationError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FinalizeOutcome {
    pub client_id: ClientId,
    pub finalized: Vec<CascadeEntry>,
}

impl FinalizeOutcome {
    pub fn finalized_count(&self) -> usize {
        self.finalized.len()
    }

    /// Nothing was active: another qualifying event already won, or the
    /// cascade had already expired out.
    pub fn is_noop(&self) -> bool {
        self.finalized.is_empty()
    }
}

/// Closes every open entry of a client once one consultant converts it.
#[derive(Clone)]
pub struct ConvergenceHandler {
    store: Arc<dyn CascadeStore>,
    recorder: Arc<dyn ResponsibilityRecorder>,
}

impl ConvergenceHandler {
    pub fn new(store: Arc<dyn CascadeStore>, recorder: Arc<dyn ResponsibilityRecorder>) -> Self {
        Self { store, recorder }
    }

    pub async fn finalize_all(
        &self,
        client_id: &ClientId,
        triggering_consultant: &ConsultantId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<FinalizeOutcome, ApplicationError> {
        if client_id.0.trim().is_empty() {
            return Err(ApplicationError::validation("client id is required to finalize a cascade"));
        }
        if triggering_consultant.0.trim().is_empty() {
            return Err(ApplicationError::validation(
                "triggering consultant id is required to finalize a cascade",
            ));
        }
        if reason.trim().is_empty() {
            return Err(ApplicationError::validation("finalization reason is required"));
        }

        let finalized =
            self.store.finalize_active(client_id, triggering_consultant, reason, now).await?;

        if finalized.is_empty() {
            debug!(
                event_name = "cascade.convergence.noop",
                correlation_id = %client_id.0,
                client_id = %client_id.0,
                consultant_id = %triggering_consultant.0,
                reason,
                "no active cascade entries to finalize"
            );
            return Ok(FinalizeOutcome { client_id: client_id.clone(), finalized });
        }

        info!(
            event_name = "cascade.convergence.finalized",
            correlation_id = %client_id.0,
            client_id = %client_id.0,
            consultant_id = %triggering_consultant.0,
            finalized_count = finalized.len(),
            reason,
            "cascade finalized"
        );

        let anchor = &finalized[0];
        let change = ResponsibilityChange::from_cascade(
            AssignmentSource::Convergence,
            client_id.clone(),
            triggering_consultant.clone(),
            anchor.id.clone(),
            now,
        );
        if let Err(error) = self.recorder.record(change).await {
            warn!(
                event_name = "cascade.responsibility.record_failed",
                correlation_id = %client_id.0,
                client_id = %client_id.0,
                error = %error,
                "could not record responsible consultant after convergence"
            );
        }

        Ok(FinalizeOutcome { client_id: client_id.clone(), finalized })
    }
}
