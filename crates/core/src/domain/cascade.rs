use std::collections::HashSet;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{ApplicationError, DomainError};

/// Finalization reason written by the appointment-booking path.
pub const APPOINTMENT_CREATED_REASON: &str = "Agendamento_criado";

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LeadId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConsultantId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CascadeEntryId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CascadeConfigId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionMethod {
    Volume,
    Performance,
    #[serde(alias = "round-robin")]
    RoundRobin,
}

impl DistributionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Volume => "volume",
            Self::Performance => "performance",
            Self::RoundRobin => "round_robin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "volume" => Some(Self::Volume),
            "performance" => Some(Self::Performance),
            "round_robin" => Some(Self::RoundRobin),
            _ => None,
        }
    }
}

/// Administrator-owned cascade settings. Read-mostly; values relevant to an
/// open cascade are copied onto each entry when it is created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeConfig {
    pub id: CascadeConfigId,
    pub active: bool,
    pub distribution_method: DistributionMethod,
    pub queue: Vec<ConsultantId>,
    pub sla_hours_per_step: u32,
    pub updated_at: DateTime<Utc>,
}

impl CascadeConfig {
    pub fn validate(&self) -> Result<(), ApplicationError> {
        if self.id.0.trim().is_empty() {
            return Err(ApplicationError::validation("cascade config id is required"));
        }
        if self.queue.is_empty() {
            return Err(ApplicationError::Configuration(
                "cascade queue must contain at least one consultant".to_string(),
            ));
        }
        if self.sla_hours_per_step == 0 {
            return Err(ApplicationError::Configuration(
                "cascade sla_hours_per_step must be greater than zero".to_string(),
            ));
        }

        let mut seen = HashSet::with_capacity(self.queue.len());
        for consultant in &self.queue {
            if consultant.0.trim().is_empty() {
                return Err(ApplicationError::validation("cascade queue contains a blank consultant id"));
            }
            if !seen.insert(&consultant.0) {
                return Err(ApplicationError::validation(format!(
                    "consultant `{}` appears more than once in the cascade queue",
                    consultant.0
                )));
            }
        }

        Ok(())
    }

    pub fn first_consultant(&self) -> Option<&ConsultantId> {
        self.queue.first()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadeEntryStatus {
    Active,
    Expired,
    FinalizedSuccess,
}

impl CascadeEntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::FinalizedSuccess => "finalized_success",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Some(Self::Active),
            "expired" => Some(Self::Expired),
            "finalized_success" => Some(Self::FinalizedSuccess),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }

    /// Status only moves forward, and only out of `Active`.
    pub fn can_transition_to(&self, to: CascadeEntryStatus) -> bool {
        matches!((self, to), (Self::Active, Self::Expired) | (Self::Active, Self::FinalizedSuccess))
    }
}

/// One (client, consultant, sequence) assignment with its own SLA timer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeEntry {
    pub id: CascadeEntryId,
    pub lead_id: LeadId,
    pub client_id: ClientId,
    pub consultant_id: ConsultantId,
    pub sequence: u32,
    pub sla_hours: u32,
    pub config_id: CascadeConfigId,
    pub queue_snapshot: Vec<ConsultantId>,
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: CascadeEntryStatus,
    pub finalized_at: Option<DateTime<Utc>>,
    pub finalized_by: Option<ConsultantId>,
    pub finalization_reason: Option<String>,
}

impl CascadeEntry {
    /// Seeds the sequence-1 entry for a client from the active configuration.
    pub fn first_for(
        lead_id: LeadId,
        client_id: ClientId,
        config: &CascadeConfig,
        now: DateTime<Utc>,
    ) -> Option<Self> {
        let consultant_id = config.first_consultant()?.clone();
        Some(Self::open(
            lead_id,
            client_id,
            consultant_id,
            1,
            config.sla_hours_per_step,
            config.id.clone(),
            config.queue.clone(),
            now,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn open(
        lead_id: LeadId,
        client_id: ClientId,
        consultant_id: ConsultantId,
        sequence: u32,
        sla_hours: u32,
        config_id: CascadeConfigId,
        queue_snapshot: Vec<ConsultantId>,
        now: DateTime<Utc>,
    ) -> Self {
        // Stored timestamps carry microseconds.
        let now = now.trunc_subsecs(6);
        Self {
            id: CascadeEntryId(Uuid::new_v4().to_string()),
            lead_id,
            client_id,
            consultant_id,
            sequence,
            sla_hours,
            config_id,
            queue_snapshot,
            started_at: now,
            expires_at: now + Duration::hours(i64::from(sla_hours)),
            status: CascadeEntryStatus::Active,
            finalized_at: None,
            finalized_by: None,
            finalization_reason: None,
        }
    }

    /// Consultant at position `sequence` of the snapshotted queue, if any.
    pub fn next_consultant(&self) -> Option<&ConsultantId> {
        usize::try_from(self.sequence).ok().and_then(|index| self.queue_snapshot.get(index))
    }

    /// Builds the sequence-(n+1) entry, inheriting the captured SLA and queue.
    pub fn successor(&self, now: DateTime<Utc>) -> Option<Self> {
        let consultant_id = self.next_consultant()?.clone();
        Some(Self::open(
            self.lead_id.clone(),
            self.client_id.clone(),
            consultant_id,
            self.sequence + 1,
            self.sla_hours,
            self.config_id.clone(),
            self.queue_snapshot.clone(),
            now,
        ))
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == CascadeEntryStatus::Active && self.expires_at <= now
    }

    pub fn expire(&mut self) -> Result<(), DomainError> {
        self.transition(CascadeEntryStatus::Expired)
    }

    pub fn finalize(
        &mut self,
        finalized_by: ConsultantId,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.transition(CascadeEntryStatus::FinalizedSuccess)?;
        self.finalized_at = Some(now);
        self.finalized_by = Some(finalized_by);
        self.finalization_reason = Some(reason.into());
        Ok(())
    }

    fn transition(&mut self, to: CascadeEntryStatus) -> Result<(), DomainError> {
        if !self.status.can_transition_to(to) {
            return Err(DomainError::InvalidCascadeTransition { from: self.status, to });
        }
        self.status = to;
        Ok(())
    }
}
