use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::cascade::{CascadeEntryId, ClientId, ConsultantId};

/// Why a client's responsible consultant changed. Manual reassignment is kept
/// distinct from writes made while a cascade is open.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentSource {
    CascadeStart,
    CascadeEscalation,
    Convergence,
    Manual,
}

impl AssignmentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CascadeStart => "cascade_start",
            Self::CascadeEscalation => "cascade_escalation",
            Self::Convergence => "convergence",
            Self::Manual => "manual",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cascade_start" => Some(Self::CascadeStart),
            "cascade_escalation" => Some(Self::CascadeEscalation),
            "convergence" => Some(Self::Convergence),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }

    pub fn is_cascade_owned(&self) -> bool {
        !matches!(self, Self::Manual)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponsibilityChange {
    pub client_id: ClientId,
    pub consultant_id: ConsultantId,
    pub source: AssignmentSource,
    pub entry_id: Option<CascadeEntryId>,
    pub occurred_at: DateTime<Utc>,
}

impl ResponsibilityChange {
    pub fn from_cascade(
        source: AssignmentSource,
        client_id: ClientId,
        consultant_id: ConsultantId,
        entry_id: CascadeEntryId,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self { client_id, consultant_id, source, entry_id: Some(entry_id), occurred_at }
    }

    pub fn manual(
        client_id: ClientId,
        consultant_id: ConsultantId,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self { client_id, consultant_id, source: AssignmentSource::Manual, entry_id: None, occurred_at }
    }
}

#[cfg(test)]
mod tests {
    use super::AssignmentSource;

    #[test]
    fn assignment_source_round_trips_from_storage_encoding() {
        for source in [
            AssignmentSource::CascadeStart,
            AssignmentSource::CascadeEscalation,
            AssignmentSource::Convergence,
            AssignmentSource::Manual,
        ] {
            assert_eq!(AssignmentSource::parse(source.as_str()), Some(source));
        }
    }

    #[test]
    fn manual_reassignment_is_not_cascade_owned() {
        assert!(!AssignmentSource::Manual.is_cascade_owned());
        assert!(AssignmentSource::CascadeEscalation.is_cascade_owned());
    }
}
