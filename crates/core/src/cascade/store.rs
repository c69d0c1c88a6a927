use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::assignment::ResponsibilityChange;
use crate::domain::cascade::{
    CascadeConfig, CascadeConfigId, CascadeEntry, CascadeEntryId, ClientId, ConsultantId,
};
use crate::errors::ApplicationError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A sequence-1 entry already exists for the client.
    AlreadyExists,
}

/// Position in the `(expires_at, id)` order that due entries are read in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DueCursor {
    pub expires_at: DateTime<Utc>,
    pub id: CascadeEntryId,
}

impl DueCursor {
    pub fn after(entry: &CascadeEntry) -> Self {
        Self { expires_at: entry.expires_at, id: entry.id.clone() }
    }
}

/// One page of overdue active entries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DueQuery {
    pub now: DateTime<Utc>,
    pub limit: u32,
    /// Skip entries whose originating configuration is missing or inactive.
    pub active_configs_only: bool,
    /// Only entries strictly after this position.
    pub after: Option<DueCursor>,
}

impl DueQuery {
    pub fn first_page(now: DateTime<Utc>, limit: u32) -> Self {
        Self { now, limit, active_configs_only: false, after: None }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EscalationOutcome {
    /// The conditional expire matched no `active` row; another sweep won.
    AlreadyClaimed,
    /// Expired with no successor requested (end of queue).
    Expired,
    /// Expired, but the client already has a `finalized_success` entry so the
    /// successor was not created.
    SuppressedByFinalization,
    Escalated { successor: CascadeEntry },
}

/// Ledger of cascade entries plus the administrator-owned configuration.
///
/// Every status mutation is a compare-and-update scoped by `status = active`;
/// implementations must never read-then-write an entry's status.
#[async_trait]
pub trait CascadeStore: Send + Sync {
    async fn active_config(&self) -> Result<Option<CascadeConfig>, ApplicationError>;

    async fn find_config(
        &self,
        id: &CascadeConfigId,
    ) -> Result<Option<CascadeConfig>, ApplicationError>;

    /// Upserts a configuration. Saving an active configuration deactivates
    /// every other one.
    async fn save_config(&self, config: CascadeConfig) -> Result<(), ApplicationError>;

    /// Inserts a sequence-1 entry unless one already exists for the client.
    async fn insert_first_entry(&self, entry: CascadeEntry)
        -> Result<InsertOutcome, ApplicationError>;

    async fn find_entry(
        &self,
        id: &CascadeEntryId,
    ) -> Result<Option<CascadeEntry>, ApplicationError>;

    /// All entries for a client, ordered by sequence.
    async fn entries_for_client(
        &self,
        client_id: &ClientId,
    ) -> Result<Vec<CascadeEntry>, ApplicationError>;

    /// Active entries with `expires_at <= now`, ordered by `(expires_at, id)`.
    async fn due_entries(&self, query: &DueQuery) -> Result<Vec<CascadeEntry>, ApplicationError>;

    /// Overdue active entries whose configuration is missing or inactive.
    async fn held_entry_count(&self, now: DateTime<Utc>) -> Result<u64, ApplicationError>;

    /// Atomically expires `entry_id` (only if still active) and, when given,
    /// inserts `successor` unless a `finalized_success` sibling exists.
    async fn escalate(
        &self,
        entry_id: &CascadeEntryId,
        successor: Option<CascadeEntry>,
    ) -> Result<EscalationOutcome, ApplicationError>;

    /// Moves every active entry of the client to `finalized_success` and
    /// returns the rows this call changed.
    async fn finalize_active(
        &self,
        client_id: &ClientId,
        finalized_by: &ConsultantId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<CascadeEntry>, ApplicationError>;

    async fn has_finalized_success(&self, client_id: &ClientId) -> Result<bool, ApplicationError>;

    /// Entries whose `started_at` falls inside `[start, end]`.
    async fn entries_started_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CascadeEntry>, ApplicationError>;

    async fn active_entries(&self) -> Result<Vec<CascadeEntry>, ApplicationError>;

    /// Expired entries that are the latest of their client's lineage and have
    /// no active or finalized sibling.
    async fn stuck_entries(&self) -> Result<Vec<CascadeEntry>, ApplicationError>;
}

/// Sink for the client's "responsible consultant" field.
#[async_trait]
pub trait ResponsibilityRecorder: Send + Sync {
    async fn record(&self, change: ResponsibilityChange) -> Result<(), ApplicationError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopResponsibilityRecorder;

#[async_trait]
impl ResponsibilityRecorder for NoopResponsibilityRecorder {
    async fn record(&self, _change: ResponsibilityChange) -> Result<(), ApplicationError> {
        Ok(())
    }
}
