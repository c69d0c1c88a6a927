use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::cascade::store::{
    CascadeStore, DueQuery, EscalationOutcome, InsertOutcome, ResponsibilityRecorder,
};
use crate::domain::assignment::ResponsibilityChange;
use crate::domain::cascade::{
    CascadeConfig, CascadeConfigId, CascadeEntry, CascadeEntryId, CascadeEntryStatus, ClientId,
    ConsultantId,
};
use crate::errors::{ApplicationError, DomainError};

#[derive(Default)]
struct LedgerState {
    configs: HashMap<String, CascadeConfig>,
    entries: Vec<CascadeEntry>,
}

impl LedgerState {
    fn has_finalized_success(&self, client_id: &ClientId) -> bool {
        self.entries.iter().any(|entry| {
            entry.client_id == *client_id && entry.status == CascadeEntryStatus::FinalizedSuccess
        })
    }

    fn config_is_active(&self, config_id: &CascadeConfigId) -> bool {
        self.configs.get(&config_id.0).is_some_and(|config| config.active)
    }

    fn sequence_taken(&self, client_id: &ClientId, sequence: u32) -> bool {
        self.entries.iter().any(|entry| entry.client_id == *client_id && entry.sequence == sequence)
    }
}

/// Ledger held behind one lock; each trait call is a single critical section,
/// which gives the same per-row compare-and-update semantics as the SQL store.
#[derive(Default)]
pub struct InMemoryCascadeStore {
    state: RwLock<LedgerState>,
}

impl InMemoryCascadeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all_entries(&self) -> Vec<CascadeEntry> {
        self.state.read().await.entries.clone()
    }
}

#[async_trait]
impl CascadeStore for InMemoryCascadeStore {
    async fn active_config(&self) -> Result<Option<CascadeConfig>, ApplicationError> {
        let state = self.state.read().await;
        Ok(state.configs.values().find(|config| config.active).cloned())
    }

    async fn find_config(
        &self,
        id: &CascadeConfigId,
    ) -> Result<Option<CascadeConfig>, ApplicationError> {
        let state = self.state.read().await;
        Ok(state.configs.get(&id.0).cloned())
    }

    async fn save_config(&self, config: CascadeConfig) -> Result<(), ApplicationError> {
        let mut state = self.state.write().await;
        if config.active {
            for other in state.configs.values_mut() {
                other.active = false;
            }
        }
        state.configs.insert(config.id.0.clone(), config);
        Ok(())
    }

    async fn insert_first_entry(
        &self,
        entry: CascadeEntry,
    ) -> Result<InsertOutcome, ApplicationError> {
        let mut state = self.state.write().await;
        if state.sequence_taken(&entry.client_id, 1) {
            return Ok(InsertOutcome::AlreadyExists);
        }
        state.entries.push(entry);
        Ok(InsertOutcome::Inserted)
    }

    async fn find_entry(
        &self,
        id: &CascadeEntryId,
    ) -> Result<Option<CascadeEntry>, ApplicationError> {
        let state = self.state.read().await;
        Ok(state.entries.iter().find(|entry| entry.id == *id).cloned())
    }

    async fn entries_for_client(
        &self,
        client_id: &ClientId,
    ) -> Result<Vec<CascadeEntry>, ApplicationError> {
        let state = self.state.read().await;
        let mut entries: Vec<CascadeEntry> =
            state.entries.iter().filter(|entry| entry.client_id == *client_id).cloned().collect();
        entries.sort_by_key(|entry| entry.sequence);
        Ok(entries)
    }

    async fn due_entries(&self, query: &DueQuery) -> Result<Vec<CascadeEntry>, ApplicationError> {
        let state = self.state.read().await;
        let mut due: Vec<CascadeEntry> = state
            .entries
            .iter()
            .filter(|entry| entry.is_overdue(query.now))
            .filter(|entry| !query.active_configs_only || state.config_is_active(&entry.config_id))
            .filter(|entry| match &query.after {
                Some(cursor) => (entry.expires_at, &entry.id) > (cursor.expires_at, &cursor.id),
                None => true,
            })
            .cloned()
            .collect();
        due.sort_by(|left, right| {
            left.expires_at.cmp(&right.expires_at).then_with(|| left.id.cmp(&right.id))
        });
        due.truncate(usize::try_from(query.limit).unwrap_or(usize::MAX));
        Ok(due)
    }

    async fn held_entry_count(&self, now: DateTime<Utc>) -> Result<u64, ApplicationError> {
        let state = self.state.read().await;
        let held = state
            .entries
            .iter()
            .filter(|entry| entry.is_overdue(now) && !state.config_is_active(&entry.config_id))
            .count();
        Ok(u64::try_from(held).unwrap_or(u64::MAX))
    }

    async fn escalate(
        &self,
        entry_id: &CascadeEntryId,
        successor: Option<CascadeEntry>,
    ) -> Result<EscalationOutcome, ApplicationError> {
        let mut state = self.state.write().await;
        let Some(index) = state.entries.iter().position(|entry| entry.id == *entry_id) else {
            return Err(ApplicationError::not_found("cascade entry", entry_id.0.clone()));
        };
        if state.entries[index].status != CascadeEntryStatus::Active {
            return Ok(EscalationOutcome::AlreadyClaimed);
        }

        // Validate before mutating so a failed escalation leaves the entry active.
        let suppressed = match &successor {
            Some(successor) => {
                if state.sequence_taken(&successor.client_id, successor.sequence) {
                    return Err(DomainError::InvariantViolation(format!(
                        "sequence {} already exists for client `{}`",
                        successor.sequence, successor.client_id.0
                    ))
                    .into());
                }
                state.has_finalized_success(&successor.client_id)
            }
            None => false,
        };

        state.entries[index].expire()?;
        match successor {
            None => Ok(EscalationOutcome::Expired),
            Some(_) if suppressed => Ok(EscalationOutcome::SuppressedByFinalization),
            Some(successor) => {
                state.entries.push(successor.clone());
                Ok(EscalationOutcome::Escalated { successor })
            }
        }
    }

    async fn finalize_active(
        &self,
        client_id: &ClientId,
        finalized_by: &ConsultantId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<CascadeEntry>, ApplicationError> {
        let mut state = self.state.write().await;
        let mut finalized = Vec::new();
        for entry in state.entries.iter_mut().filter(|entry| {
            entry.client_id == *client_id && entry.status == CascadeEntryStatus::Active
        }) {
            entry.finalize(finalized_by.clone(), reason, now)?;
            finalized.push(entry.clone());
        }
        Ok(finalized)
    }

    async fn has_finalized_success(&self, client_id: &ClientId) -> Result<bool, ApplicationError> {
        Ok(self.state.read().await.has_finalized_success(client_id))
    }

    async fn entries_started_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CascadeEntry>, ApplicationError> {
        let state = self.state.read().await;
        Ok(state
            .entries
            .iter()
            .filter(|entry| entry.started_at >= start && entry.started_at <= end)
            .cloned()
            .collect())
    }

    async fn active_entries(&self) -> Result<Vec<CascadeEntry>, ApplicationError> {
        let state = self.state.read().await;
        Ok(state
            .entries
            .iter()
            .filter(|entry| entry.status == CascadeEntryStatus::Active)
            .cloned()
            .collect())
    }

    async fn stuck_entries(&self) -> Result<Vec<CascadeEntry>, ApplicationError> {
        let state = self.state.read().await;
        let mut latest: HashMap<&ClientId, &CascadeEntry> = HashMap::new();
        let mut resolved: Vec<&ClientId> = Vec::new();

        for entry in &state.entries {
            if entry.status != CascadeEntryStatus::Expired {
                resolved.push(&entry.client_id);
            }
            let slot = latest.entry(&entry.client_id).or_insert(entry);
            if entry.sequence > slot.sequence {
                *slot = entry;
            }
        }

        let mut stuck: Vec<CascadeEntry> = latest
            .into_values()
            .filter(|entry| entry.status == CascadeEntryStatus::Expired)
            .filter(|entry| !resolved.contains(&&entry.client_id))
            .cloned()
            .collect();
        stuck.sort_by_key(|entry| entry.expires_at);
        Ok(stuck)
    }
}

/// Records responsibility changes in order; used by tests and the CLI.
#[derive(Default)]
pub struct InMemoryResponsibilityRecorder {
    changes: RwLock<Vec<ResponsibilityChange>>,
}

impl InMemoryResponsibilityRecorder {
    pub async fn changes(&self) -> Vec<ResponsibilityChange> {
        self.changes.read().await.clone()
    }

    pub async fn current_for(&self, client_id: &ClientId) -> Option<ConsultantId> {
        self.changes
            .read()
            .await
            .iter()
            .rev()
            .find(|change| change.client_id == *client_id)
            .map(|change| change.consultant_id.clone())
    }
}

#[async_trait]
impl ResponsibilityRecorder for InMemoryResponsibilityRecorder {
    async fn record(&self, change: ResponsibilityChange) -> Result<(), ApplicationError> {
        self.changes.write().await.push(change);
        Ok(())
    }
}
