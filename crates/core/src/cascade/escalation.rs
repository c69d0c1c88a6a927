//! Escalation sweep.
//!
//! A sweep claims overdue entries one at a time through the store's
//! conditional expire. Losing that race is a normal outcome (another worker
//! already claimed the row), so any number of sweeps may run concurrently,
//! in one process or many.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::cascade::store::{
    CascadeStore, DueCursor, DueQuery, EscalationOutcome, ResponsibilityRecorder,
};
use crate::domain::assignment::{AssignmentSource, ResponsibilityChange};
use crate::domain::cascade::CascadeEntry;
use crate::errors::ApplicationError;

/// What a sweep does with active entries whose configuration was disabled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisabledConfigPolicy {
    /// Keep expiring and escalating against the captured SLA.
    #[default]
    Continue,
    /// Leave the entries untouched until the configuration is re-enabled.
    Freeze,
}

impl DisabledConfigPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Continue => "continue",
            Self::Freeze => "freeze",
        }
    }
}

impl std::str::FromStr for DisabledConfigPolicy {
    type Err = ApplicationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "continue" => Ok(Self::Continue),
            "freeze" => Ok(Self::Freeze),
            other => Err(ApplicationError::Configuration(format!(
                "unsupported disabled-config policy `{other}` (expected continue|freeze)"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EscalationSettings {
    pub batch_size: u32,
    pub on_config_disabled: DisabledConfigPolicy,
}

impl Default for EscalationSettings {
    fn default() -> Self {
        Self { batch_size: 200, on_config_disabled: DisabledConfigPolicy::Continue }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub expired: usize,
    pub escalated: usize,
    pub stuck: usize,
    pub already_claimed: usize,
    pub suppressed_by_finalization: usize,
    pub frozen: usize,
    pub failed: usize,
    pub successors: Vec<CascadeEntry>,
}

impl SweepReport {
    pub fn changed_anything(&self) -> bool {
        self.expired > 0
    }
}

pub struct EscalationScheduler {
    store: Arc<dyn CascadeStore>,
    recorder: Arc<dyn ResponsibilityRecorder>,
    settings: EscalationSettings,
}

impl EscalationScheduler {
    pub fn new(
        store: Arc<dyn CascadeStore>,
        recorder: Arc<dyn ResponsibilityRecorder>,
        settings: EscalationSettings,
    ) -> Self {
        Self { store, recorder, settings }
    }

    pub fn settings(&self) -> &EscalationSettings {
        &self.settings
    }

    /// Expires overdue active entries and seeds each one's successor.
    ///
    /// Per-entry failures are counted and logged; the entry stays active and
    /// is picked up again by the next sweep. Under `freeze`, entries of an
    /// inactive configuration are never selected and only counted.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, ApplicationError> {
        let freeze = self.settings.on_config_disabled == DisabledConfigPolicy::Freeze;
        let mut report = SweepReport::default();
        if freeze {
            let held = self.store.held_entry_count(now).await?;
            report.frozen = usize::try_from(held).unwrap_or(usize::MAX);
        }

        let mut query = DueQuery {
            active_configs_only: freeze,
            ..DueQuery::first_page(now, self.settings.batch_size.max(1))
        };
        loop {
            let page = self.store.due_entries(&query).await?;
            report.examined += page.len();
            let failed_before = report.failed;

            for entry in &page {
                match self.store.escalate(&entry.id, entry.successor(now)).await {
                    Ok(outcome) => self.apply_outcome(entry, outcome, now, &mut report).await,
                    Err(error) => {
                        report.failed += 1;
                        log_entry_failure(entry, &error);
                    }
                }
            }

            // Failed rows are still due and sort first; read past them so they
            // cannot fill every batch.
            let full = u32::try_from(page.len()).map_or(true, |len| len >= query.limit);
            match page.last() {
                Some(last) if full && report.failed > failed_before => {
                    query.after = Some(DueCursor::after(last));
                }
                _ => break,
            }
        }

        if report.changed_anything() || report.failed > 0 {
            info!(
                event_name = "cascade.sweep.completed",
                correlation_id = "sweep",
                examined = report.examined,
                expired = report.expired,
                escalated = report.escalated,
                stuck = report.stuck,
                already_claimed = report.already_claimed,
                frozen = report.frozen,
                failed = report.failed,
                "cascade sweep completed"
            );
        }

        Ok(report)
    }

    async fn apply_outcome(
        &self,
        entry: &CascadeEntry,
        outcome: EscalationOutcome,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) {
        match outcome {
            EscalationOutcome::AlreadyClaimed => {
                report.already_claimed += 1;
                debug!(
                    event_name = "cascade.sweep.already_claimed",
                    correlation_id = %entry.client_id.0,
                    entry_id = %entry.id.0,
                    "entry already claimed by another sweep"
                );
            }
            EscalationOutcome::Expired => {
                report.expired += 1;
                report.stuck += 1;
                warn!(
                    event_name = "cascade.sweep.stuck",
                    correlation_id = %entry.client_id.0,
                    client_id = %entry.client_id.0,
                    lead_id = %entry.lead_id.0,
                    consultant_id = %entry.consultant_id.0,
                    entry_id = %entry.id.0,
                    sequence = entry.sequence,
                    "cascade queue exhausted; lead is stuck"
                );
            }
            EscalationOutcome::SuppressedByFinalization => {
                report.expired += 1;
                report.suppressed_by_finalization += 1;
                debug!(
                    event_name = "cascade.sweep.suppressed",
                    correlation_id = %entry.client_id.0,
                    entry_id = %entry.id.0,
                    "client already converted; successor not created"
                );
            }
            EscalationOutcome::Escalated { successor } => {
                report.expired += 1;
                report.escalated += 1;
                info!(
                    event_name = "cascade.sweep.escalated",
                    correlation_id = %entry.client_id.0,
                    client_id = %entry.client_id.0,
                    from_consultant_id = %entry.consultant_id.0,
                    consultant_id = %successor.consultant_id.0,
                    entry_id = %successor.id.0,
                    sequence = successor.sequence,
                    "cascade escalated to next consultant"
                );

                let change = ResponsibilityChange::from_cascade(
                    AssignmentSource::CascadeEscalation,
                    successor.client_id.clone(),
                    successor.consultant_id.clone(),
                    successor.id.clone(),
                    now,
                );
                if let Err(error) = self.recorder.record(change).await {
                    warn!(
                        event_name = "cascade.responsibility.record_failed",
                        correlation_id = %entry.client_id.0,
                        client_id = %entry.client_id.0,
                        error = %error,
                        "could not record responsible consultant after escalation"
                    );
                }
                report.successors.push(successor);
            }
        }
    }
}

fn log_entry_failure(entry: &CascadeEntry, error: &ApplicationError) {
    error!(
        event_name = "cascade.sweep.entry_failed",
        correlation_id = %entry.client_id.0,
        client_id = %entry.client_id.0,
        entry_id = %entry.id.0,
        error = %error,
        "cascade entry escalation failed; will retry next sweep"
    );
}
