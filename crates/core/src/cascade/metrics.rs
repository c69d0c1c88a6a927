//! Dashboard reporting over the cascade ledger.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::cascade::sla::{self, SlaThresholds, UrgencyBucket};
use crate::cascade::store::CascadeStore;
use crate::domain::cascade::{CascadeEntry, CascadeEntryStatus, ClientId, ConsultantId, LeadId};
use crate::errors::ApplicationError;

/// Inclusive window over `started_at`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportingPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ReportingPeriod {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, ApplicationError> {
        if start > end {
            return Err(ApplicationError::validation(format!(
                "reporting period start ({}) is after end ({})",
                start.to_rfc3339(),
                end.to_rfc3339()
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeMetrics {
    pub total_assignments: u64,
    pub finalized_success: u64,
    pub expired: u64,
    pub active: u64,
    /// Whole percent, `0` when there are no assignments.
    pub conversion_rate: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ActiveAssignment {
    pub entry: CascadeEntry,
    pub hours_remaining: Decimal,
    pub consumed_pct: Decimal,
    pub urgency: UrgencyBucket,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ConsultantRanking {
    pub consultant_id: ConsultantId,
    pub total_assignments: u64,
    pub finalized_success: u64,
    pub expired: u64,
    pub active: u64,
    pub conversion_rate: Decimal,
    /// Mean position in the cascade at which this consultant received leads.
    pub average_sequence: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StuckLead {
    pub client_id: ClientId,
    pub lead_id: LeadId,
    pub last_consultant_id: ConsultantId,
    pub last_sequence: u32,
    pub expired_at: DateTime<Utc>,
}

impl From<CascadeEntry> for StuckLead {
    fn from(entry: CascadeEntry) -> Self {
        Self {
            client_id: entry.client_id,
            lead_id: entry.lead_id,
            last_consultant_id: entry.consultant_id,
            last_sequence: entry.sequence,
            expired_at: entry.expires_at,
        }
    }
}

pub fn conversion_rate(finalized_success: u64, total: u64) -> Decimal {
    if total == 0 {
        return Decimal::ZERO;
    }
    (Decimal::from(finalized_success) * Decimal::ONE_HUNDRED / Decimal::from(total))
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
}

#[derive(Default)]
struct Tally {
    total: u64,
    finalized_success: u64,
    expired: u64,
    active: u64,
    sequence_sum: u64,
}

impl Tally {
    fn add(&mut self, entry: &CascadeEntry) {
        self.total += 1;
        self.sequence_sum += u64::from(entry.sequence);
        match entry.status {
            CascadeEntryStatus::Active => self.active += 1,
            CascadeEntryStatus::Expired => self.expired += 1,
            CascadeEntryStatus::FinalizedSuccess => self.finalized_success += 1,
        }
    }
}

pub fn summarize(entries: &[CascadeEntry]) -> CascadeMetrics {
    let mut tally = Tally::default();
    for entry in entries {
        tally.add(entry);
    }
    CascadeMetrics {
        total_assignments: tally.total,
        finalized_success: tally.finalized_success,
        expired: tally.expired,
        active: tally.active,
        conversion_rate: conversion_rate(tally.finalized_success, tally.total),
    }
}

/// Sorted by conversion rate desc, then total assignments desc, then id.
pub fn rank(entries: &[CascadeEntry]) -> Vec<ConsultantRanking> {
    let mut per_consultant: BTreeMap<&ConsultantId, Tally> = BTreeMap::new();
    for entry in entries {
        per_consultant.entry(&entry.consultant_id).or_default().add(entry);
    }

    let mut ranking: Vec<ConsultantRanking> = per_consultant
        .into_iter()
        .map(|(consultant_id, tally)| ConsultantRanking {
            consultant_id: consultant_id.clone(),
            total_assignments: tally.total,
            finalized_success: tally.finalized_success,
            expired: tally.expired,
            active: tally.active,
            conversion_rate: conversion_rate(tally.finalized_success, tally.total),
            average_sequence: (Decimal::from(tally.sequence_sum) / Decimal::from(tally.total.max(1)))
                .round_dp(2),
        })
        .collect();

    ranking.sort_by(|left, right| {
        right
            .conversion_rate
            .cmp(&left.conversion_rate)
            .then_with(|| right.total_assignments.cmp(&left.total_assignments))
            .then_with(|| left.consultant_id.cmp(&right.consultant_id))
    });
    ranking
}

/// Most urgent first: bucket desc, then fewest hours remaining.
pub fn prioritize(
    entries: Vec<CascadeEntry>,
    now: DateTime<Utc>,
    thresholds: &SlaThresholds,
) -> Vec<ActiveAssignment> {
    let mut assignments: Vec<ActiveAssignment> = entries
        .into_iter()
        .map(|entry| {
            let evaluation = sla::evaluate(now, entry.started_at, entry.sla_hours, thresholds);
            ActiveAssignment {
                entry,
                hours_remaining: evaluation.hours_remaining,
                consumed_pct: evaluation.consumed_pct,
                urgency: evaluation.bucket,
            }
        })
        .collect();

    assignments.sort_by(|left, right| match right.urgency.cmp(&left.urgency) {
        Ordering::Equal => left
            .hours_remaining
            .cmp(&right.hours_remaining)
            .then_with(|| left.entry.expires_at.cmp(&right.entry.expires_at))
            .then_with(|| left.entry.id.cmp(&right.entry.id)),
        other => other,
    });
    assignments
}

/// Read-only reporting surface polled by dashboards.
#[derive(Clone)]
pub struct CascadeAggregator {
    store: Arc<dyn CascadeStore>,
    thresholds: SlaThresholds,
}

impl CascadeAggregator {
    pub fn new(store: Arc<dyn CascadeStore>, thresholds: SlaThresholds) -> Self {
        Self { store, thresholds }
    }

    pub fn thresholds(&self) -> &SlaThresholds {
        &self.thresholds
    }

    pub async fn metrics(&self, period: ReportingPeriod) -> Result<CascadeMetrics, ApplicationError> {
        let entries = self.store.entries_started_between(period.start, period.end).await?;
        Ok(summarize(&entries))
    }

    pub async fn active_assignments(&self) -> Result<Vec<ActiveAssignment>, ApplicationError> {
        self.active_assignments_at(Utc::now()).await
    }

    pub async fn active_assignments_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ActiveAssignment>, ApplicationError> {
        let entries = self.store.active_entries().await?;
        Ok(prioritize(entries, now, &self.thresholds))
    }

    pub async fn user_ranking(
        &self,
        period: ReportingPeriod,
    ) -> Result<Vec<ConsultantRanking>, ApplicationError> {
        let entries = self.store.entries_started_between(period.start, period.end).await?;
        Ok(rank(&entries))
    }

    pub async fn stuck_leads(&self) -> Result<Vec<StuckLead>, ApplicationError> {
        let entries = self.store.stuck_entries().await?;
        Ok(entries.into_iter().map(StuckLead::from).collect())
    }

    pub async fn client_history(
        &self,
        client_id: &ClientId,
    ) -> Result<Vec<CascadeEntry>, ApplicationError> {
        let entries = self.store.entries_for_client(client_id).await?;
        if entries.is_empty() {
            return Err(ApplicationError::not_found("cascade", client_id.0.clone()));
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, Utc};
    use rust_decimal::Decimal;

    use super::{conversion_rate, prioritize, rank, summarize, ReportingPeriod};
    use crate::cascade::sla::{SlaThresholds, UrgencyBucket};
    use crate::domain::cascade::{
        CascadeConfigId, CascadeEntry, CascadeEntryStatus, ClientId, ConsultantId, LeadId,
    };

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-02T09:00:00Z").expect("valid rfc3339").with_timezone(&Utc)
    }

    fn entry(client: &str, consultant: &str, sequence: u32, status: CascadeEntryStatus) -> CascadeEntry {
        let mut entry = CascadeEntry::open(
            LeadId(format!("L-{client}")),
            ClientId(client.to_string()),
            ConsultantId(consultant.to_string()),
            sequence,
            24,
            CascadeConfigId("cfg-1".to_string()),
            vec![ConsultantId("A".to_string()), ConsultantId("B".to_string())],
            t0() + Duration::hours(i64::from(sequence - 1) * 24),
        );
        entry.status = status;
        entry
    }

    #[test]
    fn conversion_rate_is_a_rounded_percentage() {
        assert_eq!(conversion_rate(0, 0), Decimal::ZERO);
        assert_eq!(conversion_rate(1, 3), Decimal::from(33));
        assert_eq!(conversion_rate(2, 3), Decimal::from(67));
        assert_eq!(conversion_rate(1, 8), Decimal::from(13));
        assert_eq!(conversion_rate(4, 4), Decimal::ONE_HUNDRED);
    }

    #[test]
    fn summarize_counts_exhausted_cascades_as_expired() {
        let entries = vec![
            entry("X", "A", 1, CascadeEntryStatus::Expired),
            entry("Y", "A", 1, CascadeEntryStatus::FinalizedSuccess),
            entry("Z", "B", 1, CascadeEntryStatus::Active),
            entry("X", "B", 2, CascadeEntryStatus::Expired),
        ];

        let metrics = summarize(&entries);

        assert_eq!(metrics.total_assignments, 4);
        assert_eq!(metrics.finalized_success, 1);
        assert_eq!(metrics.expired, 2);
        assert_eq!(metrics.active, 1);
        assert_eq!(metrics.conversion_rate, Decimal::from(25));
    }

    #[test]
    fn rank_orders_by_conversion_then_volume() {
        let entries = vec![
            entry("X", "A", 1, CascadeEntryStatus::Expired),
            entry("X", "B", 2, CascadeEntryStatus::FinalizedSuccess),
            entry("Y", "A", 1, CascadeEntryStatus::FinalizedSuccess),
            entry("Z", "C", 1, CascadeEntryStatus::Expired),
            entry("W", "D", 1, CascadeEntryStatus::Expired),
            entry("V", "D", 1, CascadeEntryStatus::Active),
        ];

        let ranking = rank(&entries);
        let order: Vec<&str> = ranking.iter().map(|row| row.consultant_id.0.as_str()).collect();

        assert_eq!(order, vec!["B", "A", "D", "C"]);
        assert_eq!(ranking[0].conversion_rate, Decimal::ONE_HUNDRED);
        assert_eq!(ranking[0].average_sequence, Decimal::from(2));
        assert_eq!(ranking[1].conversion_rate, Decimal::from(50));
        assert_eq!(ranking[1].average_sequence, Decimal::ONE);
        assert_eq!(ranking[2].total_assignments, 2);
        assert_eq!(ranking[2].active, 1);
    }

    #[test]
    fn prioritize_puts_most_urgent_first() {
        let thresholds = SlaThresholds::default();
        let calm = entry("X", "A", 1, CascadeEntryStatus::Active);
        let mut late = entry("Y", "A", 1, CascadeEntryStatus::Active);
        late.started_at = t0() - Duration::hours(22);
        late.expires_at = late.started_at + Duration::hours(24);
        let mut overdue = entry("Z", "B", 1, CascadeEntryStatus::Active);
        overdue.started_at = t0() - Duration::hours(30);
        overdue.expires_at = overdue.started_at + Duration::hours(24);

        let active = prioritize(vec![calm, late, overdue], t0() + Duration::hours(1), &thresholds);

        let buckets: Vec<UrgencyBucket> = active.iter().map(|row| row.urgency).collect();
        assert_eq!(buckets, vec![UrgencyBucket::Expirado, UrgencyBucket::Critico, UrgencyBucket::Ok]);
        assert_eq!(active[0].entry.client_id.0, "Z");
        assert_eq!(active[0].hours_remaining, Decimal::ZERO);
        assert_eq!(active[1].hours_remaining, Decimal::ONE);
        assert_eq!(active[2].hours_remaining, Decimal::from(23));
    }

    #[test]
    fn reporting_period_rejects_inverted_window() {
        assert!(ReportingPeriod::new(t0(), t0() - Duration::seconds(1)).is_err());
        let period = ReportingPeriod::new(t0(), t0()).expect("single-instant window");
        assert!(period.contains(t0()));
    }
}
