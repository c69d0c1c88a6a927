//! Periodic escalation sweep.
//!
//! One in-process sweep at a time; a tick that finds the previous sweep still
//! running is skipped. Across processes, the store's conditional updates keep
//! concurrent sweeps safe.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use leadrelay_core::{CascadeEngine, SweepReport};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[derive(Debug, PartialEq, Eq)]
pub enum TickOutcome {
    Completed(SweepReport),
    /// The previous sweep was still running.
    Skipped,
    Failed,
}

#[derive(Clone)]
pub struct SweepScheduler {
    engine: CascadeEngine,
    interval: Duration,
    in_flight: Arc<Mutex<()>>,
}

impl SweepScheduler {
    pub fn new(engine: CascadeEngine, interval: Duration) -> Self {
        Self { engine, interval, in_flight: Arc::new(Mutex::new(())) }
    }

    pub async fn tick(&self) -> TickOutcome {
        self.tick_at(Utc::now()).await
    }

    pub async fn tick_at(&self, now: DateTime<Utc>) -> TickOutcome {
        let Ok(_guard) = self.in_flight.try_lock() else {
            debug!(
                event_name = "cascade.scheduler.tick_skipped",
                correlation_id = "scheduler",
                "previous sweep still running; tick skipped"
            );
            return TickOutcome::Skipped;
        };

        match self.engine.sweep_at(now).await {
            Ok(report) => TickOutcome::Completed(report),
            Err(error) => {
                error!(
                    event_name = "cascade.scheduler.sweep_failed",
                    correlation_id = "scheduler",
                    error = %error,
                    "sweep failed; retrying on next tick"
                );
                TickOutcome::Failed
            }
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            event_name = "cascade.scheduler.started",
            correlation_id = "scheduler",
            interval_secs = self.interval.as_secs(),
            "escalation scheduler started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }

        info!(
            event_name = "cascade.scheduler.stopped",
            correlation_id = "shutdown",
            "escalation scheduler stopped"
        );
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{DateTime, Duration as ChronoDuration, Utc};
    use leadrelay_core::{
        CascadeConfig, CascadeConfigId, CascadeEngine, ClientId, ConsultantId, DistributionMethod,
        EngineSettings, LeadId,
    };
    use tokio_util::sync::CancellationToken;

    use super::{SweepScheduler, TickOutcome};

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-02T09:00:00Z").expect("valid rfc3339").with_timezone(&Utc)
    }

    async fn engine_with_open_cascade() -> CascadeEngine {
        let engine = CascadeEngine::in_memory(EngineSettings::default());
        engine
            .save_config(CascadeConfig {
                id: CascadeConfigId("cfg-1".to_string()),
                active: true,
                distribution_method: DistributionMethod::RoundRobin,
                queue: vec![ConsultantId("A".to_string()), ConsultantId("B".to_string())],
                sla_hours_per_step: 24,
                updated_at: t0(),
            })
            .await
            .expect("save config");
        engine
            .orchestrator()
            .start_cascade_at(&LeadId("L".to_string()), Some(&ClientId("X".to_string())), t0())
            .await
            .expect("start");
        engine
    }

    #[tokio::test]
    async fn tick_escalates_overdue_entries() {
        let scheduler = SweepScheduler::new(engine_with_open_cascade().await, Duration::from_secs(60));

        let outcome = scheduler.tick_at(t0() + ChronoDuration::hours(25)).await;

        let TickOutcome::Completed(report) = outcome else {
            panic!("expected a completed sweep, got {outcome:?}");
        };
        assert_eq!(report.escalated, 1);
    }

    #[tokio::test]
    async fn tick_is_skipped_while_a_sweep_is_in_flight() {
        let scheduler = SweepScheduler::new(engine_with_open_cascade().await, Duration::from_secs(60));
        let _running = scheduler.in_flight.lock().await;

        let outcome = scheduler.tick_at(t0() + ChronoDuration::hours(25)).await;

        assert_eq!(outcome, TickOutcome::Skipped);
    }

    #[tokio::test]
    async fn cancelled_scheduler_stops() {
        let scheduler = SweepScheduler::new(
            CascadeEngine::in_memory(EngineSettings::default()),
            Duration::from_secs(3600),
        );
        let cancel = CancellationToken::new();
        let handle = scheduler.spawn(cancel.clone());

        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("scheduler stops after cancellation")
            .expect("scheduler task does not panic");
    }
}
