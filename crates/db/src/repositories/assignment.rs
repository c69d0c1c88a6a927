use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, Row};

use leadrelay_core::cascade::store::ResponsibilityRecorder;
use leadrelay_core::domain::assignment::{AssignmentSource, ResponsibilityChange};
use leadrelay_core::domain::cascade::{CascadeEntryId, ClientId, ConsultantId};
use leadrelay_core::errors::ApplicationError;

use super::{format_timestamp, parse_timestamp, RepositoryError};
use crate::DbPool;

/// Append-only `client_assignment_event` log. The latest row per client is
/// the consultant currently responsible for it.
pub struct SqlResponsibilityRecorder {
    pool: DbPool,
}

impl SqlResponsibilityRecorder {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn append(&self, change: &ResponsibilityChange) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO client_assignment_event (
                client_id,
                consultant_id,
                source,
                entry_id,
                occurred_at
             ) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&change.client_id.0)
        .bind(&change.consultant_id.0)
        .bind(change.source.as_str())
        .bind(change.entry_id.as_ref().map(|entry| entry.0.as_str()))
        .bind(format_timestamp(change.occurred_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn current_responsible(
        &self,
        client_id: &ClientId,
    ) -> Result<Option<ConsultantId>, RepositoryError> {
        let consultant = sqlx::query_scalar::<_, String>(
            "SELECT consultant_id FROM client_assignment_event
             WHERE client_id = ?
             ORDER BY id DESC
             LIMIT 1",
        )
        .bind(&client_id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(consultant.map(ConsultantId))
    }

    pub async fn history(
        &self,
        client_id: &ClientId,
    ) -> Result<Vec<ResponsibilityChange>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT client_id, consultant_id, source, entry_id, occurred_at
             FROM client_assignment_event
             WHERE client_id = ?
             ORDER BY id ASC",
        )
        .bind(&client_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(change_from_row).collect()
    }
}

#[async_trait]
impl ResponsibilityRecorder for SqlResponsibilityRecorder {
    async fn record(&self, change: ResponsibilityChange) -> Result<(), ApplicationError> {
        Ok(self.append(&change).await?)
    }
}

fn change_from_row(row: SqliteRow) -> Result<ResponsibilityChange, RepositoryError> {
    let source_raw = row.try_get::<String, _>("source")?;
    let source = AssignmentSource::parse(&source_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown assignment source `{source_raw}`"))
    })?;

    Ok(ResponsibilityChange {
        client_id: ClientId(row.try_get("client_id")?),
        consultant_id: ConsultantId(row.try_get("consultant_id")?),
        source,
        entry_id: row.try_get::<Option<String>, _>("entry_id")?.map(CascadeEntryId),
        occurred_at: parse_timestamp("occurred_at", row.try_get("occurred_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{DateTime, Duration, Utc};

    use leadrelay_core::cascade::{CascadeEngine, EngineSettings};
    use leadrelay_core::domain::assignment::{AssignmentSource, ResponsibilityChange};
    use leadrelay_core::domain::cascade::{
        CascadeConfig, CascadeConfigId, ClientId, ConsultantId, DistributionMethod, LeadId,
    };
    use leadrelay_core::ResponsibilityRecorder;

    use super::SqlResponsibilityRecorder;
    use crate::repositories::SqlCascadeStore;
    use crate::{connect_with_settings, migrations, DbPool};

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-02T09:00:00Z").expect("valid rfc3339").with_timezone(&Utc)
    }

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    #[tokio::test]
    async fn latest_event_is_the_current_responsible() {
        let recorder = SqlResponsibilityRecorder::new(setup_pool().await);
        let client = ClientId("X".to_string());

        assert_eq!(recorder.current_responsible(&client).await.expect("empty"), None);

        recorder
            .record(ResponsibilityChange::manual(client.clone(), ConsultantId("A".to_string()), t0()))
            .await
            .expect("record first");
        recorder
            .record(ResponsibilityChange::manual(
                client.clone(),
                ConsultantId("B".to_string()),
                t0() + Duration::minutes(5),
            ))
            .await
            .expect("record second");

        assert_eq!(
            recorder.current_responsible(&client).await.expect("current"),
            Some(ConsultantId("B".to_string()))
        );
        let history = recorder.history(&client).await.expect("history");
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|change| change.source == AssignmentSource::Manual));
        assert_eq!(history[1].occurred_at, t0() + Duration::minutes(5));
    }

    #[tokio::test]
    async fn engine_writes_cascade_owned_events() {
        let pool = setup_pool().await;
        let recorder = Arc::new(SqlResponsibilityRecorder::new(pool.clone()));
        let engine = CascadeEngine::new(
            Arc::new(SqlCascadeStore::new(pool)),
            recorder.clone(),
            EngineSettings::default(),
        );
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
        let client = ClientId("X".to_string());

        engine
            .orchestrator()
            .start_cascade_at(&LeadId("L".to_string()), Some(&client), t0())
            .await
            .expect("start");
        engine.sweep_at(t0() + Duration::hours(25)).await.expect("sweep");

        let history = recorder.history(&client).await.expect("history");
        let sources: Vec<AssignmentSource> = history.iter().map(|change| change.source).collect();
        assert_eq!(sources, vec![AssignmentSource::CascadeStart, AssignmentSource::CascadeEscalation]);
        assert!(history.iter().all(|change| change.entry_id.is_some()));
        assert_eq!(
            recorder.current_responsible(&client).await.expect("current"),
            Some(ConsultantId("B".to_string()))
        );
    }
}
