use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use leadrelay_core::cascade::store::{CascadeStore, DueQuery, EscalationOutcome, InsertOutcome};
use leadrelay_core::domain::cascade::{
    CascadeConfig, CascadeConfigId, CascadeEntry, CascadeEntryId, CascadeEntryStatus, ClientId,
    ConsultantId, DistributionMethod, LeadId,
};
use leadrelay_core::errors::ApplicationError;

use super::{
    format_timestamp, parse_optional_timestamp, parse_timestamp, parse_u32, RepositoryError,
};
use crate::DbPool;

const ENTRY_COLUMNS: &str = "id,
    lead_id,
    client_id,
    consultant_id,
    sequence,
    sla_hours,
    config_id,
    queue_snapshot_json,
    started_at,
    expires_at,
    status,
    finalized_at,
    finalized_by,
    finalization_reason";

const CONFIG_COLUMNS: &str =
    "id, active, distribution_method, queue_json, sla_hours_per_step, updated_at";

pub struct SqlCascadeStore {
    pool: DbPool,
}

impl SqlCascadeStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_active_config(&self) -> Result<Option<CascadeConfig>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {CONFIG_COLUMNS} FROM cascade_config
             WHERE active = 1
             ORDER BY updated_at DESC
             LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;

        row.map(config_from_row).transpose()
    }

    async fn load_config(&self, id: &CascadeConfigId) -> Result<Option<CascadeConfig>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {CONFIG_COLUMNS} FROM cascade_config WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(config_from_row).transpose()
    }

    async fn upsert_config(&self, config: CascadeConfig) -> Result<(), RepositoryError> {
        let queue_json = encode_queue(&config.queue)?;
        let mut tx = self.pool.begin().await?;

        if config.active {
            sqlx::query("UPDATE cascade_config SET active = 0 WHERE active = 1 AND id <> ?")
                .bind(&config.id.0)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(
            "INSERT INTO cascade_config (
                id,
                active,
                distribution_method,
                queue_json,
                sla_hours_per_step,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                active = excluded.active,
                distribution_method = excluded.distribution_method,
                queue_json = excluded.queue_json,
                sla_hours_per_step = excluded.sla_hours_per_step,
                updated_at = excluded.updated_at",
        )
        .bind(&config.id.0)
        .bind(i64::from(config.active))
        .bind(config.distribution_method.as_str())
        .bind(queue_json)
        .bind(i64::from(config.sla_hours_per_step))
        .bind(format_timestamp(config.updated_at))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn insert_sequence_one(&self, entry: &CascadeEntry) -> Result<InsertOutcome, RepositoryError> {
        let inserted = sqlx::query(&format!(
            "INSERT INTO cascade_entry ({ENTRY_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(client_id, sequence) DO NOTHING"
        ))
        .bind(&entry.id.0)
        .bind(&entry.lead_id.0)
        .bind(&entry.client_id.0)
        .bind(&entry.consultant_id.0)
        .bind(i64::from(entry.sequence))
        .bind(i64::from(entry.sla_hours))
        .bind(&entry.config_id.0)
        .bind(encode_queue(&entry.queue_snapshot)?)
        .bind(format_timestamp(entry.started_at))
        .bind(format_timestamp(entry.expires_at))
        .bind(entry.status.as_str())
        .bind(entry.finalized_at.map(format_timestamp))
        .bind(entry.finalized_by.as_ref().map(|consultant| consultant.0.as_str()))
        .bind(entry.finalization_reason.as_deref())
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(if inserted == 0 { InsertOutcome::AlreadyExists } else { InsertOutcome::Inserted })
    }

    async fn load_entry(&self, id: &CascadeEntryId) -> Result<Option<CascadeEntry>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {ENTRY_COLUMNS} FROM cascade_entry WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(entry_from_row).transpose()
    }

    async fn load_entries_for_client(
        &self,
        client_id: &ClientId,
    ) -> Result<Vec<CascadeEntry>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM cascade_entry
             WHERE client_id = ?
             ORDER BY sequence ASC"
        ))
        .bind(&client_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(entry_from_row).collect()
    }

    async fn load_due_entries(&self, query: &DueQuery) -> Result<Vec<CascadeEntry>, RepositoryError> {
        let cursor_expires_at = query.after.as_ref().map(|cursor| format_timestamp(cursor.expires_at));
        let cursor_id = query.after.as_ref().map(|cursor| cursor.id.0.clone());

        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM cascade_entry
             WHERE status = 'active' AND expires_at <= ?
               AND (? = 0 OR EXISTS (
                    SELECT 1 FROM cascade_config c
                    WHERE c.id = cascade_entry.config_id AND c.active = 1
               ))
               AND (? IS NULL OR expires_at > ? OR (expires_at = ? AND id > ?))
             ORDER BY expires_at ASC, id ASC
             LIMIT ?"
        ))
        .bind(format_timestamp(query.now))
        .bind(i64::from(query.active_configs_only))
        .bind(cursor_expires_at.clone())
        .bind(cursor_expires_at.clone())
        .bind(cursor_expires_at)
        .bind(cursor_id)
        .bind(i64::from(query.limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(entry_from_row).collect()
    }

    async fn load_held_entry_count(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let count = sqlx::query(
            "SELECT COUNT(*) AS count FROM cascade_entry
             WHERE status = 'active' AND expires_at <= ?
               AND NOT EXISTS (
                    SELECT 1 FROM cascade_config c
                    WHERE c.id = cascade_entry.config_id AND c.active = 1
               )",
        )
        .bind(format_timestamp(now))
        .fetch_one(&self.pool)
        .await?
        .try_get::<i64, _>("count")?;

        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Expire and successor insert share one transaction. The expire is a
    /// compare-and-update on `status = 'active'`; losing it rolls back and
    /// reports `AlreadyClaimed`.
    async fn expire_and_seed(
        &self,
        entry_id: &CascadeEntryId,
        successor: Option<CascadeEntry>,
    ) -> Result<Option<EscalationOutcome>, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query(
            "UPDATE cascade_entry SET status = 'expired' WHERE id = ? AND status = 'active'",
        )
        .bind(&entry_id.0)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if claimed == 0 {
            let exists = sqlx::query("SELECT 1 FROM cascade_entry WHERE id = ?")
                .bind(&entry_id.0)
                .fetch_optional(&mut *tx)
                .await?
                .is_some();
            tx.rollback().await?;
            return Ok(exists.then_some(EscalationOutcome::AlreadyClaimed));
        }

        let Some(successor) = successor else {
            tx.commit().await?;
            return Ok(Some(EscalationOutcome::Expired));
        };

        let inserted = sqlx::query(&format!(
            "INSERT INTO cascade_entry ({ENTRY_COLUMNS})
             SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, NULL, NULL
             WHERE NOT EXISTS (
                SELECT 1 FROM cascade_entry
                WHERE client_id = ? AND status = 'finalized_success'
             )"
        ))
        .bind(&successor.id.0)
        .bind(&successor.lead_id.0)
        .bind(&successor.client_id.0)
        .bind(&successor.consultant_id.0)
        .bind(i64::from(successor.sequence))
        .bind(i64::from(successor.sla_hours))
        .bind(&successor.config_id.0)
        .bind(encode_queue(&successor.queue_snapshot)?)
        .bind(format_timestamp(successor.started_at))
        .bind(format_timestamp(successor.expires_at))
        .bind(CascadeEntryStatus::Active.as_str())
        .bind(&successor.client_id.0)
        .execute(&mut *tx)
        .await
        .map_err(|error| unique_violation_as_conflict(error, &successor))?
        .rows_affected();

        tx.commit().await?;

        if inserted == 0 {
            return Ok(Some(EscalationOutcome::SuppressedByFinalization));
        }
        Ok(Some(EscalationOutcome::Escalated { successor }))
    }

    async fn finalize_active_rows(
        &self,
        client_id: &ClientId,
        finalized_by: &ConsultantId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<CascadeEntry>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "UPDATE cascade_entry
             SET status = 'finalized_success',
                 finalized_at = ?,
                 finalized_by = ?,
                 finalization_reason = ?
             WHERE client_id = ? AND status = 'active'
             RETURNING {ENTRY_COLUMNS}"
        ))
        .bind(format_timestamp(now))
        .bind(&finalized_by.0)
        .bind(reason)
        .bind(&client_id.0)
        .fetch_all(&self.pool)
        .await?;

        let mut finalized: Vec<CascadeEntry> =
            rows.into_iter().map(entry_from_row).collect::<Result<_, _>>()?;
        finalized.sort_by_key(|entry| entry.sequence);
        Ok(finalized)
    }

    async fn client_has_finalized_success(&self, client_id: &ClientId) -> Result<bool, RepositoryError> {
        let row = sqlx::query(
            "SELECT 1 FROM cascade_entry
             WHERE client_id = ? AND status = 'finalized_success'
             LIMIT 1",
        )
        .bind(&client_id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some())
    }

    async fn load_started_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CascadeEntry>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM cascade_entry
             WHERE started_at >= ? AND started_at <= ?
             ORDER BY started_at ASC, id ASC"
        ))
        .bind(format_timestamp(start))
        .bind(format_timestamp(end))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(entry_from_row).collect()
    }

    async fn load_active_entries(&self) -> Result<Vec<CascadeEntry>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM cascade_entry
             WHERE status = 'active'
             ORDER BY expires_at ASC, id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(entry_from_row).collect()
    }

    async fn load_stuck_entries(&self) -> Result<Vec<CascadeEntry>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM cascade_entry AS latest
             WHERE latest.status = 'expired'
               AND latest.sequence = (
                  SELECT MAX(sibling.sequence) FROM cascade_entry AS sibling
                  WHERE sibling.client_id = latest.client_id
               )
               AND NOT EXISTS (
                  SELECT 1 FROM cascade_entry AS open
                  WHERE open.client_id = latest.client_id AND open.status <> 'expired'
               )
             ORDER BY latest.expires_at ASC, latest.id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(entry_from_row).collect()
    }
}

#[async_trait]
impl CascadeStore for SqlCascadeStore {
    async fn active_config(&self) -> Result<Option<CascadeConfig>, ApplicationError> {
        Ok(self.load_active_config().await?)
    }

    async fn find_config(
        &self,
        id: &CascadeConfigId,
    ) -> Result<Option<CascadeConfig>, ApplicationError> {
        Ok(self.load_config(id).await?)
    }

    async fn save_config(&self, config: CascadeConfig) -> Result<(), ApplicationError> {
        Ok(self.upsert_config(config).await?)
    }

    async fn insert_first_entry(
        &self,
        entry: CascadeEntry,
    ) -> Result<InsertOutcome, ApplicationError> {
        Ok(self.insert_sequence_one(&entry).await?)
    }

    async fn find_entry(
        &self,
        id: &CascadeEntryId,
    ) -> Result<Option<CascadeEntry>, ApplicationError> {
        Ok(self.load_entry(id).await?)
    }

    async fn entries_for_client(
        &self,
        client_id: &ClientId,
    ) -> Result<Vec<CascadeEntry>, ApplicationError> {
        Ok(self.load_entries_for_client(client_id).await?)
    }

    async fn due_entries(&self, query: &DueQuery) -> Result<Vec<CascadeEntry>, ApplicationError> {
        Ok(self.load_due_entries(query).await?)
    }

    async fn held_entry_count(&self, now: DateTime<Utc>) -> Result<u64, ApplicationError> {
        Ok(self.load_held_entry_count(now).await?)
    }

    async fn escalate(
        &self,
        entry_id: &CascadeEntryId,
        successor: Option<CascadeEntry>,
    ) -> Result<EscalationOutcome, ApplicationError> {
        self.expire_and_seed(entry_id, successor)
            .await?
            .ok_or_else(|| ApplicationError::not_found("cascade entry", entry_id.0.clone()))
    }

    async fn finalize_active(
        &self,
        client_id: &ClientId,
        finalized_by: &ConsultantId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<CascadeEntry>, ApplicationError> {
        Ok(self.finalize_active_rows(client_id, finalized_by, reason, now).await?)
    }

    async fn has_finalized_success(&self, client_id: &ClientId) -> Result<bool, ApplicationError> {
        Ok(self.client_has_finalized_success(client_id).await?)
    }

    async fn entries_started_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CascadeEntry>, ApplicationError> {
        Ok(self.load_started_between(start, end).await?)
    }

    async fn active_entries(&self) -> Result<Vec<CascadeEntry>, ApplicationError> {
        Ok(self.load_active_entries().await?)
    }

    async fn stuck_entries(&self) -> Result<Vec<CascadeEntry>, ApplicationError> {
        Ok(self.load_stuck_entries().await?)
    }
}

fn unique_violation_as_conflict(error: sqlx::Error, successor: &CascadeEntry) -> RepositoryError {
    match &error {
        sqlx::Error::Database(database) if database.is_unique_violation() => {
            RepositoryError::Conflict(format!(
                "sequence {} or consultant `{}` already holds an entry for client `{}`",
                successor.sequence, successor.consultant_id.0, successor.client_id.0
            ))
        }
        _ => RepositoryError::Database(error),
    }
}

fn encode_queue(queue: &[ConsultantId]) -> Result<String, RepositoryError> {
    let ids: Vec<&str> = queue.iter().map(|consultant| consultant.0.as_str()).collect();
    serde_json::to_string(&ids)
        .map_err(|error| RepositoryError::Decode(format!("could not encode queue: {error}")))
}

fn decode_queue(column: &str, raw: &str) -> Result<Vec<ConsultantId>, RepositoryError> {
    let ids: Vec<String> = serde_json::from_str(raw).map_err(|error| {
        RepositoryError::Decode(format!("invalid queue json in `{column}`: {error}"))
    })?;
    Ok(ids.into_iter().map(ConsultantId).collect())
}

fn config_from_row(row: SqliteRow) -> Result<CascadeConfig, RepositoryError> {
    let method_raw = row.try_get::<String, _>("distribution_method")?;
    let distribution_method = DistributionMethod::parse(&method_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown distribution method `{method_raw}`"))
    })?;
    let queue_raw = row.try_get::<String, _>("queue_json")?;

    Ok(CascadeConfig {
        id: CascadeConfigId(row.try_get("id")?),
        active: row.try_get::<i64, _>("active")? != 0,
        distribution_method,
        queue: decode_queue("queue_json", &queue_raw)?,
        sla_hours_per_step: parse_u32("sla_hours_per_step", row.try_get("sla_hours_per_step")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn entry_from_row(row: SqliteRow) -> Result<CascadeEntry, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = CascadeEntryStatus::parse(&status_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown cascade entry status `{status_raw}`"))
    })?;
    let queue_raw = row.try_get::<String, _>("queue_snapshot_json")?;

    Ok(CascadeEntry {
        id: CascadeEntryId(row.try_get("id")?),
        lead_id: LeadId(row.try_get("lead_id")?),
        client_id: ClientId(row.try_get("client_id")?),
        consultant_id: ConsultantId(row.try_get("consultant_id")?),
        sequence: parse_u32("sequence", row.try_get("sequence")?)?,
        sla_hours: parse_u32("sla_hours", row.try_get("sla_hours")?)?,
        config_id: CascadeConfigId(row.try_get("config_id")?),
        queue_snapshot: decode_queue("queue_snapshot_json", &queue_raw)?,
        started_at: parse_timestamp("started_at", row.try_get("started_at")?)?,
        expires_at: parse_timestamp("expires_at", row.try_get("expires_at")?)?,
        status,
        finalized_at: parse_optional_timestamp("finalized_at", row.try_get("finalized_at")?)?,
        finalized_by: row.try_get::<Option<String>, _>("finalized_by")?.map(ConsultantId),
        finalization_reason: row.try_get("finalization_reason")?,
    })
}
