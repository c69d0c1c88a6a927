use sqlx::Executor;

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

const DEMO_CONFIG_ID: &str = "cfg-demo";

/// Demo clients and the entry ids each one is expected to carry.
const DEMO_CLIENTS: &[DemoClientContract] = &[
    DemoClientContract {
        client_id: "client-demo-001",
        entry_ids: &["entry-demo-001-1"],
        description: "first consultant holds the lead",
    },
    DemoClientContract {
        client_id: "client-demo-002",
        entry_ids: &["entry-demo-002-1", "entry-demo-002-2"],
        description: "escalated once, second consultant holds the lead",
    },
    DemoClientContract {
        client_id: "client-demo-003",
        entry_ids: &["entry-demo-003-1"],
        description: "booked by the first consultant",
    },
];

/// Demo cascade ledger used by `leadrelay seed` and by tests that need a
/// populated database.
pub struct DemoSeedDataset;

impl DemoSeedDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/demo_cascade_seed.sql");

    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;

        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        let clients_seeded = DEMO_CLIENTS
            .iter()
            .map(|client| ClientSeedInfo {
                client_id: client.client_id,
                entries: client.entry_ids.len(),
                description: client.description,
            })
            .collect::<Vec<_>>();

        Ok(SeedResult { config_id: DEMO_CONFIG_ID, clients_seeded })
    }

    /// Checks that every demo row is present. Statuses are not compared since
    /// a sweep may legitimately have advanced the demo cascades.
    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        let config_exists: i64 =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM cascade_config WHERE id = ?1)")
                .bind(DEMO_CONFIG_ID)
                .fetch_one(pool)
                .await?;
        checks.push((DEMO_CONFIG_ID, config_exists == 1));

        for client in DEMO_CLIENTS {
            for entry_id in client.entry_ids {
                let entry_exists: i64 = sqlx::query_scalar(
                    "SELECT EXISTS(SELECT 1 FROM cascade_entry WHERE id = ?1 AND client_id = ?2)",
                )
                .bind(entry_id)
                .bind(client.client_id)
                .fetch_one(pool)
                .await?;
                checks.push((*entry_id, entry_exists == 1));
            }
        }

        let all_present = checks.iter().all(|(_, exists)| *exists);
        Ok(VerificationResult { all_present, checks })
    }

    /// Removes every demo client's lineage (including successors created by
    /// sweeps) and the demo configuration.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;
        let quoted_clients = sql_array_from_ids(
            &DEMO_CLIENTS.iter().map(|client| client.client_id).collect::<Vec<_>>(),
        );

        sqlx::query(&format!(
            "DELETE FROM client_assignment_event WHERE client_id IN {quoted_clients}"
        ))
        .execute(&mut *tx)
        .await?;
        sqlx::query(&format!("DELETE FROM cascade_entry WHERE client_id IN {quoted_clients}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM cascade_config WHERE id = ?1")
            .bind(DEMO_CONFIG_ID)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct DemoClientContract {
    client_id: &'static str,
    entry_ids: &'static [&'static str],
    description: &'static str,
}

fn sql_array_from_ids(ids: &[&str]) -> String {
    let quoted = ids.iter().map(|id| format!("'{}'", id)).collect::<Vec<_>>().join(",");
    format!("({quoted})")
}

#[derive(Debug)]
pub struct SeedResult {
    pub config_id: &'static str,
    pub clients_seeded: Vec<ClientSeedInfo>,
}

#[derive(Debug)]
pub struct ClientSeedInfo {
    pub client_id: &'static str,
    pub entries: usize,
    pub description: &'static str,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
