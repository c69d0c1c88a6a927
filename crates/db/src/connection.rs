use std::time::Duration;

use leadrelay_core::config::DatabaseConfig;
use sqlx::sqlite::SqlitePoolOptions;

pub type DbPool = sqlx::SqlitePool;

pub async fn connect(database_url: &str) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(database_url, 5, 30).await
}

pub async fn connect_with_config(config: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(&config.url, config.max_connections, config.timeout_secs).await
}

/// Every connection waits up to five seconds on a locked database, so
/// concurrent sweep transactions queue instead of failing.
pub async fn connect_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(timeout_secs.max(1)))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                sqlx::query("PRAGMA journal_mode = WAL").execute(&mut *conn).await?;
                sqlx::query("PRAGMA busy_timeout = 5000").execute(&mut *conn).await?;
                Ok(())
            })
        })
        .connect(database_url)
        .await
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::connect_with_settings;

    #[tokio::test]
    async fn connections_enforce_foreign_keys_and_busy_timeout() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");

        let foreign_keys = sqlx::query("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .expect("read foreign_keys")
            .get::<i64, _>(0);
        let busy_timeout = sqlx::query("PRAGMA busy_timeout")
            .fetch_one(&pool)
            .await
            .expect("read busy_timeout")
            .get::<i64, _>(0);

        assert_eq!(foreign_keys, 1);
        assert_eq!(busy_timeout, 5000);
    }
}
