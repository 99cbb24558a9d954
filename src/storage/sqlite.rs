//! SQLite storage backend implementation
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Readers are not blocked by the scheduler's writes
//! - **Connection pooling**: Shared by round tasks and query handlers
//! - **Migrations**: Automatic schema versioning with sqlx

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument};

use super::backend::{HealthStatus, ProbeStore, cutoff_timestamp};
use super::error::{StorageError, StorageResult};
use super::schema::ProbeRecord;
use crate::config::ChannelMapping;
use crate::{ProbeOutcome, ServiceKey};

const SELECT_COLUMNS: &str =
    "SELECT id, provider, service, channel, status, sub_status, latency, timestamp FROM probe_history";

/// SQLite storage backend
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteStore {
    /// Open (or create) the database at `db_path` and run migrations.
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite store at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    fn record_from_row(row: &SqliteRow) -> StorageResult<ProbeRecord> {
        let sub_status: String = row.try_get("sub_status")?;
        ProbeRecord::from_columns(
            row.try_get("id")?,
            row.try_get("provider")?,
            row.try_get("service")?,
            row.try_get("channel")?,
            row.try_get("status")?,
            &sub_status,
            row.try_get("latency")?,
            row.try_get("timestamp")?,
        )
    }
}

#[async_trait]
impl ProbeStore for SqliteStore {
    #[instrument(skip(self, outcome), fields(key = %key))]
    async fn save(&self, key: &ServiceKey, outcome: &ProbeOutcome) -> StorageResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO probe_history (provider, service, channel, status, sub_status, latency, timestamp)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&key.provider)
        .bind(&key.service)
        .bind(&key.channel)
        .bind(i64::from(u8::from(outcome.status)))
        .bind(outcome.sub_status.as_str())
        .bind(outcome.latency_ms as i64)
        .bind(outcome.timestamp)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn latest(&self, key: &ServiceKey) -> StorageResult<Option<ProbeRecord>> {
        let sql = format!(
            "{SELECT_COLUMNS} WHERE provider = ? AND service = ? AND channel = ? \
             ORDER BY timestamp DESC, id DESC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(&key.provider)
            .bind(&key.service)
            .bind(&key.channel)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::record_from_row).transpose()
    }

    async fn history(&self, key: &ServiceKey, since: i64) -> StorageResult<Vec<ProbeRecord>> {
        // descending walk hits the covering index, reversed afterwards
        let sql = format!(
            "{SELECT_COLUMNS} WHERE provider = ? AND service = ? AND channel = ? AND timestamp >= ? \
             ORDER BY timestamp DESC, id DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(&key.provider)
            .bind(&key.service)
            .bind(&key.channel)
            .bind(since)
            .fetch_all(&self.pool)
            .await?;

        let mut records = rows
            .iter()
            .map(Self::record_from_row)
            .collect::<StorageResult<Vec<_>>>()?;
        records.reverse();

        debug!("loaded {} records for {}", records.len(), key);
        Ok(records)
    }

    #[instrument(skip(self))]
    async fn cleanup(&self, older_than_days: u32) -> StorageResult<u64> {
        let cutoff = cutoff_timestamp(Utc::now().timestamp(), older_than_days);
        let result = sqlx::query("DELETE FROM probe_history WHERE timestamp < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    #[instrument(skip_all, fields(mappings = mappings.len()))]
    async fn migrate_channels(&self, mappings: &[ChannelMapping]) -> StorageResult<u64> {
        if mappings.is_empty() {
            return Ok(0);
        }

        let pending: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM probe_history WHERE channel = ''")
                .fetch_one(&self.pool)
                .await?;
        if pending == 0 {
            debug!("no legacy rows without channel");
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut updated = 0;
        for mapping in mappings {
            let result = sqlx::query(
                "UPDATE probe_history SET channel = ? WHERE provider = ? AND service = ? AND channel = ''",
            )
            .bind(&mapping.channel)
            .bind(&mapping.provider)
            .bind(&mapping.service)
            .execute(&mut *tx)
            .await?;
            updated += result.rows_affected();
        }
        tx.commit().await?;

        if updated > 0 {
            info!("assigned channels to {} legacy probe records", updated);
        }
        Ok(updated)
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM probe_history")
            .fetch_one(&self.pool)
            .await?;

        Ok(HealthStatus {
            healthy: true,
            message: "SQLite store operational".to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "sqlite".to_string()),
                ("path".to_string(), self.db_path.clone()),
                ("records".to_string(), rows.to_string()),
            ]),
        })
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite store");
        self.pool.close().await;
        Ok(())
    }
}
