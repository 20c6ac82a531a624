//! SQLite storage for API log records
//!
//! - Connection pooling with WAL mode
//! - Migrations embedded at compile time
//! - Batch inserts in a single transaction
//! - Rows are write-once (enforced by a trigger)

use crate::capture::record::{LogRecord, NewLogRecord};
use crate::capture::sink::RecordWriter;
use crate::config::DatabaseConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, Transaction};
use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

pub(crate) const SELECT_COLUMNS: &str = "id, method, url, ip_address, user_agent, request_headers, \
     request_body, response_headers, response_body, response_status, response_time_ms, user_id, \
     session_id, correlation_id, metadata, created_at";

const INSERT_SQL: &str = "INSERT INTO api_logs (method, url, ip_address, user_agent, request_headers, \
     request_body, response_headers, response_body, response_status, response_time_ms, user_id, \
     session_id, correlation_id, metadata, created_at)
     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

/// Result of a bulk delete: ids that were removed and ids that did not exist
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkDeleteOutcome {
    pub deleted: u64,
    pub missing: Vec<i64>,
}

/// API log database handle
pub struct LogDb {
    pool: SqlitePool,
}

impl LogDb {
    /// Open (creating if needed) the database and run migrations
    ///
    /// ```ignore
    /// let db = LogDb::new("sqlite:./data/api_logs.db", 5).await?;
    /// ```
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid database url: {}", database_url))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30))
            .pragma("synchronous", "NORMAL")
            .pragma("temp_store", "memory");

        // An in-memory database lives only as long as its connection
        let pool_options = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections.max(1))
        };

        let pool = pool_options
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await
            .context("Failed to connect to API log database")?;

        Self::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    /// Open the database described by the `[database]` config section
    pub async fn open(cfg: &DatabaseConfig) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(&cfg.path).parent() {
            if !parent.as_os_str().is_empty() && !cfg.path.contains(":memory:") {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory {}", parent.display())
                })?;
            }
        }
        Self::new(&cfg.url(), cfg.max_connections).await
    }

    pub async fn in_memory() -> Result<Self> {
        Self::new("sqlite::memory:", 1).await
    }

    async fn run_migrations(pool: &SqlitePool) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .context("Failed to run API log database migrations")?;

        tracing::debug!("API log database migrations completed");
        Ok(())
    }

    /// Insert a record stamped with the current time
    pub async fn insert(&self, record: &NewLogRecord) -> Result<i64> {
        self.insert_at(record, Utc::now()).await
    }

    /// Insert a record with an explicit `created_at`
    pub async fn insert_at(&self, record: &NewLogRecord, created_at: DateTime<Utc>) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        let id = insert_in(&mut tx, record, created_at).await?;
        tx.commit().await?;
        Ok(id)
    }

    /// Insert multiple records in a single transaction
    pub async fn insert_batch(&self, records: &[NewLogRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let created_at = Utc::now();
        let mut tx = self.pool.begin().await?;
        for record in records {
            insert_in(&mut tx, record, created_at).await?;
        }
        tx.commit().await.context("Failed to commit API log batch")?;

        Ok(())
    }

    pub async fn get(&self, id: i64) -> Result<Option<LogRecord>> {
        let sql = format!("SELECT {} FROM api_logs WHERE id = ?", SELECT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load API log record")?;

        row.as_ref().map(row_to_record).transpose()
    }

    /// Delete one record. Returns false if it did not exist.
    pub async fn delete(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM api_logs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete API log record")?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete each id independently; unknown ids are reported, not fatal
    pub async fn delete_many(&self, ids: &[i64]) -> Result<BulkDeleteOutcome> {
        let mut outcome = BulkDeleteOutcome::default();
        let mut seen = HashSet::new();

        for &id in ids {
            if !seen.insert(id) {
                continue;
            }
            if self.delete(id).await? {
                outcome.deleted += 1;
            } else {
                outcome.missing.push(id);
            }
        }

        Ok(outcome)
    }

    /// Delete every record created strictly before `cutoff`
    pub async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM api_logs WHERE created_at < ?")
            .bind(cutoff.timestamp_millis())
            .execute(&self.pool)
            .await
            .context("Failed to delete expired API log records")?;

        Ok(result.rows_affected())
    }

    pub async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM api_logs")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl RecordWriter for LogDb {
    async fn write(&self, record: &NewLogRecord) -> Result<i64> {
        self.insert(record).await
    }

    async fn write_batch(&self, records: &[NewLogRecord]) -> Result<()> {
        self.insert_batch(records).await
    }
}

async fn insert_in(
    tx: &mut Transaction<'_, Sqlite>,
    record: &NewLogRecord,
    created_at: DateTime<Utc>,
) -> Result<i64> {
    let result = sqlx::query(INSERT_SQL)
        .bind(&record.method)
        .bind(&record.url)
        .bind(&record.ip_address)
        .bind(&record.user_agent)
        .bind(serde_json::to_string(&record.request_headers)?)
        .bind(&record.request_body)
        .bind(serde_json::to_string(&record.response_headers)?)
        .bind(&record.response_body)
        .bind(i64::from(record.response_status))
        .bind(record.response_time_ms)
        .bind(&record.user_id)
        .bind(&record.session_id)
        .bind(&record.correlation_id)
        .bind(serde_json::to_string(&record.metadata)?)
        .bind(created_at.timestamp_millis())
        .execute(&mut **tx)
        .await
        .context("Failed to insert API log record")?;

    Ok(result.last_insert_rowid())
}

pub(crate) fn row_to_record(row: &SqliteRow) -> Result<LogRecord> {
    let request_headers: String = row.try_get("request_headers")?;
    let response_headers: String = row.try_get("response_headers")?;
    let metadata: String = row.try_get("metadata")?;
    let status: i64 = row.try_get("response_status")?;
    let created_at_ms: i64 = row.try_get("created_at")?;

    Ok(LogRecord {
        id: row.try_get("id")?,
        method: row.try_get("method")?,
        url: row.try_get("url")?,
        ip_address: row.try_get("ip_address")?,
        user_agent: row.try_get("user_agent")?,
        request_headers: serde_json::from_str(&request_headers)
            .context("Corrupt request_headers column")?,
        request_body: row.try_get("request_body")?,
        response_headers: serde_json::from_str(&response_headers)
            .context("Corrupt response_headers column")?,
        response_body: row.try_get("response_body")?,
        response_status: u16::try_from(status).context("Corrupt response_status column")?,
        response_time_ms: row.try_get("response_time_ms")?,
        user_id: row.try_get("user_id")?,
        session_id: row.try_get("session_id")?,
        correlation_id: row.try_get("correlation_id")?,
        metadata: serde_json::from_str(&metadata).context("Corrupt metadata column")?,
        created_at: DateTime::<Utc>::from_timestamp_millis(created_at_ms)
            .context("Corrupt created_at column")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::record::Headers;
    use chrono::Duration as ChronoDuration;

    fn record(method: &str, status: u16) -> NewLogRecord {
        NewLogRecord {
            method: method.to_string(),
            url: "http://localhost/api/things".to_string(),
            ip_address: Some("127.0.0.1".to_string()),
            user_agent: Some("test-agent".to_string()),
            request_headers: vec![("Content-Type", "application/json"), ("Authorization", "[REDACTED]")]
                .into_iter()
                .collect(),
            request_body: Some("{}".to_string()),
            response_headers: Headers::new(),
            response_body: None,
            response_status: status,
            response_time_ms: 12.5,
            user_id: Some("7".to_string()),
            session_id: None,
            correlation_id: "corr".to_string(),
            metadata: serde_json::json!({ "route_name": "/api/things" }),
        }
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let db = LogDb::in_memory().await.unwrap();

        let id = db.insert(&record("POST", 201)).await.unwrap();
        let stored = db.get(id).await.unwrap().unwrap();

        assert_eq!(stored.id, id);
        assert_eq!(stored.method, "POST");
        assert_eq!(stored.response_status, 201);
        assert_eq!(stored.request_headers.get("authorization"), Some("[REDACTED]"));
        let names: Vec<_> = stored.request_headers.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["Content-Type", "Authorization"]);
        assert_eq!(stored.metadata["route_name"], "/api/things");
        assert!(db.get(id + 100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_batch() {
        let db = LogDb::in_memory().await.unwrap();
        let records: Vec<_> = (0..5).map(|_| record("GET", 200)).collect();

        db.insert_batch(&records).await.unwrap();

        assert_eq!(db.count().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_rows_are_write_once() {
        let db = LogDb::in_memory().await.unwrap();
        let id = db.insert(&record("GET", 200)).await.unwrap();

        let result = sqlx::query("UPDATE api_logs SET response_status = 500 WHERE id = ?")
            .bind(id)
            .execute(db.pool())
            .await;

        assert!(result.is_err());
        assert_eq!(db.get(id).await.unwrap().unwrap().response_status, 200);
    }

    #[tokio::test]
    async fn test_delete_many_reports_missing() {
        let db = LogDb::in_memory().await.unwrap();
        let a = db.insert(&record("GET", 200)).await.unwrap();
        let b = db.insert(&record("GET", 200)).await.unwrap();

        let outcome = db.delete_many(&[a, b, 999, a]).await.unwrap();

        assert_eq!(outcome.deleted, 2);
        assert_eq!(outcome.missing, vec![999]);
        assert_eq!(db.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_older_than_is_strict() {
        let db = LogDb::in_memory().await.unwrap();
        let cutoff = Utc::now() - ChronoDuration::days(30);

        db.insert_at(&record("GET", 200), cutoff - ChronoDuration::seconds(1)).await.unwrap();
        db.insert_at(&record("GET", 200), cutoff).await.unwrap();
        db.insert_at(&record("GET", 200), Utc::now()).await.unwrap();

        assert_eq!(db.delete_older_than(cutoff).await.unwrap(), 1);
        assert_eq!(db.delete_older_than(cutoff).await.unwrap(), 0);
        assert_eq!(db.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_record_writer_impl() {
        let db = LogDb::in_memory().await.unwrap();
        let writer: &dyn RecordWriter = &db;

        writer.write(&record("PUT", 204)).await.unwrap();
        writer.write_batch(&[record("GET", 200), record("GET", 500)]).await.unwrap();

        assert_eq!(db.count().await.unwrap(), 3);
    }
}
