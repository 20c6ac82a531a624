//! Age-based deletion of API log records
//!
//! A sweep deletes every record created strictly before `now - days`. The
//! scheduled task checks once an hour and sweeps once per day at
//! `cleanup_hour` (local time). Sweeps never overlap.

use crate::store::database::LogDb;
use anyhow::Result;
use chrono::{DateTime, Datelike, Duration as ChronoDuration, Timelike, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;

pub struct RetentionJob {
    db: Arc<LogDb>,
    days: u32,
    running: AtomicBool,
}

/// Clears the running flag even if the sweep future is dropped mid-flight
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl RetentionJob {
    pub fn new(db: Arc<LogDb>, days: u32) -> Self {
        Self { db, days, running: AtomicBool::new(false) }
    }

    pub fn days(&self) -> u32 {
        self.days
    }

    /// `now - days`, clamped to the earliest representable instant so a
    /// window longer than the calendar deletes nothing
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        ChronoDuration::try_days(i64::from(self.days))
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Delete expired records and return how many were removed
    pub async fn run(&self) -> Result<u64> {
        self.run_at(Utc::now()).await
    }

    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<u64> {
        let cutoff = self.cutoff(now);
        let deleted = self.db.delete_older_than(cutoff).await?;

        tracing::info!(
            retention_days = self.days,
            cutoff = %cutoff.to_rfc3339(),
            deleted = deleted,
            "API log retention sweep completed"
        );

        Ok(deleted)
    }

    /// Run unless a sweep is already in progress; `None` means skipped
    pub async fn try_run(&self) -> Option<Result<u64>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!("API log retention sweep already running, skipping");
            return None;
        }
        let _guard = RunningGuard(&self.running);

        Some(self.run().await)
    }
}

/// Spawn the daily sweep
///
/// ```ignore
/// let job = Arc::new(RetentionJob::new(db.clone(), 30));
/// spawn_cleanup_task(job, 2);
/// ```
pub fn spawn_cleanup_task(job: Arc<RetentionJob>, cleanup_hour: u32) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        cleanup_loop(job, cleanup_hour, Duration::from_secs(3600)).await;
    })
}

async fn cleanup_loop(job: Arc<RetentionJob>, cleanup_hour: u32, check_interval: Duration) {
    let mut interval = time::interval(check_interval);
    let mut last_cleanup_day: Option<(i32, u32)> = None;

    loop {
        interval.tick().await;

        let now = chrono::Local::now();
        let today = (now.year(), now.ordinal());

        if now.hour() != cleanup_hour || Some(today) == last_cleanup_day {
            continue;
        }

        tracing::info!(cleanup_hour = cleanup_hour, "Starting scheduled API log cleanup");

        match job.try_run().await {
            Some(Ok(_)) => last_cleanup_day = Some(today),
            Some(Err(e)) => {
                tracing::error!(error = %format!("{:#}", e), "Scheduled API log cleanup failed");
            }
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::record::{Headers, NewLogRecord};

    fn record() -> NewLogRecord {
        NewLogRecord {
            method: "GET".to_string(),
            url: "http://localhost/api".to_string(),
            ip_address: None,
            user_agent: None,
            request_headers: Headers::new(),
            request_body: None,
            response_headers: Headers::new(),
            response_body: None,
            response_status: 200,
            response_time_ms: 1.0,
            user_id: None,
            session_id: None,
            correlation_id: "c".to_string(),
            metadata: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn test_run_deletes_only_older_records() {
        let db = Arc::new(LogDb::in_memory().await.unwrap());
        let now = Utc::now();
        let job = RetentionJob::new(db.clone(), 30);
        let cutoff = job.cutoff(now);

        db.insert_at(&record(), cutoff - ChronoDuration::days(5)).await.unwrap();
        db.insert_at(&record(), cutoff - ChronoDuration::milliseconds(1)).await.unwrap();
        db.insert_at(&record(), cutoff).await.unwrap();
        db.insert_at(&record(), now).await.unwrap();

        assert_eq!(job.run_at(now).await.unwrap(), 2);
        assert_eq!(job.run_at(now).await.unwrap(), 0);
        assert_eq!(db.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_huge_window_deletes_nothing() {
        let db = Arc::new(LogDb::in_memory().await.unwrap());
        db.insert_at(&record(), Utc::now() - ChronoDuration::days(3650)).await.unwrap();

        let job = RetentionJob::new(db.clone(), u32::MAX);
        assert_eq!(job.cutoff(Utc::now()), DateTime::<Utc>::MIN_UTC);
        assert_eq!(job.run().await.unwrap(), 0);
        assert_eq!(db.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_try_run_is_single_flight() {
        let db = Arc::new(LogDb::in_memory().await.unwrap());
        let job = RetentionJob::new(db, 7);

        job.running.store(true, Ordering::Release);
        assert!(job.try_run().await.is_none());

        job.running.store(false, Ordering::Release);
        assert_eq!(job.try_run().await.unwrap().unwrap(), 0);
        assert!(!job.running.load(Ordering::Acquire));
    }
}
