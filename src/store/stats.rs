//! Aggregate statistics over a lookback window

use crate::capture::record::LogRecord;
use crate::store::database::{row_to_record, LogDb, SELECT_COLUMNS};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Months, Utc};
use serde::Serialize;
use sqlx::Row;
use std::fmt;

/// Statistics lookback window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Period {
    Hour,
    #[default]
    Day,
    Week,
    Month,
}

impl Period {
    /// Unrecognized selectors fall back to a day
    pub fn parse(selector: &str) -> Self {
        match selector.trim() {
            "1h" => Self::Hour,
            "24h" => Self::Day,
            "7d" => Self::Week,
            "30d" => Self::Month,
            _ => Self::Day,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hour => "1h",
            Self::Day => "24h",
            Self::Week => "7d",
            Self::Month => "30d",
        }
    }

    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Hour => now - Duration::hours(1),
            Self::Day => now - Duration::days(1),
            Self::Week => now - Duration::weeks(1),
            Self::Month => now
                .checked_sub_months(Months::new(1))
                .unwrap_or_else(|| now - Duration::days(30)),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointCount {
    pub url: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusCount {
    pub status: u16,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statistics {
    pub period: String,
    pub since: DateTime<Utc>,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub error_requests: u64,
    /// Milliseconds, 0 when there are no records
    pub average_response_time: f64,
    pub slowest_request: Option<LogRecord>,
    pub most_common_endpoints: Vec<EndpointCount>,
    pub status_code_distribution: Vec<StatusCount>,
}

const TOP_ENDPOINTS: i64 = 10;

impl LogDb {
    pub async fn statistics(&self, period: Period) -> Result<Statistics> {
        self.statistics_at(period, Utc::now()).await
    }

    /// Statistics for records with `created_at >= period.cutoff(now)`
    ///
    /// All aggregates are read inside one transaction so they describe the
    /// same snapshot.
    pub async fn statistics_at(&self, period: Period, now: DateTime<Utc>) -> Result<Statistics> {
        let since = period.cutoff(now);
        let cutoff = since.timestamp_millis();

        let mut tx = self.pool().begin().await?;

        let totals = sqlx::query(
            "SELECT COUNT(*) AS total,
                    COALESCE(SUM(CASE WHEN response_status BETWEEN 200 AND 299 THEN 1 ELSE 0 END), 0) AS successful,
                    COALESCE(SUM(CASE WHEN response_status >= 400 THEN 1 ELSE 0 END), 0) AS errors,
                    COALESCE(AVG(response_time_ms), 0.0) AS average
             FROM api_logs
             WHERE created_at >= ?",
        )
        .bind(cutoff)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to aggregate API log totals")?;

        let slowest_sql = format!(
            "SELECT {} FROM api_logs
             WHERE created_at >= ?
             ORDER BY response_time_ms DESC, created_at DESC, id DESC
             LIMIT 1",
            SELECT_COLUMNS
        );
        let slowest = sqlx::query(&slowest_sql)
            .bind(cutoff)
            .fetch_optional(&mut *tx)
            .await
            .context("Failed to find slowest API request")?;

        let endpoints = sqlx::query(
            "SELECT url, COUNT(*) AS count
             FROM api_logs
             WHERE created_at >= ?
             GROUP BY url
             ORDER BY count DESC, url ASC
             LIMIT ?",
        )
        .bind(cutoff)
        .bind(TOP_ENDPOINTS)
        .fetch_all(&mut *tx)
        .await
        .context("Failed to aggregate endpoints")?;

        let statuses = sqlx::query(
            "SELECT response_status, COUNT(*) AS count
             FROM api_logs
             WHERE created_at >= ?
             GROUP BY response_status
             ORDER BY response_status ASC",
        )
        .bind(cutoff)
        .fetch_all(&mut *tx)
        .await
        .context("Failed to aggregate status codes")?;

        tx.commit().await?;

        let average: f64 = totals.try_get("average")?;

        Ok(Statistics {
            period: period.as_str().to_string(),
            since,
            total_requests: totals.try_get::<i64, _>("total")? as u64,
            successful_requests: totals.try_get::<i64, _>("successful")? as u64,
            error_requests: totals.try_get::<i64, _>("errors")? as u64,
            average_response_time: (average * 100.0).round() / 100.0,
            slowest_request: slowest.as_ref().map(row_to_record).transpose()?,
            most_common_endpoints: endpoints
                .iter()
                .map(|row| -> Result<EndpointCount> {
                    Ok(EndpointCount {
                        url: row.try_get("url")?,
                        count: row.try_get::<i64, _>("count")? as u64,
                    })
                })
                .collect::<Result<Vec<_>>>()?,
            status_code_distribution: statuses
                .iter()
                .map(|row| -> Result<StatusCount> {
                    let status: i64 = row.try_get("response_status")?;
                    Ok(StatusCount {
                        status: u16::try_from(status)?,
                        count: row.try_get::<i64, _>("count")? as u64,
                    })
                })
                .collect::<Result<Vec<_>>>()?,
        })
    }
}
