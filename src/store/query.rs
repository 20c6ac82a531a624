//! Filter, sort and paginate stored records
//!
//! Filters are expressed as a small predicate set (equals, contains, range,
//! threshold) that is ANDed together. Column names come from a whitelist and
//! are never taken from user input verbatim.

use crate::capture::record::LogRecord;
use crate::store::database::{row_to_record, LogDb, SELECT_COLUMNS};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde::Serialize;
use sqlx::{QueryBuilder, Sqlite};
use std::str::FromStr;

pub const DEFAULT_PER_PAGE: u32 = 50;
pub const MAX_PER_PAGE: u32 = 1000;

/// Sortable / filterable columns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Id,
    Method,
    Url,
    IpAddress,
    UserAgent,
    ResponseStatus,
    ResponseTimeMs,
    UserId,
    SessionId,
    CorrelationId,
    CreatedAt,
}

impl Column {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Method => "method",
            Self::Url => "url",
            Self::IpAddress => "ip_address",
            Self::UserAgent => "user_agent",
            Self::ResponseStatus => "response_status",
            Self::ResponseTimeMs => "response_time_ms",
            Self::UserId => "user_id",
            Self::SessionId => "session_id",
            Self::CorrelationId => "correlation_id",
            Self::CreatedAt => "created_at",
        }
    }
}

impl FromStr for Column {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "id" => Ok(Self::Id),
            "method" => Ok(Self::Method),
            "url" => Ok(Self::Url),
            "ip_address" => Ok(Self::IpAddress),
            "user_agent" => Ok(Self::UserAgent),
            "response_status" | "status" => Ok(Self::ResponseStatus),
            "response_time_ms" | "response_time" => Ok(Self::ResponseTimeMs),
            "user_id" => Ok(Self::UserId),
            "session_id" => Ok(Self::SessionId),
            "correlation_id" => Ok(Self::CorrelationId),
            "created_at" => Ok(Self::CreatedAt),
            other => Err(format!("Unknown sort field '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Int(i64),
    Real(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    /// `>=`
    AtLeast,
    /// `>`
    Above,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Equals(Column, Value),
    /// Case-sensitive substring match
    Contains(Column, String),
    /// Closed interval; either end may be open
    Range {
        column: Column,
        from: Option<Value>,
        to: Option<Value>,
    },
    Threshold {
        column: Column,
        bound: Bound,
        value: Value,
    },
}

/// Recognized list/export filters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogFilter {
    pub method: Option<String>,
    pub status: Option<u16>,
    pub user_id: Option<String>,
    pub url: Option<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub errors_only: bool,
    /// When set, only records slower than this many milliseconds
    pub slow_threshold_ms: Option<f64>,
}

impl LogFilter {
    pub fn predicates(&self) -> Vec<Predicate> {
        let mut predicates = Vec::new();

        if let Some(method) = &self.method {
            predicates.push(Predicate::Equals(
                Column::Method,
                Value::Text(method.to_ascii_uppercase()),
            ));
        }
        if let Some(status) = self.status {
            predicates.push(Predicate::Equals(Column::ResponseStatus, Value::Int(status.into())));
        }
        if let Some(user_id) = &self.user_id {
            predicates.push(Predicate::Equals(Column::UserId, Value::Text(user_id.clone())));
        }
        if let Some(url) = &self.url {
            predicates.push(Predicate::Contains(Column::Url, url.clone()));
        }
        if self.date_from.is_some() || self.date_to.is_some() {
            predicates.push(Predicate::Range {
                column: Column::CreatedAt,
                from: self.date_from.map(|d| Value::Int(d.timestamp_millis())),
                to: self.date_to.map(|d| Value::Int(d.timestamp_millis())),
            });
        }
        if self.errors_only {
            predicates.push(Predicate::Threshold {
                column: Column::ResponseStatus,
                bound: Bound::AtLeast,
                value: Value::Int(400),
            });
        }
        if let Some(threshold) = self.slow_threshold_ms {
            predicates.push(Predicate::Threshold {
                column: Column::ResponseTimeMs,
                bound: Bound::Above,
                value: Value::Real(threshold),
            });
        }

        predicates
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            other => Err(format!("Invalid sort order '{}': expected 'asc' or 'desc'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sort {
    pub column: Column,
    pub order: SortOrder,
}

impl Default for Sort {
    fn default() -> Self {
        Self { column: Column::CreatedAt, order: SortOrder::Desc }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    /// 1-based
    pub page: u32,
    pub per_page: u32,
}

impl Page {
    pub fn new(page: u32, per_page: u32) -> Self {
        Self { page: page.max(1), per_page: per_page.clamp(1, MAX_PER_PAGE) }
    }

    fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.per_page)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(1, DEFAULT_PER_PAGE)
    }
}

/// One page of results in paginator shape
#[derive(Debug, Clone, Serialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub current_page: u32,
    pub per_page: u32,
    pub total: u64,
    pub last_page: u32,
}

impl LogDb {
    /// Filtered, sorted, paginated listing
    pub async fn query_logs(
        &self,
        filter: &LogFilter,
        sort: Sort,
        page: Page,
    ) -> Result<Paginated<LogRecord>> {
        let predicates = filter.predicates();

        let mut count_query = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM api_logs");
        push_where(&mut count_query, &predicates);
        let total: i64 = count_query
            .build_query_scalar()
            .fetch_one(self.pool())
            .await
            .context("Failed to count API log records")?;

        let mut query = select_query(&predicates, sort);
        query
            .push(" LIMIT ")
            .push_bind(i64::from(page.per_page))
            .push(" OFFSET ")
            .push_bind(page.offset());

        let rows = query
            .build()
            .fetch_all(self.pool())
            .await
            .context("Failed to query API log records")?;
        let data = rows.iter().map(row_to_record).collect::<Result<Vec<_>>>()?;

        let total = total.max(0) as u64;
        let last_page = total.div_ceil(u64::from(page.per_page)).max(1);

        Ok(Paginated {
            data,
            current_page: page.page,
            per_page: page.per_page,
            total,
            last_page: u32::try_from(last_page).unwrap_or(u32::MAX),
        })
    }

    /// Every matching record, unpaginated
    pub async fn export_logs(&self, filter: &LogFilter, sort: Sort) -> Result<Vec<LogRecord>> {
        let rows = select_query(&filter.predicates(), sort)
            .build()
            .fetch_all(self.pool())
            .await
            .context("Failed to export API log records")?;

        rows.iter().map(row_to_record).collect()
    }
}

fn select_query(predicates: &[Predicate], sort: Sort) -> QueryBuilder<'static, Sqlite> {
    let mut query = QueryBuilder::new(format!("SELECT {} FROM api_logs", SELECT_COLUMNS));
    push_where(&mut query, predicates);

    let order = sort.order.as_sql();
    query.push(format!(" ORDER BY {} {}", sort.column.as_sql(), order));
    if sort.column != Column::Id {
        // Stable pagination when the sort key has duplicates
        query.push(format!(", id {}", order));
    }
    query
}

fn push_where(query: &mut QueryBuilder<'static, Sqlite>, predicates: &[Predicate]) {
    for (i, predicate) in predicates.iter().enumerate() {
        query.push(if i == 0 { " WHERE " } else { " AND " });
        push_predicate(query, predicate);
    }
}

fn push_predicate(query: &mut QueryBuilder<'static, Sqlite>, predicate: &Predicate) {
    match predicate {
        Predicate::Equals(column, value) => {
            query.push(column.as_sql()).push(" = ");
            push_value(query, value);
        }
        Predicate::Contains(column, needle) => {
            // instr() is case-sensitive, unlike LIKE
            query
                .push("instr(")
                .push(column.as_sql())
                .push(", ")
                .push_bind(needle.clone())
                .push(") > 0");
        }
        Predicate::Range { column, from, to } => {
            query.push("(1 = 1");
            if let Some(from) = from {
                query.push(" AND ").push(column.as_sql()).push(" >= ");
                push_value(query, from);
            }
            if let Some(to) = to {
                query.push(" AND ").push(column.as_sql()).push(" <= ");
                push_value(query, to);
            }
            query.push(")");
        }
        Predicate::Threshold { column, bound, value } => {
            let op = match bound {
                Bound::AtLeast => " >= ",
                Bound::Above => " > ",
            };
            query.push(column.as_sql()).push(op);
            push_value(query, value);
        }
    }
}

fn push_value(query: &mut QueryBuilder<'static, Sqlite>, value: &Value) {
    match value {
        Value::Text(s) => query.push_bind(s.clone()),
        Value::Int(n) => query.push_bind(*n),
        Value::Real(f) => query.push_bind(*f),
    };
}

/// Parse a date filter value
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC) and `YYYY-MM-DD`. A bare
/// date is the start of that day, or its last millisecond when `end_of_day`.
pub fn parse_date_bound(input: &str, end_of_day: bool) -> Option<DateTime<Utc>> {
    let input = input.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    let date = NaiveDate::parse_from_str(input, "%Y-%m-%d").ok()?;
    let time = if end_of_day {
        NaiveTime::from_hms_milli_opt(23, 59, 59, 999)?
    } else {
        NaiveTime::from_hms_opt(0, 0, 0)?
    };
    Some(Utc.from_utc_datetime(&date.and_time(time)))
}
