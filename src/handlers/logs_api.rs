//! Management API over captured records
//!
//! - `GET    /logs`             filtered, paginated list plus statistics
//! - `GET    /logs/statistics`  statistics block only
//! - `GET    /logs/export`      JSON or CSV export of the filtered set
//! - `GET    /logs/:id`         single record
//! - `DELETE /logs/:id`         delete one
//! - `DELETE /logs`             bulk delete, body `{"ids": [..]}`

use crate::capture::record::LogRecord;
use crate::error::AppError;
use crate::store::export::{self, ExportFormat};
use crate::store::query::{parse_date_bound, Column, LogFilter, Page, Paginated, Sort, SortOrder};
use crate::store::{LogDb, Period, Statistics};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Shared state for the log management API
#[derive(Clone)]
pub struct LogApiState {
    pub db: Arc<LogDb>,
    /// Threshold applied by `slow_only`
    pub slow_threshold_ms: u64,
}

pub fn routes(state: LogApiState) -> Router {
    Router::new()
        .route("/logs", get(list_logs).delete(bulk_delete))
        .route("/logs/statistics", get(statistics))
        .route("/logs/export", get(export_logs))
        .route("/logs/:id", get(show_log).delete(delete_log))
        .with_state(state)
}

/// Query parameters shared by list and export
///
/// Everything arrives as a string so that empty values (`?status=`) mean
/// "not set" instead of a deserialization failure.
#[derive(Debug, Default, Deserialize)]
pub struct LogQueryParams {
    pub method: Option<String>,
    pub status: Option<String>,
    pub user_id: Option<String>,
    pub url: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub errors_only: Option<String>,
    pub slow_only: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    pub page: Option<String>,
    pub per_page: Option<String>,
    pub period: Option<String>,
    pub format: Option<String>,
}

impl LogQueryParams {
    fn filter(&self, slow_threshold_ms: u64) -> Result<LogFilter, AppError> {
        let status = match present(&self.status) {
            Some(s) => Some(
                s.parse::<u16>()
                    .map_err(|_| AppError::Validation(format!("Invalid status '{}'", s)))?,
            ),
            None => None,
        };

        let slow_only = flag("slow_only", &self.slow_only)?;

        Ok(LogFilter {
            method: present(&self.method).map(str::to_string),
            status,
            user_id: present(&self.user_id).map(str::to_string),
            url: present(&self.url).map(str::to_string),
            date_from: date("date_from", &self.date_from, false)?,
            date_to: date("date_to", &self.date_to, true)?,
            errors_only: flag("errors_only", &self.errors_only)?,
            slow_threshold_ms: slow_only.then_some(slow_threshold_ms as f64),
        })
    }

    fn sort(&self) -> Result<Sort, AppError> {
        let mut sort = Sort::default();
        if let Some(field) = present(&self.sort_by) {
            sort.column = field.parse::<Column>().map_err(AppError::Validation)?;
        }
        if let Some(order) = present(&self.sort_order) {
            sort.order = order.parse::<SortOrder>().map_err(AppError::Validation)?;
        }
        Ok(sort)
    }

    fn page(&self) -> Result<Page, AppError> {
        let mut page = Page::default();
        if let Some(n) = present(&self.page) {
            page.page = n
                .parse()
                .map_err(|_| AppError::Validation(format!("Invalid page '{}'", n)))?;
        }
        if let Some(n) = present(&self.per_page) {
            page.per_page = n
                .parse()
                .map_err(|_| AppError::Validation(format!("Invalid per_page '{}'", n)))?;
        }
        Ok(Page::new(page.page, page.per_page))
    }

    fn period(&self) -> Period {
        present(&self.period).map(Period::parse).unwrap_or_default()
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn flag(name: &str, value: &Option<String>) -> Result<bool, AppError> {
    match present(value).map(|v| v.to_ascii_lowercase()).as_deref() {
        None | Some("0") | Some("false") | Some("off") | Some("no") => Ok(false),
        Some("1") | Some("true") | Some("on") | Some("yes") => Ok(true),
        Some(other) => Err(AppError::Validation(format!("Invalid {} '{}'", name, other))),
    }
}

fn date(
    name: &str,
    value: &Option<String>,
    end_of_day: bool,
) -> Result<Option<chrono::DateTime<chrono::Utc>>, AppError> {
    match present(value) {
        Some(v) => parse_date_bound(v, end_of_day)
            .map(Some)
            .ok_or_else(|| AppError::Validation(format!("Invalid {} '{}'", name, v))),
        None => Ok(None),
    }
}

fn parse_id(raw: &str) -> Result<i64, AppError> {
    raw.parse()
        .map_err(|_| AppError::Validation(format!("Invalid log id '{}'", raw)))
}

/// Response for the list endpoint
#[derive(Debug, Serialize)]
pub struct LogListResponse {
    #[serde(flatten)]
    pub page: Paginated<LogRecord>,
    pub statistics: Statistics,
}

/// GET /logs
///
/// Example: GET /logs?method=POST&errors_only=1&sort_by=response_time_ms&sort_order=desc
pub async fn list_logs(
    State(state): State<LogApiState>,
    Query(params): Query<LogQueryParams>,
) -> Result<Json<LogListResponse>, AppError> {
    let filter = params.filter(state.slow_threshold_ms)?;
    let sort = params.sort()?;
    let page = params.page()?;

    let logs = state.db.query_logs(&filter, sort, page).await?;
    let statistics = state.db.statistics(params.period()).await?;

    Ok(Json(LogListResponse { page: logs, statistics }))
}

/// GET /logs/statistics?period=7d
pub async fn statistics(
    State(state): State<LogApiState>,
    Query(params): Query<LogQueryParams>,
) -> Result<Json<Statistics>, AppError> {
    Ok(Json(state.db.statistics(params.period()).await?))
}

/// GET /logs/export?format=csv
pub async fn export_logs(
    State(state): State<LogApiState>,
    Query(params): Query<LogQueryParams>,
) -> Result<Response, AppError> {
    let format = match present(&params.format) {
        Some(f) => f.parse::<ExportFormat>().map_err(AppError::Validation)?,
        None => ExportFormat::default(),
    };
    let filter = params.filter(state.slow_threshold_ms)?;
    let sort = params.sort()?;

    let records = state.db.export_logs(&filter, sort).await?;
    tracing::info!(count = records.len(), format = ?format, "Exported API logs");

    match format {
        ExportFormat::Json => Ok(Json(records).into_response()),
        ExportFormat::Csv => {
            let filename = format!(
                "attachment; filename=\"api-logs-{}.csv\"",
                chrono::Utc::now().format("%Y-%m-%d-%H-%M-%S")
            );
            Ok((
                [
                    (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
                    (header::CONTENT_DISPOSITION, filename),
                ],
                export::to_csv(&records),
            )
                .into_response())
        }
    }
}

/// GET /logs/:id
pub async fn show_log(
    State(state): State<LogApiState>,
    Path(id): Path<String>,
) -> Result<Json<LogRecord>, AppError> {
    let id = parse_id(&id)?;
    state
        .db
        .get(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("API log {} not found", id)))
}

/// DELETE /logs/:id
pub async fn delete_log(
    State(state): State<LogApiState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = parse_id(&id)?;
    if !state.db.delete(id).await? {
        return Err(AppError::NotFound(format!("API log {} not found", id)));
    }

    tracing::info!(id = id, "Deleted API log");
    Ok(Json(json!({ "deleted": 1 })))
}

#[derive(Debug, Deserialize)]
pub struct BulkDeleteRequest {
    pub ids: Vec<i64>,
}

/// DELETE /logs with `{"ids": [1, 2, 3]}`
///
/// Each id is deleted independently. Unknown ids do not stop the others but
/// turn the response into a 422 listing them.
pub async fn bulk_delete(
    State(state): State<LogApiState>,
    body: Result<Json<BulkDeleteRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, AppError> {
    let Json(request) = body.map_err(|e| AppError::Unprocessable {
        message: e.body_text(),
        details: json!({}),
    })?;

    if request.ids.is_empty() {
        return Err(AppError::Unprocessable {
            message: "ids must be a non-empty array".to_string(),
            details: json!({}),
        });
    }

    let outcome = state.db.delete_many(&request.ids).await?;
    tracing::info!(
        deleted = outcome.deleted,
        missing = outcome.missing.len(),
        "Bulk deleted API logs"
    );

    if !outcome.missing.is_empty() {
        return Err(AppError::Unprocessable {
            message: format!("{} of the given ids do not exist", outcome.missing.len()),
            details: json!({ "deleted": outcome.deleted, "missing": outcome.missing }),
        });
    }

    Ok(Json(json!({ "deleted": outcome.deleted })))
}
