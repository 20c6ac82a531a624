//! Echo endpoint mounted behind the capture middleware

use axum::body::Bytes;
use axum::extract::Query;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::any;
use axum::{Extension, Router};
use serde_json::json;
use std::collections::HashMap;

use crate::capture::RouteAction;

pub fn routes() -> Router {
    Router::new()
        .route("/api/test", any(echo))
        .route("/api/test/:id", any(echo))
}

/// Echo the request back. `?status=NNN` picks the response status.
pub async fn echo(
    method: Method,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> impl IntoResponse {
    let status = query
        .get("status")
        .and_then(|s| s.parse::<u16>().ok())
        .and_then(|s| StatusCode::from_u16(s).ok())
        .unwrap_or(StatusCode::OK);

    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let body = if content_type.starts_with("application/json") {
        serde_json::from_slice(&body).unwrap_or_else(|_| json!(String::from_utf8_lossy(&body)))
    } else {
        json!(String::from_utf8_lossy(&body))
    };

    (
        status,
        Extension(RouteAction("demo.echo".to_string())),
        Json(json!({
            "message": "API logging test endpoint",
            "method": method.as_str(),
            "query": query,
            "body": body,
        })),
    )
}
