//! Pure composition of a log record
//!
//! Redaction and correlation are resolved by the caller and handed in, so
//! this stage has no side effects and no configuration of its own.

use crate::capture::record::{Headers, NewLogRecord, RequestSnapshot, ResponseSnapshot};
use serde_json::{json, Map, Value};
use std::time::Instant;

/// Headers copied into metadata, keyed by their metadata field name
const METADATA_HEADERS: [(&str, &str); 4] = [
    ("content_type", "content-type"),
    ("accept", "accept"),
    ("referer", "referer"),
    ("origin", "origin"),
];

/// Who made the request, as seen at capture time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Option<String>,
    pub session_id: Option<String>,
}

/// Redactor output for one exchange
#[derive(Debug, Clone, Default)]
pub struct RedactedExchange {
    pub request_headers: Headers,
    pub request_body: Option<String>,
    pub response_headers: Headers,
    pub response_body: Option<String>,
}

pub fn build(
    request: &RequestSnapshot,
    response: &ResponseSnapshot,
    redacted: RedactedExchange,
    started: Instant,
    finished: Instant,
    identity: &Identity,
    correlation_id: String,
) -> NewLogRecord {
    let metadata = metadata(request, &redacted.request_headers);

    NewLogRecord {
        method: request.method.to_ascii_uppercase(),
        url: request.url.clone(),
        ip_address: request.ip.map(|ip| ip.to_string()),
        user_agent: redacted.request_headers.get("user-agent").map(str::to_string),
        request_headers: redacted.request_headers,
        request_body: redacted.request_body,
        response_headers: redacted.response_headers,
        response_body: redacted.response_body,
        response_status: response.status,
        response_time_ms: elapsed_ms(started, finished),
        user_id: identity.user_id.clone(),
        session_id: identity.session_id.clone(),
        correlation_id,
        metadata,
    }
}

/// Milliseconds between two instants, rounded to two decimals
pub fn elapsed_ms(started: Instant, finished: Instant) -> f64 {
    let ms = finished.saturating_duration_since(started).as_secs_f64() * 1000.0;
    (ms * 100.0).round() / 100.0
}

fn metadata(request: &RequestSnapshot, headers: &Headers) -> Value {
    let mut map = Map::new();
    map.insert("route_name".to_string(), json!(request.route.name));
    map.insert("route_action".to_string(), json!(request.route.action));
    let parameters: Map<String, Value> = request
        .route
        .parameters
        .iter()
        .map(|(name, value)| (name.clone(), json!(value)))
        .collect();
    map.insert("route_parameters".to_string(), Value::Object(parameters));
    map.insert("query_parameters".to_string(), query_parameters(&request.query));
    for (field, header) in METADATA_HEADERS {
        map.insert(field.to_string(), json!(headers.get(header)));
    }
    Value::Object(map)
}

/// Repeated keys collapse into an array in order of appearance
fn query_parameters(query: &[(String, String)]) -> Value {
    let mut map = Map::new();
    for (key, value) in query {
        match map.get_mut(key) {
            Some(Value::Array(values)) => values.push(json!(value)),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, json!(value)]);
            }
            None => {
                map.insert(key.clone(), json!(value));
            }
        }
    }
    Value::Object(map)
}
