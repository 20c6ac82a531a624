//! Log record and the request/response snapshots it is built from
//!
//! The snapshots are framework-neutral: the axum interceptor fills them in,
//! everything downstream depends only on these shapes.

use axum::body::Bytes;
use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::net::IpAddr;

/// Ordered header map, serialized as a JSON object in insertion order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append a value, joining with ", " if the name is already present
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == name) {
            Some((_, existing)) => {
                existing.push_str(", ");
                existing.push_str(&value);
            }
            None => self.0.push((name, value)),
        }
    }

    /// Case-insensitive lookup
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&axum::http::HeaderMap> for Headers {
    fn from(map: &axum::http::HeaderMap) -> Self {
        let mut headers = Headers::new();
        for (name, value) in map {
            headers.append(name.as_str(), String::from_utf8_lossy(value.as_bytes()));
        }
        headers
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.append(k, v);
        }
        headers
    }
}

impl Serialize for Headers {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Headers {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct HeadersVisitor;

        impl<'de> Visitor<'de> for HeadersVisitor {
            type Value = Headers;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of header names to values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Headers, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((k, v)) = access.next_entry::<String, String>()? {
                    entries.push((k, v));
                }
                Ok(Headers(entries))
            }
        }

        deserializer.deserialize_map(HeadersVisitor)
    }
}

/// Route information resolved by the host router
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteInfo {
    pub name: Option<String>,
    pub action: Option<String>,
    /// Captured path segments, in route order
    pub parameters: Vec<(String, String)>,
}

/// Read-only view of an inbound request
#[derive(Debug, Clone)]
pub struct RequestSnapshot {
    /// Upper-cased HTTP verb
    pub method: String,
    /// Fully qualified URL including query string
    pub url: String,
    /// Path component, leading slash included
    pub path: String,
    pub ip: Option<IpAddr>,
    pub headers: Headers,
    pub query: Vec<(String, String)>,
    pub route: RouteInfo,
    pub body: Bytes,
}

/// Read-only view of the handler's response
#[derive(Debug, Clone)]
pub struct ResponseSnapshot {
    pub status: u16,
    pub headers: Headers,
    pub body: Bytes,
}

/// A fully built record, not yet persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLogRecord {
    pub method: String,
    pub url: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub request_headers: Headers,
    pub request_body: Option<String>,
    pub response_headers: Headers,
    pub response_body: Option<String>,
    pub response_status: u16,
    pub response_time_ms: f64,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub correlation_id: String,
    pub metadata: serde_json::Value,
}

/// A persisted record. Never mutated after insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: i64,
    pub method: String,
    pub url: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub request_headers: Headers,
    pub request_body: Option<String>,
    pub response_headers: Headers,
    pub response_body: Option<String>,
    pub response_status: u16,
    pub response_time_ms: f64,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub correlation_id: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl LogRecord {
    pub fn is_error(&self) -> bool {
        self.response_status >= 400
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.response_status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_preserve_order_through_json() {
        let headers: Headers = vec![
            ("Zeta", "1"),
            ("Alpha", "2"),
            ("Content-Type", "application/json"),
        ]
        .into_iter()
        .collect();

        let json = serde_json::to_string(&headers).unwrap();
        assert_eq!(json, r#"{"Zeta":"1","Alpha":"2","Content-Type":"application/json"}"#);

        let back: Headers = serde_json::from_str(&json).unwrap();
        assert_eq!(back, headers);
    }

    #[test]
    fn test_headers_join_repeated_names() {
        let mut headers = Headers::new();
        headers.append("accept", "text/html");
        headers.append("accept", "application/json");

        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("Accept"), Some("text/html, application/json"));
    }

    #[test]
    fn test_headers_from_header_map() {
        let mut map = axum::http::HeaderMap::new();
        map.insert("x-one", "1".parse().unwrap());
        map.append("x-two", "a".parse().unwrap());
        map.append("x-two", "b".parse().unwrap());

        let headers = Headers::from(&map);
        assert_eq!(headers.get("x-one"), Some("1"));
        assert_eq!(headers.get("X-Two"), Some("a, b"));
    }
}
