use crate::capture::record::Headers;
use crate::config::{ConfigError, LoggerConfig};
use axum::http::HeaderName;
use uuid::Uuid;

/// Picks the caller's correlation id or mints a fresh v4 UUID
#[derive(Debug, Clone)]
pub struct CorrelationResolver {
    headers: Vec<String>,
}

impl CorrelationResolver {
    pub fn from_config(cfg: &LoggerConfig) -> Result<Self, ConfigError> {
        for name in &cfg.correlation_id_headers {
            HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ConfigError::InvalidHeaderName(name.clone()))?;
        }
        Ok(Self { headers: cfg.correlation_id_headers.clone() })
    }

    pub fn resolve(&self, headers: &Headers) -> String {
        self.headers
            .iter()
            .filter_map(|name| headers.get(name))
            .find(|value| !value.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string())
    }
}
