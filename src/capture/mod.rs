//! Request/response capture pipeline
//!
//! `FilterPolicy` decides whether to log, `Redactor` strips sensitive
//! content, `CorrelationResolver` picks the trace id, `builder` assembles the
//! record and `LogSink` persists it. `ApiLogger` wires them together and is
//! installed as axum middleware through [`api_logger_middleware`].

mod body;
pub mod builder;
pub mod correlation;
pub mod filter;
pub mod interceptor;
pub mod record;
pub mod redact;
pub mod sink;

pub use correlation::CorrelationResolver;
pub use filter::{FilterPolicy, SkipReason};
pub use interceptor::{
    api_logger_middleware, AuthenticatedUser, ExtensionIdentity, IdentityAccessor, RouteAction,
    SessionId,
};
pub use record::{Headers, LogRecord, NewLogRecord};
pub use redact::Redactor;
pub use sink::{LogSink, QueuedWriter, RecordWriter};

use crate::config::{ConfigError, LoggerConfig};
use std::sync::Arc;

pub struct ApiLogger {
    filter: FilterPolicy,
    redactor: Redactor,
    correlation: CorrelationResolver,
    sink: LogSink,
    identity: Arc<dyn IdentityAccessor>,
    slow_threshold_ms: u64,
}

impl ApiLogger {
    /// Compile the pipeline. Any invalid pattern, path, IP or header name is
    /// fatal.
    pub fn from_config(
        cfg: &LoggerConfig,
        writer: Arc<dyn RecordWriter>,
    ) -> Result<Self, ConfigError> {
        let (filter, redactor, correlation) = Self::compile(cfg)?;

        Ok(Self {
            filter,
            redactor,
            correlation,
            sink: LogSink::from_config(cfg, writer)?,
            identity: Arc::new(ExtensionIdentity),
            slow_threshold_ms: cfg.slow_request_threshold_ms,
        })
    }

    /// Check a configuration without starting anything
    pub fn validate(cfg: &LoggerConfig) -> Result<(), ConfigError> {
        Self::compile(cfg)?;
        if cfg.use_queue && cfg.queue.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        Ok(())
    }

    fn compile(
        cfg: &LoggerConfig,
    ) -> Result<(FilterPolicy, Redactor, CorrelationResolver), ConfigError> {
        if cfg.cleanup_hour > 23 {
            return Err(ConfigError::InvalidCleanupHour(cfg.cleanup_hour));
        }
        Ok((
            FilterPolicy::from_config(cfg)?,
            Redactor::from_config(cfg)?,
            CorrelationResolver::from_config(cfg)?,
        ))
    }

    pub fn with_identity(mut self, identity: Arc<dyn IdentityAccessor>) -> Self {
        self.identity = identity;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.filter.is_enabled()
    }

    pub fn sink(&self) -> &LogSink {
        &self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_reports_bad_pattern() {
        let cfg = LoggerConfig {
            sensitive_patterns: vec!["[".to_string()],
            ..Default::default()
        };
        let err = ApiLogger::validate(&cfg).unwrap_err();
        assert!(err.to_string().contains("invalid sensitive pattern"));
    }

    #[test]
    fn test_validate_rejects_cleanup_hour() {
        let cfg = LoggerConfig { cleanup_hour: 24, ..Default::default() };
        assert!(matches!(
            ApiLogger::validate(&cfg),
            Err(ConfigError::InvalidCleanupHour(24))
        ));
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(ApiLogger::validate(&LoggerConfig::default()).is_ok());
    }
}
