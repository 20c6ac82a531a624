use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logger: LoggerConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// "text" or "json"
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// SQLite database file (default: "./data/api_logs.db")
    #[serde(default = "default_database_path")]
    pub path: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

impl DatabaseConfig {
    pub fn url(&self) -> String {
        format!("sqlite:{}", self.path)
    }
}

/// Capture pipeline configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggerConfig {
    /// Master switch; when off nothing is captured
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Persist through the background queue instead of inline
    #[serde(default)]
    pub use_queue: bool,

    #[serde(default = "default_queue_name")]
    pub queue_name: String,

    #[serde(default)]
    pub queue: QueueConfig,

    /// Bodies larger than this (bytes) are replaced by a marker
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,

    #[serde(default = "default_excluded_paths")]
    pub excluded_paths: Vec<String>,

    #[serde(default = "default_excluded_methods")]
    pub excluded_methods: Vec<String>,

    #[serde(default = "default_excluded_status_codes")]
    pub excluded_status_codes: Vec<u16>,

    #[serde(default)]
    pub excluded_ips: Vec<String>,

    #[serde(default = "default_sensitive_headers")]
    pub sensitive_headers: Vec<String>,

    /// Regular expressions; any match redacts the whole body
    #[serde(default = "default_sensitive_patterns")]
    pub sensitive_patterns: Vec<String>,

    /// Days to keep records. 0 disables the scheduled sweep.
    #[serde(default = "default_retention_days")]
    pub retention_days: Option<u32>,

    #[serde(default = "default_slow_request_threshold_ms")]
    pub slow_request_threshold_ms: u64,

    /// Checked in order; the first non-empty value wins
    #[serde(default = "default_correlation_id_headers")]
    pub correlation_id_headers: Vec<String>,

    /// Local hour (0-23) at which the scheduled sweep runs
    #[serde(default = "default_cleanup_hour")]
    pub cleanup_hour: u32,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            use_queue: false,
            queue_name: default_queue_name(),
            queue: QueueConfig::default(),
            max_body_size: default_max_body_size(),
            excluded_paths: default_excluded_paths(),
            excluded_methods: default_excluded_methods(),
            excluded_status_codes: default_excluded_status_codes(),
            excluded_ips: Vec::new(),
            sensitive_headers: default_sensitive_headers(),
            sensitive_patterns: default_sensitive_patterns(),
            retention_days: default_retention_days(),
            slow_request_threshold_ms: default_slow_request_threshold_ms(),
            correlation_id_headers: default_correlation_id_headers(),
            cleanup_hour: default_cleanup_hour(),
        }
    }
}

impl LoggerConfig {
    /// Retention window for the scheduled sweep, if one is configured
    pub fn retention_window(&self) -> Option<u32> {
        self.retention_days.filter(|days| *days > 0)
    }
}

/// Behaviour of a bounded queue when it is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Producer waits for room
    Block,
    /// Record is discarded and counted
    Drop,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    /// Channel capacity; 0 means unbounded
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,

    #[serde(default = "default_overflow")]
    pub overflow: OverflowPolicy,

    /// Number of records per insert transaction (default: 100)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Max time before flushing a partial batch in milliseconds (default: 100)
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
            overflow: default_overflow(),
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_database_path() -> String {
    "./data/api_logs.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_true() -> bool {
    true
}

fn default_queue_name() -> String {
    "default".to_string()
}

fn default_max_body_size() -> usize {
    10_000
}

fn default_excluded_paths() -> Vec<String> {
    ["/health", "/metrics", "/ping", "/favicon.ico", "/robots.txt", "/sitemap.xml"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_excluded_methods() -> Vec<String> {
    vec!["OPTIONS".to_string()]
}

fn default_excluded_status_codes() -> Vec<u16> {
    vec![404, 405]
}

fn default_sensitive_headers() -> Vec<String> {
    [
        "authorization",
        "cookie",
        "x-api-key",
        "x-auth-token",
        "x-csrf-token",
        "x-forwarded-for",
        "x-real-ip",
        "x-client-ip",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_sensitive_patterns() -> Vec<String> {
    ["password", "token", "secret", "key", "api_key", "access_token", "refresh_token"]
        .iter()
        .map(|field| format!(r#"(?i){}["']?\s*[:=]\s*["'][^"']*["']"#, field))
        .collect()
}

fn default_retention_days() -> Option<u32> {
    Some(30)
}

fn default_slow_request_threshold_ms() -> u64 {
    1000
}

fn default_correlation_id_headers() -> Vec<String> {
    vec![
        "X-Correlation-ID".to_string(),
        "X-Request-ID".to_string(),
        "X-Trace-ID".to_string(),
    ]
}

fn default_cleanup_hour() -> u32 {
    2
}

fn default_queue_capacity() -> usize {
    10_000
}

fn default_overflow() -> OverflowPolicy {
    OverflowPolicy::Block
}

fn default_batch_size() -> usize {
    100
}

fn default_flush_interval_ms() -> u64 {
    100
}

/// Invalid redaction or filtering configuration. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid sensitive pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("excluded path entry {0:?} matches every request")]
    InvalidExcludedPath(String),

    #[error("excluded IP {0:?} is not a valid IP address")]
    InvalidExcludedIp(String),

    #[error("excluded status code {0} is outside 100-599")]
    InvalidStatusCode(u16),

    #[error("correlation header {0:?} is not a valid header name")]
    InvalidHeaderName(String),

    #[error("max_body_size must be greater than 0")]
    ZeroBodySize,

    #[error("queue batch_size must be greater than 0")]
    ZeroBatchSize,

    #[error("cleanup_hour {0} is outside 0-23")]
    InvalidCleanupHour(u32),
}

/// Load configuration from a TOML file plus `API_LOGGER__*` environment overrides
///
/// A missing file is not an error; every field has a default.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let config = config::Config::builder()
        .add_source(config::File::from(path).required(false))
        .add_source(config::Environment::with_prefix("API_LOGGER").separator("__"))
        .build()?;

    let cfg: Config = config.try_deserialize()?;
    validate_config(&cfg)?;

    Ok(cfg)
}

/// Structural checks that do not need the compiled pipeline
///
/// Pattern compilation and IP parsing happen when the pipeline is built,
/// see `capture::ApiLogger::from_config`.
fn validate_config(cfg: &Config) -> anyhow::Result<()> {
    if cfg.database.path.is_empty() {
        anyhow::bail!("database.path cannot be empty");
    }

    if cfg.database.max_connections == 0 {
        anyhow::bail!("database.max_connections must be greater than 0");
    }

    match cfg.server.log_format.as_str() {
        "text" | "json" => {}
        other => anyhow::bail!("Invalid server.log_format '{}': expected 'text' or 'json'", other),
    }

    if let Some(days) = cfg.logger.retention_days {
        let cutoff = chrono::Duration::try_days(i64::from(days))
            .and_then(|window| chrono::Utc::now().checked_sub_signed(window));
        if cutoff.is_none() {
            anyhow::bail!("logger.retention_days {} reaches past the earliest supported date", days);
        }
    }

    if cfg.logger.use_queue && cfg.logger.queue_name.trim().is_empty() {
        anyhow::bail!("logger.queue_name cannot be empty when use_queue is enabled");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_documented_values() {
        let cfg = LoggerConfig::default();
        assert!(cfg.enabled);
        assert!(!cfg.use_queue);
        assert_eq!(cfg.max_body_size, 10_000);
        assert_eq!(cfg.excluded_status_codes, vec![404, 405]);
        assert_eq!(cfg.retention_window(), Some(30));
        assert_eq!(cfg.correlation_id_headers[0], "X-Correlation-ID");
        assert_eq!(cfg.sensitive_patterns.len(), 7);
    }

    #[test]
    fn test_default_patterns_compile() {
        for pattern in default_sensitive_patterns() {
            assert!(regex::Regex::new(&pattern).is_ok(), "{}", pattern);
        }
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[server]
port = 9999

[logger]
use_queue = true
queue_name = "api-logs"
excluded_methods = ["OPTIONS", "HEAD"]
retention_days = 7

[logger.queue]
capacity = 0
overflow = "drop"
"#
        )
        .unwrap();

        let cfg = load_config(file.path()).unwrap();
        assert_eq!(cfg.server.port, 9999);
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert!(cfg.logger.use_queue);
        assert_eq!(cfg.logger.queue_name, "api-logs");
        assert_eq!(cfg.logger.excluded_methods, vec!["OPTIONS", "HEAD"]);
        assert_eq!(cfg.logger.retention_days, Some(7));
        assert_eq!(cfg.logger.queue.capacity, 0);
        assert_eq!(cfg.logger.queue.overflow, OverflowPolicy::Drop);
        assert_eq!(cfg.logger.queue.batch_size, 100);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.database.path, "./data/api_logs.db");
        assert!(cfg.logger.enabled);
    }

    #[test]
    fn test_validate_config_rejects_unknown_log_format() {
        let mut cfg = Config::default();
        cfg.server.log_format = "xml".to_string();

        let result = validate_config(&cfg);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("log_format"));
    }

    #[test]
    fn test_validate_config_bounds_retention_days() {
        let mut cfg = Config::default();
        cfg.logger.retention_days = Some(u32::MAX);

        let result = validate_config(&cfg);
        assert!(result.unwrap_err().to_string().contains("retention_days"));

        cfg.logger.retention_days = Some(36_500);
        assert!(validate_config(&cfg).is_ok());
    }

    #[test]
    fn test_validate_config_requires_queue_name() {
        let mut cfg = Config::default();
        cfg.logger.use_queue = true;
        cfg.logger.queue_name = " ".to_string();

        assert!(validate_config(&cfg).is_err());
    }
}
