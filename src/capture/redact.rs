//! Header and body redaction
//!
//! Redaction is coarse: a single pattern hit replaces the whole body. Bodies
//! are matched as raw bytes so non-UTF-8 payloads are still scanned.

use crate::capture::record::Headers;
use crate::config::{ConfigError, LoggerConfig};
use regex::bytes::RegexSet;
use std::collections::HashSet;

pub const REDACTED: &str = "[REDACTED]";
pub const TOO_LARGE: &str = "[Content too large to log]";
pub const SENSITIVE_CONTENT: &str = "[Sensitive content redacted]";

#[derive(Debug, Clone)]
pub struct Redactor {
    /// Lower-cased header names
    sensitive_headers: HashSet<String>,
    patterns: RegexSet,
    max_body_size: usize,
}

impl Redactor {
    pub fn from_config(cfg: &LoggerConfig) -> Result<Self, ConfigError> {
        if cfg.max_body_size == 0 {
            return Err(ConfigError::ZeroBodySize);
        }

        // Compile one by one so the error names the offending pattern
        for pattern in &cfg.sensitive_patterns {
            regex::bytes::Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
                pattern: pattern.clone(),
                source,
            })?;
        }
        let patterns = RegexSet::new(&cfg.sensitive_patterns).map_err(|source| {
            ConfigError::InvalidPattern {
                pattern: cfg.sensitive_patterns.join(" | "),
                source,
            }
        })?;

        Ok(Self {
            sensitive_headers: cfg
                .sensitive_headers
                .iter()
                .map(|h| h.trim().to_ascii_lowercase())
                .collect(),
            patterns,
            max_body_size: cfg.max_body_size,
        })
    }

    /// Replace values of sensitive headers, keeping names and order
    pub fn redact_headers(&self, headers: &Headers) -> Headers {
        headers
            .iter()
            .map(|(name, value)| {
                if self.sensitive_headers.contains(&name.to_ascii_lowercase()) {
                    (name, REDACTED)
                } else {
                    (name, value)
                }
            })
            .collect()
    }

    /// Size check first, then patterns, then the body as-is. An empty body
    /// that no pattern matched is `None`.
    pub fn redact_body(&self, body: &[u8]) -> Option<String> {
        if body.len() > self.max_body_size {
            return Some(TOO_LARGE.to_string());
        }
        if self.patterns.is_match(body) {
            return Some(SENSITIVE_CONTENT.to_string());
        }
        if body.is_empty() {
            return None;
        }
        Some(String::from_utf8_lossy(body).into_owned())
    }

    /// Largest body stored verbatim
    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }
}
