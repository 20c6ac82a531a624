//! Skip rules evaluated before and after the wrapped handler runs

use crate::config::{ConfigError, LoggerConfig};
use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;

/// Why a request/response pair was not logged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    ExcludedPath,
    ExcludedMethod,
    ExcludedIp,
    ExcludedStatus,
    MalformedResponse,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::ExcludedPath => "excluded_path",
            Self::ExcludedMethod => "excluded_method",
            Self::ExcludedIp => "excluded_ip",
            Self::ExcludedStatus => "excluded_status",
            Self::MalformedResponse => "malformed_response",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The request attributes the pre-filter looks at
#[derive(Debug, Clone, Copy)]
pub struct RequestMeta<'a> {
    pub path: &'a str,
    pub method: &'a str,
    pub ip: Option<IpAddr>,
}

#[derive(Debug, Clone)]
pub struct FilterPolicy {
    enabled: bool,
    /// Stored without the leading slash
    excluded_prefixes: Vec<String>,
    /// Upper-cased
    excluded_methods: HashSet<String>,
    excluded_ips: HashSet<IpAddr>,
    excluded_statuses: HashSet<u16>,
}

impl FilterPolicy {
    pub fn from_config(cfg: &LoggerConfig) -> Result<Self, ConfigError> {
        let mut excluded_prefixes = Vec::with_capacity(cfg.excluded_paths.len());
        for path in &cfg.excluded_paths {
            let prefix = path.trim_start_matches('/');
            // An empty prefix would silently disable logging for every route
            if prefix.is_empty() {
                return Err(ConfigError::InvalidExcludedPath(path.clone()));
            }
            excluded_prefixes.push(prefix.to_string());
        }

        let excluded_ips = cfg
            .excluded_ips
            .iter()
            .map(|ip| {
                ip.trim()
                    .parse::<IpAddr>()
                    .map_err(|_| ConfigError::InvalidExcludedIp(ip.clone()))
            })
            .collect::<Result<HashSet<_>, _>>()?;

        let excluded_statuses = cfg
            .excluded_status_codes
            .iter()
            .map(|&code| {
                if (100..=599).contains(&code) {
                    Ok(code)
                } else {
                    Err(ConfigError::InvalidStatusCode(code))
                }
            })
            .collect::<Result<HashSet<_>, _>>()?;

        Ok(Self {
            enabled: cfg.enabled,
            excluded_prefixes,
            excluded_methods: cfg
                .excluded_methods
                .iter()
                .map(|m| m.trim().to_ascii_uppercase())
                .collect(),
            excluded_ips,
            excluded_statuses,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Decide before the handler runs. `Some(reason)` means skip.
    pub fn check_request(&self, req: &RequestMeta<'_>) -> Option<SkipReason> {
        if !self.enabled {
            return Some(SkipReason::Disabled);
        }

        let path = req.path.trim_start_matches('/');
        if self
            .excluded_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
        {
            return Some(SkipReason::ExcludedPath);
        }

        if self
            .excluded_methods
            .contains(&req.method.to_ascii_uppercase())
        {
            return Some(SkipReason::ExcludedMethod);
        }

        if let Some(ip) = req.ip {
            if self.excluded_ips.contains(&ip) || self.excluded_ips.contains(&canonical_ip(ip)) {
                return Some(SkipReason::ExcludedIp);
            }
        }

        None
    }

    /// Decide after the handler returned. A body that fails while streaming
    /// is reported as [`SkipReason::MalformedResponse`] by the interceptor.
    pub fn check_response(&self, status: u16) -> Option<SkipReason> {
        if !(100..=599).contains(&status) {
            return Some(SkipReason::MalformedResponse);
        }
        if self.excluded_statuses.contains(&status) {
            return Some(SkipReason::ExcludedStatus);
        }
        None
    }
}

/// IPv4-mapped IPv6 addresses compare equal to their IPv4 form
fn canonical_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
        IpAddr::V4(_) => ip,
    }
}
