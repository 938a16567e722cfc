//! Application configuration
//!
//! Values come from an optional TOML file, overlaid by the process
//! environment:
//!
//! | Variable | Field |
//! |---|---|
//! | `SUPABASE_URL` | `backend_url` |
//! | `SUPABASE_ANON_KEY` | `anon_key` |
//! | `OPSFLOW_BIND` | `bind_addr` |
//! | `OPSFLOW_REQUEST_TIMEOUT_SECS` | `request_timeout_secs` |
//! | `OPSFLOW_SHIFT_END_HOUR` | `shift.end_hour` |
//! | `OPSFLOW_SHIFT_UTC_OFFSET_MINUTES` | `shift.utc_offset_minutes` |
//! | `OPSFLOW_SECURE_COOKIES` | `secure_cookies` |

use crate::error::ConfigError;
use chrono::{DateTime, FixedOffset, Local, Offset, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;

/// Environment variable holding the backend URL
pub const ENV_BACKEND_URL: &str = "SUPABASE_URL";
/// Environment variable holding the public API key
pub const ENV_ANON_KEY: &str = "SUPABASE_ANON_KEY";

/// OpsFlow configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Hosted backend base URL
    pub backend_url: String,
    /// Public (anon) API key
    pub anon_key: String,
    /// HTTP listen address
    pub bind_addr: String,
    /// Backend request timeout
    pub request_timeout_secs: u64,
    /// Shift cutoff policy
    pub shift: ShiftPolicy,
    /// Departments offered at registration
    pub departments: Vec<String>,
    /// Rows shown on the audit ledger page
    pub audit_page_size: usize,
    /// Mark the session cookie `Secure`
    pub secure_cookies: bool,
}

impl AppConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With backend URL and anon key
    #[inline]
    #[must_use]
    pub fn with_backend(mut self, url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        self.backend_url = url.into();
        self.anon_key = anon_key.into();
        self
    }

    /// With shift policy
    #[inline]
    #[must_use]
    pub fn with_shift(mut self, shift: ShiftPolicy) -> Self {
        self.shift = shift;
        self
    }

    /// With listen address
    #[inline]
    #[must_use]
    pub fn with_bind_addr(mut self, bind_addr: impl Into<String>) -> Self {
        self.bind_addr = bind_addr.into();
        self
    }

    /// Parse TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Defaults overlaid by the process environment, unvalidated
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load from an optional file, overlay the environment, validate.
    pub fn load(path: Option<&Path>, require_backend: bool) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_toml_str(&std::fs::read_to_string(path)?)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate(require_backend)?;
        tracing::debug!(
            backend_url = %config.backend_url,
            bind_addr = %config.bind_addr,
            shift_end_hour = config.shift.end_hour,
            "configuration loaded"
        );
        Ok(config)
    }

    /// Overlay values found through `lookup` (normally the process environment)
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_BACKEND_URL) {
            self.backend_url = url;
        }
        if let Some(key) = lookup(ENV_ANON_KEY) {
            self.anon_key = key;
        }
        if let Some(bind) = lookup("OPSFLOW_BIND") {
            self.bind_addr = bind;
        }
        if let Some(raw) = lookup("OPSFLOW_REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = parse_env("request_timeout_secs", &raw)?;
        }
        if let Some(raw) = lookup("OPSFLOW_SHIFT_END_HOUR") {
            self.shift.end_hour = parse_env("shift.end_hour", &raw)?;
        }
        if let Some(raw) = lookup("OPSFLOW_SHIFT_UTC_OFFSET_MINUTES") {
            self.shift.utc_offset_minutes = parse_env("shift.utc_offset_minutes", &raw)?;
        }
        if let Some(raw) = lookup("OPSFLOW_SECURE_COOKIES") {
            self.secure_cookies = parse_env("secure_cookies", &raw)?;
        }
        Ok(())
    }

    /// Check the configuration is usable
    pub fn validate(&self, require_backend: bool) -> Result<(), ConfigError> {
        if require_backend {
            if self.backend_url.trim().is_empty() {
                return Err(ConfigError::MissingValue(ENV_BACKEND_URL));
            }
            if !(self.backend_url.starts_with("http://") || self.backend_url.starts_with("https://"))
            {
                return Err(ConfigError::Invalid {
                    field: "backend_url",
                    reason: format!("{:?} is not an http(s) URL", self.backend_url),
                });
            }
            if self.anon_key.trim().is_empty() {
                return Err(ConfigError::MissingValue(ENV_ANON_KEY));
            }
        }
        self.bind_addr
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::Invalid {
                field: "bind_addr",
                reason: e.to_string(),
            })?;
        if self.shift.end_hour > 24 {
            return Err(ConfigError::Invalid {
                field: "shift.end_hour",
                reason: format!("{} is not an hour of the day", self.shift.end_hour),
            });
        }
        if self.shift.utc_offset_minutes.abs() > 14 * 60 {
            return Err(ConfigError::Invalid {
                field: "shift.utc_offset_minutes",
                reason: format!("{} is outside +/-14h", self.shift.utc_offset_minutes),
            });
        }
        if self.departments.is_empty() {
            return Err(ConfigError::MissingValue("departments"));
        }
        if self.audit_page_size == 0 {
            return Err(ConfigError::Invalid {
                field: "audit_page_size",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend_url: String::new(),
            anon_key: String::new(),
            bind_addr: "127.0.0.1:3000".to_string(),
            request_timeout_secs: 30,
            shift: ShiftPolicy::default(),
            departments: vec![
                "Disbursement".to_string(),
                "Repayment".to_string(),
                "Operational Excellence".to_string(),
            ],
            audit_page_size: 100,
            secure_cookies: false,
        }
    }
}

fn parse_env<T: FromStr>(field: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        field,
        reason: e.to_string(),
    })
}

/// When the shift ends, in which timezone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShiftPolicy {
    /// Locks are refused from this hour on
    pub end_hour: u32,
    /// Shift timezone as minutes east of UTC
    pub utc_offset_minutes: i32,
}

impl ShiftPolicy {
    /// Policy with an explicit cutoff and offset
    #[inline]
    #[must_use]
    pub fn new(end_hour: u32, utc_offset_minutes: i32) -> Self {
        Self {
            end_hour,
            utc_offset_minutes,
        }
    }

    /// Shift timezone
    #[must_use]
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }

    /// Wall-clock hour in the shift timezone
    #[must_use]
    pub fn local_hour(&self, now: DateTime<Utc>) -> u32 {
        now.with_timezone(&self.offset()).hour()
    }

    /// Check if `now` is at or past the cutoff
    #[inline]
    #[must_use]
    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        self.local_hour(now) >= self.end_hour
    }
}

impl Default for ShiftPolicy {
    fn default() -> Self {
        Self {
            end_hour: 17,
            utc_offset_minutes: Local::now().offset().local_minus_utc() / 60,
        }
    }
}
