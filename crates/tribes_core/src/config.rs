//! Engine configuration.
//!
//! # Responsibility
//! - Hold the tunables shared by tribe services (digest window, invite expiry,
//!   proposal policy) and the logging bootstrap parameters.
//! - Load them from a JSON file and/or `TRIBES_*` environment variables.
//!
//! # Invariants
//! - Every field has a default; an empty JSON object is a valid config.
//! - Durations are stored in epoch milliseconds.

use crate::clock::{MILLIS_PER_DAY, MILLIS_PER_HOUR};
use crate::logging::default_log_level;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

const ENV_DIGEST_WINDOW_HOURS: &str = "TRIBES_DIGEST_WINDOW_HOURS";
const ENV_DIGEST_LOCK_LEASE_MINUTES: &str = "TRIBES_DIGEST_LOCK_LEASE_MINUTES";
const ENV_SMS_INVITE_EXPIRY_DAYS: &str = "TRIBES_SMS_INVITE_EXPIRY_DAYS";
const ENV_ALLOW_SELF_PROPOSALS: &str = "TRIBES_ALLOW_SELF_PROPOSALS";
const ENV_LOG_LEVEL: &str = "TRIBES_LOG_LEVEL";
const ENV_LOG_DIR: &str = "TRIBES_LOG_DIR";

/// Tunables consumed by the tribe services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Rolling window inside which at most one digest is sent per (user, tribe).
    pub digest_window_ms: i64,
    /// Age after which an unreleased digest job lock may be taken over.
    pub digest_lock_lease_ms: i64,
    /// Lifetime of single-use SMS invite tokens.
    pub sms_invite_expiry_days: u32,
    /// Whether a creator may list themselves as a proposal recipient.
    pub allow_self_proposals: bool,
    /// Upper bound for tribe message bodies, in characters.
    pub max_message_chars: usize,
    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            digest_window_ms: 24 * MILLIS_PER_HOUR,
            digest_lock_lease_ms: MILLIS_PER_HOUR,
            sms_invite_expiry_days: 7,
            allow_self_proposals: false,
            max_message_chars: 2000,
            logging: LoggingConfig::default(),
        }
    }
}

/// Logging bootstrap parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Absolute directory for rolling log files. `None` leaves logging off.
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level().to_string(),
            log_dir: None,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse(serde_json::Error),
    InvalidValue {
        key: &'static str,
        value: String,
    },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "invalid config json: {err}"),
            Self::InvalidValue { key, value } => {
                write!(f, "invalid value `{value}` for `{key}`")
            }
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            Self::InvalidValue { .. } => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

impl EngineConfig {
    /// Parses a config from JSON text. Missing keys take defaults.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Reads a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Defaults overridden by `TRIBES_*` process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Applies overrides from a key lookup, e.g. the process environment.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_DIGEST_WINDOW_HOURS) {
            self.digest_window_ms = parse_positive(ENV_DIGEST_WINDOW_HOURS, &value)?
                .saturating_mul(MILLIS_PER_HOUR);
        }
        if let Some(value) = lookup(ENV_DIGEST_LOCK_LEASE_MINUTES) {
            self.digest_lock_lease_ms =
                parse_positive(ENV_DIGEST_LOCK_LEASE_MINUTES, &value)?.saturating_mul(60_000);
        }
        if let Some(value) = lookup(ENV_SMS_INVITE_EXPIRY_DAYS) {
            let days = parse_positive(ENV_SMS_INVITE_EXPIRY_DAYS, &value)?;
            self.sms_invite_expiry_days =
                u32::try_from(days).map_err(|_| ConfigError::InvalidValue {
                    key: ENV_SMS_INVITE_EXPIRY_DAYS,
                    value: value.clone(),
                })?;
        }
        if let Some(value) = lookup(ENV_ALLOW_SELF_PROPOSALS) {
            self.allow_self_proposals = parse_bool(ENV_ALLOW_SELF_PROPOSALS, &value)?;
        }
        if let Some(value) = lookup(ENV_LOG_LEVEL) {
            self.logging.level = value.trim().to_string();
        }
        if let Some(value) = lookup(ENV_LOG_DIR) {
            let trimmed = value.trim();
            self.logging.log_dir = if trimmed.is_empty() {
                None
            } else {
                Some(PathBuf::from(trimmed))
            };
        }
        Ok(())
    }

    /// SMS invite lifetime in milliseconds.
    pub fn sms_invite_expiry_ms(&self) -> i64 {
        i64::from(self.sms_invite_expiry_days) * MILLIS_PER_DAY
    }
}

fn parse_positive(key: &'static str, value: &str) -> Result<i64, ConfigError> {
    match value.trim().parse::<i64>() {
        Ok(parsed) if parsed > 0 => Ok(parsed),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}
