//! Runtime configuration.
//!
//! Everything is read from environment variables with defaults, so the
//! binary runs with no configuration at all (in-memory store, standard
//! stage rules, daily scan).

use std::path::PathBuf;
use std::time::Duration;

use auditflow_state::{RegistryError, StageRegistry};

use crate::engine::{EngineConfig, DEFAULT_DISPATCH_TIMEOUT};
use crate::scanner::{ScannerConfig, DEFAULT_MAX_ATTEMPTS};

/// Default scan cadence: once a day.
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(86_400);

/// Log output format for the binary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(ConfigError::InvalidLogFormat(s.to_string())),
        }
    }
}

/// Resolved runtime configuration.
///
/// Custom `Debug` redacts the database URL, which may carry credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct AuditflowConfig {
    /// PostgreSQL connection string; `None` runs in-memory.
    pub database_url: Option<String>,
    /// Stage-rule override file; `None` uses the built-in rules.
    pub stage_rules: Option<PathBuf>,
    /// Scanner circuit breaker.
    pub max_transition_attempts: u32,
    /// Daemon-mode scan cadence.
    pub scan_interval: Duration,
    /// Bound on each on-enter side effect.
    pub dispatch_timeout: Duration,
    /// Log output format.
    pub log_format: LogFormat,
}

impl std::fmt::Debug for AuditflowConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditflowConfig")
            .field(
                "database_url",
                &self.database_url.as_ref().map(|_| "[REDACTED]"),
            )
            .field("stage_rules", &self.stage_rules)
            .field("max_transition_attempts", &self.max_transition_attempts)
            .field("scan_interval", &self.scan_interval)
            .field("dispatch_timeout", &self.dispatch_timeout)
            .field("log_format", &self.log_format)
            .finish()
    }
}

impl Default for AuditflowConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            stage_rules: None,
            max_transition_attempts: DEFAULT_MAX_ATTEMPTS,
            scan_interval: DEFAULT_SCAN_INTERVAL,
            dispatch_timeout: DEFAULT_DISPATCH_TIMEOUT,
            log_format: LogFormat::Text,
        }
    }
}

impl AuditflowConfig {
    /// Load configuration from environment variables.
    ///
    /// Variables:
    /// - `DATABASE_URL` (default: unset, in-memory store)
    /// - `AUDITFLOW_STAGE_RULES` (default: unset, built-in rules)
    /// - `AUDITFLOW_MAX_TRANSITION_ATTEMPTS` (default: 3)
    /// - `AUDITFLOW_SCAN_INTERVAL_SECS` (default: 86400)
    /// - `AUDITFLOW_DISPATCH_TIMEOUT_MS` (default: 5000)
    /// - `AUDITFLOW_LOG_FORMAT` (`text` or `json`, default: `text`)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let max_transition_attempts = match non_empty("AUDITFLOW_MAX_TRANSITION_ATTEMPTS") {
            Some(raw) => parse_positive("AUDITFLOW_MAX_TRANSITION_ATTEMPTS", &raw)?,
            None => DEFAULT_MAX_ATTEMPTS,
        };
        let scan_interval = match non_empty("AUDITFLOW_SCAN_INTERVAL_SECS") {
            Some(raw) => Duration::from_secs(u64::from(parse_positive::<u32>(
                "AUDITFLOW_SCAN_INTERVAL_SECS",
                &raw,
            )?)),
            None => DEFAULT_SCAN_INTERVAL,
        };
        let dispatch_timeout = match non_empty("AUDITFLOW_DISPATCH_TIMEOUT_MS") {
            Some(raw) => Duration::from_millis(u64::from(parse_positive::<u32>(
                "AUDITFLOW_DISPATCH_TIMEOUT_MS",
                &raw,
            )?)),
            None => DEFAULT_DISPATCH_TIMEOUT,
        };
        let log_format = match non_empty("AUDITFLOW_LOG_FORMAT") {
            Some(raw) => raw.parse()?,
            None => LogFormat::Text,
        };

        Ok(Self {
            database_url: non_empty("DATABASE_URL"),
            stage_rules: non_empty("AUDITFLOW_STAGE_RULES").map(PathBuf::from),
            max_transition_attempts,
            scan_interval,
            dispatch_timeout,
            log_format,
        })
    }

    /// The stage registry: the override file if configured, else the
    /// built-in rules.
    pub fn load_registry(&self) -> Result<StageRegistry, RegistryError> {
        match &self.stage_rules {
            Some(path) => StageRegistry::from_file(path),
            None => Ok(StageRegistry::standard()),
        }
    }

    /// Engine tuning derived from this configuration.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            dispatch_timeout: self.dispatch_timeout,
        }
    }

    /// Scanner tuning derived from this configuration.
    pub fn scanner_config(&self) -> ScannerConfig {
        ScannerConfig {
            max_attempts: self.max_transition_attempts,
        }
    }
}

fn parse_positive<T>(var: &str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialEq + Default,
{
    let value: T = raw.trim().parse().map_err(|_| ConfigError::InvalidNumber {
        var: var.to_string(),
        value: raw.to_string(),
    })?;
    if value == T::default() {
        return Err(ConfigError::Zero(var.to_string()));
    }
    Ok(value)
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A numeric variable did not parse.
    #[error("{var} must be an integer, got {value:?}")]
    InvalidNumber {
        /// Name of the environment variable.
        var: String,
        /// The raw value as read.
        value: String,
    },

    /// A variable that must be positive was set to zero. Holds its name.
    #[error("{0} must be greater than zero")]
    Zero(String),

    /// `AUDITFLOW_LOG_FORMAT` was neither `text` nor `json`. Holds the raw value.
    #[error("AUDITFLOW_LOG_FORMAT must be \"text\" or \"json\", got {0:?}")]
    InvalidLogFormat(String),
}
