//! Repository configuration
//!
//! ```json
//! {
//!   "connection_strings": {
//!     "DefaultConnection": "Server=tcp:db,1433;Database=app;User Id=app;Password=secret"
//!   },
//!   "command_timeout_secs": 30,
//!   "retry": { "max_attempts": 3, "backoff_base": 2.0, "base_delay_ms": 1000 },
//!   "bulk": { "batch_size": 10000, "timeout_secs": 600 },
//!   "mapping": "lenient"
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use validator::Validate;

use crate::context::ConnectionStrings;
use crate::error::{Error, Result};
use crate::mapper::MappingMode;
use crate::retry::{Backoff, RetryPolicy};

/// Retry settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RetrySettings {
    /// Total attempts including the first
    #[serde(default = "default_max_attempts")]
    #[validate(range(min = 1, max = 10))]
    pub max_attempts: u32,

    /// Exponential growth factor
    #[serde(default = "default_backoff_base")]
    #[validate(range(min = 1.0, max = 10.0))]
    pub backoff_base: f64,

    /// Delay after the first failure
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Cap for any single delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Random spread applied to each delay
    #[serde(default)]
    #[validate(range(min = 0.0, max = 1.0))]
    pub jitter: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base() -> f64 {
    2.0
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base: default_backoff_base(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: 0.0,
        }
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        RetryPolicy::new()
            .with_max_attempts(settings.max_attempts)
            .with_backoff(Backoff::Exponential {
                base: settings.backoff_base,
                unit: Duration::from_millis(settings.base_delay_ms),
                max: Duration::from_millis(settings.max_delay_ms),
            })
            .with_jitter(settings.jitter)
    }
}

/// Bulk load defaults
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BulkSettings {
    /// Rows per batch
    #[serde(default = "default_bulk_batch_size")]
    #[validate(range(min = 1, max = 1_000_000))]
    pub batch_size: usize,

    /// Timeout for a whole bulk operation
    #[serde(default = "default_bulk_timeout_secs")]
    #[validate(range(min = 1))]
    pub timeout_secs: u64,
}

fn default_bulk_batch_size() -> usize {
    10_000
}

fn default_bulk_timeout_secs() -> u64 {
    600
}

impl Default for BulkSettings {
    fn default() -> Self {
        Self {
            batch_size: default_bulk_batch_size(),
            timeout_secs: default_bulk_timeout_secs(),
        }
    }
}

/// Repository configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RepositoryConfig {
    /// Connection strings by logical name
    #[serde(default)]
    pub connection_strings: HashMap<String, String>,

    /// Name used when a repository is built without an explicit one
    #[serde(default = "default_connection_name")]
    #[validate(length(min = 1))]
    pub default_connection: String,

    /// Default command timeout
    #[serde(default = "default_command_timeout_secs")]
    #[validate(range(min = 1, max = 3600))]
    pub command_timeout_secs: u64,

    /// Retry settings
    #[serde(default)]
    #[validate(nested)]
    pub retry: RetrySettings,

    /// Bulk load defaults
    #[serde(default)]
    #[validate(nested)]
    pub bulk: BulkSettings,

    /// Row mapping strictness
    #[serde(default)]
    pub mapping: MappingMode,

    /// Largest page size accepted by the pagination engine
    #[serde(default = "default_max_page_size")]
    #[validate(range(min = 1, max = 10_000))]
    pub max_page_size: u32,
}

fn default_connection_name() -> String {
    "DefaultConnection".to_string()
}

fn default_command_timeout_secs() -> u64 {
    30
}

fn default_max_page_size() -> u32 {
    10_000
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            connection_strings: HashMap::new(),
            default_connection: default_connection_name(),
            command_timeout_secs: default_command_timeout_secs(),
            retry: RetrySettings::default(),
            bulk: BulkSettings::default(),
            mapping: MappingMode::default(),
            max_page_size: default_max_page_size(),
        }
    }
}

impl RepositoryConfig {
    /// Parse and validate a JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::config(format!("invalid repository config: {e}")))?;
        config.validated()
    }

    /// Validate, converting failures into configuration errors
    pub fn validated(self) -> Result<Self> {
        self.validate()
            .map_err(|e| Error::config(format!("invalid repository config: {e}")))?;
        Ok(self)
    }

    /// Register a connection string
    pub fn with_connection_string(
        mut self,
        name: impl Into<String>,
        connection_string: impl Into<String>,
    ) -> Self {
        self.connection_strings
            .insert(name.into(), connection_string.into());
        self
    }

    /// Default command timeout
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Bulk operation timeout
    pub fn bulk_timeout(&self) -> Duration {
        Duration::from_secs(self.bulk.timeout_secs)
    }

    /// Retry policy described by these settings
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from(&self.retry)
    }
}

impl ConnectionStrings for RepositoryConfig {
    fn connection_string(&self, name: &str) -> Option<String> {
        self.connection_strings.get(name).cloned()
    }
}
