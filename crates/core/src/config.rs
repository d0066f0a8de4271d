//! Client configuration
//!
//! [`ContextConfig`] is handed to every `Context` explicitly; there is no
//! process-wide default connection or application. It can be built in code or
//! loaded from TOML:
//!
//! ```toml
//! default_app = "guestbook"
//! transaction_retries = 3
//!
//! [rpc]
//! deadline_ms = 5000
//! read_policy = "eventual"
//!
//! [logging]
//! level = "stratus_context=debug,info"
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default number of commit retries after the first transaction attempt
pub const DEFAULT_TRANSACTION_RETRIES: u32 = 3;

/// Default application id used for keys built without a parent
pub const DEFAULT_APP: &str = "default";

/// Read consistency requested from the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadPolicy {
    /// Reads observe every committed write
    #[default]
    Strong,
    /// Reads may lag behind recent commits
    Eventual,
}

/// Options forwarded verbatim to every RPC
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcOptions {
    /// Per-call deadline in milliseconds, `None` for the transport default
    pub deadline_ms: Option<u64>,
    /// Read consistency
    pub read_policy: ReadPolicy,
}

impl RpcOptions {
    /// Deadline as a [`Duration`]
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }
}

/// Log output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `"info"` or `"stratus_context=debug,warn"`
    pub level: String,
    /// Include file and line in log lines
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            include_location: false,
        }
    }
}

/// Configuration for a `Context`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Application id for transactions without an entity group and for
    /// root keys built by `get_or_insert`
    pub default_app: String,
    /// Commit retries after the first attempt
    pub transaction_retries: u32,
    /// Options for batched get/put/delete RPCs
    pub rpc: RpcOptions,
    /// Log output, applied by whoever installs the subscriber
    pub logging: LoggingConfig,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            default_app: DEFAULT_APP.to_string(),
            transaction_retries: DEFAULT_TRANSACTION_RETRIES,
            rpc: RpcOptions::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ContextConfig {
    /// Configuration for the given application with default settings
    pub fn for_app(app: impl Into<String>) -> Self {
        Self {
            default_app: app.into(),
            ..Self::default()
        }
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ContextConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Validate field values
    pub fn validate(&self) -> Result<()> {
        if self.default_app.is_empty() {
            return Err(Error::Config("default_app must not be empty".into()));
        }
        if self.rpc.deadline_ms == Some(0) {
            return Err(Error::Config("rpc.deadline_ms must be greater than 0".into()));
        }
        if self.logging.level.trim().is_empty() {
            return Err(Error::Config("logging.level must not be empty".into()));
        }
        Ok(())
    }
}
