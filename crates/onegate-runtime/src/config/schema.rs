//! Configuration schema definitions.
//!
//! ```toml
//! [logging]
//! level = "debug"
//!
//! [server]
//! host = "0.0.0.0"
//! port = 5700
//!
//! [general."onebot.v11"]
//! heartbeat_interval = 15000
//! http_reverse = ["http://127.0.0.1:8080/"]
//!
//! [[accounts]]
//! platform = "qq"
//! account_id = "10001"
//!
//! [accounts.protocols."onebot.v11"]
//! access_token = "secret"
//!
//! [accounts.protocols."onebot.v12"]
//! use_http = false
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use onegate_core::InstanceConfig;

use super::error::{ConfigError, ConfigResult};

/// Root configuration structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GatewayConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub server: ServerConfig,

    /// Protocol-wide instance defaults keyed `<protocol>.<version>`.
    #[serde(default)]
    pub general: BTreeMap<String, Value>,

    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

impl GatewayConfig {
    /// The configuration entry of an account.
    pub fn account(&self, platform: &str, account_id: &str) -> Option<&AccountConfig> {
        self.accounts
            .iter()
            .find(|a| a.platform == platform && a.account_id == account_id)
    }

    /// Merged instance configurations of an account, keyed by protocol.
    ///
    /// An account listed in `accounts` gets exactly the protocols it declares;
    /// any other account gets one instance per `general` entry.
    pub fn instance_configs(
        &self,
        platform: &str,
        account_id: &str,
    ) -> ConfigResult<BTreeMap<String, InstanceConfig>> {
        let overrides = match self.account(platform, account_id) {
            Some(account) => account.protocols.clone(),
            None => self
                .general
                .keys()
                .map(|key| (key.clone(), Value::Null))
                .collect(),
        };

        overrides
            .into_iter()
            .map(|(key, overlay)| {
                let config = self.instance_config(&key, overlay)?;
                Ok((key, config))
            })
            .collect()
    }

    /// `general[key]` merged with `overlay`.
    pub fn instance_config(&self, key: &str, overlay: Value) -> ConfigResult<InstanceConfig> {
        let mut merged = self
            .general
            .get(key)
            .cloned()
            .unwrap_or(Value::Object(Default::default()));
        merge_json(&mut merged, overlay);
        serde_json::from_value(merged)
            .map_err(|e| ConfigError::validation(format!("{key}: {e}")))
    }
}

/// Merges `overlay` into `base`. Objects merge key by key; anything else in
/// `overlay` replaces `base`, except `null`.
pub fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (_, Value::Null) => {}
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(slot) => merge_json(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

// =============================================================================
// Server & Accounts
// =============================================================================

/// The shared HTTP/WebSocket listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    /// `0` picks an ephemeral port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Root of per-instance data directories; none when unset.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: None,
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5700
}

/// One platform account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountConfig {
    pub platform: String,

    #[serde(deserialize_with = "string_or_number")]
    pub account_id: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Instance overrides keyed `<protocol>.<version>`.
    #[serde(default)]
    pub protocols: BTreeMap<String, Value>,
}

impl AccountConfig {
    /// `platform/account_id`, as used in logs and errors.
    pub fn label(&self) -> String {
        format!("{}/{}", self.platform, self.account_id)
    }
}

fn default_enabled() -> bool {
    true
}

/// Numeric account ids are common in config files.
fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Str(String),
        Int(i64),
        Uint(u64),
    }
    Ok(match Id::deserialize(deserializer)? {
        Id::Str(s) => s,
        Id::Int(n) => n.to_string(),
        Id::Uint(n) => n.to_string(),
    })
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log line layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    /// Requires the `json-log` feature; falls back to `full` otherwise.
    Json,
}

/// Log destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// File rotation period.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Never,
    Hourly,
    Daily,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpanEventConfig {
    pub new: bool,
    pub enter: bool,
    pub exit: bool,
    pub close: bool,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    pub output: LogOutput,
    pub span_events: SpanEventConfig,
    pub thread_ids: bool,
    /// Include file and line of the call site.
    pub file_location: bool,
    /// Log file for `output = "file"`.
    pub file_path: Option<PathBuf>,
    pub rotation: LogRotation,
    /// Rotated files to keep; `0` keeps all.
    pub max_files: u32,
    /// Per-target levels, e.g. `onegate_transport = "trace"`.
    pub filters: BTreeMap<String, LogLevel>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            output: LogOutput::Stdout,
            span_events: SpanEventConfig::default(),
            thread_ids: false,
            file_location: false,
            file_path: None,
            rotation: LogRotation::Never,
            max_files: 5,
            filters: BTreeMap::new(),
        }
    }
}
