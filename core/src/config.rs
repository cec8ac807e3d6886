//! Bridge configuration shared by the host and the webview-side client.

use crate::protocol::Command;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_PLUGIN_NAME: &str = "taurine-bluetooth-le";
pub const DEFAULT_SCAN_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_SCAN_POLL_INTERVAL_MS: u64 = 100;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Namespace of every command: `plugin:<plugin_name>|<command>`
    pub plugin_name: String,
    /// Scan duration used when a start_scan request carries no timeout
    pub default_scan_timeout_ms: u64,
    /// How often the host polls the native peripheral list during a scan
    pub scan_poll_interval_ms: u64,
    /// Reject BLE commands until `init` has succeeded
    pub require_init: bool,
    /// Give each scan session its own event channels
    pub session_scoped_events: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            plugin_name: DEFAULT_PLUGIN_NAME.to_string(),
            default_scan_timeout_ms: DEFAULT_SCAN_TIMEOUT_MS,
            scan_poll_interval_ms: DEFAULT_SCAN_POLL_INTERVAL_MS,
            require_init: true,
            session_scoped_events: true,
        }
    }
}

impl BridgeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.plugin_name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "plugin_name cannot be empty".to_string(),
            ));
        }
        if self.plugin_name.contains('|') {
            return Err(ConfigError::Invalid(
                "plugin_name cannot contain '|'".to_string(),
            ));
        }
        if self.default_scan_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "default_scan_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.scan_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "scan_poll_interval_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Prefix shared by every command of this plugin.
    pub fn command_prefix(&self) -> String {
        format!("plugin:{}|", self.plugin_name)
    }

    pub fn command_name(&self, command: Command) -> String {
        format!("{}{}", self.command_prefix(), command.as_str())
    }

    pub fn scan_timeout(&self, requested_ms: Option<u64>) -> Duration {
        Duration::from_millis(requested_ms.unwrap_or(self.default_scan_timeout_ms))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.scan_poll_interval_ms)
    }
}
