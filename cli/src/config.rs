// Configuration management for the taurine-ble CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/taurine-ble/config.json
// - Linux: ~/.config/taurine-ble/config.json
// - Windows: %APPDATA%\taurine-ble\config.json

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use taurine_ble_core::BridgeConfig;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bridge settings shared with the host
    pub bridge: BridgeConfig,

    /// Which Bluetooth adapter to use when several are present
    pub adapter_index: usize,
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("taurine-ble");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from file, or create default if not exists
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path).context("Failed to read config file")?;
            let config: Config =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            config
                .bridge
                .validate()
                .with_context(|| format!("Invalid config in {}", path.display()))?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Set a config value in memory. The caller decides when to save.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut updated = self.clone();
        match key {
            "plugin_name" => updated.bridge.plugin_name = value.to_string(),
            "default_scan_timeout_ms" => {
                updated.bridge.default_scan_timeout_ms =
                    value.parse().context("Invalid number")?;
            }
            "scan_poll_interval_ms" => {
                updated.bridge.scan_poll_interval_ms = value.parse().context("Invalid number")?;
            }
            "require_init" => {
                updated.bridge.require_init = value.parse().context("Invalid boolean value")?;
            }
            "session_scoped_events" => {
                updated.bridge.session_scoped_events =
                    value.parse().context("Invalid boolean value")?;
            }
            "adapter_index" => {
                updated.adapter_index = value.parse().context("Invalid number")?;
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        updated.bridge.validate()?;
        *self = updated;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "plugin_name" => Some(self.bridge.plugin_name.clone()),
            "default_scan_timeout_ms" => Some(self.bridge.default_scan_timeout_ms.to_string()),
            "scan_poll_interval_ms" => Some(self.bridge.scan_poll_interval_ms.to_string()),
            "require_init" => Some(self.bridge.require_init.to_string()),
            "session_scoped_events" => Some(self.bridge.session_scoped_events.to_string()),
            "adapter_index" => Some(self.adapter_index.to_string()),
            _ => None,
        }
    }

    /// List all config values
    pub fn list(&self) -> Vec<(String, String)> {
        [
            "plugin_name",
            "default_scan_timeout_ms",
            "scan_poll_interval_ms",
            "require_init",
            "session_scoped_events",
            "adapter_index",
        ]
        .iter()
        .filter_map(|key| self.get(key).map(|value| (key.to_string(), value)))
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.adapter_index, 0);
        assert_eq!(config.bridge.plugin_name, "taurine-bluetooth-le");
        assert!(config.bridge.require_init);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: Config = serde_json::from_str(r#"{ "adapter_index": 1 }"#).unwrap();
        assert_eq!(config.adapter_index, 1);
        assert_eq!(config.bridge, BridgeConfig::default());
    }

    #[test]
    fn test_set_and_get() {
        let mut config = Config::default();
        config.set("default_scan_timeout_ms", "2500").unwrap();
        config.set("session_scoped_events", "false").unwrap();
        assert_eq!(config.get("default_scan_timeout_ms").as_deref(), Some("2500"));
        assert_eq!(config.get("session_scoped_events").as_deref(), Some("false"));
        assert_eq!(config.list().len(), 6);
    }

    #[test]
    fn test_set_rejects_invalid_values() {
        let mut config = Config::default();
        assert!(config.set("scan_poll_interval_ms", "0").is_err());
        assert!(config.set("require_init", "maybe").is_err());
        assert!(config.set("plugin_name", "bad|name").is_err());
        assert!(config.set("listen_port", "80").is_err());
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_creates_default_file() {
        let path = std::env::temp_dir().join(format!("taurine-ble-{}.json", uuid::Uuid::new_v4()));
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config, Config::default());
        assert!(path.exists());

        let mut changed = config.clone();
        changed.adapter_index = 2;
        changed.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap().adapter_index, 2);

        std::fs::remove_file(&path).unwrap();
    }
}
