// Configuration management for the blecentral CLI
//
// Stored as JSON in:
// - macOS: ~/Library/Application Support/blecentral/config.json
// - Linux: ~/.config/blecentral/config.json
// - Windows: %APPDATA%\blecentral\config.json

use anyhow::{Context, Result};
use blecentral_core::{CentralConfig, InvariantPolicy};
use std::path::{Path, PathBuf};

pub const CONFIG_KEYS: &[&str] = &[
    "notify_on_connection",
    "notify_on_disconnection",
    "notify_on_notification",
    "reconnect_disconnected",
    "resume_scan",
    "invariant_policy",
];

/// Central configuration bound to the file it was loaded from
#[derive(Debug, Clone)]
pub struct Config {
    pub central: CentralConfig,
    path: PathBuf,
}

impl Config {
    /// Default config file path (cross-platform)
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("blecentral");
        Ok(config_dir.join("config.json"))
    }

    /// Load config from `path`, or defaults if the file does not exist yet
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::default_path()?,
        };

        let central = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            CentralConfig::from_json(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?
        } else {
            CentralConfig::default()
        };

        Ok(Self { central, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Save config to its file, creating the directory if needed
    pub fn save(&self) -> Result<()> {
        self.central.validate().context("Refusing to save invalid config")?;
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).context("Failed to create config directory")?;
        }
        let contents = self.central.to_json().context("Failed to serialize config")?;
        std::fs::write(&self.path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Set a config value; nothing changes unless the result validates
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut updated = self.central.clone();
        let central = &mut updated;
        match key {
            "notify_on_connection" => {
                central.connect_options.notify_on_connection =
                    value.parse().context("Invalid boolean value")?;
            }
            "notify_on_disconnection" => {
                central.connect_options.notify_on_disconnection =
                    value.parse().context("Invalid boolean value")?;
            }
            "notify_on_notification" => {
                central.connect_options.notify_on_notification =
                    value.parse().context("Invalid boolean value")?;
            }
            "reconnect_disconnected" => {
                central.restoration.reconnect_disconnected =
                    value.parse().context("Invalid boolean value")?;
            }
            "resume_scan" => {
                central.restoration.resume_scan =
                    value.parse().context("Invalid boolean value")?;
            }
            "invariant_policy" => {
                central.invariant_policy = match value {
                    "" | "default" => None,
                    "abort" => Some(InvariantPolicy::Abort),
                    "report" => Some(InvariantPolicy::Report),
                    other => anyhow::bail!("Invalid invariant policy: {} (abort|report)", other),
                };
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        updated.validate().context("Rejected config value")?;
        self.central = updated;
        self.save()
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        let central = &self.central;
        match key {
            "notify_on_connection" => Some(central.connect_options.notify_on_connection.to_string()),
            "notify_on_disconnection" => {
                Some(central.connect_options.notify_on_disconnection.to_string())
            }
            "notify_on_notification" => {
                Some(central.connect_options.notify_on_notification.to_string())
            }
            "reconnect_disconnected" => Some(central.restoration.reconnect_disconnected.to_string()),
            "resume_scan" => Some(central.restoration.resume_scan.to_string()),
            "invariant_policy" => Some(
                match central.policy() {
                    InvariantPolicy::Abort => "abort",
                    InvariantPolicy::Report => "report",
                }
                .to_string(),
            ),
            _ => None,
        }
    }

    /// All config values as (key, value) pairs
    pub fn list(&self) -> Vec<(&'static str, String)> {
        CONFIG_KEYS
            .iter()
            .filter_map(|key| self.get(key).map(|value| (*key, value)))
            .collect()
    }
}
