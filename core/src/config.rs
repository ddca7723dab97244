//! Central configuration
//!
//! Provided by the host application (or loaded from JSON by the CLI) and
//! handed to the router and the event loop at construction.

use crate::central::ConnectOptions;
use crate::task::InvariantPolicy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

/// Recovery performed when the OS restores a previous session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestorationConfig {
    /// Issue one reconnect per restored peripheral reported disconnected
    pub reconnect_disconnected: bool,
    /// Resume the scan that was running when the process was suspended
    pub resume_scan: bool,
}

impl Default for RestorationConfig {
    fn default() -> Self {
        Self {
            reconnect_disconnected: true,
            resume_scan: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CentralConfig {
    /// Options sent with every connect, including restoration reconnects
    pub connect_options: ConnectOptions,
    pub restoration: RestorationConfig,
    /// `None` picks abort in debug builds and report in release builds
    pub invariant_policy: Option<InvariantPolicy>,
}

impl CentralConfig {
    /// Policy applied to rejected task transitions
    pub fn policy(&self) -> InvariantPolicy {
        self.invariant_policy.unwrap_or_default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        // Connect tasks for links dropped while suspended only finish on this callback
        if !self.connect_options.notify_on_disconnection {
            return Err(ConfigError::Invalid(
                "connect_options.notify_on_disconnection must be enabled".to_string(),
            ));
        }
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: CentralConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CentralConfig::default();
        assert!(config.connect_options.all_enabled());
        assert!(config.restoration.reconnect_disconnected);
        assert!(config.restoration.resume_scan);
        assert!(config.invariant_policy.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = CentralConfig::from_json(
            r#"{ "restoration": { "resume_scan": false }, "invariant_policy": "report" }"#,
        )
        .expect("Valid config");

        assert!(config.restoration.reconnect_disconnected);
        assert!(!config.restoration.resume_scan);
        assert_eq!(config.policy(), InvariantPolicy::Report);
        assert!(config.connect_options.notify_on_notification);
    }

    #[test]
    fn test_disabled_disconnect_notification_rejected() {
        let result = CentralConfig::from_json(
            r#"{ "connect_options": { "notify_on_disconnection": false } }"#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_malformed_json_rejected() {
        let result = CentralConfig::from_json("{ restoration: ");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_json_roundtrip() {
        let mut config = CentralConfig::default();
        config.invariant_policy = Some(InvariantPolicy::Abort);

        let json = config.to_json().expect("Serialize");
        let back = CentralConfig::from_json(&json).expect("Parse");
        assert_eq!(back, config);
    }
}
