//! Domain events for the BLE central role
//!
//! `CentralCallback` is what the OS stack reports, `CentralEvent` is what the
//! router hands to the layer above after normalization.

use crate::peripheral::{
    AdvertisementData, PeripheralConnectionState, PeripheralIdentifier, Rssi, ServiceUuid,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Error reported by the OS Bluetooth stack
///
/// Forwarded verbatim into task results; the core never classifies it.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{domain} error {code}: {message}")]
pub struct BleError {
    /// Error domain (e.g. `CBErrorDomain`)
    pub domain: String,
    /// Platform error code
    pub code: i64,
    /// Human readable description
    pub message: String,
}

impl BleError {
    pub fn new(domain: impl Into<String>, code: i64, message: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            code,
            message: message.into(),
        }
    }
}

/// What happened to a peripheral connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "error", rename_all = "snake_case")]
pub enum ConnectionChange {
    Connected,
    FailedToConnect(Option<BleError>),
    Disconnected(Option<BleError>),
}

impl ConnectionChange {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionChange::Connected)
    }

    /// Error carried by the change, if any
    pub fn error(&self) -> Option<&BleError> {
        match self {
            ConnectionChange::Connected => None,
            ConnectionChange::FailedToConnect(error) | ConnectionChange::Disconnected(error) => {
                error.as_ref()
            }
        }
    }
}

impl fmt::Display for ConnectionChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionChange::Connected => write!(f, "connected"),
            ConnectionChange::FailedToConnect(None) => write!(f, "failed to connect"),
            ConnectionChange::FailedToConnect(Some(e)) => write!(f, "failed to connect ({})", e),
            ConnectionChange::Disconnected(None) => write!(f, "disconnected"),
            ConnectionChange::Disconnected(Some(e)) => write!(f, "disconnected ({})", e),
        }
    }
}

/// Adapter state of the central manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CentralState {
    Unknown,
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
}

impl fmt::Display for CentralState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "Unknown"),
            Self::Resetting => write!(f, "Resetting"),
            Self::Unsupported => write!(f, "Unsupported"),
            Self::Unauthorized => write!(f, "Unauthorized"),
            Self::PoweredOff => write!(f, "PoweredOff"),
            Self::PoweredOn => write!(f, "PoweredOn"),
        }
    }
}

/// A scan discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discovery {
    pub peripheral: PeripheralIdentifier,
    pub advertisement: AdvertisementData,
    pub rssi: Rssi,
}

/// Peripheral entry in a restoration snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoredPeripheral {
    pub id: PeripheralIdentifier,
    pub state: PeripheralConnectionState,
}

/// Session state replayed by the OS after a background relaunch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestoredState {
    /// Peripherals the central was connected or connecting to
    pub peripherals: Vec<RestoredPeripheral>,
    /// Service filter of the scan that was running, if one was
    pub scan_services: Option<Vec<ServiceUuid>>,
}

/// Raw callback delivered by the OS central stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "callback", rename_all = "snake_case")]
pub enum CentralCallback {
    StateUpdated {
        state: CentralState,
    },
    Discovered {
        peripheral: PeripheralIdentifier,
        #[serde(default)]
        advertisement: AdvertisementData,
        rssi: Rssi,
    },
    Connected {
        peripheral: PeripheralIdentifier,
    },
    FailedToConnect {
        peripheral: PeripheralIdentifier,
        #[serde(default)]
        error: Option<BleError>,
    },
    Disconnected {
        peripheral: PeripheralIdentifier,
        #[serde(default)]
        error: Option<BleError>,
    },
    WillRestoreState {
        restored: RestoredState,
    },
}

/// Normalized event emitted by the router
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CentralEvent {
    StateChanged(CentralState),
    Discovered(Discovery),
    ConnectionChanged {
        peripheral: PeripheralIdentifier,
        change: ConnectionChange,
    },
    /// The OS finished replaying a restoration snapshot
    RestorationCompleted,
}

impl fmt::Display for CentralEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CentralEvent::StateChanged(state) => write!(f, "StateChanged({})", state),
            CentralEvent::Discovered(discovery) => write!(
                f,
                "Discovered({}, rssi={})",
                discovery.peripheral, discovery.rssi
            ),
            CentralEvent::ConnectionChanged { peripheral, change } => {
                write!(f, "ConnectionChanged({}, {})", peripheral, change)
            }
            CentralEvent::RestorationCompleted => write!(f, "RestorationCompleted"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_change_error_accessor() {
        let error = BleError::new("CBErrorDomain", 7, "Peer removed pairing");

        assert_eq!(ConnectionChange::Connected.error(), None);
        assert_eq!(ConnectionChange::FailedToConnect(None).error(), None);
        assert_eq!(
            ConnectionChange::Disconnected(Some(error.clone())).error(),
            Some(&error)
        );
        assert!(ConnectionChange::Connected.is_connected());
        assert!(!ConnectionChange::Disconnected(None).is_connected());
    }

    #[test]
    fn test_ble_error_display() {
        let error = BleError::new("CBErrorDomain", 6, "The connection has timed out.");
        assert_eq!(
            error.to_string(),
            "CBErrorDomain error 6: The connection has timed out."
        );
    }

    #[test]
    fn test_callback_deserialize_from_script_shape() {
        let json = r#"{
            "callback": "failed_to_connect",
            "peripheral": "6f1c8a52-2b0e-4e57-9d3c-0a4d6a4f8e21"
        }"#;
        let callback: CentralCallback = serde_json::from_str(json).expect("Deserialize");
        match callback {
            CentralCallback::FailedToConnect { error, .. } => assert!(error.is_none()),
            other => panic!("Unexpected callback: {:?}", other),
        }
    }

    #[test]
    fn test_connection_change_serde_shape() {
        let change = ConnectionChange::Disconnected(Some(BleError::new("CBErrorDomain", 7, "x")));
        let json = serde_json::to_value(&change).expect("Serialize");
        assert_eq!(json["kind"], "disconnected");
        assert_eq!(json["error"]["code"], 7);

        let connected = serde_json::to_value(ConnectionChange::Connected).expect("Serialize");
        assert_eq!(connected["kind"], "connected");
    }
}
