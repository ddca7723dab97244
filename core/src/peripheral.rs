//! Peripheral identity and advertisement types
//!
//! These are the already-decoded shapes handed over by the platform layer.
//! Nothing in this crate parses raw platform advertisement dictionaries.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Bluetooth base UUID used to expand 16-bit and 32-bit short UUIDs
const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5f9b_34fb;

/// Errors for identifier parsing
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("Invalid peripheral identifier: {0}")]
    InvalidPeripheral(String),
    #[error("Invalid service UUID: {0}")]
    InvalidService(String),
}

/// Opaque key identifying one physical peripheral across all callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeripheralIdentifier(Uuid);

impl PeripheralIdentifier {
    /// Wrap a platform-provided UUID
    pub fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Generate a random identifier (simulation and tests)
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for PeripheralIdentifier {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for PeripheralIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // CoreBluetooth reports identifiers upper-cased
        write!(f, "{}", self.0.hyphenated().to_string().to_uppercase())
    }
}

impl FromStr for PeripheralIdentifier {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| IdentifierError::InvalidPeripheral(s.to_string()))
    }
}

/// GATT service identifier
///
/// Accepts the full 128-bit form as well as the 16-bit (`180D`) and 32-bit
/// short forms assigned by the Bluetooth SIG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceUuid(Uuid);

impl ServiceUuid {
    pub fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Expand a SIG-assigned short UUID on the Bluetooth base UUID
    pub fn from_short(short: u32) -> Self {
        Self(Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96)))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Short form if this UUID lives on the Bluetooth base UUID
    pub fn short(&self) -> Option<u32> {
        let value = self.0.as_u128();
        let mask = (u32::MAX as u128) << 96;
        if value & !mask == BLUETOOTH_BASE_UUID {
            Some((value >> 96) as u32)
        } else {
            None
        }
    }
}

impl fmt::Display for ServiceUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.short() {
            Some(short) if short <= u16::MAX as u32 => write!(f, "{:04X}", short),
            Some(short) => write!(f, "{:08X}", short),
            None => write!(f, "{}", self.0.hyphenated().to_string().to_uppercase()),
        }
    }
}

impl FromStr for ServiceUuid {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.len() {
            4 | 8 => u32::from_str_radix(trimmed, 16)
                .map(Self::from_short)
                .map_err(|_| IdentifierError::InvalidService(s.to_string())),
            _ => Uuid::parse_str(trimmed)
                .map(Self)
                .map_err(|_| IdentifierError::InvalidService(s.to_string())),
        }
    }
}

impl Serialize for ServiceUuid {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ServiceUuid {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Received signal strength in dBm
pub type Rssi = i16;

/// Advertisement payload as decoded by the platform layer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvertisementData {
    /// Advertised local name
    pub local_name: Option<String>,
    /// Manufacturer specific data keyed by company identifier
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
    /// Advertised service UUIDs
    pub service_uuids: Vec<ServiceUuid>,
    /// Service data keyed by service UUID
    pub service_data: HashMap<ServiceUuid, Vec<u8>>,
    /// Transmit power level in dBm
    pub tx_power_level: Option<i8>,
    /// Whether the advertiser accepts connections
    pub is_connectable: Option<bool>,
}

/// Connection state of a peripheral as reported by the OS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeripheralConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl fmt::Display for PeripheralConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnecting => write!(f, "disconnecting"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peripheral_identifier_roundtrip_display() {
        let id: PeripheralIdentifier = "6f1c8a52-2b0e-4e57-9d3c-0a4d6a4f8e21"
            .parse()
            .expect("Valid identifier");
        assert_eq!(id.to_string(), "6F1C8A52-2B0E-4E57-9D3C-0A4D6A4F8E21");

        let reparsed: PeripheralIdentifier = id.to_string().parse().expect("Reparse");
        assert_eq!(reparsed, id);
    }

    #[test]
    fn test_peripheral_identifier_invalid() {
        let result = "not-a-uuid".parse::<PeripheralIdentifier>();
        assert!(matches!(result, Err(IdentifierError::InvalidPeripheral(_))));
    }

    #[test]
    fn test_service_uuid_short_form() {
        let heart_rate: ServiceUuid = "180D".parse().expect("Short UUID");
        assert_eq!(
            heart_rate.as_uuid().to_string(),
            "0000180d-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(heart_rate.short(), Some(0x180D));
        assert_eq!(heart_rate.to_string(), "180D");
    }

    #[test]
    fn test_service_uuid_full_form() {
        let custom: ServiceUuid = "ebe0ccb0-7a0a-4b0c-8a1a-6ff2997da3a6"
            .parse()
            .expect("Full UUID");
        assert_eq!(custom.short(), None);
        assert_eq!(custom.to_string(), "EBE0CCB0-7A0A-4B0C-8A1A-6FF2997DA3A6");
    }

    #[test]
    fn test_service_uuid_full_form_on_base_is_short() {
        let battery: ServiceUuid = "0000180f-0000-1000-8000-00805f9b34fb"
            .parse()
            .expect("Full UUID");
        assert_eq!(battery, ServiceUuid::from_short(0x180F));
    }

    #[test]
    fn test_service_uuid_serde() {
        let service = ServiceUuid::from_short(0x180F);
        let json = serde_json::to_string(&service).expect("Serialize");
        assert_eq!(json, "\"180F\"");

        let back: ServiceUuid = serde_json::from_str(&json).expect("Deserialize");
        assert_eq!(back, service);
    }
}
