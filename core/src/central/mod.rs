//! OS central manager request surface
//!
//! `CentralManager` is everything the core asks of the platform Bluetooth
//! stack. Platform glue implements it over CoreBluetooth; `SimulatedCentral`
//! implements it in-process for hosts without a radio.

pub mod simulated;

use crate::peripheral::{PeripheralIdentifier, ServiceUuid};
use serde::{Deserialize, Serialize};

pub use simulated::{CentralRequest, SimulatedCentral};

/// Notification options passed with every connect request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectOptions {
    /// Alert when the peripheral connects while the app is suspended
    pub notify_on_connection: bool,
    /// Alert when the peripheral disconnects while the app is suspended
    pub notify_on_disconnection: bool,
    /// Alert on characteristic notifications while the app is suspended
    pub notify_on_notification: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            notify_on_connection: true,
            notify_on_disconnection: true,
            notify_on_notification: true,
        }
    }
}

impl ConnectOptions {
    pub fn all_enabled(&self) -> bool {
        self.notify_on_connection && self.notify_on_disconnection && self.notify_on_notification
    }
}

/// Requests issued to the OS central stack
///
/// Every call schedules asynchronous OS work and returns immediately; the
/// outcome arrives later as a callback through the router.
#[cfg_attr(test, mockall::automock)]
pub trait CentralManager: Send + Sync {
    /// Start connecting to a peripheral
    fn connect(&self, peripheral: &PeripheralIdentifier, options: &ConnectOptions);

    /// Cancel a pending or established connection
    fn cancel_peripheral_connection(&self, peripheral: &PeripheralIdentifier);

    /// Scan for peripherals advertising any of `services` (all when empty)
    fn scan_for_peripherals(&self, services: &[ServiceUuid]);

    /// Route this peripheral's callbacks to the router
    fn register_delegate(&self, peripheral: &PeripheralIdentifier);
}
