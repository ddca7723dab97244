//! Central event router
//!
//! The single listener registered with the OS central stack. It maps every
//! raw callback onto one `CentralEvent` channel and runs restoration
//! recovery. It holds no task state: deciding what a connection change means
//! for an in-flight operation is left to whoever drains the channel.

use crate::central::{CentralManager, ConnectOptions};
use crate::config::{CentralConfig, RestorationConfig};
use crate::events::{
    BleError, CentralCallback, CentralEvent, CentralState, ConnectionChange, Discovery,
    RestoredState,
};
use crate::peripheral::{AdvertisementData, PeripheralConnectionState, PeripheralIdentifier, Rssi};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Outcome of normalizing one raw callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalized {
    /// Forwarded to the event channel as is
    Event(CentralEvent),
    /// Needs restoration recovery before anything is emitted
    Restore(RestoredState),
}

/// Map a raw OS callback onto the domain vocabulary
///
/// Connected maps to `Connected`, a failed connect to `FailedToConnect(error)`
/// and a disconnect to `Disconnected(error)`, errors passed through untouched.
pub fn normalize(callback: CentralCallback) -> Normalized {
    let event = match callback {
        CentralCallback::StateUpdated { state } => CentralEvent::StateChanged(state),
        CentralCallback::Discovered {
            peripheral,
            advertisement,
            rssi,
        } => CentralEvent::Discovered(Discovery {
            peripheral,
            advertisement,
            rssi,
        }),
        CentralCallback::Connected { peripheral } => CentralEvent::ConnectionChanged {
            peripheral,
            change: ConnectionChange::Connected,
        },
        CentralCallback::FailedToConnect { peripheral, error } => CentralEvent::ConnectionChanged {
            peripheral,
            change: ConnectionChange::FailedToConnect(error),
        },
        CentralCallback::Disconnected { peripheral, error } => CentralEvent::ConnectionChanged {
            peripheral,
            change: ConnectionChange::Disconnected(error),
        },
        CentralCallback::WillRestoreState { restored } => return Normalized::Restore(restored),
    };
    Normalized::Event(event)
}

/// What a restoration pass asked of the OS
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestorationReport {
    /// Peripherals re-attached to the router
    pub delegates_registered: Vec<PeripheralIdentifier>,
    /// Disconnected peripherals a reconnect was issued for
    pub reconnected: Vec<PeripheralIdentifier>,
    /// Whether a scan was resumed
    pub scan_resumed: bool,
}

/// Sole owner of the OS central registration
///
/// Deliberately not `Clone`: there is exactly one listener per central.
pub struct CentralEventRouter {
    central: Arc<dyn CentralManager>,
    connect_options: ConnectOptions,
    restoration: RestorationConfig,
    events: mpsc::UnboundedSender<CentralEvent>,
}

impl CentralEventRouter {
    /// Create the router and the receiving end of its event channel
    pub fn new(
        central: Arc<dyn CentralManager>,
        config: &CentralConfig,
    ) -> (Self, mpsc::UnboundedReceiver<CentralEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let router = Self {
            central,
            connect_options: config.connect_options,
            restoration: config.restoration,
            events,
        };
        (router, receiver)
    }

    /// Dispatch one raw callback
    ///
    /// Returns the restoration report when the callback was a restoration
    /// snapshot, so the caller can reconcile against the restored set.
    pub fn handle(&self, callback: CentralCallback) -> Option<RestorationReport> {
        match normalize(callback) {
            Normalized::Event(event) => {
                self.emit(event);
                None
            }
            Normalized::Restore(restored) => Some(self.will_restore_state(restored)),
        }
    }

    pub fn did_update_state(&self, state: CentralState) {
        info!("Central state: {}", state);
        self.handle(CentralCallback::StateUpdated { state });
    }

    pub fn did_discover(
        &self,
        peripheral: PeripheralIdentifier,
        advertisement: AdvertisementData,
        rssi: Rssi,
    ) {
        self.handle(CentralCallback::Discovered {
            peripheral,
            advertisement,
            rssi,
        });
    }

    pub fn did_connect(&self, peripheral: PeripheralIdentifier) {
        self.handle(CentralCallback::Connected { peripheral });
    }

    pub fn did_fail_to_connect(&self, peripheral: PeripheralIdentifier, error: Option<BleError>) {
        self.handle(CentralCallback::FailedToConnect { peripheral, error });
    }

    pub fn did_disconnect(&self, peripheral: PeripheralIdentifier, error: Option<BleError>) {
        self.handle(CentralCallback::Disconnected { peripheral, error });
    }

    /// Recover after the OS relaunched the process with a session snapshot
    ///
    /// Re-attaches every restored peripheral, reconnects the disconnected
    /// ones once with the regular connect options, resumes the restored scan
    /// and then emits `RestorationCompleted` exactly once. Reconnects are
    /// best effort and never retried here.
    pub fn will_restore_state(&self, restored: RestoredState) -> RestorationReport {
        info!(
            peripherals = restored.peripherals.len(),
            "Restoring central state"
        );
        let mut report = RestorationReport::default();

        for peripheral in &restored.peripherals {
            self.central.register_delegate(&peripheral.id);
            report.delegates_registered.push(peripheral.id);

            if peripheral.state == PeripheralConnectionState::Disconnected
                && self.restoration.reconnect_disconnected
            {
                debug!(peripheral = %peripheral.id, "Reconnecting restored peripheral");
                self.central.connect(&peripheral.id, &self.connect_options);
                report.reconnected.push(peripheral.id);
            }
        }

        match restored.scan_services {
            Some(services) if self.restoration.resume_scan => {
                debug!(services = services.len(), "Resuming restored scan");
                self.central.scan_for_peripherals(&services);
                report.scan_resumed = true;
            }
            Some(_) => debug!("Restored scan not resumed"),
            None => {}
        }

        self.emit(CentralEvent::RestorationCompleted);
        report
    }

    fn emit(&self, event: CentralEvent) {
        debug!("Central event: {}", event);
        if self.events.send(event).is_err() {
            warn!("Central event receiver dropped, event discarded");
        }
    }
}
