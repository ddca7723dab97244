/// In-process central manager that records every request
///
/// Used by the CLI replay driver and by tests that need to count OS calls.
/// It issues no callbacks of its own; whoever drives the simulation feeds
/// callbacks to the router.

use super::{CentralManager, ConnectOptions};
use crate::peripheral::{PeripheralIdentifier, ServiceUuid};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One request received by the simulated stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "request", rename_all = "snake_case")]
pub enum CentralRequest {
    Connect {
        peripheral: PeripheralIdentifier,
        options: ConnectOptions,
    },
    CancelConnection {
        peripheral: PeripheralIdentifier,
    },
    Scan {
        services: Vec<ServiceUuid>,
    },
    RegisterDelegate {
        peripheral: PeripheralIdentifier,
    },
}

impl CentralRequest {
    /// Peripheral the request targets, if it targets one
    pub fn peripheral(&self) -> Option<&PeripheralIdentifier> {
        match self {
            CentralRequest::Connect { peripheral, .. }
            | CentralRequest::CancelConnection { peripheral }
            | CentralRequest::RegisterDelegate { peripheral } => Some(peripheral),
            CentralRequest::Scan { .. } => None,
        }
    }
}

impl fmt::Display for CentralRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CentralRequest::Connect { peripheral, .. } => write!(f, "connect {}", peripheral),
            CentralRequest::CancelConnection { peripheral } => {
                write!(f, "cancel-connection {}", peripheral)
            }
            CentralRequest::Scan { services } if services.is_empty() => write!(f, "scan (all)"),
            CentralRequest::Scan { services } => {
                let list: Vec<String> = services.iter().map(|s| s.to_string()).collect();
                write!(f, "scan [{}]", list.join(", "))
            }
            CentralRequest::RegisterDelegate { peripheral } => {
                write!(f, "register-delegate {}", peripheral)
            }
        }
    }
}

/// Recording central manager
#[derive(Debug, Default)]
pub struct SimulatedCentral {
    requests: Mutex<Vec<CentralRequest>>,
}

impl SimulatedCentral {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every request so far, in issue order
    pub fn requests(&self) -> Vec<CentralRequest> {
        self.requests.lock().clone()
    }

    /// Number of recorded requests matching `predicate`
    pub fn count<F>(&self, predicate: F) -> usize
    where
        F: Fn(&CentralRequest) -> bool,
    {
        self.requests.lock().iter().filter(|r| predicate(r)).count()
    }

    /// Requests that target `peripheral`
    pub fn requests_for(&self, peripheral: &PeripheralIdentifier) -> Vec<CentralRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.peripheral() == Some(peripheral))
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.requests.lock().clear();
    }

    fn record(&self, request: CentralRequest) {
        self.requests.lock().push(request);
    }
}

impl CentralManager for SimulatedCentral {
    fn connect(&self, peripheral: &PeripheralIdentifier, options: &ConnectOptions) {
        self.record(CentralRequest::Connect {
            peripheral: *peripheral,
            options: *options,
        });
    }

    fn cancel_peripheral_connection(&self, peripheral: &PeripheralIdentifier) {
        self.record(CentralRequest::CancelConnection {
            peripheral: *peripheral,
        });
    }

    fn scan_for_peripherals(&self, services: &[ServiceUuid]) {
        self.record(CentralRequest::Scan {
            services: services.to_vec(),
        });
    }

    fn register_delegate(&self, peripheral: &PeripheralIdentifier) {
        self.record(CentralRequest::RegisterDelegate {
            peripheral: *peripheral,
        });
    }
}
