// blecentral core: BLE central orchestration
//
// Turns the callback-driven OS central API into single-result operations:
// a connect resolves exactly once, whether it succeeds, fails, is dropped
// mid-flight or is cancelled.

pub mod central;
pub mod config;
pub mod event_loop;
pub mod events;
pub mod peripheral;
pub mod registry;
pub mod router;
pub mod task;

pub use central::{CentralManager, CentralRequest, ConnectOptions, SimulatedCentral};
pub use config::{CentralConfig, ConfigError, RestorationConfig};
pub use event_loop::{CentralCommand, CentralEventLoop, CentralHandle, LoopError};
pub use events::{
    BleError, CentralCallback, CentralEvent, CentralState, ConnectionChange, Discovery,
    RestoredPeripheral, RestoredState,
};
pub use peripheral::{
    AdvertisementData, IdentifierError, PeripheralConnectionState, PeripheralIdentifier, Rssi,
    ServiceUuid,
};
pub use registry::{ConnectionRegistry, Dispatch, Reconciliation, RegistryError};
pub use router::{normalize, CentralEventRouter, Normalized, RestorationReport};
pub use task::{
    CompletionError, ConnectPhase, ConnectTask, ConnectTaskController, ConnectTaskSpec,
    InvariantPolicy, InvariantViolation, Task, TaskCompletion, TaskOutcome, TaskSpec, TaskState,
};
