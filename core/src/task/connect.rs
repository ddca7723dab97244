/// Connect-to-peripheral task
///
/// One phase (`Connecting`) and a `ConnectionChange` result. `connect` issues
/// the OS request, `handle_connection_change` stores whatever terminal change
/// arrives, and `cancel` resolves the task immediately as failed-to-connect
/// without waiting for the OS to confirm the cancellation.

use super::{InvariantPolicy, Task, TaskOutcome, TaskSpec, TaskState};
use crate::central::{CentralManager, ConnectOptions};
use crate::events::{BleError, ConnectionChange};
use tracing::{debug, info};

#[derive(Debug)]
pub struct ConnectTaskSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectPhase {
    Connecting,
}

impl TaskSpec for ConnectTaskSpec {
    type Phase = ConnectPhase;
    type Result = ConnectionChange;
    const NAME: &'static str = "connect";
}

pub type ConnectTask = Task<ConnectTaskSpec>;

/// Drives one connect task against the OS central
pub struct ConnectTaskController {
    task: ConnectTask,
    policy: InvariantPolicy,
}

impl ConnectTaskController {
    pub fn new(task: ConnectTask) -> Self {
        Self::with_policy(task, InvariantPolicy::default())
    }

    pub fn with_policy(task: ConnectTask, policy: InvariantPolicy) -> Self {
        Self { task, policy }
    }

    /// Pending -> Processing(Connecting), issuing the OS connect request
    pub fn connect(
        self,
        central: &dyn CentralManager,
        options: &ConnectOptions,
    ) -> TaskOutcome<ConnectTaskSpec> {
        if !self.task.state().is_pending() {
            return self.policy.enforce(self.task.begin(ConnectPhase::Connecting));
        }

        info!(peripheral = %self.task.peripheral(), "Connecting");
        central.connect(self.task.peripheral(), options);
        self.policy.enforce(self.task.begin(ConnectPhase::Connecting))
    }

    /// Processing(Connecting) -> Finished(change), storing the change as delivered
    pub fn handle_connection_change(self, change: ConnectionChange) -> TaskOutcome<ConnectTaskSpec> {
        debug!(peripheral = %self.task.peripheral(), change = %change, "Connection change");
        self.policy
            .enforce(self.task.complete(ConnectPhase::Connecting, change))
    }

    /// Resolve as `FailedToConnect(error)`
    ///
    /// From pending nothing is in flight and no OS call is made. From
    /// processing the OS is asked to cancel once and the task finishes
    /// without waiting for its confirmation.
    pub fn cancel(
        self,
        central: &dyn CentralManager,
        error: Option<BleError>,
    ) -> TaskOutcome<ConnectTaskSpec> {
        match self.task.state() {
            TaskState::Pending => {
                debug!(peripheral = %self.task.peripheral(), "Cancelled before connecting");
            }
            TaskState::Processing {
                phase: ConnectPhase::Connecting,
                ..
            } => {
                info!(peripheral = %self.task.peripheral(), "Cancelling connection attempt");
                central.cancel_peripheral_connection(self.task.peripheral());
            }
            TaskState::Finished { .. } => {}
        }
        self.policy
            .enforce(self.task.terminate(ConnectionChange::FailedToConnect(error)))
    }
}
