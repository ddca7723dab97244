/// Per-peripheral connect task registry
///
/// Owns every in-flight connect task, keyed by peripheral. It is the only
/// place that decides whether a connection change belongs to a task. A
/// cancelled connect leaves a tombstone so the late OS callback for that
/// attempt is discarded. Changes for peripherals without any task (restoration
/// reconnects, drops of established links) are reported as stale.

use crate::central::{CentralManager, ConnectOptions};
use crate::events::{BleError, ConnectionChange};
use crate::peripheral::PeripheralIdentifier;
use crate::task::{
    ConnectTask, ConnectTaskController, ConnectTaskSpec, InvariantPolicy, Task, TaskCompletion,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Connect already in flight for {0}")]
    AlreadyConnecting(PeripheralIdentifier),
    #[error("No connect task for {0}")]
    NoTask(PeripheralIdentifier),
    #[error("Rejected task transition: {0}")]
    Invariant(String),
}

/// Where a connection change went
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Finished the in-flight task for the peripheral
    Delivered,
    /// Late callback for a connect that was cancelled
    Discarded,
    /// No task was waiting for it
    Stale,
}

/// Restored peripherals compared against the tasks in the registry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    /// Restored by the OS but not tracked by any task
    pub untracked: Vec<PeripheralIdentifier>,
    /// Tracked by a task but missing from the restored set
    pub orphaned: Vec<PeripheralIdentifier>,
}

impl Reconciliation {
    pub fn is_consistent(&self) -> bool {
        self.untracked.is_empty() && self.orphaned.is_empty()
    }
}

pub struct ConnectionRegistry {
    tasks: HashMap<PeripheralIdentifier, ConnectTask>,
    cancelled: HashSet<PeripheralIdentifier>,
    options: ConnectOptions,
    policy: InvariantPolicy,
}

impl ConnectionRegistry {
    pub fn new(options: ConnectOptions, policy: InvariantPolicy) -> Self {
        Self {
            tasks: HashMap::new(),
            cancelled: HashSet::new(),
            options,
            policy,
        }
    }

    /// Start a connect task; at most one per peripheral
    pub fn connect(
        &mut self,
        central: &dyn CentralManager,
        peripheral: PeripheralIdentifier,
    ) -> Result<TaskCompletion<ConnectTaskSpec>, RegistryError> {
        if self.tasks.contains_key(&peripheral) {
            return Err(RegistryError::AlreadyConnecting(peripheral));
        }

        let (task, completion) = Task::new(peripheral);
        let task = ConnectTaskController::with_policy(task, self.policy)
            .connect(central, &self.options)
            .map_err(|violation| RegistryError::Invariant(violation.to_string()))?;
        debug!(peripheral = %peripheral, task = %completion.task_id(), "Connect in flight");
        // A new attempt owns the next callback
        self.cancelled.remove(&peripheral);
        self.tasks.insert(peripheral, task);
        Ok(completion)
    }

    /// Cancel and forget the task for `peripheral`
    pub fn cancel(
        &mut self,
        central: &dyn CentralManager,
        peripheral: &PeripheralIdentifier,
        error: Option<BleError>,
    ) -> Result<(), RegistryError> {
        let task = self
            .tasks
            .remove(peripheral)
            .ok_or(RegistryError::NoTask(*peripheral))?;

        ConnectTaskController::with_policy(task, self.policy)
            .cancel(central, error)
            .map_err(|violation| RegistryError::Invariant(violation.to_string()))?;
        self.cancelled.insert(*peripheral);
        Ok(())
    }

    /// Route a connection change to the task waiting for it
    pub fn handle_connection_change(
        &mut self,
        peripheral: &PeripheralIdentifier,
        change: ConnectionChange,
    ) -> Dispatch {
        let Some(task) = self.tasks.remove(peripheral) else {
            if self.cancelled.remove(peripheral) {
                debug!(
                    peripheral = %peripheral,
                    change = %change,
                    "Late change for cancelled connect discarded"
                );
                return Dispatch::Discarded;
            }
            debug!(peripheral = %peripheral, change = %change, "Connection change without a task");
            return Dispatch::Stale;
        };

        match ConnectTaskController::with_policy(task, self.policy).handle_connection_change(change)
        {
            Ok(_) => Dispatch::Delivered,
            Err(violation) => {
                // Stored tasks are always processing; keep it untouched if not
                self.tasks.insert(*peripheral, violation.into_task());
                Dispatch::Stale
            }
        }
    }

    /// Compare the OS-restored peripheral set with the tracked tasks
    pub fn reconcile(&self, restored: &[PeripheralIdentifier]) -> Reconciliation {
        let restored: HashSet<&PeripheralIdentifier> = restored.iter().collect();
        let tracked: HashSet<&PeripheralIdentifier> = self.tasks.keys().collect();

        let mut untracked: Vec<PeripheralIdentifier> =
            restored.difference(&tracked).map(|p| **p).collect();
        let mut orphaned: Vec<PeripheralIdentifier> =
            tracked.difference(&restored).map(|p| **p).collect();
        untracked.sort();
        orphaned.sort();

        let reconciliation = Reconciliation {
            untracked,
            orphaned,
        };
        if !reconciliation.is_consistent() {
            info!(
                untracked = reconciliation.untracked.len(),
                orphaned = reconciliation.orphaned.len(),
                "Restored peripherals differ from tracked tasks"
            );
        }
        reconciliation
    }

    /// Cancel everything still in flight
    pub fn cancel_all(&mut self, central: &dyn CentralManager, error: Option<BleError>) -> usize {
        let peripherals: Vec<PeripheralIdentifier> = self.tasks.keys().copied().collect();
        let mut cancelled = 0;
        for peripheral in peripherals {
            if self.cancel(central, &peripheral, error.clone()).is_ok() {
                cancelled += 1;
            }
        }
        cancelled
    }

    pub fn in_flight(&self) -> Vec<PeripheralIdentifier> {
        let mut peripherals: Vec<PeripheralIdentifier> = self.tasks.keys().copied().collect();
        peripherals.sort();
        peripherals
    }

    pub fn contains(&self, peripheral: &PeripheralIdentifier) -> bool {
        self.tasks.contains_key(peripheral)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::central::{CentralRequest, SimulatedCentral};

    fn registry() -> ConnectionRegistry {
        ConnectionRegistry::new(ConnectOptions::default(), InvariantPolicy::Report)
    }

    #[test]
    fn test_connect_and_deliver() {
        let central = SimulatedCentral::new();
        let mut registry = registry();
        let peripheral = PeripheralIdentifier::random();

        let mut completion = registry.connect(&central, peripheral).expect("Connect");
        assert!(registry.contains(&peripheral));
        assert_eq!(central.requests().len(), 1);

        let dispatch = registry.handle_connection_change(&peripheral, ConnectionChange::Connected);
        assert_eq!(dispatch, Dispatch::Delivered);
        assert!(registry.is_empty());
        assert_eq!(completion.try_result(), Some(Ok(ConnectionChange::Connected)));
    }

    #[test]
    fn test_second_connect_rejected_while_in_flight() {
        let central = SimulatedCentral::new();
        let mut registry = registry();
        let peripheral = PeripheralIdentifier::random();

        let _completion = registry.connect(&central, peripheral).expect("Connect");
        let result = registry.connect(&central, peripheral);

        assert_eq!(result.err(), Some(RegistryError::AlreadyConnecting(peripheral)));
        assert_eq!(
            central.count(|r| matches!(r, CentralRequest::Connect { .. })),
            1
        );
    }

    #[test]
    fn test_reconnect_allowed_after_finish() {
        let central = SimulatedCentral::new();
        let mut registry = registry();
        let peripheral = PeripheralIdentifier::random();

        let _first = registry.connect(&central, peripheral).expect("Connect");
        registry.handle_connection_change(&peripheral, ConnectionChange::FailedToConnect(None));

        let _second = registry.connect(&central, peripheral).expect("Connect again");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_late_disconnect_after_cancel_is_discarded() {
        let central = SimulatedCentral::new();
        let mut registry = registry();
        let peripheral = PeripheralIdentifier::random();

        let mut completion = registry.connect(&central, peripheral).expect("Connect");
        registry.cancel(&central, &peripheral, None).expect("Cancel");
        assert_eq!(
            completion.try_result(),
            Some(Ok(ConnectionChange::FailedToConnect(None)))
        );

        let dispatch =
            registry.handle_connection_change(&peripheral, ConnectionChange::Disconnected(None));
        assert_eq!(dispatch, Dispatch::Discarded);

        // Only the one late callback is swallowed
        let dispatch =
            registry.handle_connection_change(&peripheral, ConnectionChange::Connected);
        assert_eq!(dispatch, Dispatch::Stale);
        assert_eq!(
            central.requests_for(&peripheral),
            vec![
                CentralRequest::Connect {
                    peripheral,
                    options: ConnectOptions::default(),
                },
                CentralRequest::CancelConnection { peripheral },
            ]
        );
    }

    #[test]
    fn test_cancel_unknown_peripheral() {
        let central = SimulatedCentral::new();
        let mut registry = registry();
        let peripheral = PeripheralIdentifier::random();

        let result = registry.cancel(&central, &peripheral, None);
        assert_eq!(result, Err(RegistryError::NoTask(peripheral)));
        assert!(central.requests().is_empty());
    }

    #[test]
    fn test_change_for_unknown_peripheral_is_stale() {
        let mut registry = registry();
        let dispatch = registry
            .handle_connection_change(&PeripheralIdentifier::random(), ConnectionChange::Connected);
        assert_eq!(dispatch, Dispatch::Stale);
    }

    #[test]
    fn test_reconcile_reports_both_sides() {
        let central = SimulatedCentral::new();
        let mut registry = registry();
        let tracked_and_restored = PeripheralIdentifier::random();
        let tracked_only = PeripheralIdentifier::random();
        let restored_only = PeripheralIdentifier::random();

        let _a = registry.connect(&central, tracked_and_restored).expect("Connect");
        let _b = registry.connect(&central, tracked_only).expect("Connect");

        let reconciliation = registry.reconcile(&[tracked_and_restored, restored_only]);
        assert_eq!(reconciliation.untracked, vec![restored_only]);
        assert_eq!(reconciliation.orphaned, vec![tracked_only]);
        assert!(!reconciliation.is_consistent());

        // Reconciliation never drops tasks
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_cancel_all_resolves_every_task() {
        let central = SimulatedCentral::new();
        let mut registry = registry();
        let mut completions: Vec<_> = (0..3)
            .map(|_| {
                registry
                    .connect(&central, PeripheralIdentifier::random())
                    .expect("Connect")
            })
            .collect();

        assert_eq!(registry.cancel_all(&central, None), 3);
        assert!(registry.is_empty());
        for completion in completions.iter_mut() {
            assert_eq!(
                completion.try_result(),
                Some(Ok(ConnectionChange::FailedToConnect(None)))
            );
        }
        assert_eq!(
            central.count(|r| matches!(r, CentralRequest::CancelConnection { .. })),
            3
        );
    }

    #[test]
    fn test_reconnect_after_cancel_owns_next_change() {
        let central = SimulatedCentral::new();
        let mut registry = registry();
        let peripheral = PeripheralIdentifier::random();

        let _first = registry.connect(&central, peripheral).expect("Connect");
        registry.cancel(&central, &peripheral, None).expect("Cancel");
        let mut second = registry.connect(&central, peripheral).expect("Connect again");

        let dispatch = registry.handle_connection_change(&peripheral, ConnectionChange::Connected);
        assert_eq!(dispatch, Dispatch::Delivered);
        assert_eq!(second.try_result(), Some(Ok(ConnectionChange::Connected)));
    }
}
