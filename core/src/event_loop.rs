//! Central event loop
//!
//! One tokio task owns the connection registry and is the only place a task
//! is ever mutated. It drains two queues: commands from any number of
//! [`CentralHandle`] clones (connect, cancel, reconcile) and the router's
//! event channel. Connection changes are offered to the registry first. Late
//! callbacks for cancelled connects are dropped there. Changes no task was
//! waiting for are forwarded to the application event channel together with
//! state changes, discoveries and restoration signals.

use crate::central::CentralManager;
use crate::config::CentralConfig;
use crate::events::{BleError, CentralEvent};
use crate::peripheral::PeripheralIdentifier;
use crate::registry::{ConnectionRegistry, Dispatch, Reconciliation, RegistryError};
use crate::task::{ConnectTaskSpec, TaskCompletion};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

const COMMAND_QUEUE_DEPTH: usize = 256;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoopError {
    #[error("Central event loop not running")]
    NotRunning,
    #[error("No reply from central event loop")]
    NoReply,
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Commands accepted by the event loop
#[derive(Debug)]
pub enum CentralCommand {
    /// Start a connect task
    Connect {
        peripheral: PeripheralIdentifier,
        reply: oneshot::Sender<Result<TaskCompletion<ConnectTaskSpec>, RegistryError>>,
    },
    /// Cancel the connect task for a peripheral
    Cancel {
        peripheral: PeripheralIdentifier,
        error: Option<BleError>,
        reply: oneshot::Sender<Result<(), RegistryError>>,
    },
    /// Compare restored peripherals with tracked tasks
    Reconcile {
        restored: Vec<PeripheralIdentifier>,
        reply: oneshot::Sender<Reconciliation>,
    },
    /// Peripherals with a connect in flight
    InFlight {
        reply: oneshot::Sender<Vec<PeripheralIdentifier>>,
    },
    /// Cancel everything and stop
    Shutdown,
}

/// Cloneable command side of the event loop
#[derive(Clone)]
pub struct CentralHandle {
    command_tx: mpsc::Sender<CentralCommand>,
}

impl CentralHandle {
    /// Connect to a peripheral; the returned completion resolves exactly once
    pub async fn connect(
        &self,
        peripheral: PeripheralIdentifier,
    ) -> Result<TaskCompletion<ConnectTaskSpec>, LoopError> {
        let (reply, reply_rx) = oneshot::channel();
        self.send(CentralCommand::Connect { peripheral, reply })
            .await?;
        Ok(reply_rx.await.map_err(|_| LoopError::NoReply)??)
    }

    /// Cancel an in-flight connect; its completion resolves as failed-to-connect
    pub async fn cancel(
        &self,
        peripheral: PeripheralIdentifier,
        error: Option<BleError>,
    ) -> Result<(), LoopError> {
        let (reply, reply_rx) = oneshot::channel();
        self.send(CentralCommand::Cancel {
            peripheral,
            error,
            reply,
        })
        .await?;
        Ok(reply_rx.await.map_err(|_| LoopError::NoReply)??)
    }

    pub async fn reconcile(
        &self,
        restored: Vec<PeripheralIdentifier>,
    ) -> Result<Reconciliation, LoopError> {
        let (reply, reply_rx) = oneshot::channel();
        self.send(CentralCommand::Reconcile { restored, reply })
            .await?;
        reply_rx.await.map_err(|_| LoopError::NoReply)
    }

    pub async fn in_flight(&self) -> Result<Vec<PeripheralIdentifier>, LoopError> {
        let (reply, reply_rx) = oneshot::channel();
        self.send(CentralCommand::InFlight { reply }).await?;
        reply_rx.await.map_err(|_| LoopError::NoReply)
    }

    pub async fn shutdown(&self) -> Result<(), LoopError> {
        self.send(CentralCommand::Shutdown).await
    }

    async fn send(&self, command: CentralCommand) -> Result<(), LoopError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| LoopError::NotRunning)
    }
}

/// The loop itself, before it is spawned
pub struct CentralEventLoop {
    central: Arc<dyn CentralManager>,
    registry: ConnectionRegistry,
    commands: mpsc::Receiver<CentralCommand>,
    events: mpsc::UnboundedReceiver<CentralEvent>,
    app_events: mpsc::UnboundedSender<CentralEvent>,
}

impl CentralEventLoop {
    /// Build the loop over the router's event receiver
    ///
    /// Returns the loop, its command handle and the application event stream.
    pub fn new(
        central: Arc<dyn CentralManager>,
        config: &CentralConfig,
        events: mpsc::UnboundedReceiver<CentralEvent>,
    ) -> (Self, CentralHandle, mpsc::UnboundedReceiver<CentralEvent>) {
        let (command_tx, commands) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (app_events, app_rx) = mpsc::unbounded_channel();
        let event_loop = Self {
            central,
            registry: ConnectionRegistry::new(config.connect_options, config.policy()),
            commands,
            events,
            app_events,
        };
        (event_loop, CentralHandle { command_tx }, app_rx)
    }

    /// Spawn the loop onto the current tokio runtime
    ///
    /// The join handle yields the number of tasks cancelled at shutdown.
    pub fn spawn(self) -> JoinHandle<usize> {
        tokio::spawn(self.run())
    }

    /// Run until shutdown, or until every handle and the router are gone
    pub async fn run(mut self) -> usize {
        let mut commands_open = true;
        let mut events_open = true;

        loop {
            // OS callbacks already queued are applied before the next command
            tokio::select! {
                biased;
                event = self.events.recv(), if events_open => match event {
                    Some(event) => self.handle_event(event),
                    None => events_open = false,
                },
                command = self.commands.recv(), if commands_open => match command {
                    Some(CentralCommand::Shutdown) => {
                        info!("Central event loop shutting down");
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => commands_open = false,
                },
                else => break,
            }
        }

        // No completion is left unresolved
        let cancelled = self.registry.cancel_all(self.central.as_ref(), None);
        if cancelled > 0 {
            info!(cancelled, "Cancelled in-flight connects on shutdown");
        }
        cancelled
    }

    fn handle_command(&mut self, command: CentralCommand) {
        let central = self.central.as_ref();
        match command {
            CentralCommand::Connect { peripheral, reply } => {
                let _ = reply.send(self.registry.connect(central, peripheral));
            }
            CentralCommand::Cancel {
                peripheral,
                error,
                reply,
            } => {
                let _ = reply.send(self.registry.cancel(central, &peripheral, error));
            }
            CentralCommand::Reconcile { restored, reply } => {
                let _ = reply.send(self.registry.reconcile(&restored));
            }
            CentralCommand::InFlight { reply } => {
                let _ = reply.send(self.registry.in_flight());
            }
            CentralCommand::Shutdown => {}
        }
    }

    fn handle_event(&mut self, event: CentralEvent) {
        if let CentralEvent::ConnectionChanged { peripheral, change } = &event {
            match self.registry.handle_connection_change(peripheral, change.clone()) {
                Dispatch::Delivered | Dispatch::Discarded => return,
                Dispatch::Stale => {}
            }
        }
        if self.app_events.send(event).is_err() {
            debug!("Application event receiver dropped");
        }
    }
}
