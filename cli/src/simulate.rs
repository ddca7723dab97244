// Scripted replay of a central session
//
// A script is a JSON list of steps. Each step is either an OS callback fed to
// the router or a command sent to the event loop. The simulated central
// records every request the core issues so the run can be inspected.

use anyhow::{Context, Result};
use blecentral_core::{
    BleError, CentralCallback, CentralConfig, CentralEvent, CentralEventLoop, CentralEventRouter,
    CentralRequest, ConnectTaskSpec, ConnectionChange, PeripheralIdentifier, Reconciliation,
    RestorationReport, SimulatedCentral, TaskCompletion,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    /// Deliver an OS callback to the router
    Callback { callback: CentralCallback },
    /// Start a connect task
    Connect { peripheral: PeripheralIdentifier },
    /// Cancel a connect task
    Cancel {
        peripheral: PeripheralIdentifier,
        #[serde(default)]
        error: Option<BleError>,
    },
    /// Reconcile tracked tasks against a restored peripheral set
    ///
    /// Without an explicit set, the one from the last restoration is used.
    Reconcile {
        #[serde(default)]
        restored: Option<Vec<PeripheralIdentifier>>,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Script {
    pub steps: Vec<Step>,
}

impl Script {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read script {}", path.display()))?;
        Self::from_json(&contents)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse script")
    }
}

/// Everything a replay produced
#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    /// Requests issued to the OS, in order
    pub requests: Vec<CentralRequest>,
    /// Terminal result per connect, in connect order
    pub results: Vec<(PeripheralIdentifier, Option<ConnectionChange>)>,
    /// Events forwarded to the application
    pub events: Vec<CentralEvent>,
    /// Commands the core refused
    pub rejected: Vec<String>,
    pub restorations: Vec<RestorationReport>,
    pub reconciliations: Vec<Reconciliation>,
}

impl Report {
    pub fn count_requests(&self, predicate: impl Fn(&CentralRequest) -> bool) -> usize {
        self.requests.iter().filter(|r| predicate(r)).count()
    }
}

pub async fn run(script: Script, config: &CentralConfig) -> Result<Report> {
    config.validate().context("Invalid central config")?;

    let central = Arc::new(SimulatedCentral::new());
    let (router, events) = CentralEventRouter::new(central.clone(), config);
    let (event_loop, handle, mut app_events) =
        CentralEventLoop::new(central.clone(), config, events);
    let join = event_loop.spawn();

    let mut report = Report::default();
    let mut completions: Vec<(PeripheralIdentifier, TaskCompletion<ConnectTaskSpec>)> =
        Vec::new();

    for (index, step) in script.steps.into_iter().enumerate() {
        debug!(index, "Replaying step {:?}", step);
        match step {
            Step::Callback { callback } => {
                if let Some(restoration) = router.handle(callback) {
                    report.restorations.push(restoration);
                }
            }
            Step::Connect { peripheral } => match handle.connect(peripheral).await {
                Ok(completion) => completions.push((peripheral, completion)),
                Err(e) => {
                    warn!("Connect rejected: {}", e);
                    report.rejected.push(format!("step {}: {}", index, e));
                }
            },
            Step::Cancel { peripheral, error } => {
                if let Err(e) = handle.cancel(peripheral, error).await {
                    warn!("Cancel rejected: {}", e);
                    report.rejected.push(format!("step {}: {}", index, e));
                }
            }
            Step::Reconcile { restored } => {
                let restored = match restored {
                    Some(restored) => restored,
                    None => report
                        .restorations
                        .last()
                        .map(|r| r.delegates_registered.clone())
                        .unwrap_or_default(),
                };
                report.reconciliations.push(handle.reconcile(restored).await?);
            }
        }
    }

    // Let the loop drain queued callbacks, then stop it
    handle.in_flight().await?;
    handle.shutdown().await?;
    let cancelled = join.await.context("Event loop panicked")?;
    debug!(cancelled, "Replay finished");

    for (peripheral, completion) in completions {
        report.results.push((peripheral, completion.await.ok()));
    }
    while let Ok(event) = app_events.try_recv() {
        report.events.push(event);
    }
    report.requests = central.requests();
    Ok(report)
}
