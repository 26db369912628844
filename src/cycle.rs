use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::aggregator::{Reading, aggregate};
use crate::config::{Bound, Config, Role};
use crate::controller::{Proposal, compute};
use crate::error::{ControlError, ControlResult};
use crate::gate::{ChangeGate, ControllerState};
use crate::traits::{ActuatorSink, TelemetryRecorder, TelemetrySource};

/// What happened to one proposal this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// Nothing to send: inputs were missing
    Held,
    /// The change gate saw no significant difference
    Suppressed,
    /// Sent and acknowledged
    Applied,
    /// Sent and refused or timed out
    Rejected,
}

impl Outcome {
    pub fn sent(&self) -> bool {
        matches!(self, Outcome::Applied | Outcome::Rejected)
    }

    /// `None` when nothing was sent.
    pub fn succeeded(&self) -> Option<bool> {
        match self {
            Outcome::Applied => Some(true),
            Outcome::Rejected => Some(false),
            Outcome::Held | Outcome::Suppressed => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub proposal: Proposal,
    pub outcome: Outcome,
}

impl Decision {
    pub fn sent(&self) -> bool {
        self.outcome.sent()
    }
}

/// Everything one cycle observed and decided; the unit handed to the recorder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleResult {
    pub reading: Reading,
    pub decisions: Vec<Decision>,
}

impl CycleResult {
    pub fn meter_error(&self) -> bool {
        self.reading.meter_error
    }

    pub fn telemetry_error(&self) -> bool {
        self.reading.telemetry_error
    }

    pub fn decision(&self, serial: &str) -> Option<&Decision> {
        self.decisions.iter().find(|d| d.proposal.serial == serial)
    }
}

async fn bounded<T>(
    limit: Duration,
    fut: impl Future<Output = anyhow::Result<T>>,
) -> anyhow::Result<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!("timed out after {:?}", limit)),
    }
}

/// Drives the control loop. Sole owner and writer of [`ControllerState`].
pub struct Orchestrator<S, A, R> {
    config: Config,
    source: S,
    sink: A,
    recorder: R,
    gate: ChangeGate,
    state: ControllerState,
}

impl<S, A, R> Orchestrator<S, A, R>
where
    S: TelemetrySource,
    A: ActuatorSink,
    R: TelemetryRecorder,
{
    pub fn new(config: Config, source: S, sink: A, recorder: R) -> Self {
        let gate = ChangeGate::new(config.control.step_w);
        Self {
            config,
            source,
            sink,
            recorder,
            gate,
            state: ControllerState::default(),
        }
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn recorder(&self) -> &R {
        &self.recorder
    }

    /// One-time startup check. Every endpoint must answer and every inverter
    /// must accept its minimum limit; successful commands seed the state.
    pub async fn preflight(&mut self) -> ControlResult<()> {
        let timeout = self.config.control.timeout();
        let mut failures = Vec::new();

        match bounded(timeout, self.source.fetch_meter()).await {
            Ok(w) => info!("Meter reachable, grid power {:.1} W", w),
            Err(e) => {
                error!("Meter check failed: {:#}", e);
                failures.push(format!("meter: {:#}", e));
            }
        }

        match bounded(timeout, self.source.fetch_inverters()).await {
            Ok(status) => info!(
                "Inverter telemetry reachable, {} inverters reported",
                status.inverters.len()
            ),
            Err(e) => {
                error!("Inverter telemetry check failed: {:#}", e);
                failures.push(format!("inverter telemetry: {:#}", e));
            }
        }

        for inv in &self.config.inverters {
            match bounded(timeout, self.sink.set_limit(&inv.serial, inv.min_limit_w)).await {
                Ok(()) => {
                    info!("Limit endpoint accepted {} W for {}", inv.min_limit_w, inv.serial);
                    self.state.record_applied(&inv.serial, inv.min_limit_w);
                }
                Err(e) => {
                    error!("Limit endpoint check failed for {}: {:#}", inv.serial, e);
                    failures.push(format!("limit endpoint for {}: {:#}", inv.serial, e));
                }
            }
        }

        if failures.is_empty() {
            info!("All endpoints reachable");
            Ok(())
        } else {
            Err(ControlError::Preflight(failures.join("; ")))
        }
    }

    /// Runs one fetch, aggregate, compute, gate, actuate, record pass.
    /// Never fails: every collaborator error is classified and logged here.
    pub async fn run_cycle(&mut self) -> CycleResult {
        let timeout = self.config.control.timeout();

        let meter = bounded(timeout, self.source.fetch_meter())
            .await
            .map_err(|e| ControlError::SensorUnavailable {
                source_name: "meter",
                message: format!("{:#}", e),
            });
        let status = bounded(timeout, self.source.fetch_inverters())
            .await
            .map_err(|e| ControlError::SensorUnavailable {
                source_name: "inverters",
                message: format!("{:#}", e),
            });

        let reading = aggregate(meter, status, &self.config.inverters);
        let proposals = compute(
            &reading,
            &self.config.inverters,
            &self.state,
            &self.config.control,
        );

        let mut decisions = Vec::with_capacity(proposals.len());
        for proposal in proposals {
            let outcome = self.actuate(&proposal, timeout).await;
            decisions.push(Decision { proposal, outcome });
        }

        let result = CycleResult { reading, decisions };
        log_summary(&result);

        if let Err(e) = self.recorder.append(&result) {
            error!("Error storing cycle: {}", e);
        }
        result
    }

    async fn actuate(&mut self, proposal: &Proposal, timeout: Duration) -> Outcome {
        let name = &proposal.name;
        let limit = match proposal.limit_w {
            Some(limit) if !proposal.skipped => limit,
            _ => {
                warn!("{} not reachable or grid unknown; skipping update", name);
                return Outcome::Held;
            }
        };

        match proposal.clamped {
            Some(Bound::Max) => info!("{} setpoint capped at maximum: {} W", name, limit),
            Some(Bound::Min) => info!("{} setpoint raised to minimum: {} W", name, limit),
            None => info!("{} setpoint calculated: {:.1} W", name, limit),
        }
        if proposal.shortfall_w > 0.0 {
            info!("{} takes shortfall of {:.1} W", name, proposal.shortfall_w);
        }

        let last = self.state.last_applied(&proposal.serial);
        if proposal.gated && !self.gate.should_actuate(limit, last) {
            info!("No significant change for {}; no update necessary", name);
            return Outcome::Suppressed;
        }

        info!(
            "Updating {} limit from {} W to {:.1} W",
            name,
            watts_or(last, "unknown"),
            limit
        );
        match bounded(timeout, self.sink.set_limit(&proposal.serial, limit)).await {
            Ok(()) => {
                self.state.record_applied(&proposal.serial, limit);
                Outcome::Applied
            }
            Err(e) => {
                let e = ControlError::ActuatorRejected {
                    identity: proposal.serial.clone(),
                    limit_w: limit,
                    message: format!("{:#}", e),
                };
                error!("{}", e);
                Outcome::Rejected
            }
        }
    }

    /// Cycles every period until `shutdown` resolves. Shutdown is only
    /// observed between cycles.
    pub async fn run_until<F: Future<Output = ()>>(&mut self, shutdown: F) {
        tokio::pin!(shutdown);
        let period = self.config.control.period();
        loop {
            self.run_cycle().await;
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Stop requested, leaving control loop");
                    break;
                }
                _ = tokio::time::sleep(period) => {}
            }
        }
    }
}

/// One decimal for a known value, `missing` otherwise.
fn watts_or(value: Option<f64>, missing: &str) -> String {
    value.map_or_else(|| missing.to_string(), |w| format!("{:.1}", w))
}

fn log_summary(result: &CycleResult) {
    let fmt = |v: Option<f64>| watts_or(v, "NULL");
    let reading = &result.reading;
    let primary_power = result
        .decisions
        .iter()
        .position(|d| d.proposal.role == Role::Primary)
        .and_then(|i| reading.inverters.get(i))
        .and_then(|s| s.output_power_w);
    info!(
        "Grid Power: {} W | Primary Power: {} W | Total Production: {} W",
        fmt(reading.grid.watts()),
        fmt(primary_power),
        fmt(reading.total_power_w)
    );
    debug!(
        "Cycle decisions: {:?}",
        result
            .decisions
            .iter()
            .map(|d| (&d.proposal.serial, d.proposal.limit_w, d.outcome))
            .collect::<Vec<_>>()
    );
}
