#![allow(async_fn_in_trait)]

use crate::cycle::CycleResult;
use crate::error::ControlResult;
use crate::inverter::InverterStatus;

/// Where grid and inverter readings come from.
pub trait TelemetrySource {
    /// Net grid power in W, positive on import.
    async fn fetch_meter(&self) -> anyhow::Result<f64>;

    async fn fetch_inverters(&self) -> anyhow::Result<InverterStatus>;
}

/// Accepts power limit commands. Resending the same limit must be harmless.
pub trait ActuatorSink {
    async fn set_limit(&self, serial: &str, limit_w: f64) -> anyhow::Result<()>;
}

/// Best-effort persistence of finished cycles.
pub trait TelemetryRecorder {
    fn append(&mut self, result: &CycleResult) -> ControlResult<()>;
}
