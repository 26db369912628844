use std::fmt::Display;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::InverterConfig;
use crate::inverter::{InverterReport, InverterSnapshot, InverterStatus, InverterSummary};
use crate::meter::GridReading;

/// Canonical reading of one cycle, one snapshot per configured inverter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub grid: GridReading,
    pub inverters: Vec<InverterSnapshot>,
    pub total_power_w: Option<f64>,
    pub meter_error: bool,
    pub telemetry_error: bool,
}

/// Normalizes raw fetch results. Never fails: missing data becomes
/// `GridReading::Unknown` or an unreachable snapshot carrying the
/// configured fallback limit.
pub fn aggregate<E: Display>(
    meter: Result<f64, E>,
    status: Result<InverterStatus, E>,
    configs: &[InverterConfig],
) -> Reading {
    let (grid, meter_error) = match meter {
        Ok(w) => (GridReading::Known(w), false),
        Err(e) => {
            warn!("Meter unavailable, grid power unknown this cycle: {}", e);
            (GridReading::Unknown, true)
        }
    };

    let (status, telemetry_error) = match status {
        Ok(s) => (Some(s), false),
        Err(e) => {
            warn!("Inverter telemetry unavailable, using fallback limits: {}", e);
            (None, true)
        }
    };

    let reports: &[InverterReport] = status
        .as_ref()
        .map(|s| s.inverters.as_slice())
        .unwrap_or(&[]);
    if status.is_some() && reports.len() < configs.len() {
        warn!(
            "Telemetry reports {} inverters, {} configured",
            reports.len(),
            configs.len()
        );
    }

    let inverters: Vec<InverterSnapshot> = configs
        .iter()
        .enumerate()
        .map(|(index, config)| match match_report(reports, index, config) {
            Some(report) => InverterSnapshot {
                serial: config.serial.clone(),
                name: report.name.clone().unwrap_or_else(|| config.display_name()),
                reachable: report.reachable,
                producing: report.producing,
                output_power_w: report.output_power_w,
                current_limit_w: report.current_limit_w,
            },
            None => {
                debug!("No telemetry for {}, synthesizing", config.serial);
                synthesize(config)
            }
        })
        .collect();

    let total_power_w = status.as_ref().and_then(|s| {
        s.total_power_w
            .or_else(|| InverterSummary::from_snapshots(inverters.iter()).total_power)
    });

    Reading {
        grid,
        inverters,
        total_power_w,
        meter_error,
        telemetry_error,
    }
}

/// Serial match first; an entry without a serial is taken by position.
fn match_report<'a>(
    reports: &'a [InverterReport],
    index: usize,
    config: &InverterConfig,
) -> Option<&'a InverterReport> {
    reports
        .iter()
        .find(|r| r.serial.as_deref() == Some(config.serial.as_str()))
        .or_else(|| reports.get(index).filter(|r| r.serial.is_none()))
}

fn synthesize(config: &InverterConfig) -> InverterSnapshot {
    InverterSnapshot {
        serial: config.serial.clone(),
        name: config.display_name(),
        reachable: false,
        producing: false,
        output_power_w: Some(0.0),
        current_limit_w: Some(config.fallback_limit_w),
    }
}
