//! Per-cycle setpoint computation.
//!
//! Everything in here is a pure function of the cycle's reading, the static
//! inverter configuration and the last applied limits.

use serde::{Deserialize, Serialize};

use crate::aggregator::Reading;
use crate::config::{AllocationPolicy, Bound, ControlConfig, InverterConfig, Role};
use crate::gate::ControllerState;
use crate::inverter::InverterSnapshot;

/// Computed setpoint for one inverter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub serial: String,
    pub name: String,
    pub role: Role,
    /// Setpoint for this cycle; `None` only when a skipped inverter has never
    /// been commanded.
    pub limit_w: Option<f64>,
    /// Bound hit while clamping, if any
    pub clamped: Option<Bound>,
    /// No fresh setpoint could be computed; `limit_w` is the last applied one
    pub skipped: bool,
    /// Shortfall share handed to a secondary; always 0 for the primary
    pub shortfall_w: f64,
    /// Subject to the change gate
    pub gated: bool,
}

/// Computes one proposal per configured inverter, in configuration order.
///
/// `reading.inverters` must be index-aligned with `configs`, which is what
/// [`crate::aggregator::aggregate`] produces.
pub fn compute(
    reading: &Reading,
    configs: &[InverterConfig],
    state: &ControllerState,
    control: &ControlConfig,
) -> Vec<Proposal> {
    let pairs = || configs.iter().zip(reading.inverters.iter());

    let primary = pairs()
        .find(|(c, _)| c.role == Role::Primary)
        .map(|(config, snap)| primary_proposal(reading, config, snap, state, control));

    let uncovered = primary
        .as_ref()
        .zip(configs.iter().find(|c| c.role == Role::Primary))
        .map_or(0.0, |(p, config)| shortfall(reading, p, config));

    let secondaries: Vec<(&InverterConfig, &InverterSnapshot)> =
        pairs().filter(|(c, _)| c.role == Role::Secondary).collect();
    let mut shares = allocate(uncovered, &secondaries, control).into_iter();

    let mut primary = primary;
    pairs()
        .filter_map(|(config, snap)| match config.role {
            Role::Primary => primary.take(),
            Role::Secondary => {
                let share = shares.next().unwrap_or(0.0);
                Some(secondary_proposal(config, snap, share, control))
            }
        })
        .collect()
}

fn primary_proposal(
    reading: &Reading,
    config: &InverterConfig,
    snap: &InverterSnapshot,
    state: &ControllerState,
    control: &ControlConfig,
) -> Proposal {
    let inputs = match (snap.reachable, reading.grid.watts(), snap.current_limit_w) {
        (true, Some(grid), Some(current)) => Some((grid, current)),
        _ => None,
    };

    let (limit_w, clamped, skipped) = match inputs {
        Some((grid, current)) => {
            let (limit, bound) = config.clamp(grid + current - control.margin_w);
            (Some(limit), bound, false)
        }
        None => (state.last_applied(&config.serial), None, true),
    };

    Proposal {
        serial: config.serial.clone(),
        name: snap.name.clone(),
        role: Role::Primary,
        limit_w,
        clamped,
        skipped,
        shortfall_w: 0.0,
        gated: true,
    }
}

/// Import the primary could not cover. Zero unless the primary was freshly
/// computed and ended up at its maximum.
pub fn shortfall(reading: &Reading, primary: &Proposal, config: &InverterConfig) -> f64 {
    if primary.skipped {
        return 0.0;
    }
    match (primary.limit_w, reading.grid.watts()) {
        (Some(limit), Some(grid)) if limit >= config.max_limit_w => {
            (grid - config.max_limit_w).max(0.0)
        }
        _ => 0.0,
    }
}

/// Limit a secondary starts from: its reported limit when reachable,
/// otherwise the configured fallback.
fn secondary_base(config: &InverterConfig, snap: &InverterSnapshot) -> f64 {
    if snap.reachable {
        snap.current_limit_w.unwrap_or(config.fallback_limit_w)
    } else {
        config.fallback_limit_w
    }
}

/// Splits `shortfall` across secondaries according to the configured policy.
/// Every share is >= 0.
fn allocate(
    shortfall: f64,
    secondaries: &[(&InverterConfig, &InverterSnapshot)],
    control: &ControlConfig,
) -> Vec<f64> {
    let shortfall = shortfall.max(0.0);
    match control.allocation {
        AllocationPolicy::Shared => vec![shortfall; secondaries.len()],
        AllocationPolicy::Priority => {
            let mut remaining = shortfall;
            secondaries
                .iter()
                .map(|(config, snap)| {
                    let start = secondary_base(config, snap) - control.margin_w;
                    let headroom = (config.max_limit_w - start).max(0.0);
                    let share = remaining.min(headroom);
                    remaining -= share;
                    share
                })
                .collect()
        }
        AllocationPolicy::Proportional => {
            let capacity: f64 = secondaries.iter().map(|(c, _)| c.max_limit_w).sum();
            secondaries
                .iter()
                .map(|(config, _)| {
                    if capacity > 0.0 {
                        shortfall * config.max_limit_w / capacity
                    } else {
                        0.0
                    }
                })
                .collect()
        }
    }
}

fn secondary_proposal(
    config: &InverterConfig,
    snap: &InverterSnapshot,
    share: f64,
    control: &ControlConfig,
) -> Proposal {
    let raw = secondary_base(config, snap) + share - control.margin_w;
    let (limit, clamped) = config.clamp(raw);
    Proposal {
        serial: config.serial.clone(),
        name: snap.name.clone(),
        role: Role::Secondary,
        limit_w: Some(limit),
        clamped,
        skipped: false,
        shortfall_w: share,
        gated: control.gate_secondaries,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meter::GridReading;

    fn inverter(serial: &str, role: Role, min: f64, max: f64) -> InverterConfig {
        InverterConfig {
            serial: serial.into(),
            name: None,
            role,
            min_limit_w: min,
            max_limit_w: max,
            fallback_limit_w: min,
        }
    }

    fn snap(serial: &str, reachable: bool, limit: f64) -> InverterSnapshot {
        InverterSnapshot {
            serial: serial.into(),
            name: serial.into(),
            reachable,
            producing: reachable,
            output_power_w: Some(0.0),
            current_limit_w: Some(limit),
        }
    }

    fn reading(grid: GridReading, inverters: Vec<InverterSnapshot>) -> Reading {
        Reading {
            grid,
            inverters,
            total_power_w: None,
            meter_error: !grid.is_known(),
            telemetry_error: false,
        }
    }

    fn two() -> Vec<InverterConfig> {
        vec![
            inverter("P", Role::Primary, 200.0, 2000.0),
            inverter("S", Role::Secondary, 200.0, 1700.0),
        ]
    }

    #[test]
    fn primary_follows_grid() {
        let r = reading(
            GridReading::Known(150.0),
            vec![snap("P", true, 800.0), snap("S", true, 300.0)],
        );
        let out = compute(&r, &two(), &ControllerState::default(), &ControlConfig::default());
        assert_eq!(out[0].limit_w, Some(945.0));
        assert_eq!(out[0].clamped, None);
        assert!(!out[0].skipped);
        // not saturated: secondary only loses the margin
        assert_eq!(out[1].shortfall_w, 0.0);
        assert_eq!(out[1].limit_w, Some(295.0));
    }

    #[test]
    fn export_clamps_to_min() {
        let r = reading(
            GridReading::Known(-500.0),
            vec![snap("P", true, 300.0), snap("S", true, 300.0)],
        );
        let out = compute(&r, &two(), &ControllerState::default(), &ControlConfig::default());
        assert_eq!(out[0].limit_w, Some(200.0));
        assert_eq!(out[0].clamped, Some(Bound::Min));
    }

    #[test]
    fn saturated_primary_hands_shortfall_to_secondary() {
        let r = reading(
            GridReading::Known(2600.0),
            vec![snap("P", true, 2000.0), snap("S", true, 300.0)],
        );
        let out = compute(&r, &two(), &ControllerState::default(), &ControlConfig::default());
        assert_eq!(out[0].limit_w, Some(2000.0));
        assert_eq!(out[0].clamped, Some(Bound::Max));
        assert_eq!(out[1].shortfall_w, 600.0);
        assert_eq!(out[1].limit_w, Some(895.0));
        assert!(!out[1].gated);
    }

    #[test]
    fn unknown_grid_keeps_last_applied() {
        let mut state = ControllerState::default();
        state.record_applied("P", 733.0);
        let r = reading(
            GridReading::Unknown,
            vec![snap("P", true, 800.0), snap("S", true, 300.0)],
        );
        let out = compute(&r, &two(), &state, &ControlConfig::default());
        assert!(out[0].skipped);
        assert_eq!(out[0].limit_w, Some(733.0));
        assert_eq!(out[1].shortfall_w, 0.0);
        assert_eq!(out[1].limit_w, Some(295.0));
    }

    #[test]
    fn unreachable_primary_keeps_last_applied() {
        let mut state = ControllerState::default();
        state.record_applied("P", 2000.0);
        let r = reading(
            GridReading::Known(5000.0),
            vec![snap("P", false, 2000.0), snap("S", true, 300.0)],
        );
        let out = compute(&r, &two(), &state, &ControlConfig::default());
        assert!(out[0].skipped);
        assert_eq!(out[0].limit_w, Some(2000.0));
        // last applied sits at max, but a skipped primary never creates shortfall
        assert_eq!(out[1].shortfall_w, 0.0);
    }

    #[test]
    fn unreachable_secondary_uses_fallback() {
        let mut configs = two();
        configs[1].fallback_limit_w = 400.0;
        let r = reading(
            GridReading::Known(0.0),
            vec![snap("P", true, 800.0), snap("S", false, 1234.0)],
        );
        let out = compute(&r, &configs, &ControllerState::default(), &ControlConfig::default());
        assert_eq!(out[1].limit_w, Some(395.0));
    }

    #[test]
    fn primary_always_within_bounds() {
        let configs = two();
        let state = ControllerState::default();
        let control = ControlConfig::default();
        for grid in (-5000..=5000).step_by(250) {
            for current in (0..=2500).step_by(125) {
                let r = reading(
                    GridReading::Known(grid as f64),
                    vec![snap("P", true, current as f64), snap("S", true, current as f64)],
                );
                let out = compute(&r, &configs, &state, &control);
                for (p, c) in out.iter().zip(configs.iter()) {
                    let limit = p.limit_w.unwrap();
                    assert!(limit >= c.min_limit_w && limit <= c.max_limit_w);
                    assert!(p.shortfall_w >= 0.0);
                }
                if out[0].limit_w.unwrap() < 2000.0 {
                    assert_eq!(out[1].shortfall_w, 0.0);
                } else {
                    assert_eq!(out[1].shortfall_w, (grid as f64 - 2000.0).max(0.0));
                }
            }
        }
    }

    #[test]
    fn identical_inputs_give_identical_proposals() {
        let r = reading(
            GridReading::Known(321.0),
            vec![snap("P", true, 900.0), snap("S", true, 300.0)],
        );
        let state = ControllerState::default();
        let control = ControlConfig::default();
        assert_eq!(
            compute(&r, &two(), &state, &control),
            compute(&r, &two(), &state, &control)
        );
    }

    fn three() -> Vec<InverterConfig> {
        vec![
            inverter("P", Role::Primary, 200.0, 2000.0),
            inverter("S1", Role::Secondary, 200.0, 500.0),
            inverter("S2", Role::Secondary, 200.0, 1500.0),
        ]
    }

    fn saturated_three() -> Reading {
        reading(
            GridReading::Known(3000.0),
            vec![
                snap("P", true, 2000.0),
                snap("S1", true, 300.0),
                snap("S2", true, 300.0),
            ],
        )
    }

    #[test]
    fn shared_policy_gives_everyone_the_full_shortfall() {
        let out = compute(
            &saturated_three(),
            &three(),
            &ControllerState::default(),
            &ControlConfig::default(),
        );
        assert_eq!(out[1].shortfall_w, 1000.0);
        assert_eq!(out[2].shortfall_w, 1000.0);
        assert_eq!(out[1].limit_w, Some(500.0));
        assert_eq!(out[2].limit_w, Some(1295.0));
    }

    #[test]
    fn priority_policy_fills_in_order() {
        let control = ControlConfig {
            allocation: AllocationPolicy::Priority,
            ..ControlConfig::default()
        };
        let out = compute(&saturated_three(), &three(), &ControllerState::default(), &control);
        // S1 starts at 295 and can take 205 more
        assert_eq!(out[1].shortfall_w, 205.0);
        assert_eq!(out[1].limit_w, Some(500.0));
        assert_eq!(out[2].shortfall_w, 795.0);
        assert_eq!(out[2].limit_w, Some(1090.0));
    }

    #[test]
    fn proportional_policy_splits_by_capacity() {
        let control = ControlConfig {
            allocation: AllocationPolicy::Proportional,
            ..ControlConfig::default()
        };
        let out = compute(&saturated_three(), &three(), &ControllerState::default(), &control);
        assert_eq!(out[1].shortfall_w, 250.0);
        assert_eq!(out[2].shortfall_w, 750.0);
    }

    #[test]
    fn gate_secondaries_flag_marks_secondaries_gated() {
        let control = ControlConfig {
            gate_secondaries: true,
            ..ControlConfig::default()
        };
        let r = reading(
            GridReading::Known(0.0),
            vec![snap("P", true, 800.0), snap("S", true, 300.0)],
        );
        let out = compute(&r, &two(), &ControllerState::default(), &control);
        assert!(out.iter().all(|p| p.gated));
    }
}
