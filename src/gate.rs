use std::collections::HashMap;

/// Bucketed hysteresis on setpoints.
///
/// Both values are rounded to the nearest multiple of `step_w`; halfway cases
/// go to the even bucket.
#[derive(Debug, Clone, Copy)]
pub struct ChangeGate {
    step_w: f64,
}

impl ChangeGate {
    pub fn new(step_w: f64) -> Self {
        Self { step_w }
    }

    pub fn bucket(&self, watts: f64) -> i64 {
        (watts / self.step_w).round_ties_even() as i64
    }

    /// Whether `proposed` is far enough from `last_applied` to send.
    /// With nothing applied yet, always send.
    pub fn should_actuate(&self, proposed: f64, last_applied: Option<f64>) -> bool {
        match last_applied {
            Some(last) => self.bucket(proposed) != self.bucket(last),
            None => true,
        }
    }
}

/// Last limit successfully applied per inverter serial.
///
/// Owned by the cycle orchestrator and only written after an actuator
/// acknowledged the command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControllerState {
    last_applied: HashMap<String, f64>,
}

impl ControllerState {
    pub fn last_applied(&self, serial: &str) -> Option<f64> {
        self.last_applied.get(serial).copied()
    }

    pub fn record_applied(&mut self, serial: &str, limit_w: f64) {
        self.last_applied.insert(serial.to_string(), limit_w);
    }
}
