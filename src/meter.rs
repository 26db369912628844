use serde::{Deserialize, Serialize};
use tracing::debug;

/// Grid exchange at the point of common coupling.
/// Positive imports, negative exports. `Unknown` when the meter could not
/// be read this cycle; this is not the same as a reading of zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum GridReading {
    Known(f64),
    Unknown,
}

impl GridReading {
    pub fn watts(&self) -> Option<f64> {
        match self {
            GridReading::Known(w) => Some(*w),
            GridReading::Unknown => None,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, GridReading::Known(_))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
/// Subset of the Shelly Pro 3EM `EM.GetStatus` response.
/// Power in W, three phases a/b/c.
pub struct EmStatus {
    pub a_act_power: Option<f64>,
    pub b_act_power: Option<f64>,
    pub c_act_power: Option<f64>,
    pub total_act_power: Option<f64>,
}

impl EmStatus {
    /// Net grid power over all phases.
    pub fn grid_power(&self) -> anyhow::Result<f64> {
        debug!(
            "Phase power a: {:?}, b: {:?}, c: {:?}",
            self.a_act_power, self.b_act_power, self.c_act_power
        );
        self.total_act_power
            .ok_or_else(|| anyhow::Error::msg("total_act_power not found in meter response"))
    }
}
