use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ControlError, ControlResult};

/// Complete runtime configuration, loaded once at startup and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub meter: MeterConfig,
    pub dtu: DtuConfig,

    #[serde(default)]
    pub control: ControlConfig,

    #[serde(default)]
    pub recorder: RecorderConfig,

    /// Inverters in the order they are reported by the DTU.
    pub inverters: Vec<InverterConfig>,
}

/// Shelly grid meter endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeterConfig {
    /// Base URL, e.g. `http://192.168.179.112`
    pub url: String,
}

/// OpenDTU endpoint and the credentials for its limit API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DtuConfig {
    pub url: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Time slept between two cycles.
    pub period_secs: u64,

    /// Per-call timeout for every collaborator request.
    pub timeout_secs: u64,

    /// Change gate bucket width in W.
    pub step_w: f64,

    /// Subtracted from every raw setpoint so the loop settles on slight import.
    pub margin_w: f64,

    /// Apply the change gate to secondaries too. Off by default: secondaries
    /// are commanded every cycle.
    pub gate_secondaries: bool,

    /// How a saturated primary's shortfall is split across secondaries.
    pub allocation: AllocationPolicy,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            period_secs: 10,
            timeout_secs: 5,
            step_w: 50.0,
            margin_w: 5.0,
            gate_secondaries: false,
            allocation: AllocationPolicy::Shared,
        }
    }
}

impl ControlConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocationPolicy {
    /// Every secondary gets the full shortfall.
    #[default]
    Shared,
    /// Secondaries are filled in configuration order.
    Priority,
    /// Shortfall is split by each secondary's maximum limit.
    Proportional,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// SQLite database file.
    pub path: String,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            path: "power_data.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Primary,
    Secondary,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Primary => "primary",
            Role::Secondary => "secondary",
        }
    }
}

/// Static description of one inverter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InverterConfig {
    /// Inverter serial as known to the DTU
    pub serial: String,

    /// Display name used in logs when the DTU does not report one
    #[serde(default)]
    pub name: Option<String>,

    pub role: Role,

    pub min_limit_w: f64,
    pub max_limit_w: f64,

    /// Assumed current limit while the inverter's own telemetry is missing
    pub fallback_limit_w: f64,
}

impl InverterConfig {
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("Inverter {}", self.serial))
    }

    /// Clamps `watts` into this inverter's bounds, returning which bound hit.
    pub fn clamp(&self, watts: f64) -> (f64, Option<Bound>) {
        if watts > self.max_limit_w {
            (self.max_limit_w, Some(Bound::Max))
        } else if watts < self.min_limit_w {
            (self.min_limit_w, Some(Bound::Min))
        } else {
            (watts, None)
        }
    }
}

/// Which end of an inverter's range a setpoint was clamped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bound {
    Min,
    Max,
}

impl Bound {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bound::Min => "min",
            Bound::Max => "max",
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> ControlResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ControlError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        debug!("Loaded config from {}", path.display());
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> ControlResult<Self> {
        let config: Config =
            toml::from_str(text).map_err(|e| ControlError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ControlResult<()> {
        let primaries = self
            .inverters
            .iter()
            .filter(|i| i.role == Role::Primary)
            .count();
        if primaries != 1 {
            return Err(ControlError::Config(format!(
                "exactly one primary inverter required, found {}",
                primaries
            )));
        }

        let mut seen = HashSet::new();
        for inv in &self.inverters {
            if !seen.insert(inv.serial.as_str()) {
                return Err(ControlError::Config(format!(
                    "duplicate inverter serial {}",
                    inv.serial
                )));
            }
            if !inv.min_limit_w.is_finite()
                || !inv.max_limit_w.is_finite()
                || !inv.fallback_limit_w.is_finite()
            {
                return Err(ControlError::Config(format!(
                    "{}: limits must be finite numbers",
                    inv.serial
                )));
            }
            if inv.min_limit_w < 0.0 || inv.min_limit_w > inv.max_limit_w {
                return Err(ControlError::Config(format!(
                    "{}: invalid bounds [{}, {}]",
                    inv.serial, inv.min_limit_w, inv.max_limit_w
                )));
            }
            if inv.fallback_limit_w < inv.min_limit_w || inv.fallback_limit_w > inv.max_limit_w {
                return Err(ControlError::Config(format!(
                    "{}: fallback limit {} outside [{}, {}]",
                    inv.serial, inv.fallback_limit_w, inv.min_limit_w, inv.max_limit_w
                )));
            }
        }

        let c = &self.control;
        if !c.step_w.is_finite() || !c.margin_w.is_finite() {
            return Err(ControlError::Config(
                "step_w and margin_w must be finite numbers".into(),
            ));
        }
        if c.step_w <= 0.0 {
            return Err(ControlError::Config("step_w must be positive".into()));
        }
        if c.margin_w < 0.0 {
            return Err(ControlError::Config("margin_w must not be negative".into()));
        }
        if c.period_secs == 0 || c.timeout_secs == 0 {
            return Err(ControlError::Config(
                "period_secs and timeout_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    /// The single primary inverter. Valid after `validate`.
    pub fn primary(&self) -> Option<&InverterConfig> {
        self.inverters.iter().find(|i| i.role == Role::Primary)
    }
}
