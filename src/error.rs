use thiserror::Error;

/// Failure classes of the control loop.
///
/// Only `Preflight` and `Config` are fatal; everything else is logged and the
/// loop carries on with the next cycle.
#[derive(Error, Debug)]
pub enum ControlError {
    /// Meter or inverter telemetry could not be read (includes timeouts).
    #[error("sensor unavailable ({source_name}): {message}")]
    SensorUnavailable {
        source_name: &'static str,
        message: String,
    },

    /// The actuator refused or timed out on a limit command.
    #[error("actuator rejected limit {limit_w} W for {identity}: {message}")]
    ActuatorRejected {
        identity: String,
        limit_w: f64,
        message: String,
    },

    /// The telemetry recorder could not persist a cycle.
    #[error("persistence failure: {0}")]
    Persistence(String),

    /// A startup check failed; the loop must not start.
    #[error("preflight failed: {0}")]
    Preflight(String),

    /// The configuration is unusable.
    #[error("config error: {0}")]
    Config(String),
}

impl From<rusqlite::Error> for ControlError {
    fn from(e: rusqlite::Error) -> Self {
        ControlError::Persistence(e.to_string())
    }
}

pub type ControlResult<T> = Result<T, ControlError>;
