//! Zero-export control loop for grid-tied inverters.
//!
//! Every cycle the grid meter and the inverter telemetry are read, a new power
//! limit is computed for each inverter and sent when it changed enough.

pub mod aggregator;
pub mod config;
pub mod controller;
pub mod cycle;
pub mod device;
pub mod error;
pub mod gate;
pub mod inverter;
pub mod meter;
pub mod recorder;
pub mod traits;

pub use config::{Config, InverterConfig, Role};
pub use cycle::{CycleResult, Decision, Orchestrator, Outcome};
pub use device::{Devices, OpenDtu, ShellyMeter};
pub use error::{ControlError, ControlResult};
pub use recorder::SqliteRecorder;
