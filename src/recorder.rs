use std::path::Path;

use rusqlite::{Connection, params};
use tracing::{debug, info};

use crate::cycle::CycleResult;
use crate::error::ControlResult;
use crate::traits::TelemetryRecorder;

/// Stores one `cycles` row per cycle and one `inverter_samples` row per
/// inverter and cycle. NULL marks values that were unavailable.
pub struct SqliteRecorder {
    conn: Connection,
}

impl SqliteRecorder {
    pub fn open(path: impl AsRef<Path>) -> ControlResult<Self> {
        let recorder = Self::with_connection(Connection::open(path.as_ref())?)?;
        info!("SQLite database initialized at {}", path.as_ref().display());
        Ok(recorder)
    }

    pub fn open_in_memory() -> ControlResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> ControlResult<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS cycles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp DATETIME DEFAULT CURRENT_TIMESTAMP,
                grid_power REAL,
                total_production REAL,
                meter_error INTEGER NOT NULL,
                telemetry_error INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS inverter_samples (
                cycle_id INTEGER NOT NULL REFERENCES cycles(id),
                serial TEXT NOT NULL,
                name TEXT NOT NULL,
                role TEXT NOT NULL,
                reachable INTEGER NOT NULL,
                power REAL,
                current_limit REAL,
                setpoint REAL,
                clamped TEXT,
                shortfall REAL NOT NULL,
                sent INTEGER NOT NULL,
                send_ok INTEGER
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_inverter_samples_cycle ON inverter_samples(cycle_id)",
            [],
        )?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl TelemetryRecorder for SqliteRecorder {
    fn append(&mut self, result: &CycleResult) -> ControlResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO cycles (grid_power, total_production, meter_error, telemetry_error)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                result.reading.grid.watts(),
                result.reading.total_power_w,
                result.reading.meter_error,
                result.reading.telemetry_error,
            ],
        )?;
        let cycle_id = tx.last_insert_rowid();

        for (snap, decision) in result.reading.inverters.iter().zip(result.decisions.iter()) {
            let proposal = &decision.proposal;
            tx.execute(
                "INSERT INTO inverter_samples (
                    cycle_id, serial, name, role, reachable, power, current_limit,
                    setpoint, clamped, shortfall, sent, send_ok
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    cycle_id,
                    proposal.serial,
                    proposal.name,
                    proposal.role.as_str(),
                    snap.reachable,
                    snap.output_power_w,
                    snap.current_limit_w,
                    proposal.limit_w,
                    proposal.clamped.map(|b| b.as_str()),
                    proposal.shortfall_w,
                    decision.sent(),
                    decision.outcome.succeeded(),
                ],
            )?;
        }
        tx.commit()?;
        debug!("Cycle {} stored", cycle_id);
        Ok(())
    }
}
