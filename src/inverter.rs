use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One inverter as reported by the telemetry source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InverterReport {
    pub serial: Option<String>,
    pub name: Option<String>,
    pub reachable: bool,
    pub producing: bool,
    pub output_power_w: Option<f64>,
    pub current_limit_w: Option<f64>,
}

/// Result of one inverter telemetry fetch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InverterStatus {
    pub inverters: Vec<InverterReport>,
    /// Total AC production over all inverters, when the source reports it
    pub total_power_w: Option<f64>,
}

/// Normalized per-cycle view of one configured inverter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InverterSnapshot {
    pub serial: String,
    pub name: String,
    pub reachable: bool,
    pub producing: bool,
    pub output_power_w: Option<f64>,
    pub current_limit_w: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct InverterSummary {
    pub total_power: Option<f64>,
}

impl InverterSummary {
    pub fn from_snapshots<'a, I>(inverters: I) -> Self
    where
        I: Iterator<Item = &'a InverterSnapshot> + Clone,
    {
        Self {
            total_power: {
                let values: Vec<f64> = inverters
                    .clone()
                    .filter(|i| i.reachable)
                    .filter_map(|i| i.output_power_w)
                    .collect();
                if values.is_empty() {
                    None
                } else {
                    Some(values.into_iter().sum())
                }
            },
        }
    }
}

// OpenDTU `/api/livedata/status/inverters` wire format.

#[derive(Debug, Deserialize)]
struct DtuLiveData {
    #[serde(default)]
    inverters: Vec<DtuInverter>,
    total: Option<DtuTotal>,
}

#[derive(Debug, Deserialize)]
struct DtuInverter {
    serial: Option<String>,
    name: Option<String>,
    #[serde(default)]
    reachable: bool,
    #[serde(default)]
    producing: bool,
    limit_absolute: Option<f64>,
    #[serde(rename = "AC")]
    ac: Option<HashMap<String, DtuChannel>>,
}

#[derive(Debug, Deserialize)]
struct DtuTotal {
    #[serde(rename = "Power")]
    power: Option<DtuValue>,
}

#[derive(Debug, Deserialize)]
struct DtuChannel {
    #[serde(rename = "Power")]
    power: Option<DtuValue>,
}

#[derive(Debug, Deserialize)]
struct DtuValue {
    v: Option<f64>,
}

impl InverterStatus {
    /// Parses an OpenDTU live data document.
    pub fn from_dtu_json(value: serde_json::Value) -> anyhow::Result<Self> {
        let live: DtuLiveData = serde_json::from_value(value)?;
        let inverters = live
            .inverters
            .into_iter()
            .map(|inv| InverterReport {
                serial: inv.serial,
                name: inv.name,
                reachable: inv.reachable,
                producing: inv.producing,
                output_power_w: inv
                    .ac
                    .as_ref()
                    .and_then(|ac| ac.get("0"))
                    .and_then(|ch| ch.power.as_ref())
                    .and_then(|p| p.v),
                current_limit_w: inv.limit_absolute,
            })
            .collect();
        Ok(Self {
            inverters,
            total_power_w: live.total.and_then(|t| t.power).and_then(|p| p.v),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_dtu_live_data() {
        let doc = json!({
            "inverters": [
                {
                    "serial": "116492226387",
                    "name": "Garage",
                    "reachable": true,
                    "producing": true,
                    "limit_relative": 40.0,
                    "limit_absolute": 800.0,
                    "AC": { "0": { "Power": { "v": 612.3, "u": "W", "d": 1 } } }
                },
                {
                    "serial": "1164a00b64e3",
                    "name": "Balcony",
                    "reachable": false,
                    "producing": false,
                    "limit_absolute": 300
                }
            ],
            "total": { "Power": { "v": 612.3, "u": "W", "d": 0 } }
        });

        let status = InverterStatus::from_dtu_json(doc).unwrap();
        assert_eq!(status.total_power_w, Some(612.3));
        assert_eq!(status.inverters.len(), 2);

        let first = &status.inverters[0];
        assert_eq!(first.serial.as_deref(), Some("116492226387"));
        assert!(first.reachable);
        assert_eq!(first.output_power_w, Some(612.3));
        assert_eq!(first.current_limit_w, Some(800.0));

        let second = &status.inverters[1];
        assert!(!second.reachable);
        assert_eq!(second.output_power_w, None);
        assert_eq!(second.current_limit_w, Some(300.0));
    }

    #[test]
    fn empty_document_has_no_inverters() {
        let status = InverterStatus::from_dtu_json(json!({})).unwrap();
        assert!(status.inverters.is_empty());
        assert_eq!(status.total_power_w, None);
    }

    #[test]
    fn summary_skips_unreachable() {
        let snap = |reachable, power| InverterSnapshot {
            serial: "x".into(),
            name: "x".into(),
            reachable,
            producing: reachable,
            output_power_w: power,
            current_limit_w: None,
        };
        let snaps = [snap(true, Some(100.0)), snap(false, Some(0.0)), snap(true, Some(50.0))];
        let summary = InverterSummary::from_snapshots(snaps.iter());
        assert_eq!(summary.total_power, Some(150.0));

        let none = [snap(false, Some(0.0))];
        assert_eq!(InverterSummary::from_snapshots(none.iter()).total_power, None);
    }
}
