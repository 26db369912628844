use anyhow::{Context, bail};
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::Config;
use crate::inverter::InverterStatus;
use crate::meter::EmStatus;
use crate::traits::{ActuatorSink, TelemetrySource};

/// Shelly Pro 3EM reached over its RPC HTTP API.
pub struct ShellyMeter {
    client: Client,
    status_url: String,
}

impl ShellyMeter {
    pub fn new(client: Client, base_url: &str) -> Self {
        ShellyMeter {
            client,
            status_url: format!("{}/rpc/EM.GetStatus?id=0", base_url.trim_end_matches('/')),
        }
    }

    pub async fn get_status(&self) -> anyhow::Result<EmStatus> {
        let status: EmStatus = self
            .client
            .get(&self.status_url)
            .header("Content-Type", "application/json")
            .send()
            .await
            .with_context(|| format!("GET {}", self.status_url))?
            .error_for_status()?
            .json()
            .await?;
        debug!("Meter response: {:?}", status);
        Ok(status)
    }

    pub async fn get_grid_power(&self) -> anyhow::Result<f64> {
        self.get_status().await?.grid_power()
    }
}

/// OpenDTU gateway: live data for all inverters and the limit API.
#[derive(Clone)]
pub struct OpenDtu {
    client: Client,
    status_url: String,
    limit_url: String,
    username: String,
    password: String,
}

impl OpenDtu {
    pub fn new(client: Client, base_url: &str, username: &str, password: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        OpenDtu {
            client,
            status_url: format!("{}/api/livedata/status/inverters", base),
            limit_url: format!("{}/api/limit/config", base),
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    pub async fn get_live_data(&self) -> anyhow::Result<InverterStatus> {
        let doc: Value = self
            .client
            .get(&self.status_url)
            .send()
            .await
            .with_context(|| format!("GET {}", self.status_url))?
            .error_for_status()?
            .json()
            .await?;
        debug!("DTU response: {}", doc);
        InverterStatus::from_dtu_json(doc)
    }

    /// Sets an absolute, non-persistent limit (`limit_type` 0).
    pub async fn post_limit(&self, serial: &str, limit_w: f64) -> anyhow::Result<()> {
        let payload = serde_json::json!({
            "serial": serial,
            "limit_type": 0,
            "limit_value": limit_w,
        })
        .to_string();
        debug!("Sending limit payload for {}: {}", serial, payload);

        let reply: Value = self
            .client
            .post(&self.limit_url)
            .basic_auth(&self.username, Some(&self.password))
            .form(&[("data", payload)])
            .send()
            .await
            .with_context(|| format!("POST {}", self.limit_url))?
            .error_for_status()?
            .json()
            .await?;

        match reply.get("type").and_then(Value::as_str) {
            Some("success") | None => {
                info!("Limit for {} accepted: {} W", serial, limit_w);
                Ok(())
            }
            Some(other) => bail!(
                "DTU answered {}: {}",
                other,
                reply.get("message").and_then(Value::as_str).unwrap_or("")
            ),
        }
    }
}

impl ActuatorSink for OpenDtu {
    async fn set_limit(&self, serial: &str, limit_w: f64) -> anyhow::Result<()> {
        self.post_limit(serial, limit_w).await
    }
}

/// The meter and the DTU together form the telemetry source.
pub struct Devices {
    pub meter: ShellyMeter,
    pub dtu: OpenDtu,
}

impl Devices {
    /// Builds both HTTP clients with the configured per-call timeout.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.control.timeout())
            .timeout(config.control.timeout())
            .build()
            .context("building HTTP client")?;
        Ok(Devices {
            meter: ShellyMeter::new(client.clone(), &config.meter.url),
            dtu: OpenDtu::new(
                client,
                &config.dtu.url,
                &config.dtu.username,
                &config.dtu.password,
            ),
        })
    }
}

impl TelemetrySource for Devices {
    async fn fetch_meter(&self) -> anyhow::Result<f64> {
        self.meter.get_grid_power().await
    }

    async fn fetch_inverters(&self) -> anyhow::Result<InverterStatus> {
        self.dtu.get_live_data().await
    }
}
