pub mod autodetect;
pub mod connection;
pub mod error;
pub mod mav;
pub mod mav_store;
pub mod mission;
pub mod params;
pub mod state;
pub mod store;
pub mod sync;
pub mod vehicle;
pub mod wire;

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

pub use connection::{Connection, MavVehicle};
pub use error::{Mismatch, MissionError};
pub use mission::{CommandList, ListPhase, WaitConfig};
pub use store::MissionStore;
pub use sync::{verify, SyncController, SyncReport, SyncState};
pub use vehicle::VehicleHandle;

#[derive(Debug, Clone, Deserialize)]
pub struct FcConfig {
    /// If true, try each of `candidate_urls` and pick the first that yields a
    /// vehicle HEARTBEAT.
    pub autodetect: bool,

    /// When autodetect=false: mavlink connection string, e.g.
    /// "tcpout:127.0.0.1:5760" (SITL) or "serial:/dev/ttyACM0:115200".
    pub url: Option<String>,

    /// Autodetect candidates. Defaults to SITL + common serial ports.
    pub candidate_urls: Option<Vec<String>>,

    /// Heartbeat wait per autodetect attempt and before talking to the vehicle.
    pub heartbeat_timeout_ms: Option<u64>,

    /// MAVLink ids we use (GCS side). 255/190 is customary.
    pub sys_id: u8,
    pub comp_id: u8,

    /// target system/component (FC side). 1/1 is common for ArduPilot.
    pub target_sys: u8,
    pub target_comp: u8,

    /// Optional: GCS heartbeat send interval. Default 1 Hz.
    pub send_heartbeat_hz: Option<f32>,

    /// Vehicle counts as disconnected after this long without a heartbeat.
    pub link_timeout_ms: Option<u64>,

    pub mission_ack_timeout_ms: Option<u64>,
    pub mission_item_timeout_ms: Option<u64>,
    pub mission_item_retries: Option<u32>,

    /// How long `params get` waits for the full parameter list.
    pub param_timeout_ms: Option<u64>,
}

impl FcConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms.unwrap_or(1500))
    }

    pub fn param_timeout(&self) -> Duration {
        Duration::from_millis(self.param_timeout_ms.unwrap_or(20_000))
    }
}

pub fn run_fc_autodetect(fc: &FcConfig) -> Result<autodetect::AutodetectResult> {
    let urls = fc.candidate_urls.clone().unwrap_or_else(autodetect::default_candidate_urls);
    autodetect::autodetect_fc(urls, fc.heartbeat_timeout(), fc.sys_id, fc.comp_id)
}

pub fn resolve_url(fc: &FcConfig) -> Result<String> {
    if fc.autodetect {
        let res = run_fc_autodetect(fc)?;
        if let Some(url) = res.chosen {
            return Ok(url);
        }
        anyhow::bail!("fc autodetect failed: no heartbeat found");
    } else {
        fc.url.clone().context("fc.url missing (autodetect=false)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let cfg: FcConfig = toml::from_str(
            r#"
            autodetect = false
            url = "tcpout:127.0.0.1:5760"
            sys_id = 255
            comp_id = 190
            target_sys = 1
            target_comp = 1
            mission_item_retries = 5
            "#,
        )
        .unwrap();
        assert_eq!(cfg.heartbeat_timeout(), Duration::from_millis(1500));
        assert_eq!(resolve_url(&cfg).unwrap(), "tcpout:127.0.0.1:5760");

        let t = mav_store::StoreTiming::from_config(&cfg);
        assert_eq!(t.item_retries, 5);
        assert_eq!(t.ack_timeout, Duration::from_secs(5));
    }

    #[test]
    fn fixed_url_is_required_without_autodetect() {
        let cfg: FcConfig = toml::from_str(
            r#"
            autodetect = false
            sys_id = 255
            comp_id = 190
            target_sys = 1
            target_comp = 1
            "#,
        )
        .unwrap();
        assert!(resolve_url(&cfg).is_err());
    }
}
