//! In-process simulated vehicle.
//!
//! Behaves like an ArduPilot mission store seen from a ground station: the
//! stored mission always starts with a synthesized home waypoint, uploads are
//! acknowledged after a latency, and downloads complete some time after they
//! were requested. [`SimControl`] injects faults (link loss, stalled
//! downloads, corrupted entries) so the verification path can be exercised.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use sortie_fc::{CommandList, MissionError, MissionStore, VehicleHandle, WaitConfig};
use sortie_proto::{Command, CommandSpec, FlightMode, Frame};
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub home_lat: f64,
    pub home_lon: f64,
    pub home_alt_m: f64,
    pub ack_latency_ms: u64,
    pub download_latency_ms: u64,
    /// ArduCopter custom mode number.
    pub custom_mode: u32,
    pub params: HashMap<String, f32>,
}

impl Default for SimConfig {
    fn default() -> Self {
        // ArduPilot SITL default location (CMAC)
        let params = [
            ("THR_MIN", 130.0),
            ("THR_MAX", 1000.0),
            ("RTL_ALT", 1500.0),
            ("WPNAV_SPEED", 500.0),
        ]
        .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        Self {
            home_lat: -35.363261,
            home_lon: 149.165230,
            home_alt_m: 584.0,
            ack_latency_ms: 200,
            download_latency_ms: 300,
            custom_mode: 0,
            params,
        }
    }
}

struct SimState {
    connected: bool,
    home: Command,
    mission: Vec<Command>,
    stall_downloads: bool,
    corrupt: HashMap<usize, Command>,
    uploads: usize,
    downloads: usize,
    mode: FlightMode,
    params: HashMap<String, f32>,
}

/// Fault injection and inspection handle, shared with the vehicle.
#[derive(Clone)]
pub struct SimControl(Arc<Mutex<SimState>>);

impl SimControl {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn disconnect(&self) {
        self.lock().connected = false;
    }

    pub fn reconnect(&self) {
        self.lock().connected = true;
    }

    /// Downloads never complete while set.
    pub fn stall_downloads(&self, stall: bool) {
        self.lock().stall_downloads = stall;
    }

    /// Report `cmd` at `index` on every download (index 0 is home).
    pub fn corrupt_entry(&self, index: usize, cmd: Command) {
        self.lock().corrupt.insert(index, cmd);
    }

    pub fn set_mode(&self, mode: FlightMode) {
        self.lock().mode = mode;
    }

    pub fn set_param(&self, name: &str, value: f32) {
        self.lock().params.insert(name.to_string(), value);
    }

    /// Stored mission without home.
    pub fn mission(&self) -> Vec<Command> {
        self.lock().mission.clone()
    }

    pub fn uploads(&self) -> usize {
        self.lock().uploads
    }

    pub fn downloads(&self) -> usize {
        self.lock().downloads
    }
}

pub struct SimMissionStore {
    ctl: SimControl,
    ack_latency: Duration,
    download_latency: Duration,
    ready_at: Option<Instant>,
}

#[async_trait]
impl MissionStore for SimMissionStore {
    fn is_connected(&self) -> bool {
        self.ctl.lock().connected
    }

    async fn upload(&mut self, items: &[Command]) -> Result<(), MissionError> {
        if !self.is_connected() {
            return Err(MissionError::Transport("sim: link lost".into()));
        }
        tokio::time::sleep(self.ack_latency).await;

        let mut st = self.ctl.lock();
        if !st.connected {
            return Err(MissionError::Transport("sim: link lost during upload".into()));
        }
        st.mission = items.iter().enumerate().map(|(i, c)| c.with_seq(i as u16 + 1)).collect();
        st.uploads += 1;
        info!("sim: stored {} mission items", st.mission.len());
        Ok(())
    }

    fn request_download(&mut self) -> Result<(), MissionError> {
        if !self.is_connected() {
            return Err(MissionError::NotConnected);
        }
        self.ready_at = Some(Instant::now() + self.download_latency);
        Ok(())
    }

    fn poll_download(&mut self) -> Result<Option<Vec<Command>>, MissionError> {
        let Some(ready_at) = self.ready_at else {
            return Err(MissionError::NoDownloadPending);
        };
        let mut st = self.ctl.lock();
        if !st.connected {
            self.ready_at = None;
            return Err(MissionError::Transport("sim: link lost during download".into()));
        }
        if st.stall_downloads || Instant::now() < ready_at {
            return Ok(None);
        }

        let mut out = Vec::with_capacity(st.mission.len() + 1);
        out.push(st.home.with_seq(0));
        out.extend(st.mission.iter().cloned());
        for (i, cmd) in &st.corrupt {
            if let Some(slot) = out.get_mut(*i) {
                *slot = cmd.with_seq(*i as u16);
            }
        }
        st.downloads += 1;
        self.ready_at = None;
        debug!("sim: download of {} entries complete", out.len());
        Ok(Some(out))
    }

    fn abort_download(&mut self) {
        self.ready_at = None;
    }
}

pub struct SimVehicle {
    ctl: SimControl,
    commands: CommandList<SimMissionStore>,
}

impl SimVehicle {
    pub fn new(cfg: &SimConfig, wait: WaitConfig) -> Result<Self, MissionError> {
        let home = Command::new(CommandSpec {
            frame: Frame::Global,
            x: cfg.home_lat,
            y: cfg.home_lon,
            z: cfg.home_alt_m,
            ..Default::default()
        })?;
        let ctl = SimControl(Arc::new(Mutex::new(SimState {
            connected: true,
            home,
            mission: Vec::new(),
            stall_downloads: false,
            corrupt: HashMap::new(),
            uploads: 0,
            downloads: 0,
            mode: FlightMode::from_custom_mode(cfg.custom_mode),
            params: cfg.params.clone(),
        })));
        let store = SimMissionStore {
            ctl: ctl.clone(),
            ack_latency: Duration::from_millis(cfg.ack_latency_ms),
            download_latency: Duration::from_millis(cfg.download_latency_ms),
            ready_at: None,
        };
        Ok(Self {
            ctl,
            commands: CommandList::new(store, wait),
        })
    }

    pub fn control(&self) -> SimControl {
        self.ctl.clone()
    }
}

impl VehicleHandle for SimVehicle {
    type Store = SimMissionStore;

    fn commands(&mut self) -> &mut CommandList<SimMissionStore> {
        &mut self.commands
    }

    fn parameters(&self) -> HashMap<String, f32> {
        self.ctl.lock().params.clone()
    }

    fn mode(&self) -> Option<FlightMode> {
        let st = self.ctl.lock();
        st.connected.then_some(st.mode)
    }
}
