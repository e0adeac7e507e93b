use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use mavlink::common::{MavMessage, MavModeFlag, MavType, PARAM_REQUEST_LIST_DATA};
use mavlink::MavHeader;
use sortie_proto::FlightMode;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::mav::{FcLink, MavSink};
use crate::mav_store::{MavMissionStore, StoreTiming};
use crate::mission::{CommandList, WaitConfig};
use crate::params::ParamCache;
use crate::state::{FcStatus, SystemState};
use crate::vehicle::VehicleHandle;
use crate::FcConfig;

/// Shared view of the link, updated by the reader thread.
#[derive(Default)]
pub(crate) struct Router {
    pub(crate) status: FcStatus,
    pub(crate) systems: BTreeMap<u8, SystemState>,
    pub(crate) params: HashMap<u8, ParamCache>,
    pub(crate) mission: HashMap<u8, mpsc::UnboundedSender<MavMessage>>,
}

impl Router {
    pub(crate) fn handle(&mut self, hdr: &MavHeader, msg: MavMessage) {
        self.status.connected = true;
        let sys = hdr.system_id;

        match msg {
            MavMessage::HEARTBEAT(hb) => {
                // other ground stations on the same link are not vehicles
                if hb.mavtype == MavType::MAV_TYPE_GCS {
                    return;
                }
                let now = Instant::now();
                self.status.last_heartbeat = Some(now);
                self.status.last_msg =
                    Some(format!("HEARTBEAT sys={} mode={}", sys, hb.custom_mode));
                let st = SystemState {
                    last_heartbeat: now,
                    mode: FlightMode::from_custom_mode(hb.custom_mode),
                    armed: hb.base_mode.contains(MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED),
                };
                if self.systems.insert(sys, st).is_none() {
                    info!("fc: vehicle sys={} seen (mavtype={:?})", sys, hb.mavtype);
                }
            }
            MavMessage::PARAM_VALUE(p) => {
                self.params.entry(sys).or_default().on_param_value(&p);
            }
            msg @ (MavMessage::MISSION_COUNT(_)
            | MavMessage::MISSION_ITEM_INT(_)
            | MavMessage::MISSION_REQUEST(_)
            | MavMessage::MISSION_REQUEST_INT(_)
            | MavMessage::MISSION_ACK(_)) => {
                if let Some(tx) = self.mission.get(&sys) {
                    if tx.send(msg).is_err() {
                        self.mission.remove(&sys);
                    }
                }
            }
            _ => {}
        }
    }

    pub(crate) fn is_alive(&self, sys: u8, link_timeout: Duration) -> bool {
        self.systems.get(&sys).map(|s| s.is_alive(link_timeout)).unwrap_or(false)
    }
}

pub(crate) fn lock(router: &Mutex<Router>) -> MutexGuard<'_, Router> {
    // a panicking reader must not take every handle down with it
    router.lock().unwrap_or_else(|e| e.into_inner())
}

/// A MAVLink link plus the reader thread that demultiplexes it.
pub struct Connection {
    link: Arc<FcLink>,
    router: Arc<Mutex<Router>>,
    stop: Arc<AtomicBool>,
    cfg: FcConfig,
}

impl Connection {
    pub fn open(cfg: &FcConfig) -> Result<Self> {
        let url = crate::resolve_url(cfg)?;
        let link = FcLink::open(&url, cfg.sys_id, cfg.comp_id).context("FC open")?;
        info!("fc: connected to {}", url);
        Ok(Self::from_link(link, cfg))
    }

    pub fn from_link(link: FcLink, cfg: &FcConfig) -> Self {
        let link = Arc::new(link);
        let router = Arc::new(Mutex::new(Router::default()));
        lock(&router).status.url = Some(link.url().to_string());
        let stop = Arc::new(AtomicBool::new(false));

        let hb_hz = cfg.send_heartbeat_hz.unwrap_or(1.0).max(0.2);
        spawn_reader(link.clone(), router.clone(), stop.clone(), hb_hz);

        Self {
            link,
            router,
            stop,
            cfg: cfg.clone(),
        }
    }

    pub fn url(&self) -> &str {
        self.link.url()
    }

    pub fn status(&self) -> FcStatus {
        lock(&self.router).status.clone()
    }

    /// System ids of every vehicle that has sent a heartbeat.
    pub fn vehicles(&self) -> Vec<u8> {
        lock(&self.router).systems.keys().copied().collect()
    }

    /// Wait for the first heartbeat from `sys_id`.
    pub async fn wait_vehicle(&self, sys_id: u8, timeout: Duration) -> Result<()> {
        let start = Instant::now();
        loop {
            if lock(&self.router).systems.contains_key(&sys_id) {
                return Ok(());
            }
            if let Some(e) = lock(&self.router).status.link_error.clone() {
                anyhow::bail!("link failed: {}", e);
            }
            anyhow::ensure!(
                start.elapsed() < timeout,
                "no heartbeat from sys {} within {:?}",
                sys_id,
                timeout
            );
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Handle for one vehicle. Mission traffic from `sys_id` is routed to it;
    /// a second handle for the same system takes the traffic over.
    pub fn vehicle(&self, sys_id: u8, comp_id: u8, wait: WaitConfig) -> MavVehicle {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.router).mission.insert(sys_id, tx);

        let timing = StoreTiming::from_config(&self.cfg);
        let sink: Arc<dyn MavSink> = self.link.clone();
        let store = MavMissionStore::new(
            sink.clone(),
            self.router.clone(),
            rx,
            sys_id,
            comp_id,
            timing,
        );

        MavVehicle {
            sys_id,
            comp_id,
            sink,
            router: self.router.clone(),
            link_timeout: timing.link_timeout,
            commands: CommandList::new(store, wait),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

// Reader loop on its own thread (mavlink recv blocks). The thread is not
// joined: a silent link keeps it parked in recv until the process exits.
fn spawn_reader(link: Arc<FcLink>, router: Arc<Mutex<Router>>, stop: Arc<AtomicBool>, hb_hz: f32) {
    let thread_router = Arc::clone(&router);
    let spawned = std::thread::Builder::new()
        .name("mav-reader".into())
        .spawn(move || {
            let router = thread_router;
            let hb_interval = Duration::from_secs_f32(1.0 / hb_hz);
            let mut last_hb_send: Option<Instant> = None;

            while !stop.load(Ordering::Relaxed) {
                // Send GCS heartbeat periodically
                if last_hb_send.map(|t| t.elapsed() >= hb_interval).unwrap_or(true) {
                    if let Err(e) = link.send_heartbeat() {
                        warn!("fc: heartbeat send failed: {:#}", e);
                    }
                    last_hb_send = Some(Instant::now());
                }

                match link.recv() {
                    Ok(Some((hdr, msg))) => lock(&router).handle(&hdr, msg),
                    Ok(None) => std::thread::sleep(Duration::from_millis(5)),
                    Err(e) => {
                        warn!("fc: link down: {:#}", e);
                        let mut r = lock(&router);
                        r.status.connected = false;
                        r.status.link_error = Some(format!("{:#}", e));
                        // dropping the senders wakes any waiting mission store
                        r.mission.clear();
                        break;
                    }
                }
            }
        });
    if let Err(e) = spawned {
        warn!("fc: could not start reader thread: {}", e);
        lock(&router).status.link_error = Some(e.to_string());
    }
}

/// One MAVLink vehicle: mission, parameters and mode.
pub struct MavVehicle {
    sys_id: u8,
    comp_id: u8,
    sink: Arc<dyn MavSink>,
    router: Arc<Mutex<Router>>,
    link_timeout: Duration,
    commands: CommandList<MavMissionStore>,
}

impl MavVehicle {
    pub fn sys_id(&self) -> u8 {
        self.sys_id
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.router).is_alive(self.sys_id, self.link_timeout)
    }

    pub fn armed(&self) -> Option<bool> {
        lock(&self.router).systems.get(&self.sys_id).map(|s| s.armed)
    }

    /// Wait until the vehicle's heartbeat is fresh.
    pub async fn wait_heartbeat(&self, timeout: Duration) -> Result<()> {
        let start = Instant::now();
        while !self.is_connected() {
            anyhow::ensure!(
                start.elapsed() < timeout,
                "no heartbeat from sys {} within {:?}",
                self.sys_id,
                timeout
            );
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        Ok(())
    }

    /// Request the full parameter list and wait until it has arrived.
    /// Returns how many parameters were received; a partial list after
    /// `timeout` is returned with a warning, an empty one is an error.
    pub async fn fetch_parameters(&self, timeout: Duration) -> Result<usize> {
        anyhow::ensure!(
            self.is_connected(),
            "refusing parameter fetch: no heartbeat from sys {}",
            self.sys_id
        );
        self.sink.send(&MavMessage::PARAM_REQUEST_LIST(PARAM_REQUEST_LIST_DATA {
            target_system: self.sys_id,
            target_component: self.comp_id,
        }))?;

        let start = Instant::now();
        loop {
            {
                let r = lock(&self.router);
                if let Some(p) = r.params.get(&self.sys_id) {
                    if p.is_complete() {
                        return Ok(p.len());
                    }
                }
            }
            if start.elapsed() >= timeout {
                let n = lock(&self.router).params.get(&self.sys_id).map(|p| p.len()).unwrap_or(0);
                anyhow::ensure!(
                    n > 0,
                    "no parameters from sys {} within {:?}",
                    self.sys_id,
                    timeout
                );
                warn!("fc: parameter list incomplete after {:?} ({} received)", timeout, n);
                return Ok(n);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

impl VehicleHandle for MavVehicle {
    type Store = MavMissionStore;

    fn commands(&mut self) -> &mut CommandList<MavMissionStore> {
        &mut self.commands
    }

    fn parameters(&self) -> HashMap<String, f32> {
        lock(&self.router).params.get(&self.sys_id).map(|p| p.snapshot()).unwrap_or_default()
    }

    fn mode(&self) -> Option<FlightMode> {
        lock(&self.router).systems.get(&self.sys_id).map(|s| s.mode)
    }
}
