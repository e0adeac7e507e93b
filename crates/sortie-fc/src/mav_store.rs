use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mavlink::common::{
    MavMessage, MavMissionResult, MISSION_ACK_DATA, MISSION_CLEAR_ALL_DATA, MISSION_COUNT_DATA,
    MISSION_ITEM_INT_DATA, MISSION_REQUEST_INT_DATA, MISSION_REQUEST_LIST_DATA,
};
use sortie_proto::{Command, CommandKind, Frame, InvalidCommand, RawItem};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::connection::{lock, Router};
use crate::error::MissionError;
use crate::mav::MavSink;
use crate::store::MissionStore;
use crate::wire::{decode_item, encode_item};
use crate::FcConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreTiming {
    /// Max wait between upload handshake steps.
    pub ack_timeout: Duration,
    /// Re-request a download item after this long without progress.
    pub item_timeout: Duration,
    pub item_retries: u32,
    /// Vehicle counts as disconnected after this long without a heartbeat.
    pub link_timeout: Duration,
}

impl Default for StoreTiming {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(5),
            item_timeout: Duration::from_millis(1500),
            item_retries: 3,
            link_timeout: Duration::from_secs(5),
        }
    }
}

impl StoreTiming {
    pub fn from_config(cfg: &FcConfig) -> Self {
        let d = Self::default();
        Self {
            ack_timeout: cfg
                .mission_ack_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(d.ack_timeout),
            item_timeout: cfg
                .mission_item_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(d.item_timeout),
            item_retries: cfg.mission_item_retries.unwrap_or(d.item_retries),
            link_timeout: cfg
                .link_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(d.link_timeout),
        }
    }
}

struct Download {
    expected: Option<u16>,
    items: Vec<Command>,
    last_progress: Instant,
    retries: u32,
}

/// Mission store on a MAVLink autopilot (ArduPilot semantics: slot 0 is home).
///
/// Upload is the MISSION_COUNT / MISSION_REQUEST_INT / MISSION_ITEM_INT /
/// MISSION_ACK handshake; download is MISSION_REQUEST_LIST followed by one
/// MISSION_REQUEST_INT per item, advanced from `poll_download`.
pub struct MavMissionStore {
    sink: Arc<dyn MavSink>,
    router: Arc<Mutex<Router>>,
    rx: mpsc::UnboundedReceiver<MavMessage>,
    target_sys: u8,
    target_comp: u8,
    timing: StoreTiming,
    home: Option<Command>,
    download: Option<Download>,
}

impl MavMissionStore {
    pub(crate) fn new(
        sink: Arc<dyn MavSink>,
        router: Arc<Mutex<Router>>,
        rx: mpsc::UnboundedReceiver<MavMessage>,
        target_sys: u8,
        target_comp: u8,
        timing: StoreTiming,
    ) -> Self {
        Self {
            sink,
            router,
            rx,
            target_sys,
            target_comp,
            timing,
            home: None,
            download: None,
        }
    }

    fn send(&self, msg: MavMessage) -> Result<(), MissionError> {
        self.sink.send(&msg).map_err(|e| MissionError::Transport(format!("{:#}", e)))
    }

    fn drain(&mut self) {
        while self.rx.try_recv().is_ok() {}
    }

    async fn next_msg(&mut self, what: &str) -> Result<MavMessage, MissionError> {
        match tokio::time::timeout(self.timing.ack_timeout, self.rx.recv()).await {
            Ok(Some(msg)) => Ok(msg),
            Ok(None) => Err(MissionError::transport("link reader stopped")),
            Err(_) => Err(MissionError::Transport(format!(
                "no {} within {:?}",
                what, self.timing.ack_timeout
            ))),
        }
    }

    // The autopilot overwrites slot 0 with its own home; we send the last
    // home we saw, or a zero waypoint before the first download.
    fn home_placeholder(&self) -> Command {
        self.home.clone().unwrap_or_else(|| {
            Command::from(RawItem {
                seq: 0,
                frame: Frame::Global,
                command: CommandKind::Waypoint,
                current: false,
                autocontinue: true,
                param1: 0.0,
                param2: 0.0,
                param3: 0.0,
                param4: 0.0,
                x: 0,
                y: 0,
                z: 0.0,
            })
        })
    }

    /// Home placeholder plus `items`, in wire form, indexed by seq.
    fn encode_all(&self, items: &[Command]) -> Result<Vec<MISSION_ITEM_INT_DATA>, MissionError> {
        let home = self.home_placeholder();
        std::iter::once(&home)
            .chain(items)
            .enumerate()
            .map(|(seq, cmd)| encode_item(cmd, seq as u16, self.target_sys, self.target_comp))
            .collect()
    }

    // Serve item requests until the vehicle closes the upload with an ACK.
    async fn serve_items(
        &mut self,
        encoded: &[MISSION_ITEM_INT_DATA],
    ) -> Result<MavMissionResult, MissionError> {
        loop {
            let seq = match self.next_msg("mission item request").await? {
                MavMessage::MISSION_REQUEST_INT(r) => r.seq,
                MavMessage::MISSION_REQUEST(r) => r.seq,
                MavMessage::MISSION_ACK(a) => return Ok(a.mavtype),
                _ => continue,
            };
            let item = encoded.get(seq as usize).ok_or_else(|| {
                MissionError::Transport(format!(
                    "vehicle requested item {} of {}",
                    seq,
                    encoded.len()
                ))
            })?;
            debug!("mission: sending item {}", seq);
            self.send(MavMessage::MISSION_ITEM_INT(item.clone()))?;
        }
    }

    fn cancel_upload(&self) {
        if let Err(e) = self.send_ack(MavMissionResult::MAV_MISSION_OPERATION_CANCELLED) {
            warn!("mission: could not cancel upload: {}", e);
        }
    }

    fn request_item(&self, seq: u16) -> Result<(), MissionError> {
        self.send(MavMessage::MISSION_REQUEST_INT(MISSION_REQUEST_INT_DATA {
            seq,
            target_system: self.target_sys,
            target_component: self.target_comp,
        }))
    }

    fn request_list(&self) -> Result<(), MissionError> {
        self.send(MavMessage::MISSION_REQUEST_LIST(MISSION_REQUEST_LIST_DATA {
            target_system: self.target_sys,
            target_component: self.target_comp,
        }))
    }

    fn send_ack(&self, result: MavMissionResult) -> Result<(), MissionError> {
        self.send(MavMessage::MISSION_ACK(MISSION_ACK_DATA {
            target_system: self.target_sys,
            target_component: self.target_comp,
            mavtype: result,
        }))
    }

    fn advance(&mut self, dl: &mut Download) -> Result<Option<Vec<Command>>, MissionError> {
        loop {
            match self.rx.try_recv() {
                Ok(MavMessage::MISSION_COUNT(c)) if dl.expected.is_none() => {
                    debug!("mission: vehicle holds {} items", c.count);
                    dl.expected = Some(c.count);
                    dl.last_progress = Instant::now();
                    dl.retries = 0;
                    if c.count == 0 {
                        self.send_ack(MavMissionResult::MAV_MISSION_ACCEPTED)?;
                        return Ok(Some(Vec::new()));
                    }
                    self.request_item(0)?;
                }
                Ok(MavMessage::MISSION_ITEM_INT(item)) => {
                    let Some(expected) = dl.expected else {
                        continue;
                    };
                    // duplicates from re-requests
                    if item.seq as usize != dl.items.len() {
                        continue;
                    }
                    dl.items.push(decode_item(&item)?);
                    dl.last_progress = Instant::now();
                    dl.retries = 0;
                    if dl.items.len() == expected as usize {
                        self.send_ack(MavMissionResult::MAV_MISSION_ACCEPTED)?;
                        self.home = dl.items.first().cloned();
                        return Ok(Some(std::mem::take(&mut dl.items)));
                    }
                    self.request_item(dl.items.len() as u16)?;
                }
                Ok(_) => {}
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    return Err(MissionError::transport("link reader stopped"))
                }
            }
        }

        if dl.last_progress.elapsed() >= self.timing.item_timeout {
            if dl.retries >= self.timing.item_retries {
                return Err(MissionError::Transport(format!(
                    "mission download stalled at item {} after {} retries",
                    dl.items.len(),
                    dl.retries
                )));
            }
            dl.retries += 1;
            dl.last_progress = Instant::now();
            match dl.expected {
                None => {
                    warn!("mission: no MISSION_COUNT yet, re-requesting list ({})", dl.retries);
                    self.request_list()?;
                }
                Some(_) => {
                    warn!("mission: re-requesting item {} ({})", dl.items.len(), dl.retries);
                    self.request_item(dl.items.len() as u16)?;
                }
            }
        }
        Ok(None)
    }
}

fn ack_result(result: MavMissionResult) -> Result<(), MissionError> {
    if result == MavMissionResult::MAV_MISSION_ACCEPTED {
        Ok(())
    } else {
        Err(MissionError::Transport(format!("mission rejected: {:?}", result)))
    }
}

#[async_trait]
impl MissionStore for MavMissionStore {
    fn is_connected(&self) -> bool {
        lock(&self.router).is_alive(self.target_sys, self.timing.link_timeout)
    }

    async fn upload(&mut self, items: &[Command]) -> Result<(), MissionError> {
        // local checks first; the vehicle hears nothing about a mission we cannot send
        let count = u16::try_from(items.len() + 1).map_err(|_| InvalidCommand {
            field: "count",
            value: items.len() as f64,
            reason: "does not fit MISSION_COUNT",
        })?;
        let encoded = if items.is_empty() {
            Vec::new()
        } else {
            self.encode_all(items)?
        };

        if !self.is_connected() {
            return Err(MissionError::transport("link lost: no heartbeat"));
        }
        self.drain();

        if items.is_empty() {
            self.send(MavMessage::MISSION_CLEAR_ALL(MISSION_CLEAR_ALL_DATA {
                target_system: self.target_sys,
                target_component: self.target_comp,
            }))?;
            loop {
                if let MavMessage::MISSION_ACK(a) = self.next_msg("MISSION_ACK").await? {
                    ack_result(a.mavtype)?;
                    info!("mission: vehicle mission cleared");
                    return Ok(());
                }
            }
        }

        self.send(MavMessage::MISSION_COUNT(MISSION_COUNT_DATA {
            count,
            target_system: self.target_sys,
            target_component: self.target_comp,
        }))?;

        match self.serve_items(&encoded).await {
            Ok(result) => {
                ack_result(result)?;
                info!("mission: vehicle accepted {} items", items.len());
                Ok(())
            }
            Err(e) => {
                warn!("mission: upload aborted: {}", e);
                self.cancel_upload();
                Err(e)
            }
        }
    }

    fn request_download(&mut self) -> Result<(), MissionError> {
        if !self.is_connected() {
            return Err(MissionError::NotConnected);
        }
        self.drain();
        self.request_list()?;
        self.download = Some(Download {
            expected: None,
            items: Vec::new(),
            last_progress: Instant::now(),
            retries: 0,
        });
        Ok(())
    }

    fn poll_download(&mut self) -> Result<Option<Vec<Command>>, MissionError> {
        let Some(mut dl) = self.download.take() else {
            return Err(MissionError::NoDownloadPending);
        };
        let out = self.advance(&mut dl)?;
        if out.is_none() {
            self.download = Some(dl);
        }
        Ok(out)
    }

    fn abort_download(&mut self) {
        self.download = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mission::{CommandList, WaitConfig};
    use crate::state::SystemState;
    use mavlink::common::MavCmd;
    use sortie_proto::FlightMode;

    #[derive(Default)]
    struct FakeState {
        mission: Vec<MISSION_ITEM_INT_DATA>,
        incoming: Vec<MISSION_ITEM_INT_DATA>,
        expecting: u16,
        ignore_list_requests: u32,
        reject_uploads: bool,
        request_out_of_range: bool,
        list_requests: u32,
        counts: u32,
        cancels: u32,
        /// An upload transaction is open on the vehicle side.
        uploading: bool,
    }

    /// Answers like an ArduPilot mission store, synchronously.
    struct FakeAutopilot {
        tx: mpsc::UnboundedSender<MavMessage>,
        home: MISSION_ITEM_INT_DATA,
        state: std::sync::Mutex<FakeState>,
    }

    impl FakeAutopilot {
        fn reply(&self, msg: MavMessage) {
            let _ = self.tx.send(msg);
        }

        fn ack(&self, mavtype: MavMissionResult) {
            self.reply(MavMessage::MISSION_ACK(MISSION_ACK_DATA {
                target_system: 255,
                target_component: 0,
                mavtype,
            }));
        }
    }

    impl MavSink for FakeAutopilot {
        fn send(&self, msg: &MavMessage) -> anyhow::Result<()> {
            let mut st = self.state.lock().unwrap();
            match msg {
                MavMessage::MISSION_COUNT(c) => {
                    st.counts += 1;
                    if st.reject_uploads {
                        self.ack(MavMissionResult::MAV_MISSION_NO_SPACE);
                        return Ok(());
                    }
                    st.uploading = true;
                    st.expecting = c.count;
                    st.incoming.clear();
                    let seq = if st.request_out_of_range { c.count + 5 } else { 0 };
                    self.reply(MavMessage::MISSION_REQUEST_INT(MISSION_REQUEST_INT_DATA {
                        seq,
                        target_system: 255,
                        target_component: 0,
                    }));
                }
                MavMessage::MISSION_ACK(a) => {
                    if a.mavtype == MavMissionResult::MAV_MISSION_OPERATION_CANCELLED {
                        st.cancels += 1;
                        st.uploading = false;
                    }
                }
                MavMessage::MISSION_ITEM_INT(item) => {
                    st.incoming.push(item.clone());
                    if item.seq + 1 < st.expecting {
                        self.reply(MavMessage::MISSION_REQUEST_INT(MISSION_REQUEST_INT_DATA {
                            seq: item.seq + 1,
                            target_system: 255,
                            target_component: 0,
                        }));
                    } else {
                        let mut m = std::mem::take(&mut st.incoming);
                        m[0] = self.home.clone();
                        st.mission = m;
                        st.uploading = false;
                        self.ack(MavMissionResult::MAV_MISSION_ACCEPTED);
                    }
                }
                MavMessage::MISSION_CLEAR_ALL(_) => {
                    st.mission = vec![self.home.clone()];
                    self.ack(MavMissionResult::MAV_MISSION_ACCEPTED);
                }
                MavMessage::MISSION_REQUEST_LIST(_) => {
                    st.list_requests += 1;
                    if st.ignore_list_requests > 0 {
                        st.ignore_list_requests -= 1;
                        return Ok(());
                    }
                    self.reply(MavMessage::MISSION_COUNT(MISSION_COUNT_DATA {
                        count: st.mission.len() as u16,
                        target_system: 255,
                        target_component: 0,
                    }));
                }
                MavMessage::MISSION_REQUEST_INT(r) => {
                    let mut item = st.mission[r.seq as usize].clone();
                    item.seq = r.seq;
                    self.reply(MavMessage::MISSION_ITEM_INT(item));
                }
                _ => {}
            }
            Ok(())
        }
    }

    fn store(alive: bool) -> (Arc<FakeAutopilot>, MavMissionStore) {
        let (tx, rx) = mpsc::unbounded_channel();
        let home_cmd = Command::from(RawItem {
            seq: 0,
            frame: Frame::Global,
            command: CommandKind::Waypoint,
            current: false,
            autocontinue: true,
            param1: 0.0,
            param2: 0.0,
            param3: 0.0,
            param4: 0.0,
            x: -353632610,
            y: 1491652300,
            z: 584.0,
        });
        let home = encode_item(&home_cmd, 0, 255, 0).unwrap();
        let ap = Arc::new(FakeAutopilot {
            tx,
            home: home.clone(),
            state: std::sync::Mutex::new(FakeState { mission: vec![home], ..Default::default() }),
        });

        let mut router = Router::default();
        if alive {
            let st = SystemState {
                last_heartbeat: std::time::Instant::now(),
                mode: FlightMode::Stabilize,
                armed: false,
            };
            router.systems.insert(1, st);
        }
        let sink: Arc<dyn MavSink> = ap.clone();
        let router = Arc::new(Mutex::new(router));
        let store = MavMissionStore::new(sink, router, rx, 1, 1, StoreTiming::default());
        (ap, store)
    }

    fn setup(alive: bool) -> (Arc<FakeAutopilot>, CommandList<MavMissionStore>) {
        let (ap, store) = store(alive);
        (ap, CommandList::new(store, WaitConfig::default()))
    }

    fn mission() -> Vec<Command> {
        vec![
            Command::takeoff(10.0, 10.0).unwrap(),
            Command::waypoint(-10.0, 10.0, 10.0).unwrap(),
            Command::waypoint(-20.0, 20.0, 20.0).unwrap(),
            Command::loiter_unlim(-30.0, 30.0, 30.0).unwrap(),
        ]
    }

    #[tokio::test(start_paused = true)]
    async fn upload_then_download_over_mavlink() {
        let (_ap, mut cmds) = setup(true);
        cmds.clear().unwrap();
        for c in mission() {
            cmds.add(c).unwrap();
        }
        cmds.flush().await.unwrap();
        cmds.download().unwrap();
        cmds.wait_valid().await.unwrap();

        assert_eq!(cmds.count(), 5);
        assert_eq!(cmds.get(0).unwrap().x(), -35.363261);
        for (i, sent) in mission().iter().enumerate() {
            let got = cmds.get(i + 1).unwrap();
            assert_eq!(got.seq() as usize, i + 1);
            assert_eq!(sent.diff(got), None);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn empty_flush_clears_vehicle() {
        let (ap, mut cmds) = setup(true);
        cmds.add(Command::takeoff(10.0, 10.0).unwrap()).unwrap();
        cmds.flush().await.unwrap();
        cmds.clear().unwrap();
        cmds.flush().await.unwrap();
        assert_eq!(ap.state.lock().unwrap().mission.len(), 1);

        cmds.download().unwrap();
        cmds.wait_valid().await.unwrap();
        assert_eq!(cmds.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn lost_list_request_is_retried() {
        let (ap, mut cmds) = setup(true);
        ap.state.lock().unwrap().ignore_list_requests = 1;
        cmds.download().unwrap();
        cmds.wait_valid().await.unwrap();
        assert_eq!(cmds.count(), 1);
        assert_eq!(ap.state.lock().unwrap().list_requests, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_vehicle_fails_download_after_retries() {
        let (ap, mut cmds) = setup(true);
        ap.state.lock().unwrap().ignore_list_requests = u32::MAX;
        cmds.download().unwrap();
        let err = cmds.wait_valid().await.unwrap_err();
        assert!(
            matches!(err, MissionError::Transport(ref m) if m.contains("stalled")),
            "{:?}",
            err
        );
        assert_eq!(ap.state.lock().unwrap().list_requests, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_upload_is_transport_error() {
        let (ap, mut cmds) = setup(true);
        ap.state.lock().unwrap().reject_uploads = true;
        cmds.add(Command::takeoff(10.0, 10.0).unwrap()).unwrap();
        let err = cmds.flush().await.unwrap_err();
        assert!(
            matches!(err, MissionError::Transport(ref m) if m.contains("MAV_MISSION_NO_SPACE"))
        );
        assert_eq!(ap.state.lock().unwrap().cancels, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unencodable_downloaded_item_fails_before_count() {
        let (ap, mut cmds) = setup(true);
        {
            let mut st = ap.state.lock().unwrap();
            let wp = Command::waypoint(-10.0, 10.0, 10.0).unwrap();
            let mut servo = encode_item(&wp, 1, 255, 0).unwrap();
            servo.command = MavCmd::MAV_CMD_DO_SET_SERVO;
            st.mission.push(servo);
        }
        cmds.download().unwrap();
        cmds.wait_valid().await.unwrap();
        assert_eq!(cmds.get(1).unwrap().kind(), CommandKind::Other(183));

        cmds.add(Command::loiter_unlim(-30.0, 30.0, 30.0).unwrap()).unwrap();
        let err = cmds.flush().await.unwrap_err();
        assert!(matches!(err, MissionError::InvalidCommand(ref e) if e.field == "command"));

        let st = ap.state.lock().unwrap();
        assert_eq!(st.counts, 0);
        assert!(!st.uploading);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_handshake_cancels_vehicle_upload() {
        let (ap, mut cmds) = setup(true);
        ap.state.lock().unwrap().request_out_of_range = true;
        cmds.add(Command::takeoff(10.0, 10.0).unwrap()).unwrap();

        let err = cmds.flush().await.unwrap_err();
        assert!(matches!(err, MissionError::Transport(ref m) if m.contains("requested item")));

        let st = ap.state.lock().unwrap();
        assert_eq!(st.counts, 1);
        assert_eq!(st.cancels, 1);
        assert!(!st.uploading);
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_mission_is_rejected_locally() {
        let (ap, mut store) = store(true);
        let items = vec![Command::takeoff(10.0, 10.0).unwrap(); u16::MAX as usize];

        let err = store.upload(&items).await.unwrap_err();
        assert!(matches!(err, MissionError::InvalidCommand(ref e) if e.field == "count"));
        assert_eq!(ap.state.lock().unwrap().counts, 0);
    }

    #[tokio::test]
    async fn no_heartbeat_means_not_connected() {
        let (_ap, mut cmds) = setup(false);
        assert_eq!(cmds.clear(), Err(MissionError::NotConnected));
        assert_eq!(cmds.download(), Err(MissionError::NotConnected));
        assert!(matches!(cmds.flush().await, Err(MissionError::Transport(_))));
    }
}
