use std::time::Duration;

use sortie_proto::{Command, CommandSpec};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::MissionError;
use crate::store::MissionStore;

/// Bounds for [`CommandList::wait_valid`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitConfig {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListPhase {
    /// Entries reflect local edits (or nothing has been downloaded yet).
    Local,
    /// A download was requested and has not completed.
    Downloading,
    /// Entries are the store's sequence as of the last completed download.
    Valid,
}

/// Ordered mission commands, synchronised with a [`MissionStore`].
///
/// After a download, entry 0 is the home waypoint the store injects.
pub struct CommandList<S> {
    store: S,
    items: Vec<Command>,
    home_included: bool,
    phase: ListPhase,
    wait: WaitConfig,
}

impl<S: MissionStore> CommandList<S> {
    pub fn new(store: S, wait: WaitConfig) -> Self {
        Self {
            store,
            items: Vec::new(),
            home_included: false,
            phase: ListPhase::Local,
            wait,
        }
    }

    /// Drop every entry. The remote mission is replaced on the next flush.
    pub fn clear(&mut self) -> Result<(), MissionError> {
        self.ensure_idle("clear")?;
        if !self.store.is_connected() {
            return Err(MissionError::NotConnected);
        }
        self.items.clear();
        self.home_included = false;
        self.phase = ListPhase::Local;
        Ok(())
    }

    /// Append `cmd`. Commands that cannot be uploaded are rejected here.
    pub fn add(&mut self, cmd: Command) -> Result<(), MissionError> {
        self.ensure_idle("add")?;
        cmd.validate()?;
        self.items.push(cmd);
        self.phase = ListPhase::Local;
        Ok(())
    }

    /// Validate `spec` and append it.
    pub fn add_spec(&mut self, spec: CommandSpec) -> Result<(), MissionError> {
        let cmd = Command::new(spec)?;
        self.add(cmd)
    }

    /// Upload the pending sequence. Resolves when the store acknowledged it,
    /// not when it finished processing.
    pub async fn flush(&mut self) -> Result<(), MissionError> {
        self.ensure_idle("flush")?;
        // the store re-synthesizes home, never upload it back
        let skip = usize::from(self.home_included).min(self.items.len());
        let pending = &self.items[skip..];
        info!("mission: flushing {} commands", pending.len());
        self.store.upload(pending).await?;
        self.phase = ListPhase::Local;
        Ok(())
    }

    /// Ask the store for its mission. Only starts the transfer; see [`Self::wait_valid`].
    pub fn download(&mut self) -> Result<(), MissionError> {
        self.ensure_idle("download")?;
        self.store.request_download()?;
        self.phase = ListPhase::Downloading;
        debug!("mission: download requested");
        Ok(())
    }

    /// Block until the in-flight download has fully populated the list.
    ///
    /// Returns immediately if the last download completed and nothing changed
    /// since. Fails fast with [`MissionError::NoDownloadPending`] when no
    /// download was requested, and with [`MissionError::Timeout`] once
    /// `WaitConfig::timeout` elapses.
    pub async fn wait_valid(&mut self) -> Result<(), MissionError> {
        match self.phase {
            ListPhase::Valid => return Ok(()),
            ListPhase::Local => return Err(MissionError::NoDownloadPending),
            ListPhase::Downloading => {}
        }

        let start = Instant::now();
        loop {
            match self.store.poll_download() {
                Ok(Some(items)) => {
                    info!("mission: download complete ({} entries)", items.len());
                    self.items = items;
                    self.home_included = true;
                    self.phase = ListPhase::Valid;
                    return Ok(());
                }
                Ok(None) => {}
                Err(e) => {
                    self.store.abort_download();
                    self.phase = ListPhase::Local;
                    return Err(e);
                }
            }

            let waited = start.elapsed();
            if waited >= self.wait.timeout {
                warn!("mission: download not complete after {:?}", waited);
                self.store.abort_download();
                self.phase = ListPhase::Local;
                return Err(MissionError::Timeout {
                    what: "mission download",
                    waited,
                });
            }
            let left = self.wait.timeout - waited;
            tokio::time::sleep(self.wait.poll_interval.min(left)).await;
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Command> {
        self.items.iter()
    }

    pub fn count(&self) -> usize {
        self.items.len()
    }

    pub fn get(&self, index: usize) -> Option<&Command> {
        self.items.get(index)
    }

    pub fn phase(&self) -> ListPhase {
        self.phase
    }

    pub fn is_connected(&self) -> bool {
        self.store.is_connected()
    }

    pub fn wait_config(&self) -> WaitConfig {
        self.wait
    }

    pub fn set_wait_config(&mut self, wait: WaitConfig) {
        self.wait = wait;
    }

    fn ensure_idle(&self, op: &'static str) -> Result<(), MissionError> {
        if self.phase == ListPhase::Downloading {
            return Err(MissionError::Busy(op));
        }
        Ok(())
    }
}

impl<'a, S: MissionStore> IntoIterator for &'a CommandList<S> {
    type Item = &'a Command;
    type IntoIter = std::slice::Iter<'a, Command>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use sortie_proto::{CommandKind, Frame, RawItem};

    /// Store that answers a download after a fixed number of polls.
    pub(crate) struct ScriptedStore {
        pub connected: bool,
        pub home: Command,
        pub stored: Vec<Command>,
        pub polls_needed: u32,
        pub polls: Option<u32>,
        pub uploads: Vec<Vec<Command>>,
        pub fail_upload: bool,
    }

    impl ScriptedStore {
        pub(crate) fn new() -> Self {
            let home = Command::new(CommandSpec {
                frame: Frame::Global,
                x: -35.363261,
                y: 149.16523,
                z: 584.0,
                ..Default::default()
            })
            .unwrap();
            Self {
                connected: true,
                home,
                stored: Vec::new(),
                polls_needed: 2,
                polls: None,
                uploads: Vec::new(),
                fail_upload: false,
            }
        }
    }

    #[async_trait]
    impl MissionStore for ScriptedStore {
        fn is_connected(&self) -> bool {
            self.connected
        }

        async fn upload(&mut self, items: &[Command]) -> Result<(), MissionError> {
            if self.fail_upload {
                return Err(MissionError::Transport("link lost".into()));
            }
            self.uploads.push(items.to_vec());
            self.stored = items.iter().enumerate().map(|(i, c)| c.with_seq(i as u16 + 1)).collect();
            Ok(())
        }

        fn request_download(&mut self) -> Result<(), MissionError> {
            self.polls = Some(0);
            Ok(())
        }

        fn poll_download(&mut self) -> Result<Option<Vec<Command>>, MissionError> {
            let Some(n) = self.polls.as_mut() else {
                return Err(MissionError::NoDownloadPending);
            };
            *n += 1;
            if *n < self.polls_needed {
                return Ok(None);
            }
            self.polls = None;
            let mut out = vec![self.home.clone()];
            out.extend(self.stored.iter().cloned());
            Ok(Some(out))
        }

        fn abort_download(&mut self) {
            self.polls = None;
        }
    }

    fn list(store: ScriptedStore) -> CommandList<ScriptedStore> {
        let wait = WaitConfig {
            timeout: Duration::from_secs(1),
            poll_interval: Duration::from_millis(10),
        };
        CommandList::new(store, wait)
    }

    #[tokio::test(start_paused = true)]
    async fn iteration_reflects_local_then_downloaded_state() {
        let mut cmds = list(ScriptedStore::new());
        cmds.clear().unwrap();
        cmds.add(Command::takeoff(10.0, 10.0).unwrap()).unwrap();
        cmds.add(Command::waypoint(-10.0, 10.0, 10.0).unwrap()).unwrap();
        assert_eq!(cmds.count(), 2);

        cmds.flush().await.unwrap();
        assert_eq!(cmds.iter().count(), 2);

        cmds.download().unwrap();
        cmds.wait_valid().await.unwrap();
        assert_eq!(cmds.phase(), ListPhase::Valid);
        assert_eq!(cmds.count(), 3);
        assert_eq!(cmds.get(0).unwrap().frame(), Frame::Global);
        assert_eq!(cmds.get(1).unwrap().kind(), CommandKind::Takeoff);

        // restartable
        let a: Vec<_> = cmds.iter().map(|c| c.seq()).collect();
        let b: Vec<_> = (&cmds).into_iter().map(|c| c.seq()).collect();
        assert_eq!(a, vec![0, 1, 2]);
        assert_eq!(a, b);
    }

    #[tokio::test(start_paused = true)]
    async fn reflush_after_download_skips_home() {
        let mut cmds = list(ScriptedStore::new());
        cmds.clear().unwrap();
        cmds.add(Command::waypoint(-10.0, 10.0, 10.0).unwrap()).unwrap();
        cmds.flush().await.unwrap();
        cmds.download().unwrap();
        cmds.wait_valid().await.unwrap();

        cmds.add(Command::loiter_unlim(-30.0, 30.0, 30.0).unwrap()).unwrap();
        cmds.flush().await.unwrap();

        let uploaded = &cmds.store.uploads[1];
        assert_eq!(uploaded.len(), 2);
        assert_eq!(uploaded[0].kind(), CommandKind::Waypoint);
        assert_eq!(uploaded[1].kind(), CommandKind::LoiterUnlim);
    }

    #[tokio::test]
    async fn clear_requires_link() {
        let mut store = ScriptedStore::new();
        store.connected = false;
        let mut cmds = list(store);
        assert_eq!(cmds.clear(), Err(MissionError::NotConnected));
    }

    #[tokio::test]
    async fn flush_surfaces_transport_errors() {
        let mut store = ScriptedStore::new();
        store.fail_upload = true;
        let mut cmds = list(store);
        cmds.add(Command::takeoff(0.0, 5.0).unwrap()).unwrap();
        assert!(matches!(cmds.flush().await, Err(MissionError::Transport(_))));
    }

    #[test]
    fn add_spec_validates() {
        let mut cmds = list(ScriptedStore::new());
        let spec = CommandSpec {
            param1: f64::INFINITY,
            ..Default::default()
        };
        let err = cmds.add_spec(spec).unwrap_err();
        assert!(matches!(err, MissionError::InvalidCommand(ref e) if e.field == "param1"));
        assert_eq!(cmds.count(), 0);
    }

    #[test]
    fn add_rejects_commands_built_from_raw_items() {
        let mut cmds = list(ScriptedStore::new());
        let raw = Command::waypoint(-10.0, 10.0, 10.0).unwrap().to_raw();

        let servo = Command::from(RawItem {
            command: CommandKind::Other(183),
            ..raw
        });
        let err = cmds.add(servo).unwrap_err();
        assert!(matches!(err, MissionError::InvalidCommand(ref e) if e.field == "command"));

        let bad = Command::from(RawItem {
            frame: Frame::Global,
            param1: f32::NAN,
            x: i32::MAX,
            ..raw
        });
        assert!(matches!(cmds.add(bad), Err(MissionError::InvalidCommand(_))));
        assert_eq!(cmds.count(), 0);
    }

    #[tokio::test]
    async fn wait_valid_without_download_fails_fast() {
        let mut cmds = list(ScriptedStore::new());
        assert_eq!(cmds.wait_valid().await, Err(MissionError::NoDownloadPending));
    }

    #[tokio::test(start_paused = true)]
    async fn second_operation_while_downloading_is_busy() {
        let mut cmds = list(ScriptedStore::new());
        cmds.download().unwrap();
        assert_eq!(cmds.download(), Err(MissionError::Busy("download")));
        assert_eq!(cmds.flush().await, Err(MissionError::Busy("flush")));
        assert_eq!(cmds.clear(), Err(MissionError::Busy("clear")));
        cmds.wait_valid().await.unwrap();
        assert!(cmds.download().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_valid_times_out() {
        let mut store = ScriptedStore::new();
        store.polls_needed = u32::MAX;
        let mut cmds = list(store);
        cmds.download().unwrap();
        let err = cmds.wait_valid().await.unwrap_err();
        assert!(matches!(err, MissionError::Timeout { what: "mission download", .. }));
        assert_eq!(cmds.phase(), ListPhase::Local);
        assert_eq!(cmds.wait_valid().await, Err(MissionError::NoDownloadPending));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_valid_does_not_overshoot_timeout() {
        let mut store = ScriptedStore::new();
        store.polls_needed = u32::MAX;
        let wait = WaitConfig {
            timeout: Duration::from_secs(1),
            poll_interval: Duration::from_millis(300),
        };
        let mut cmds = CommandList::new(store, wait);
        cmds.download().unwrap();

        let start = Instant::now();
        match cmds.wait_valid().await.unwrap_err() {
            MissionError::Timeout { waited, .. } => {
                assert!(waited >= Duration::from_secs(1));
                assert!(waited < Duration::from_millis(1_050), "{:?}", waited);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(start.elapsed() < Duration::from_millis(1_050));
    }
}
