use std::time::Duration;

use serde::Serialize;
use sortie_proto::Command;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::{MissionError, Mismatch};
use crate::vehicle::VehicleHandle;

#[derive(Debug, Clone, PartialEq)]
pub enum SyncState {
    Empty,
    Populated,
    Flushing,
    Flushed,
    Downloading,
    Valid,
    Failed(MissionError),
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub uploaded: usize,
    pub home: Command,
    pub downloaded: Vec<Command>,
    pub elapsed: Duration,
}

/// Drives one upload/download round trip against a vehicle and checks that
/// the store gave back what was sent.
pub struct SyncController<'a, V: VehicleHandle> {
    vehicle: &'a mut V,
    state: SyncState,
}

impl<'a, V: VehicleHandle> SyncController<'a, V> {
    pub fn new(vehicle: &'a mut V) -> Self {
        Self {
            vehicle,
            state: SyncState::Empty,
        }
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    /// clear, add `commands`, flush, download, wait_valid, then compare.
    /// Nothing is retried; the first error moves the controller to `Failed`.
    pub async fn run(&mut self, commands: &[Command]) -> Result<SyncReport, MissionError> {
        let start = Instant::now();
        match self.round_trip(commands).await {
            Ok(downloaded) => {
                let elapsed = start.elapsed();
                info!("sync: verified {} commands in {:?}", commands.len(), elapsed);
                Ok(SyncReport {
                    uploaded: commands.len(),
                    home: downloaded[0].clone(),
                    downloaded,
                    elapsed,
                })
            }
            Err(e) => {
                warn!("sync: failed in {:?}: {}", self.state, e);
                self.state = SyncState::Failed(e.clone());
                Err(e)
            }
        }
    }

    async fn round_trip(&mut self, commands: &[Command]) -> Result<Vec<Command>, MissionError> {
        let list = self.vehicle.commands();

        list.clear()?;
        self.state = SyncState::Empty;

        for cmd in commands {
            list.add(cmd.clone())?;
        }
        self.state = SyncState::Populated;

        self.state = SyncState::Flushing;
        list.flush().await?;
        self.state = SyncState::Flushed;

        // owned copy; the list is overwritten by the download
        let baseline: Vec<Command> = list.iter().cloned().collect();

        list.download()?;
        self.state = SyncState::Downloading;

        list.wait_valid().await?;
        self.state = SyncState::Valid;

        let downloaded: Vec<Command> = list.iter().cloned().collect();
        verify(&baseline, &downloaded)?;
        Ok(downloaded)
    }
}

/// Check a downloaded mission against the uploaded baseline: one extra entry
/// (home) up front, then every uploaded command in order, `seq` ignored.
pub fn verify(baseline: &[Command], downloaded: &[Command]) -> Result<(), MissionError> {
    if downloaded.len() != baseline.len() + 1 {
        return Err(MissionError::VerificationMismatch(Mismatch::Length {
            expected: baseline.len() + 1,
            actual: downloaded.len(),
        }));
    }
    for (i, (sent, got)) in baseline.iter().zip(&downloaded[1..]).enumerate() {
        if let Some(m) = sent.diff(got) {
            return Err(MissionError::VerificationMismatch(Mismatch::Field {
                index: i + 1,
                field: m.field,
                expected: m.expected,
                actual: m.actual,
            }));
        }
    }
    Ok(())
}
