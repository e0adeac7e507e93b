use async_trait::async_trait;
use sortie_proto::Command;

use crate::error::MissionError;

/// Remote mission storage on a vehicle.
///
/// Upload and download are decoupled: `upload` resolves once the store has
/// acknowledged the whole sequence, while a download is started with
/// `request_download` and then advanced with `poll_download` until it yields
/// the store's authoritative sequence (home entry first).
///
/// Implementations may retry at the transport level; callers do not.
#[async_trait]
pub trait MissionStore: Send {
    /// Whether the vehicle link is currently alive.
    fn is_connected(&self) -> bool;

    /// Replace the remote mission with `items`. An empty slice clears it.
    async fn upload(&mut self, items: &[Command]) -> Result<(), MissionError>;

    /// Start pulling the remote mission. Must not block.
    fn request_download(&mut self) -> Result<(), MissionError>;

    /// Advance the in-flight download. Returns `Ok(Some(_))` once complete.
    fn poll_download(&mut self) -> Result<Option<Vec<Command>>, MissionError>;

    /// Forget an in-flight download (after a timeout).
    fn abort_download(&mut self) {}
}
