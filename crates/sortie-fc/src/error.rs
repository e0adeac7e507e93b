use std::fmt;
use std::time::Duration;

use sortie_proto::InvalidCommand;
use thiserror::Error;

/// Error type for mission synchronisation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MissionError {
    /// No live vehicle link
    #[error("vehicle not connected")]
    NotConnected,

    /// Command parameters cannot be encoded
    #[error(transparent)]
    InvalidCommand(#[from] InvalidCommand),

    /// Link-level failure during flush/download
    #[error("transport error: {0}")]
    Transport(String),

    /// wait_valid (or a transport handshake) exceeded its bound
    #[error("timed out after {waited:?} waiting for {what}")]
    Timeout { what: &'static str, waited: Duration },

    /// Downloaded mission differs from what was uploaded
    #[error("mission verification failed: {0}")]
    VerificationMismatch(Mismatch),

    /// Another flush/download has not completed yet
    #[error("{0} rejected: download in flight")]
    Busy(&'static str),

    /// wait_valid without a download to wait for
    #[error("no download in flight")]
    NoDownloadPending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mismatch {
    Length { expected: usize, actual: usize },
    Field {
        index: usize,
        field: &'static str,
        expected: String,
        actual: String,
    },
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mismatch::Length { expected, actual } => {
                write!(f, "expected {} entries (home + uploaded), got {}", expected, actual)
            }
            Mismatch::Field { index, field, expected, actual } => {
                write!(f, "entry {} field {}: expected {}, got {}", index, field, expected, actual)
            }
        }
    }
}

impl MissionError {
    pub(crate) fn transport(e: impl fmt::Display) -> Self {
        MissionError::Transport(e.to_string())
    }
}
