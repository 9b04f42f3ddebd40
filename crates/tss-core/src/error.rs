//! Error types for orchestrated threshold runs

use crate::session::InputError;
use crate::PartyIndex;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for orchestration operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building, running or finalizing a threshold run
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid party or session configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Threshold requirements not met
    #[error("Threshold not met: required {required}, got {actual}")]
    ThresholdNotMet { required: usize, actual: usize },

    /// Invalid party index
    #[error("Invalid party index: {0}")]
    InvalidPartyId(usize),

    /// A point-to-point message named its own sender as recipient
    #[error("party {party} tried to send a message to itself")]
    SelfAddressed { party: PartyIndex },

    /// Rejected operator input
    #[error(transparent)]
    Input(#[from] InputError),

    /// Fixture file missing, unreadable or corrupt
    #[error("fixture for party {index} at {}: {reason}", path.display())]
    Storage {
        index: PartyIndex,
        path: PathBuf,
        reason: String,
    },

    /// Failure reported by a participant during a run
    #[error("party {party} failed: {reason}")]
    Protocol { party: PartyIndex, reason: String },

    /// Message or signature verification failed
    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Cryptographic operation failed
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Run deadline elapsed
    #[error("Timeout waiting for {0}")]
    Timeout(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Errors the operator can correct by re-entering input
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Input(_))
    }

    pub(crate) fn storage(index: PartyIndex, path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::Storage {
            index,
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
