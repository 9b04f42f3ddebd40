//! Signing message types

use crate::PartyIndex;
use serde::{Deserialize, Serialize};

/// Round 1 broadcast: nonce share
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignRound1Message {
    /// Sender party index
    pub party: PartyIndex,
    /// k_i
    pub nonce_share: Vec<u8>,
}

/// Round 2 broadcast: partial signature
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignRound2Message {
    /// Sender party index
    pub party: PartyIndex,
    /// Sigma share
    pub sigma_share: Vec<u8>,
}
