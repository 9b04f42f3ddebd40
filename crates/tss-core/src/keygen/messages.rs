//! Key generation message types

use crate::PartyIndex;
use serde::{Deserialize, Serialize};

/// Round 1 broadcast: commitment to the secret polynomial
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeygenRound1Message {
    /// Sender party index
    pub party: PartyIndex,
    /// Commitments to polynomial coefficients (Feldman VSS)
    pub commitments: Vec<Vec<u8>>,
    /// Sender's contribution to the joint chain code
    pub chain_code_seed: [u8; 32],
}

/// Round 2 point-to-point: secret share for the recipient
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeygenRound2Message {
    /// Sender party index
    pub from: PartyIndex,
    /// Receiver party index
    pub to: PartyIndex,
    /// Polynomial evaluated at the receiver's share identifier
    pub share: Vec<u8>,
}
