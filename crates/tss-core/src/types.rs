//! Core types shared by the router, the fixture store and the bundled engine

use crate::{Error, Result};
use k256::{
    ecdsa::VerifyingKey,
    elliptic_curve::{
        sec1::{FromEncodedPoint, ToEncodedPoint},
        Field, PrimeField,
    },
    AffinePoint, ProjectivePoint, Scalar,
};
use rand::rngs::OsRng;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Position of a party inside one session (0-based)
pub type PartyIndex = usize;

/// Per-share identifier assigned at key generation.
///
/// A 32-byte big-endian unsigned integer; its ordering is the canonical
/// ordering of parties within a session.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ShareId(#[serde(with = "serde_hex")] [u8; 32]);

impl ShareId {
    /// Draw a fresh, non-zero identifier
    pub fn random() -> Self {
        loop {
            let scalar = Scalar::random(&mut OsRng);
            if !bool::from(scalar.is_zero()) {
                return Self::from_scalar(&scalar);
            }
        }
    }

    pub fn from_scalar(scalar: &Scalar) -> Self {
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(scalar.to_bytes().as_slice());
        Self(bytes)
    }

    /// Evaluation point of this share
    pub fn to_scalar(&self) -> Result<Scalar> {
        decode_scalar(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<u64> for ShareId {
    fn from(value: u64) -> Self {
        Self::from_scalar(&Scalar::from(value))
    }
}

impl fmt::Debug for ShareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShareId({})", self)
    }
}

impl fmt::Display for ShareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = hex::encode(self.0);
        let trimmed = hex.trim_start_matches('0');
        write!(f, "0x{}", if trimmed.is_empty() { "0" } else { trimmed })
    }
}

/// A participant as seen by the router
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyIdentity {
    /// Position in the sorted session list; messages are addressed by it
    pub index: PartyIndex,
    /// Human-readable name
    pub moniker: String,
    /// Canonical ordering key
    pub share_id: ShareId,
}

impl PartyIdentity {
    /// Create an identity; the index is assigned by [`PartyIdentity::sort`]
    pub fn new(moniker: impl Into<String>, share_id: ShareId) -> Self {
        Self {
            index: 0,
            moniker: moniker.into(),
            share_id,
        }
    }

    /// Sort by share identifier and re-assign indices so that
    /// `parties[i].index == i`.
    pub fn sort(mut parties: Vec<PartyIdentity>) -> Vec<PartyIdentity> {
        parties.sort_by(|a, b| a.share_id.cmp(&b.share_id));
        for (index, party) in parties.iter_mut().enumerate() {
            party.index = index;
        }
        parties
    }

    /// Fresh identities for a first key generation, monikers `1..=n`
    pub fn generate(n: usize) -> Vec<PartyIdentity> {
        let parties = (1..=n)
            .map(|i| PartyIdentity::new(i.to_string(), ShareId::random()))
            .collect();
        Self::sort(parties)
    }
}

impl fmt::Display for PartyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{},{}}}", self.index, self.moniker)
    }
}

/// Auxiliary per-party material that can be reused across key generations
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct PreParams {
    /// This party's contribution to the joint chain code
    #[serde(with = "serde_hex")]
    pub chain_code_seed: [u8; 32],
}

impl PreParams {
    pub fn generate() -> Self {
        Self {
            chain_code_seed: rand::random(),
        }
    }
}

/// Public key share of one party
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicShare {
    pub share_id: ShareId,
    /// Compressed SEC1 point
    #[serde(with = "serde_hex")]
    pub point: Vec<u8>,
}

/// Key share held by a party after key generation, persisted as a fixture
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct KeyShare {
    /// Index this share is stored under
    pub party_index: PartyIndex,

    #[zeroize(skip)]
    pub share_id: ShareId,

    /// Total number of parties
    pub n_parties: usize,

    /// Threshold; signing needs `threshold + 1` parties
    pub threshold: usize,

    /// This party's secret share (x_i)
    #[serde(with = "scalar_serde")]
    pub secret_share: Scalar,

    /// Aggregate public key (compressed)
    #[zeroize(skip)]
    #[serde(with = "serde_hex")]
    pub public_key: Vec<u8>,

    /// Public key shares of all parties
    #[zeroize(skip)]
    pub public_shares: Vec<PublicShare>,

    /// Joint chain code
    #[serde(with = "serde_hex")]
    pub chain_code: [u8; 32],

    pub pre_params: PreParams,
}

impl fmt::Debug for KeyShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyShare")
            .field("party_index", &self.party_index)
            .field("share_id", &self.share_id)
            .field("n_parties", &self.n_parties)
            .field("threshold", &self.threshold)
            .field("public_key", &hex::encode(&self.public_key))
            .finish_non_exhaustive()
    }
}

impl KeyShare {
    /// Get the public key as a ProjectivePoint
    pub fn public_key_point(&self) -> Result<ProjectivePoint> {
        decode_point(&self.public_key)
    }

    pub fn verifying_key(&self) -> Result<VerifyingKey> {
        VerifyingKey::from_sec1_bytes(&self.public_key)
            .map_err(|e| Error::Crypto(format!("invalid public key: {}", e)))
    }
}

mod scalar_serde {
    use k256::{elliptic_curve::PrimeField, Scalar};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(scalar: &Scalar, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(scalar.to_bytes()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Scalar, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(s).map_err(de::Error::custom)?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| de::Error::custom("Invalid scalar length"))?;
        Option::from(Scalar::from_repr(array.into()))
            .ok_or_else(|| de::Error::custom("Scalar out of range"))
    }
}

pub(crate) mod serde_hex {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S, T>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: AsRef<[u8]>,
    {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: TryFrom<Vec<u8>>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(s.trim_start_matches("0x")).map_err(de::Error::custom)?;
        T::try_from(bytes).map_err(|_| de::Error::custom("Unexpected byte length"))
    }
}

/// ECDSA signature as reported by a signing participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureData {
    /// R component
    #[serde(with = "serde_hex")]
    pub r: [u8; 32],
    /// S component (low-s normalized)
    #[serde(with = "serde_hex")]
    pub s: [u8; 32],
    /// Recovery ID (0 or 1)
    pub recovery_id: u8,
    /// Digest that was signed
    #[serde(with = "serde_hex")]
    pub digest: [u8; 32],
}

impl SignatureData {
    /// Convert to bytes (r || s)
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(&self.r);
        bytes[32..].copy_from_slice(&self.s);
        bytes
    }
}

/// Parameters handed to one participant of a run
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// All session members, sorted by share identifier
    pub parties: Vec<PartyIdentity>,

    /// Threshold (t, so t+1 signers are needed)
    pub threshold: usize,

    /// This party's index
    pub party: PartyIndex,
}

impl SessionConfig {
    pub fn new(parties: Vec<PartyIdentity>, threshold: usize, party: PartyIndex) -> Result<Self> {
        validate_threshold(parties.len(), threshold)?;
        if party >= parties.len() {
            return Err(Error::InvalidPartyId(party));
        }
        for (position, identity) in parties.iter().enumerate() {
            if identity.index != position {
                return Err(Error::InvalidConfig(format!(
                    "party {} listed at position {}",
                    identity, position
                )));
            }
        }
        if parties.windows(2).any(|w| w[0].share_id >= w[1].share_id) {
            return Err(Error::InvalidConfig(
                "parties must be sorted by distinct share identifiers".into(),
            ));
        }

        Ok(Self {
            parties,
            threshold,
            party,
        })
    }

    pub fn n_parties(&self) -> usize {
        self.parties.len()
    }

    pub fn me(&self) -> &PartyIdentity {
        &self.parties[self.party]
    }
}

/// Reject a participant/threshold pair before anything is started
pub fn validate_threshold(participants: usize, threshold: usize) -> Result<()> {
    if participants == 0 {
        return Err(Error::InvalidConfig("At least one participant is required".into()));
    }
    if threshold > participants {
        return Err(Error::InvalidConfig(format!(
            "Threshold {} cannot exceed number of participants {}",
            threshold, participants
        )));
    }
    Ok(())
}

/// A protocol message travelling between session members
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolMessage {
    /// Sender index
    pub from: PartyIndex,
    /// Recipient index; `None` broadcasts to every other member
    pub to: Option<PartyIndex>,
    /// Protocol round
    pub round: u32,
    /// Engine-defined payload
    pub payload: Vec<u8>,
}

impl ProtocolMessage {
    pub fn broadcast<T: Serialize>(from: PartyIndex, round: u32, body: &T) -> Result<Self> {
        Ok(Self {
            from,
            to: None,
            round,
            payload: serde_json::to_vec(body)?,
        })
    }

    pub fn direct<T: Serialize>(from: PartyIndex, to: PartyIndex, round: u32, body: &T) -> Result<Self> {
        Ok(Self {
            from,
            to: Some(to),
            round,
            payload: serde_json::to_vec(body)?,
        })
    }

    pub fn is_broadcast(&self) -> bool {
        self.to.is_none()
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.payload).map_err(|e| Error::Deserialization(e.to_string()))
    }
}

pub(crate) fn decode_point(bytes: &[u8]) -> Result<ProjectivePoint> {
    let encoded = k256::EncodedPoint::from_bytes(bytes)
        .map_err(|e| Error::Deserialization(e.to_string()))?;
    let affine: AffinePoint = Option::from(AffinePoint::from_encoded_point(&encoded))
        .ok_or_else(|| Error::Deserialization("Invalid curve point".into()))?;
    Ok(ProjectivePoint::from(affine))
}

pub(crate) fn encode_point(point: &ProjectivePoint) -> Vec<u8> {
    point.to_affine().to_encoded_point(true).as_bytes().to_vec()
}

pub(crate) fn decode_scalar(bytes: &[u8]) -> Result<Scalar> {
    let array: [u8; 32] = bytes
        .try_into()
        .map_err(|_| Error::Deserialization("Invalid scalar length".into()))?;
    Option::from(Scalar::from_repr(array.into()))
        .ok_or_else(|| Error::Deserialization("Scalar out of range".into()))
}
