//! Feldman-VSS key generation participant

use super::{KeygenRound1Message, KeygenRound2Message};
use crate::mpc::{async_trait, Participant, Progress};
use crate::types::{decode_point, decode_scalar, encode_point};
use crate::{
    Error, KeyShare, PartyIdentity, PartyIndex, PreParams, ProtocolMessage, PublicShare, Result,
    SessionConfig,
};
use k256::{elliptic_curve::Field, ProjectivePoint, Scalar};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

/// One party of a key generation run.
///
/// Round 1 broadcasts commitments to a random polynomial of degree
/// `threshold`; round 2 sends each peer its evaluation at the peer's share
/// identifier. Both rounds are emitted on start, and peers' messages are
/// buffered until everything has arrived.
pub struct KeygenParty {
    config: SessionConfig,
    pre_params: PreParams,
    polynomial: Vec<Scalar>,
    commitments: BTreeMap<PartyIndex, KeygenRound1Message>,
    shares: BTreeMap<PartyIndex, Scalar>,
}

impl KeygenParty {
    /// `pre_params` from an earlier fixture are reused, otherwise fresh ones
    /// are generated
    pub fn new(config: SessionConfig, pre_params: Option<PreParams>) -> Self {
        Self {
            config,
            pre_params: pre_params.unwrap_or_else(PreParams::generate),
            polynomial: Vec::new(),
            commitments: BTreeMap::new(),
            shares: BTreeMap::new(),
        }
    }

    fn me(&self) -> PartyIndex {
        self.config.party
    }

    fn protocol_error(&self, reason: impl Into<String>) -> Error {
        Error::Protocol {
            party: self.me(),
            reason: reason.into(),
        }
    }

    fn try_finish(&mut self, outgoing: Vec<ProtocolMessage>) -> Result<Progress<KeyShare>> {
        let n = self.config.n_parties();
        if self.commitments.len() < n || self.shares.len() < n {
            return Ok(Progress::send(outgoing));
        }

        debug!(party = self.me(), "Keygen: verifying shares");
        let x = self.config.me().share_id.to_scalar()?;
        let mut commitments = BTreeMap::new();
        for (from, msg) in &self.commitments {
            commitments.insert(*from, decode_commitments(&msg.commitments)?);
        }
        for (from, share) in &self.shares {
            verify_share(*from, share, &commitments[from], &x)?;
        }

        let secret_share = self.shares.values().fold(Scalar::ZERO, |acc, s| acc + s);
        let joint = sum_commitments(commitments.values(), self.config.threshold + 1);
        let public_key = encode_point(&joint[0]);

        let mut public_shares = Vec::with_capacity(n);
        for party in &self.config.parties {
            let point = evaluate_commitments(&joint, &party.share_id.to_scalar()?);
            public_shares.push(PublicShare {
                share_id: party.share_id,
                point: encode_point(&point),
            });
        }

        let mut hasher = Sha256::new();
        for msg in self.commitments.values() {
            hasher.update(msg.chain_code_seed);
        }
        let chain_code: [u8; 32] = hasher.finalize().into();

        let key_share = KeyShare {
            party_index: self.me(),
            share_id: self.config.me().share_id,
            n_parties: n,
            threshold: self.config.threshold,
            secret_share,
            public_key,
            public_shares,
            chain_code,
            pre_params: self.pre_params.clone(),
        };

        info!(
            party = self.me(),
            public_key = hex::encode(&key_share.public_key),
            "Keygen completed successfully"
        );

        Ok(Progress::send(outgoing).finish(key_share))
    }
}

#[async_trait]
impl Participant for KeygenParty {
    type Output = KeyShare;

    fn identity(&self) -> &PartyIdentity {
        self.config.me()
    }

    #[instrument(skip(self), fields(party = self.config.party))]
    async fn start(&mut self) -> Result<Progress<KeyShare>> {
        info!(
            n_parties = self.config.n_parties(),
            threshold = self.config.threshold,
            "Starting keygen"
        );
        let me = self.me();

        let (polynomial, commitments) = generate_secret_polynomial(self.config.threshold);
        self.polynomial = polynomial;

        let round1 = KeygenRound1Message {
            party: me,
            commitments,
            chain_code_seed: self.pre_params.chain_code_seed,
        };
        let mut outgoing = vec![ProtocolMessage::broadcast(me, 1, &round1)?];
        self.commitments.insert(me, round1);

        for party in &self.config.parties {
            let share = evaluate_polynomial(&self.polynomial, &party.share_id.to_scalar()?);
            if party.index == me {
                self.shares.insert(me, share);
                continue;
            }
            let round2 = KeygenRound2Message {
                from: me,
                to: party.index,
                share: share.to_bytes().to_vec(),
            };
            outgoing.push(ProtocolMessage::direct(me, party.index, 2, &round2)?);
        }

        self.try_finish(outgoing)
    }

    async fn update(&mut self, message: ProtocolMessage) -> Result<Progress<KeyShare>> {
        let from = message.from;
        match message.round {
            1 => {
                let msg: KeygenRound1Message = message.decode()?;
                if msg.party != from {
                    return Err(self.protocol_error(format!(
                        "commitment from {} claims to be from {}",
                        from, msg.party
                    )));
                }
                if msg.commitments.len() != self.config.threshold + 1 {
                    return Err(self.protocol_error(format!(
                        "party {} committed to {} coefficients, expected {}",
                        from,
                        msg.commitments.len(),
                        self.config.threshold + 1
                    )));
                }
                if self.commitments.insert(from, msg).is_some() {
                    return Err(self.protocol_error(format!("duplicate commitment from {}", from)));
                }
            }
            2 => {
                let msg: KeygenRound2Message = message.decode()?;
                if msg.from != from || msg.to != self.me() {
                    return Err(self.protocol_error(format!(
                        "misaddressed share {} -> {}",
                        msg.from, msg.to
                    )));
                }
                let share = decode_scalar(&msg.share)?;
                if self.shares.insert(from, share).is_some() {
                    return Err(self.protocol_error(format!("duplicate share from {}", from)));
                }
            }
            round => {
                return Err(self.protocol_error(format!("unexpected round {} from {}", round, from)));
            }
        }

        self.try_finish(Vec::new())
    }
}

/// Generate a random secret polynomial of degree `threshold`
fn generate_secret_polynomial(threshold: usize) -> (Vec<Scalar>, Vec<Vec<u8>>) {
    let mut rng = OsRng;
    let mut coefficients = Vec::with_capacity(threshold + 1);
    let mut commitments = Vec::with_capacity(threshold + 1);

    for _ in 0..=threshold {
        let coef = Scalar::random(&mut rng);
        commitments.push(encode_point(&(ProjectivePoint::GENERATOR * coef)));
        coefficients.push(coef);
    }

    (coefficients, commitments)
}

/// Evaluate polynomial at a point
fn evaluate_polynomial(coefficients: &[Scalar], x: &Scalar) -> Scalar {
    let mut result = Scalar::ZERO;
    let mut x_power = Scalar::ONE;

    for coef in coefficients {
        result += *coef * x_power;
        x_power *= x;
    }

    result
}

fn evaluate_commitments(commitments: &[ProjectivePoint], x: &Scalar) -> ProjectivePoint {
    let mut result = ProjectivePoint::IDENTITY;
    let mut x_power = Scalar::ONE;

    for commitment in commitments {
        result += *commitment * x_power;
        x_power *= x;
    }

    result
}

fn decode_commitments(commitments: &[Vec<u8>]) -> Result<Vec<ProjectivePoint>> {
    commitments
        .iter()
        .map(|bytes| {
            decode_point(bytes).map_err(|_| Error::VerificationFailed("Invalid commitment point".into()))
        })
        .collect()
}

/// Coefficient-wise sum of every party's commitments
fn sum_commitments<'a>(
    all: impl Iterator<Item = &'a Vec<ProjectivePoint>>,
    degree: usize,
) -> Vec<ProjectivePoint> {
    let mut joint = vec![ProjectivePoint::IDENTITY; degree];
    for commitments in all {
        for (acc, c) in joint.iter_mut().zip(commitments) {
            *acc += c;
        }
    }
    joint
}

/// Verify a share against its sender's commitments
fn verify_share(from: PartyIndex, share: &Scalar, commitments: &[ProjectivePoint], x: &Scalar) -> Result<()> {
    let expected = ProjectivePoint::GENERATOR * share;
    let actual = evaluate_commitments(commitments, x);

    if expected != actual {
        return Err(Error::VerificationFailed(format!(
            "Share from party {} does not match commitment",
            from
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_polynomial_matches_commitments() {
        let (poly, commitments) = generate_secret_polynomial(2);
        let points = decode_commitments(&commitments).unwrap();
        let x = Scalar::from(7u64);

        let share = evaluate_polynomial(&poly, &x);

        assert!(verify_share(0, &share, &points, &x).is_ok());
        assert!(verify_share(0, &(share + Scalar::ONE), &points, &x).is_err());
    }

    #[tokio::test]
    async fn test_single_party_finishes_on_start() {
        let parties = PartyIdentity::generate(1);
        let config = SessionConfig::new(parties, 0, 0).unwrap();
        let mut party = KeygenParty::new(config, None);

        let progress = party.start().await.unwrap();

        // the broadcast still goes out; the router has nobody to deliver it to
        assert_eq!(progress.outgoing.len(), 1);
        let share = progress.output.unwrap();
        assert_eq!(
            share.public_key_point().unwrap(),
            ProjectivePoint::GENERATOR * share.secret_share
        );
    }

    #[tokio::test]
    async fn test_rejects_wrong_commitment_count() {
        let parties = PartyIdentity::generate(2);
        let mut party = KeygenParty::new(SessionConfig::new(parties, 1, 0).unwrap(), None);
        party.start().await.unwrap();

        let bogus = KeygenRound1Message {
            party: 1,
            commitments: vec![encode_point(&ProjectivePoint::GENERATOR)],
            chain_code_seed: [0u8; 32],
        };
        let msg = ProtocolMessage::broadcast(1, 1, &bogus).unwrap();

        assert!(matches!(party.update(msg).await, Err(Error::Protocol { party: 0, .. })));
    }
}
