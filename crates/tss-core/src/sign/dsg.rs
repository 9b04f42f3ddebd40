//! Two-round signing participant
//!
//! Round 1 broadcasts a nonce share k_i, so every signer learns k = Σ k_i and
//! R = k·G. Round 2 broadcasts s_i = k⁻¹(m/|S| + r·λ_i·x_i); the sum of all
//! s_i is a valid ECDSA signature under the joint key. Nonce shares travel in
//! the clear: this engine drives in-process simulations and offers no secrecy
//! against co-signers.

use super::{SignRound1Message, SignRound2Message};
use crate::mpc::{async_trait, Participant, Progress};
use crate::types::decode_scalar;
use crate::{
    Error, KeyShare, PartyIdentity, PartyIndex, ProtocolMessage, Result, SessionConfig,
    SignatureData,
};
use k256::{
    ecdsa::RecoveryId,
    elliptic_curve::{
        bigint::U256, ops::Reduce, point::AffineCoordinates, scalar::IsHigh, Field,
    },
    FieldBytes, ProjectivePoint, Scalar,
};
use rand::rngs::OsRng;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

struct Nonce {
    k_inv: Scalar,
    r: Scalar,
    y_is_odd: bool,
    x_is_reduced: bool,
}

/// One signer of a signing run
pub struct SigningParty {
    config: SessionConfig,
    key: KeyShare,
    digest: [u8; 32],
    nonce_shares: BTreeMap<PartyIndex, Scalar>,
    sigma_shares: BTreeMap<PartyIndex, Scalar>,
    nonce: Option<Nonce>,
}

impl SigningParty {
    pub fn new(config: SessionConfig, key: KeyShare, digest: [u8; 32]) -> Result<Self> {
        if key.share_id != config.me().share_id {
            return Err(Error::InvalidConfig(format!(
                "key share {} does not belong to party {}",
                key.share_id,
                config.me()
            )));
        }
        if config.n_parties() < key.threshold + 1 {
            return Err(Error::ThresholdNotMet {
                required: key.threshold + 1,
                actual: config.n_parties(),
            });
        }

        Ok(Self {
            config,
            key,
            digest,
            nonce_shares: BTreeMap::new(),
            sigma_shares: BTreeMap::new(),
            nonce: None,
        })
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

    fn advance(&mut self, mut outgoing: Vec<ProtocolMessage>) -> Result<Progress<SignatureData>> {
        let n = self.config.n_parties();

        if self.nonce.is_none() && self.nonce_shares.len() == n {
            debug!(party = self.me(), "Signing round 2: partial signature");
            let nonce = combine_nonce_shares(self.nonce_shares.values())?;

            let lambda = lagrange_coefficient(&self.config)?;
            let m = <Scalar as Reduce<U256>>::reduce_bytes(&FieldBytes::from(self.digest));
            let n_inv = Option::<Scalar>::from(Scalar::from(n as u64).invert())
                .ok_or_else(|| Error::Crypto("empty signing set".into()))?;
            let sigma = nonce.k_inv * (m * n_inv + nonce.r * lambda * self.key.secret_share);

            self.sigma_shares.insert(self.me(), sigma);
            self.nonce = Some(nonce);

            let round2 = SignRound2Message {
                party: self.me(),
                sigma_share: sigma.to_bytes().to_vec(),
            };
            outgoing.push(ProtocolMessage::broadcast(self.me(), 2, &round2)?);
        }

        let Some(nonce) = &self.nonce else {
            return Ok(Progress::send(outgoing));
        };
        if self.sigma_shares.len() < n {
            return Ok(Progress::send(outgoing));
        }

        let mut s = self.sigma_shares.values().fold(Scalar::ZERO, |acc, s| acc + s);
        if bool::from(s.is_zero()) {
            return Err(Error::Crypto("signature s is zero".into()));
        }
        let mut y_is_odd = nonce.y_is_odd;
        if bool::from(s.is_high()) {
            s = -s;
            y_is_odd = !y_is_odd;
        }

        let signature = SignatureData {
            r: nonce.r.to_bytes().into(),
            s: s.to_bytes().into(),
            recovery_id: RecoveryId::new(y_is_odd, nonce.x_is_reduced).to_byte(),
            digest: self.digest,
        };

        info!(
            party = self.me(),
            r = hex::encode(signature.r),
            s = hex::encode(signature.s),
            "Signing completed"
        );

        Ok(Progress::send(outgoing).finish(signature))
    }
}

#[async_trait]
impl Participant for SigningParty {
    type Output = SignatureData;

    fn identity(&self) -> &PartyIdentity {
        self.config.me()
    }

    #[instrument(skip(self), fields(party = self.config.party))]
    async fn start(&mut self) -> Result<Progress<SignatureData>> {
        info!(
            signers = self.config.n_parties(),
            threshold = self.key.threshold,
            "Starting signing"
        );

        let k_i = Scalar::random(&mut OsRng);
        self.nonce_shares.insert(self.me(), k_i);

        let round1 = SignRound1Message {
            party: self.me(),
            nonce_share: k_i.to_bytes().to_vec(),
        };
        let outgoing = vec![ProtocolMessage::broadcast(self.me(), 1, &round1)?];

        self.advance(outgoing)
    }

    async fn update(&mut self, message: ProtocolMessage) -> Result<Progress<SignatureData>> {
        let from = message.from;
        match message.round {
            1 => {
                let msg: SignRound1Message = message.decode()?;
                if msg.party != from {
                    return Err(self.protocol_error(format!(
                        "nonce share from {} claims to be from {}",
                        from, msg.party
                    )));
                }
                let k = decode_scalar(&msg.nonce_share)?;
                if self.nonce_shares.insert(from, k).is_some() {
                    return Err(self.protocol_error(format!("duplicate nonce share from {}", from)));
                }
            }
            2 => {
                let msg: SignRound2Message = message.decode()?;
                if msg.party != from {
                    return Err(self.protocol_error(format!(
                        "partial signature from {} claims to be from {}",
                        from, msg.party
                    )));
                }
                let sigma = decode_scalar(&msg.sigma_share)?;
                if self.sigma_shares.insert(from, sigma).is_some() {
                    return Err(self.protocol_error(format!("duplicate partial signature from {}", from)));
                }
            }
            round => {
                return Err(self.protocol_error(format!("unexpected round {} from {}", round, from)));
            }
        }

        self.advance(Vec::new())
    }
}

fn combine_nonce_shares<'a>(shares: impl Iterator<Item = &'a Scalar>) -> Result<Nonce> {
    let k = shares.fold(Scalar::ZERO, |acc, k| acc + k);
    let k_inv = Option::<Scalar>::from(k.invert())
        .ok_or_else(|| Error::Crypto("joint nonce is zero".into()))?;

    let big_r = (ProjectivePoint::GENERATOR * k).to_affine();
    let x = big_r.x();
    let r = <Scalar as Reduce<U256>>::reduce_bytes(&x);
    if bool::from(r.is_zero()) {
        return Err(Error::Crypto("signature r is zero".into()));
    }

    Ok(Nonce {
        k_inv,
        r,
        y_is_odd: bool::from(big_r.y_is_odd()),
        x_is_reduced: r.to_bytes() != x,
    })
}

/// Lagrange coefficient at zero for this party over the session's share
/// identifiers
fn lagrange_coefficient(config: &SessionConfig) -> Result<Scalar> {
    let x_i = config.me().share_id.to_scalar()?;
    let mut numerator = Scalar::ONE;
    let mut denominator = Scalar::ONE;

    for party in &config.parties {
        if party.index == config.party {
            continue;
        }
        let x_j = party.share_id.to_scalar()?;
        numerator *= x_j;
        denominator *= x_j - x_i;
    }

    let inverse = Option::<Scalar>::from(denominator.invert())
        .ok_or_else(|| Error::Crypto("duplicate share identifiers".into()))?;
    Ok(numerator * inverse)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::sample_share;
    use crate::ShareId;

    fn config_for(ids: &[u64], party: PartyIndex) -> SessionConfig {
        let parties = ids
            .iter()
            .map(|id| PartyIdentity::new(id.to_string(), ShareId::from(*id)))
            .collect();
        SessionConfig::new(PartyIdentity::sort(parties), 1, party).unwrap()
    }

    #[test]
    fn test_lagrange_coefficients_interpolate_constant() {
        // f(x) = 5 + 3x; shares at 1, 2 and 3
        let ids = [1u64, 2, 3];
        let f = |x: u64| Scalar::from(5u64) + Scalar::from(3u64) * Scalar::from(x);

        let mut secret = Scalar::ZERO;
        for (i, id) in ids.iter().enumerate() {
            let lambda = lagrange_coefficient(&config_for(&ids, i)).unwrap();
            secret += lambda * f(*id);
        }

        assert_eq!(secret, Scalar::from(5u64));
    }

    #[test]
    fn test_rejects_foreign_key_share() {
        let config = config_for(&[1, 2], 0);

        let result = SigningParty::new(config, sample_share(0, 2), [0u8; 32]);

        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_too_few_signers() {
        let parties = PartyIdentity::sort(vec![PartyIdentity::new("1", ShareId::from(1))]);
        let config = SessionConfig::new(parties, 0, 0).unwrap();

        // sample shares carry threshold 1, so two signers are needed
        let result = SigningParty::new(config, sample_share(0, 1), [0u8; 32]);

        assert!(matches!(result, Err(Error::ThresholdNotMet { required: 2, actual: 1 })));
    }
}
