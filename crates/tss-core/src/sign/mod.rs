//! Distributed signature generation
//!
//! [`run_signing`] drives one [`SigningParty`] per member of a [`SignerSet`];
//! [`sign_message`] wraps it with hashing and independent verification of the
//! result.

mod dsg;
mod messages;

pub use dsg::SigningParty;
pub use messages::*;

use crate::aggregate::{finalize_signature, message_digest, SignatureResult};
use crate::mpc::{run_protocol, RunConfig};
use crate::session::SignerSet;
use crate::{Error, Result, SessionConfig, SignatureData};
use tracing::{debug, info, instrument};

/// Run signing over a prepared session and return the signature reported
/// by the quorum.
#[instrument(skip(signers, config), fields(signers = signers.len(), digest = %hex::encode(digest)))]
pub async fn run_signing(
    signers: SignerSet,
    digest: [u8; 32],
    config: &RunConfig,
) -> Result<SignatureData> {
    let SignerSet { parties, keys } = signers;
    let Some(first) = keys.first() else {
        return Err(Error::ThresholdNotMet {
            required: 1,
            actual: 0,
        });
    };
    let threshold = first.threshold;
    let public_key = first.public_key.clone();

    if keys.len() != parties.len() {
        return Err(Error::InvalidConfig(format!(
            "{} key shares for {} parties",
            keys.len(),
            parties.len()
        )));
    }
    if keys
        .iter()
        .any(|key| key.public_key != public_key || key.threshold != threshold)
    {
        return Err(Error::InvalidConfig(
            "key shares come from different key generations".into(),
        ));
    }
    if parties.len() < threshold + 1 {
        return Err(Error::ThresholdNotMet {
            required: threshold + 1,
            actual: parties.len(),
        });
    }

    let mut session = Vec::with_capacity(parties.len());
    for (index, key) in keys.into_iter().enumerate() {
        let session_config = SessionConfig::new(parties.clone(), threshold, index)?;
        session.push(SigningParty::new(session_config, key, digest)?);
    }

    let signatures = run_protocol(session, config, |party, _| {
        debug!(party, "Signature reported");
        Ok(())
    })
    .await?;

    signatures
        .into_iter()
        .next()
        .ok_or_else(|| Error::Internal("signing run produced no signature".into()))
}

/// Hash `message`, sign it with `signers` and re-verify the result against
/// the joint public key.
pub async fn sign_message(
    signers: SignerSet,
    message: &str,
    config: &RunConfig,
) -> Result<SignatureResult> {
    let digest = message_digest(message);
    let public_key = signers
        .keys
        .first()
        .map(|key| key.public_key.clone())
        .ok_or(Error::ThresholdNotMet {
            required: 1,
            actual: 0,
        })?;

    let signature = run_signing(signers, digest, config).await?;
    let result = finalize_signature(&signature, &public_key, &digest)?;

    info!(r = %result.r, s = %result.s, v = %result.v, "ECDSA signing done");
    Ok(result)
}
