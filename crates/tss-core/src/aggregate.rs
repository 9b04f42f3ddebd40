//! Signature finalization
//!
//! Turns the engine's [`SignatureData`] into the externally reported
//! `{ r, s, v }` triple, after checking it independently against the joint
//! public key.

use crate::{Error, Result, SignatureData};
use k256::ecdsa::{signature::hazmat::PrehashVerifier, RecoveryId, Signature, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tiny_keccak::{Hasher, Keccak};

/// Added to the recovery id to form `v`
pub const RECOVERY_OFFSET: u8 = 27;

/// Reported signature: `r`/`s` as minimal `0x` hex, `v` as decimal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureResult {
    pub r: String,
    pub s: String,
    pub v: String,
}

/// SHA-256 of the message's UTF-8 bytes
pub fn message_digest(message: &str) -> [u8; 32] {
    Sha256::digest(message.as_bytes()).into()
}

/// Verify `signature` against `public_key` and render it.
///
/// The digest must be the one that was requested, the signature must verify,
/// and recovering with `recovery_id` must give back the same key. Any
/// mismatch is [`Error::VerificationFailed`].
pub fn finalize_signature(
    signature: &SignatureData,
    public_key: &[u8],
    digest: &[u8; 32],
) -> Result<SignatureResult> {
    if &signature.digest != digest {
        return Err(Error::VerificationFailed(
            "engine signed a different digest".into(),
        ));
    }

    let verifying_key = VerifyingKey::from_sec1_bytes(public_key)
        .map_err(|e| Error::Crypto(format!("invalid public key: {}", e)))?;
    let sig = Signature::from_scalars(signature.r, signature.s)
        .map_err(|e| Error::VerificationFailed(format!("malformed signature: {}", e)))?;

    verifying_key
        .verify_prehash(digest, &sig)
        .map_err(|_| Error::VerificationFailed("signature does not verify".into()))?;

    let recovery_id = RecoveryId::from_byte(signature.recovery_id).ok_or_else(|| {
        Error::VerificationFailed(format!("invalid recovery id {}", signature.recovery_id))
    })?;
    let recovered = VerifyingKey::recover_from_prehash(digest, &sig, recovery_id)
        .map_err(|e| Error::VerificationFailed(format!("recovery failed: {}", e)))?;
    if recovered != verifying_key {
        return Err(Error::VerificationFailed(
            "recovered key does not match the joint public key".into(),
        ));
    }

    Ok(SignatureResult {
        r: minimal_hex(&signature.r),
        s: minimal_hex(&signature.s),
        v: (signature.recovery_id + RECOVERY_OFFSET).to_string(),
    })
}

/// Ethereum address of a secp256k1 public key (SEC1, either encoding)
pub fn ethereum_address(public_key: &[u8]) -> Result<String> {
    let key = VerifyingKey::from_sec1_bytes(public_key)
        .map_err(|e| Error::Crypto(format!("invalid public key: {}", e)))?;
    let uncompressed = key.to_encoded_point(false);

    let mut hash = [0u8; 32];
    let mut keccak = Keccak::v256();
    keccak.update(&uncompressed.as_bytes()[1..]);
    keccak.finalize(&mut hash);

    Ok(format!("0x{}", hex::encode(&hash[12..])))
}

fn minimal_hex(bytes: &[u8]) -> String {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    format!("0x{}", hex::encode(&bytes[start..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::SigningKey;
    use rand::rngs::OsRng;

    fn signed(message: &str) -> (SigningKey, SignatureData) {
        let key = SigningKey::random(&mut OsRng);
        let digest = message_digest(message);
        let (sig, recovery_id) = key.sign_prehash_recoverable(&digest).unwrap();
        let data = SignatureData {
            r: sig.r().to_bytes().into(),
            s: sig.s().to_bytes().into(),
            recovery_id: recovery_id.to_byte(),
            digest,
        };
        (key, data)
    }

    fn public_key(key: &SigningKey) -> Vec<u8> {
        key.verifying_key().to_encoded_point(true).as_bytes().to_vec()
    }

    #[test]
    fn test_finalize_renders_v_with_offset() {
        let (key, data) = signed("hello");

        let result = finalize_signature(&data, &public_key(&key), &data.digest).unwrap();

        assert_eq!(result.v, (data.recovery_id + 27).to_string());
        assert_eq!(result.r, minimal_hex(&data.r));
    }

    #[test]
    fn test_wrong_key_fails_verification() {
        let (_, data) = signed("hello");
        let other = SigningKey::random(&mut OsRng);

        let result = finalize_signature(&data, &public_key(&other), &data.digest);

        assert!(matches!(result, Err(Error::VerificationFailed(_))));
    }

    #[test]
    fn test_flipped_recovery_id_is_rejected() {
        let (key, mut data) = signed("hello");
        data.recovery_id ^= 1;

        let result = finalize_signature(&data, &public_key(&key), &data.digest);

        assert!(matches!(result, Err(Error::VerificationFailed(_))));
    }

    #[test]
    fn test_digest_mismatch_is_rejected() {
        let (key, data) = signed("hello");

        let result = finalize_signature(&data, &public_key(&key), &message_digest("bye"));

        assert!(matches!(result, Err(Error::VerificationFailed(_))));
    }

    #[test]
    fn test_minimal_hex_drops_leading_zero_bytes() {
        let mut bytes = [0u8; 32];
        bytes[1] = 0x0a;
        bytes[31] = 0xff;

        let rendered = minimal_hex(&bytes);

        assert!(rendered.starts_with("0x0a"));
        assert_eq!(rendered.len(), 2 + 31 * 2);
    }

    #[test]
    fn test_ethereum_address_of_generator() {
        // private key 1
        let key = SigningKey::from_slice(&{
            let mut one = [0u8; 32];
            one[31] = 1;
            one
        })
        .unwrap();

        let address = ethereum_address(&public_key(&key)).unwrap();

        assert_eq!(address, "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf");
    }
}
