//! # TSS Core
//!
//! In-process orchestration of threshold ECDSA key generation and signing.
//!
//! This crate provides:
//! - A message router that runs a set of [`mpc::Participant`]s to completion
//!   or to their first failure
//! - A write-once fixture store for key shares
//! - An interactive session builder for choosing co-signers
//! - A bundled secp256k1 engine (Feldman-VSS keygen, two-round signing)
//! - Signature finalization: re-verification, public key recovery and
//!   `{ r, s, v }` rendering
//!
//! ## Example
//!
//! ```rust,ignore
//! use tss_core::{keygen, sign, session::SignerSet, store::FixtureStore, mpc::RunConfig};
//!
//! let store = FixtureStore::new("./_fixtures");
//! keygen::run_keygen(3, 1, &store, &RunConfig::default()).await?;
//!
//! let signers = SignerSet::collect(&store, 2, &[0, 1])?;
//! let result = sign::sign_message(signers, "hello", &RunConfig::default()).await?;
//! println!("r={} s={} v={}", result.r, result.s, result.v);
//! ```

pub mod aggregate;
pub mod error;
pub mod keygen;
pub mod mpc;
pub mod session;
pub mod sign;
pub mod store;
pub mod types;

pub use error::{Error, Result};
pub use types::{
    KeyShare, PartyIdentity, PartyIndex, PreParams, ProtocolMessage, PublicShare, SessionConfig,
    ShareId, SignatureData,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default signing threshold: any two of three parties can sign
pub const DEFAULT_THRESHOLD: usize = 1;

/// Default number of parties
pub const DEFAULT_PARTIES: usize = 3;
