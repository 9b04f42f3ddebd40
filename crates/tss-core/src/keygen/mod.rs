//! Distributed key generation
//!
//! [`run_keygen`] starts one [`KeygenParty`] per participant, routes their
//! messages in-process and persists every finished share as a fixture the
//! moment it is reported.

mod dkg;
mod messages;

pub use dkg::KeygenParty;
pub use messages::*;

use crate::mpc::{run_protocol, RunConfig};
use crate::store::{FixtureStore, SaveOutcome};
use crate::types::validate_threshold;
use crate::{Error, KeyShare, PartyIdentity, PartyIndex, PreParams, Result, SessionConfig};
use std::collections::BTreeMap;
use tracing::{info, instrument, warn};

/// What a key generation run produced
#[derive(Debug)]
pub struct KeygenReport {
    /// One share per party, ordered by party index
    pub shares: Vec<KeyShare>,
    /// What the store did with each share, in completion order
    pub saved: Vec<(PartyIndex, SaveOutcome)>,
}

impl KeygenReport {
    pub fn public_key(&self) -> Option<&[u8]> {
        self.shares.first().map(|share| share.public_key.as_slice())
    }
}

/// Run key generation for `participants` parties with the given threshold.
///
/// Existing fixtures are reused for identities and pre-parameters when all of
/// them load; otherwise everything is generated fresh. Fixtures are
/// write-once: a party whose fixture already exists is reported with the share
/// on disk, not the one this run produced. A partial set of fixtures is
/// refused rather than topped up with shares of a different key.
#[instrument(skip(store, config))]
pub async fn run_keygen(
    participants: usize,
    threshold: usize,
    store: &FixtureStore,
    config: &RunConfig,
) -> Result<KeygenReport> {
    validate_threshold(participants, threshold)?;

    let (parties, pre_params) = match store.load_batch(participants, 0) {
        Ok((keys, parties)) => {
            if let Some(key) = keys
                .iter()
                .find(|key| key.n_parties != participants || key.threshold != threshold)
            {
                return Err(Error::InvalidConfig(format!(
                    "fixture {} was generated for {} parties with threshold {}",
                    key.party_index, key.n_parties, key.threshold
                )));
            }
            info!(count = keys.len(), "Reusing existing fixtures");
            let pre_params: Vec<Option<PreParams>> =
                keys.iter().map(|key| Some(key.pre_params.clone())).collect();
            (parties, pre_params)
        }
        Err(e) => {
            if let Some(present) = (0..participants).find(|&i| store.path_for(i).exists()) {
                warn!(reason = %e, present, "Only some fixtures exist");
                return Err(Error::storage(
                    present,
                    store.path_for(present),
                    format!(
                        "found an incomplete set of {} fixtures ({}); remove or restore them before running keygen",
                        participants, e
                    ),
                ));
            }
            info!(reason = %e, "No fixtures were found, so pre-parameters will be generated from scratch");
            (PartyIdentity::generate(participants), vec![None; participants])
        }
    };

    let mut session = Vec::with_capacity(participants);
    for (index, pre_params) in pre_params.into_iter().enumerate() {
        let session_config = SessionConfig::new(parties.clone(), threshold, index)?;
        session.push(KeygenParty::new(session_config, pre_params));
    }

    let mut saved = Vec::with_capacity(participants);
    let mut on_disk = BTreeMap::new();
    let shares = run_protocol(session, config, |_, share: &KeyShare| {
        let index = share.party_index;
        let outcome = store.save(index, share)?;
        if let SaveOutcome::AlreadyPresent(_) = outcome {
            on_disk.insert(index, store.load_required(index)?);
        }
        saved.push((index, outcome));
        Ok(())
    })
    .await?;

    let shares = shares
        .into_iter()
        .map(|share| on_disk.remove(&share.party_index).unwrap_or(share))
        .collect();

    info!(parties = participants, "Done. Received save data from all participants");

    Ok(KeygenReport { shares, saved })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_keygen_writes_one_fixture_per_party() {
        let dir = TempDir::new().unwrap();
        let store = FixtureStore::new(dir.path().join("_fixtures"));

        let report = run_keygen(3, 1, &store, &RunConfig::default()).await.unwrap();

        assert_eq!(report.shares.len(), 3);
        assert_eq!(report.saved.len(), 3);
        assert!(report
            .saved
            .iter()
            .all(|(_, outcome)| matches!(outcome, SaveOutcome::Written(_))));
        for index in 0..3 {
            let share = store.load(index).unwrap().unwrap();
            assert_eq!(share.party_index, index);
            assert_eq!(Some(share.public_key.as_slice()), report.public_key());
        }
    }

    #[tokio::test]
    async fn test_keygen_rerun_keeps_fixtures() {
        let dir = TempDir::new().unwrap();
        let store = FixtureStore::new(dir.path());
        run_keygen(3, 1, &store, &RunConfig::default()).await.unwrap();
        let before: Vec<_> = (0..3).map(|i| fs::read(store.path_for(i)).unwrap()).collect();

        let report = run_keygen(3, 1, &store, &RunConfig::default()).await.unwrap();

        assert!(report
            .saved
            .iter()
            .all(|(_, outcome)| matches!(outcome, SaveOutcome::AlreadyPresent(_))));
        let after: Vec<_> = (0..3).map(|i| fs::read(store.path_for(i)).unwrap()).collect();
        assert_eq!(before, after);

        for (i, share) in report.shares.iter().enumerate() {
            let on_disk = store.load(i).unwrap().unwrap();
            assert_eq!(share.party_index, i);
            assert_eq!(share.secret_share, on_disk.secret_share);
            assert_eq!(share.public_key, on_disk.public_key);
        }
    }

    #[tokio::test]
    async fn test_partial_fixtures_are_refused() {
        let dir = TempDir::new().unwrap();
        let store = FixtureStore::new(dir.path());
        run_keygen(3, 1, &store, &RunConfig::default()).await.unwrap();
        fs::remove_file(store.path_for(1)).unwrap();
        fs::remove_file(store.path_for(2)).unwrap();
        let kept = fs::read(store.path_for(0)).unwrap();

        let result = run_keygen(3, 1, &store, &RunConfig::default()).await;

        match result {
            Err(Error::Storage { index, .. }) => assert_eq!(index, 0),
            other => panic!("expected storage error, got {:?}", other.map(|r| r.shares.len())),
        }
        assert!(!store.path_for(1).exists());
        assert!(!store.path_for(2).exists());
        assert_eq!(fs::read(store.path_for(0)).unwrap(), kept);
    }

    #[tokio::test]
    async fn test_rerun_with_other_threshold_is_refused() {
        let dir = TempDir::new().unwrap();
        let store = FixtureStore::new(dir.path());
        run_keygen(3, 1, &store, &RunConfig::default()).await.unwrap();

        let result = run_keygen(3, 2, &store, &RunConfig::default()).await;

        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_public_shares_are_consistent() {
        let dir = TempDir::new().unwrap();
        let store = FixtureStore::new(dir.path());

        let report = run_keygen(4, 2, &store, &RunConfig::default()).await.unwrap();

        for share in &report.shares {
            assert_eq!(share.public_shares, report.shares[0].public_shares);
            let mine = &share.public_shares[share.party_index];
            assert_eq!(mine.share_id, share.share_id);
            let expected = k256::ProjectivePoint::GENERATOR * share.secret_share;
            assert_eq!(crate::types::decode_point(&mine.point).unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn test_threshold_above_participants_touches_nothing() {
        let dir = TempDir::new().unwrap();
        let store = FixtureStore::new(dir.path().join("_fixtures"));

        let result = run_keygen(2, 3, &store, &RunConfig::default()).await;

        assert!(matches!(result, Err(Error::InvalidConfig(_))));
        assert!(!store.dir().exists());
    }
}
