//! Interactive assembly of a signing session
//!
//! Operators pick which previously generated parties sign by entering their
//! fixture indices one by one, and may revoke a pick before the session is
//! complete. Input comes from any line source so the logic does not depend on
//! a terminal.

use crate::store::FixtureStore;
use crate::{Error, KeyShare, PartyIdentity, PartyIndex, Result};
use std::io::{self, BufRead, Write};
use thiserror::Error;
use tracing::info;

/// Prompt shown before each session command
pub const JOIN_PROMPT: &str =
    "Please indicate the user id to sign (or type 'revoke <id>' to revoke a user): ";

/// Operator input that was rejected; the operator can simply try again
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("Invalid revoke command. Usage: revoke <id>")]
    RevokeUsage,

    #[error("Invalid input {0:?}. Please enter a numeric id.")]
    NotNumeric(String),

    #[error("Invalid id {0}. Please enter a valid user id within the range.")]
    InvalidId(i64),

    #[error("User {0} has already signed.")]
    AlreadySigned(PartyIndex),

    #[error("User {0} has not signed yet.")]
    NotSigned(i64),

    #[error("Session already has all {0} signers.")]
    SessionFull(usize),

    #[error("Error reading input: {0}")]
    Unreadable(String),
}

/// One parsed line of operator input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Join(i64),
    Revoke(i64),
}

impl Command {
    pub fn parse(line: &str) -> std::result::Result<Self, InputError> {
        let line = line.trim();
        if line.starts_with("revoke") {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() != 2 || parts[0] != "revoke" {
                return Err(InputError::RevokeUsage);
            }
            return parse_id(parts[1]).map(Command::Revoke);
        }
        parse_id(line).map(Command::Join)
    }
}

fn parse_id(s: &str) -> std::result::Result<i64, InputError> {
    s.parse().map_err(|_| InputError::NotNumeric(s.to_string()))
}

/// What happened to one command, for the operator's benefit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feedback {
    Joined(PartyIndex),
    Revoked(PartyIndex),
    Rejected(InputError),
}

/// Parties picked for one signing run, ready for the router.
///
/// `parties[i]` and `keys[i]` describe the same party; both are sorted by
/// share identifier. Monikers record join order.
#[derive(Debug, Clone)]
pub struct SignerSet {
    pub parties: Vec<PartyIdentity>,
    pub keys: Vec<KeyShare>,
}

impl SignerSet {
    /// Build a session from a fixed list of fixture indices
    pub fn collect(store: &FixtureStore, target: usize, indices: &[PartyIndex]) -> Result<Self> {
        let mut builder = SessionBuilder::new(store, target);
        for &index in indices {
            builder.join(index as i64)?;
        }
        builder.finish()
    }

    pub fn len(&self) -> usize {
        self.parties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parties.is_empty()
    }
}

/// Collects exactly `target` joined parties
pub struct SessionBuilder<'a> {
    store: &'a FixtureStore,
    target: usize,
    /// Join order is significant: it assigns monikers
    joined: Vec<(PartyIndex, KeyShare)>,
}

impl<'a> SessionBuilder<'a> {
    pub fn new(store: &'a FixtureStore, target: usize) -> Self {
        Self {
            store,
            target,
            joined: Vec::with_capacity(target),
        }
    }

    pub fn target(&self) -> usize {
        self.target
    }

    /// Indices joined so far, in join order
    pub fn joined(&self) -> Vec<PartyIndex> {
        self.joined.iter().map(|(index, _)| *index).collect()
    }

    pub fn is_complete(&self) -> bool {
        self.joined.len() >= self.target
    }

    fn position(&self, id: i64) -> Option<usize> {
        self.joined.iter().position(|(index, _)| *index as i64 == id)
    }

    /// Add a party. Input problems are recoverable [`Error::Input`]s; a
    /// fixture that cannot be loaded is fatal.
    pub fn join(&mut self, id: i64) -> Result<PartyIndex> {
        if id < 0 {
            return Err(InputError::InvalidId(id).into());
        }
        let index = id as PartyIndex;
        if self.position(id).is_some() {
            return Err(InputError::AlreadySigned(index).into());
        }
        if self.is_complete() {
            return Err(InputError::SessionFull(self.target).into());
        }

        let key = self.store.load_required(index)?;
        if self.joined.iter().any(|(_, k)| k.share_id == key.share_id) {
            return Err(Error::InvalidConfig(format!(
                "fixture {} duplicates the share of an already joined party",
                index
            )));
        }
        self.joined.push((index, key));

        info!(index, joined = self.joined.len(), target = self.target, "User has signed");
        Ok(index)
    }

    /// Withdraw a previously joined party; it may join again later
    pub fn revoke(&mut self, id: i64) -> Result<PartyIndex> {
        let position = self.position(id).ok_or(InputError::NotSigned(id))?;
        let (index, _) = self.joined.remove(position);

        info!(index, joined = self.joined.len(), target = self.target, "Revoked signature");
        Ok(index)
    }

    pub fn apply(&mut self, command: Command) -> Result<Feedback> {
        match command {
            Command::Join(id) => self.join(id).map(Feedback::Joined),
            Command::Revoke(id) => self.revoke(id).map(Feedback::Revoked),
        }
    }

    /// Pull lines until the session is complete.
    ///
    /// Rejected input is reported through `feedback` and the loop carries on;
    /// storage failures end it. Running out of input early is an error.
    pub fn build<I, F>(mut self, lines: I, mut feedback: F) -> Result<SignerSet>
    where
        I: IntoIterator<Item = io::Result<String>>,
        F: FnMut(&Feedback),
    {
        let mut lines = lines.into_iter();
        while !self.is_complete() {
            let Some(line) = lines.next() else {
                return Err(Error::InvalidConfig(format!(
                    "input closed with {} of {} signers",
                    self.joined.len(),
                    self.target
                )));
            };

            let outcome = line
                .map_err(|e| Error::from(InputError::Unreadable(e.to_string())))
                .and_then(|line| Command::parse(&line).map_err(Error::from))
                .and_then(|command| self.apply(command));

            match outcome {
                Ok(event) => feedback(&event),
                Err(Error::Input(rejected)) => feedback(&Feedback::Rejected(rejected)),
                Err(e) => return Err(e),
            }
        }
        self.finish()
    }

    /// Freeze the session: monikers `1..=target` in join order, then both
    /// identities and keys sorted by share identifier.
    pub fn finish(self) -> Result<SignerSet> {
        if self.joined.len() != self.target {
            return Err(Error::ThresholdNotMet {
                required: self.target,
                actual: self.joined.len(),
            });
        }

        let mut keys: Vec<KeyShare> = self.joined.into_iter().map(|(_, key)| key).collect();
        let parties = keys
            .iter()
            .enumerate()
            .map(|(i, key)| PartyIdentity::new((i + 1).to_string(), key.share_id))
            .collect();
        let parties = PartyIdentity::sort(parties);
        keys.sort_by(|a, b| a.share_id.cmp(&b.share_id));

        Ok(SignerSet { parties, keys })
    }
}

/// Lines from stdin, each preceded by `prompt` on stdout
pub fn prompt_lines(prompt: &'static str) -> impl Iterator<Item = io::Result<String>> {
    let stdin = io::stdin();
    std::iter::from_fn(move || {
        print!("{}", prompt);
        let _ = io::stdout().flush();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => Some(Ok(line)),
            Err(e) => Some(Err(e)),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::sample_share;
    use tempfile::TempDir;

    fn store_with(shares: &[(PartyIndex, u64)]) -> (TempDir, FixtureStore) {
        let dir = TempDir::new().unwrap();
        let store = FixtureStore::new(dir.path());
        for &(index, share_id) in shares {
            store.save(index, &sample_share(index, share_id)).unwrap();
        }
        (dir, store)
    }

    fn lines(input: &[&str]) -> Vec<io::Result<String>> {
        input.iter().map(|s| Ok(s.to_string())).collect()
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("2\n"), Ok(Command::Join(2)));
        assert_eq!(Command::parse("  revoke 1 "), Ok(Command::Revoke(1)));
        assert_eq!(Command::parse("-3"), Ok(Command::Join(-3)));
        assert_eq!(Command::parse("revoke"), Err(InputError::RevokeUsage));
        assert_eq!(Command::parse("revoke 1 2"), Err(InputError::RevokeUsage));
        assert_eq!(Command::parse("revokeall 1"), Err(InputError::RevokeUsage));
        assert!(matches!(Command::parse("revoke x"), Err(InputError::NotNumeric(_))));
        assert!(matches!(Command::parse("sign me"), Err(InputError::NotNumeric(_))));
    }

    #[test]
    fn test_join_twice_is_rejected() {
        let (_dir, store) = store_with(&[(0, 1), (1, 2), (2, 3)]);
        let mut builder = SessionBuilder::new(&store, 2);

        builder.join(1).unwrap();
        let err = builder.join(1).unwrap_err();

        assert!(err.is_recoverable());
        assert!(err.to_string().contains("already signed"));
        assert_eq!(builder.joined(), vec![1]);
    }

    #[test]
    fn test_negative_id_is_rejected() {
        let (_dir, store) = store_with(&[(0, 1)]);
        let mut builder = SessionBuilder::new(&store, 1);

        let err = builder.join(-1).unwrap_err();

        assert!(matches!(err, Error::Input(InputError::InvalidId(-1))));
        assert!(err.to_string().contains("Invalid id"));
    }

    #[test]
    fn test_revoke_unknown_is_rejected() {
        let (_dir, store) = store_with(&[(0, 1)]);
        let mut builder = SessionBuilder::new(&store, 1);

        let err = builder.revoke(0).unwrap_err();

        assert!(err.to_string().contains("has not signed yet"));
    }

    #[test]
    fn test_revoke_then_rejoin() {
        let (_dir, store) = store_with(&[(0, 1), (1, 2), (2, 3)]);
        let mut builder = SessionBuilder::new(&store, 2);

        builder.join(2).unwrap();
        builder.join(0).unwrap();
        assert!(builder.is_complete());

        builder.revoke(2).unwrap();
        assert!(!builder.is_complete());
        assert_eq!(builder.joined(), vec![0]);

        builder.join(2).unwrap();
        assert!(builder.is_complete());
        assert_eq!(builder.joined(), vec![0, 2]);
    }

    #[test]
    fn test_revoke_removes_the_revoked_key() {
        let (_dir, store) = store_with(&[(0, 10), (1, 20), (2, 30), (3, 40)]);
        let mut builder = SessionBuilder::new(&store, 2);

        builder.join(3).unwrap();
        builder.join(0).unwrap();
        builder.revoke(0).unwrap();
        builder.join(1).unwrap();
        let set = builder.finish().unwrap();

        let indices: Vec<_> = set.keys.iter().map(|k| k.party_index).collect();
        assert_eq!(indices, vec![1, 3]);
    }

    #[test]
    fn test_missing_fixture_is_fatal() {
        let (_dir, store) = store_with(&[(0, 1)]);
        let mut builder = SessionBuilder::new(&store, 2);

        let err = builder.join(5).unwrap_err();

        assert!(!err.is_recoverable());
        assert!(matches!(err, Error::Storage { index: 5, .. }));
    }

    #[test]
    fn test_finish_orders_by_share_id_and_keeps_join_monikers() {
        let (_dir, store) = store_with(&[(0, 30), (1, 20), (2, 10)]);
        let mut builder = SessionBuilder::new(&store, 2);

        builder.join(1).unwrap();
        builder.join(2).unwrap();
        let set = builder.finish().unwrap();

        // party 2 has the smaller share id but joined second
        assert_eq!(set.keys[0].party_index, 2);
        assert_eq!(set.parties[0].moniker, "2");
        assert_eq!(set.parties[1].moniker, "1");
        for (i, (party, key)) in set.parties.iter().zip(&set.keys).enumerate() {
            assert_eq!(party.index, i);
            assert_eq!(party.share_id, key.share_id);
        }
    }

    #[test]
    fn test_finish_requires_target() {
        let (_dir, store) = store_with(&[(0, 1)]);
        let mut builder = SessionBuilder::new(&store, 2);
        builder.join(0).unwrap();

        assert!(matches!(
            builder.finish(),
            Err(Error::ThresholdNotMet { required: 2, actual: 1 })
        ));
    }

    #[test]
    fn test_build_reprompts_on_bad_input() {
        let (_dir, store) = store_with(&[(0, 1), (1, 2), (2, 3)]);
        let input = lines(&["abc", "-1", "1", "1", "revoke 0", "revoke 1", "0", "2"]);

        let mut seen = Vec::new();
        let set = SessionBuilder::new(&store, 2)
            .build(input, |f| seen.push(f.clone()))
            .unwrap();

        assert_eq!(set.len(), 2);
        assert!(matches!(seen[0], Feedback::Rejected(InputError::NotNumeric(_))));
        assert_eq!(seen[1], Feedback::Rejected(InputError::InvalidId(-1)));
        assert_eq!(seen[2], Feedback::Joined(1));
        assert_eq!(seen[3], Feedback::Rejected(InputError::AlreadySigned(1)));
        assert_eq!(seen[4], Feedback::Rejected(InputError::NotSigned(0)));
        assert_eq!(seen[5], Feedback::Revoked(1));
        assert_eq!(seen[6], Feedback::Joined(0));
        assert_eq!(seen[7], Feedback::Joined(2));
    }

    #[test]
    fn test_build_stops_on_unreadable_fixture() {
        let (_dir, store) = store_with(&[(0, 1)]);

        let result = SessionBuilder::new(&store, 2).build(lines(&["0", "4", "1"]), |_| {});

        assert!(matches!(result, Err(Error::Storage { index: 4, .. })));
    }

    #[test]
    fn test_build_fails_when_input_runs_out() {
        let (_dir, store) = store_with(&[(0, 1)]);

        let result = SessionBuilder::new(&store, 2).build(lines(&["0"]), |_| {});

        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_collect() {
        let (_dir, store) = store_with(&[(0, 1), (1, 2), (2, 3)]);

        let set = SignerSet::collect(&store, 2, &[1, 2]).unwrap();
        assert_eq!(set.len(), 2);

        let err = SignerSet::collect(&store, 2, &[1, 1]).unwrap_err();
        assert!(err.is_recoverable());
    }
}
