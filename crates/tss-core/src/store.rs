//! Write-once, per-party key share fixtures on disk
//!
//! Each party's [`KeyShare`] lives in `<dir>/keygen_data_<index>.json`. A
//! missing file is the normal "not generated yet" signal. Files are published
//! atomically and never overwritten.

use crate::{Error, KeyShare, PartyIdentity, PartyIndex, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default fixture directory
pub const DEFAULT_FIXTURE_DIR: &str = "./_fixtures";

/// Outcome of [`FixtureStore::save`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Written(PathBuf),
    AlreadyPresent(PathBuf),
}

impl SaveOutcome {
    pub fn path(&self) -> &Path {
        match self {
            SaveOutcome::Written(path) | SaveOutcome::AlreadyPresent(path) => path,
        }
    }
}

/// Fixture directory handle
#[derive(Debug, Clone)]
pub struct FixtureStore {
    dir: PathBuf,
}

impl FixtureStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, index: PartyIndex) -> PathBuf {
        self.dir.join(format!("keygen_data_{}.json", index))
    }

    /// Load one party's share; `Ok(None)` when it was never generated
    pub fn load(&self, index: PartyIndex) -> Result<Option<KeyShare>> {
        let path = self.path_for(index);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::storage(index, &path, e)),
        };

        let key: KeyShare = serde_json::from_slice(&bytes)
            .map_err(|e| Error::storage(index, &path, format!("could not unmarshal fixture data: {}", e)))?;
        if key.party_index != index {
            return Err(Error::storage(
                index,
                &path,
                format!("fixture records party index {}", key.party_index),
            ));
        }

        debug!(index, path = ?path, "Loaded fixture");
        Ok(Some(key))
    }

    /// Like [`FixtureStore::load`], but a missing fixture is an error
    pub fn load_required(&self, index: PartyIndex) -> Result<KeyShare> {
        self.load(index)?.ok_or_else(|| {
            Error::storage(
                index,
                self.path_for(index),
                "could not open the fixture in the expected location; run keygen first",
            )
        })
    }

    /// Persist a share unless one already exists for `index`
    pub fn save(&self, index: PartyIndex, key: &KeyShare) -> Result<SaveOutcome> {
        let path = self.path_for(index);
        if path.is_file() {
            info!(index, path = ?path, "Fixture already exists; not re-creating");
            return Ok(SaveOutcome::AlreadyPresent(path));
        }

        fs::create_dir_all(&self.dir).map_err(|e| Error::storage(index, &self.dir, e))?;

        let json = serde_json::to_vec_pretty(key)?;
        let tmp = self
            .dir
            .join(format!(".keygen_data_{}.{:016x}.tmp", index, rand::random::<u64>()));
        if let Err(e) = write_synced(&tmp, &json) {
            let _ = fs::remove_file(&tmp);
            return Err(Error::storage(index, &tmp, e));
        }

        // hard_link refuses to replace an existing file, unlike rename
        let published = fs::hard_link(&tmp, &path);
        let _ = fs::remove_file(&tmp);
        match published {
            Ok(()) => {
                info!(index, path = ?path, "Saved fixture");
                Ok(SaveOutcome::Written(path))
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                info!(index, path = ?path, "Fixture already exists; not re-creating");
                Ok(SaveOutcome::AlreadyPresent(path))
            }
            Err(e) => Err(Error::storage(index, &path, e)),
        }
    }

    /// Load `count` consecutive fixtures starting at `start`.
    ///
    /// Fails as a whole if any one of them is missing or corrupt. Shares and
    /// identities come back sorted by share identifier, so `keys[i]` belongs
    /// to `parties[i]`.
    pub fn load_batch(&self, count: usize, start: PartyIndex) -> Result<(Vec<KeyShare>, Vec<PartyIdentity>)> {
        let end = start.checked_add(count).ok_or_else(|| {
            Error::InvalidConfig(format!("{} fixtures from index {} overflow", count, start))
        })?;
        let mut keys = Vec::new();
        for index in start..end {
            keys.push(self.load_required(index)?);
        }

        let parties = keys
            .iter()
            .enumerate()
            .map(|(i, key)| PartyIdentity::new((i + start + 1).to_string(), key.share_id))
            .collect();
        let parties = PartyIdentity::sort(parties);
        keys.sort_by(|a, b| a.share_id.cmp(&b.share_id));

        if parties.windows(2).any(|w| w[0].share_id == w[1].share_id) {
            return Err(Error::InvalidConfig(
                "fixtures contain duplicate share identifiers".into(),
            ));
        }

        Ok((keys, parties))
    }

    /// Aggregate public key recorded in the first fixture
    pub fn load_public_key(&self) -> Result<Vec<u8>> {
        Ok(self.load_required(0)?.public_key.clone())
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = open_private(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(unix)]
fn open_private(path: &Path) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    OpenOptions::new().write(true).create_new(true).mode(0o600).open(path)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}
