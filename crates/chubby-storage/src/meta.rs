//! Consensus metadata store
//!
//! Current term, per-term votes and the bootstrap root principal, kept in
//! three append-only record files independent of the log engine:
//!
//! - `term.data`: one [`TermRecord`] per term change
//! - `vote.data`: one [`VoteRecord`] per vote cast
//! - `root.data`: a single [`RootInfo`]
//!
//! Current values are rebuilt by replaying the files on open and cached
//! in memory. Every write is synced before it becomes visible.

use crate::meta_file::RecordFile;
use chubby_common::{Error, Result};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Term history file
pub const TERM_FILE_NAME: &str = "term.data";
/// Vote history file
pub const VOTE_FILE_NAME: &str = "vote.data";
/// Root principal file
pub const ROOT_FILE_NAME: &str = "root.data";

/// Term change record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermRecord {
    pub term: i64,
}

/// Vote record: `server_id` was granted our vote in `term`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub term: i64,
    pub server_id: String,
}

/// Bootstrap root principal, written once at cluster creation
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootInfo {
    pub name: String,
    pub password: String,
}

impl RootInfo {
    pub fn new(name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            password: password.into(),
        }
    }
}

struct MetaState {
    term_file: RecordFile,
    vote_file: RecordFile,
    root_file: RecordFile,
    current_term: i64,
    votes: BTreeMap<i64, String>,
    root: Option<RootInfo>,
}

/// Durable term/vote/root store
pub struct ConsensusMeta {
    dir: PathBuf,
    state: Mutex<MetaState>,
}

impl ConsensusMeta {
    /// Open (or create) the store in `dir` and replay its files
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let (term_file, records) = RecordFile::open(dir.join(TERM_FILE_NAME))?;
        let mut current_term = 0;
        for raw in &records {
            let record: TermRecord = decode(term_file.path(), raw)?;
            current_term = record.term;
        }

        let (vote_file, records) = RecordFile::open(dir.join(VOTE_FILE_NAME))?;
        let mut votes = BTreeMap::new();
        for raw in &records {
            let record: VoteRecord = decode(vote_file.path(), raw)?;
            if let Some(previous) = votes.insert(record.term, record.server_id.clone()) {
                if previous != record.server_id {
                    warn!(
                        "Conflicting votes for term {}: '{}' superseded by '{}'",
                        record.term, previous, record.server_id
                    );
                }
            }
        }

        let (root_file, records) = RecordFile::open(dir.join(ROOT_FILE_NAME))?;
        let root = match records.last() {
            Some(raw) => Some(decode::<RootInfo>(root_file.path(), raw)?),
            None => None,
        };

        info!(
            "Opened consensus metadata at {:?}: term {}, {} votes, root {}",
            dir,
            current_term,
            votes.len(),
            if root.is_some() { "present" } else { "absent" }
        );

        Ok(Self {
            dir,
            state: Mutex::new(MetaState {
                term_file,
                vote_file,
                root_file,
                current_term,
                votes,
                root,
            }),
        })
    }

    /// Directory holding the metadata files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Most recently written term, or 0
    pub fn read_current_term(&self) -> i64 {
        self.state.lock().current_term
    }

    /// Durably record `term` as the current term.
    ///
    /// Terms never go backwards; rewriting the current term is a no-op.
    pub fn write_current_term(&self, term: i64) -> Result<()> {
        let mut state = self.state.lock();
        if term < state.current_term {
            return Err(Error::invalid_argument(format!(
                "term {term} is older than current term {}",
                state.current_term
            )));
        }
        if term == state.current_term {
            return Ok(());
        }

        let payload = encode(&TermRecord { term })?;
        state.term_file.append(&payload)?;
        state.current_term = term;
        debug!("Persisted current term {}", term);
        Ok(())
    }

    /// Every recorded vote, by term
    pub fn read_voted_for(&self) -> BTreeMap<i64, String> {
        self.state.lock().votes.clone()
    }

    /// Vote recorded for `term`, if any
    pub fn voted_for(&self, term: i64) -> Option<String> {
        self.state.lock().votes.get(&term).cloned()
    }

    /// Durably record a vote for `server_id` in `term`.
    ///
    /// At most one vote per term: repeating the same vote is a no-op, a
    /// different server fails with `AlreadyExists`.
    pub fn write_voted_for(&self, term: i64, server_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        match state.votes.get(&term) {
            Some(existing) if existing == server_id => return Ok(()),
            Some(existing) => {
                return Err(Error::already_exists(format!(
                    "already voted for '{existing}' in term {term}"
                )));
            }
            None => {}
        }

        let record = VoteRecord {
            term,
            server_id: server_id.to_string(),
        };
        state.vote_file.append(&encode(&record)?)?;
        state.votes.insert(term, record.server_id);
        debug!("Persisted vote for '{}' in term {}", server_id, term);
        Ok(())
    }

    /// The root principal
    pub fn read_root_info(&self) -> Result<RootInfo> {
        self.state
            .lock()
            .root
            .clone()
            .ok_or_else(|| Error::not_found("root info has not been written"))
    }

    /// Durably record the root principal. Only the first write succeeds.
    pub fn write_root_info(&self, root: &RootInfo) -> Result<()> {
        let mut state = self.state.lock();
        if state.root.is_some() {
            return Err(Error::already_exists("root info already written"));
        }
        state.root_file.append(&encode(root)?)?;
        state.root = Some(root.clone());
        info!("Persisted root principal '{}'", root.name);
        Ok(())
    }
}

fn encode<T: Serialize>(record: &T) -> Result<Vec<u8>> {
    bincode::serialize(record)
        .map_err(|e| Error::internal(format!("failed to encode metadata record: {e}")))
}

fn decode<T: DeserializeOwned>(path: &Path, raw: &[u8]) -> Result<T> {
    bincode::deserialize(raw).map_err(|e| {
        Error::data_loss(format!("malformed record in {}: {}", path.display(), e))
    })
}
