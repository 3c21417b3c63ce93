//! Operation log
//!
//! Append-only, crash-recoverable sequence of [`LogEntry`] records
//! addressed by slot index. Layout inside the engine:
//!
//! ```text
//! "#BINLOG_LENGTH#"   -> index_to_key(length)
//! "0000000000000000"  -> record of slot 0
//! "0000000000000001"  -> record of slot 1
//! ...
//! ```
//!
//! # Write Path
//! 1. Encode the entries
//! 2. Write entry records and the new length record as one batch (fsync)
//! 3. Advance the in-memory length and last term
//!
//! # Recovery
//! 1. Read the length record (absent = empty log)
//! 2. Read slot `length - 1` to restore the last term
//!
//! # Locking
//! One `RwLock` guards the engine handle, the length and the last term.
//! Appends, truncation and garbage collection take it exclusively; point
//! reads share it, so a reader never observes a slot beyond `length`.

use crate::codec::{index_to_key, key_to_index};
use crate::engine::{EngineOptions, OrderedStore, RedbStore, StoreIterator, WriteBatch};
use crate::entry::LogEntry;
use chubby_common::config::{LOG_DIR_NAME, LogStoreConfig};
use chubby_common::{Error, Result};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Reserved key holding the log length. `#` sorts before every hex digit,
/// so it never collides with a slot key.
pub const LENGTH_KEY: &str = "#BINLOG_LENGTH#";

/// Last term of an empty log
pub const NO_TERM: i64 = -1;

/// Operation log options
#[derive(Clone, Debug)]
pub struct LogOptions {
    /// Parent directory; the engine lives in `{db_path}/#binlog`
    pub db_path: PathBuf,
    /// Engine tuning
    pub engine: EngineOptions,
}

impl LogOptions {
    /// Options with default engine tuning
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
            engine: EngineOptions::default(),
        }
    }

    /// Options with engine tuning from configuration
    pub fn with_config(db_path: impl AsRef<Path>, config: &LogStoreConfig) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
            engine: config.clone().into(),
        }
    }
}

struct LogState<S> {
    store: S,
    /// Next free slot
    length: i64,
    /// Term of slot `length - 1`, or [`NO_TERM`]
    last_log_term: i64,
}

/// Durable operation log over an [`OrderedStore`]
pub struct OperationLog<S: OrderedStore = RedbStore> {
    path: PathBuf,
    state: RwLock<LogState<S>>,
}

impl<S: OrderedStore> OperationLog<S> {
    /// Open (or create) the log under `options.db_path`
    pub fn open(options: &LogOptions) -> Result<Self> {
        let path = options.db_path.join(LOG_DIR_NAME);
        std::fs::create_dir_all(&path)?;

        let store = S::open(&path, &options.engine)?;

        let length = match store.get(LENGTH_KEY.as_bytes())? {
            Some(raw) if !raw.is_empty() => decode_length(&raw)?,
            _ => 0,
        };

        let last_log_term = if length > 0 {
            let entry = read_record(&store, length - 1)?.ok_or_else(|| {
                Error::data_loss(format!(
                    "log length is {length} but slot {} is missing",
                    length - 1
                ))
            })?;
            entry.term
        } else {
            NO_TERM
        };

        info!(
            "Opened operation log at {:?}: length {}, last term {}",
            path, length, last_log_term
        );

        Ok(Self {
            path,
            state: RwLock::new(LogState {
                store,
                length,
                last_log_term,
            }),
        })
    }

    /// Directory holding the log engine
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of slots, i.e. the next index to be written
    pub fn length(&self) -> i64 {
        self.state.read().length
    }

    /// Index and term of the most recent entry; `(-1, NO_TERM)` when empty
    pub fn last_index_and_term(&self) -> (i64, i64) {
        let state = self.state.read();
        (state.length - 1, state.last_log_term)
    }

    /// Read the entry at `index`. Slots at or past the length, and slots
    /// already garbage-collected, are reported as `None`.
    pub fn read_slot(&self, index: i64) -> Result<Option<LogEntry>> {
        if index < 0 {
            return Err(Error::invalid_argument(format!(
                "negative slot index {index}"
            )));
        }
        let state = self.state.read();
        if index >= state.length {
            return Ok(None);
        }
        read_record(&state.store, index)
    }

    /// Append one entry at slot `length`
    pub fn append_entry(&self, entry: &LogEntry) -> Result<()> {
        self.append_entry_batch(std::slice::from_ref(entry))
    }

    /// Append `entries` at slots `length..length + entries.len()`.
    ///
    /// The records and the new length commit as one batch: either all of
    /// them become durable and visible, or none do.
    pub fn append_entry_batch(&self, entries: &[LogEntry]) -> Result<()> {
        let Some(last) = entries.last() else {
            return Ok(());
        };
        let records = entries
            .iter()
            .map(LogEntry::encode)
            .collect::<Result<Vec<_>>>()?;

        let mut state = self.state.write();
        let first = state.length;
        let count = i64::try_from(records.len())
            .map_err(|_| Error::invalid_argument("batch too large"))?;
        let new_length = first + count;

        let mut batch = WriteBatch::new();
        for (slot, record) in (first..).zip(&records) {
            batch.put(slot_key(slot)?, record);
        }
        batch.put(LENGTH_KEY, slot_key(new_length)?);
        state.store.write(batch)?;

        state.length = new_length;
        state.last_log_term = last.term;
        debug!(
            "Appended {} entries at slot {} (length {}, term {})",
            count, first, new_length, last.term
        );
        Ok(())
    }

    /// Discard every slot after `new_last_index` (clamped to `-1`, which
    /// empties the log). Only ever shortens the log.
    pub fn truncate(&self, new_last_index: i64) -> Result<()> {
        let new_length = new_last_index.max(-1) + 1;

        let mut state = self.state.write();
        if new_length > state.length {
            return Err(Error::invalid_argument(format!(
                "cannot truncate to index {new_last_index}: log length is {}",
                state.length
            )));
        }
        if new_length == state.length {
            return Ok(());
        }

        // Resolve the new last term before touching the disk, so a missing
        // slot leaves the log as it was.
        let last_log_term = if new_length > 0 {
            read_record(&state.store, new_length - 1)?
                .ok_or_else(|| {
                    Error::data_loss(format!("slot {} is missing", new_length - 1))
                })?
                .term
        } else {
            NO_TERM
        };

        let mut batch = WriteBatch::new();
        for slot in new_length..state.length {
            batch.delete(slot_key(slot)?);
        }
        batch.put(LENGTH_KEY, slot_key(new_length)?);
        state.store.write(batch)?;

        let old_length = state.length;
        state.length = new_length;
        state.last_log_term = last_log_term;
        debug!(
            "Truncated log from length {} to {} (last term {})",
            old_length, new_length, last_log_term
        );
        Ok(())
    }

    /// Delete the record at `index`. Returns `false` if it was not present.
    /// The last slot (`length - 1`) cannot be removed since recovery reads
    /// its term.
    ///
    /// Garbage collection only: length and last term are unaffected.
    pub fn remove_slot(&self, index: i64) -> Result<bool> {
        let key = slot_key(index)?;
        let state = self.state.write();
        if index == state.length - 1 {
            return Err(Error::invalid_argument(format!(
                "slot {index} is the last slot of the log"
            )));
        }
        if state.store.get(key.as_bytes())?.is_none() {
            return Ok(false);
        }
        state.store.delete(key.as_bytes())?;
        debug!("Removed slot {}", index);
        Ok(true)
    }

    /// Delete every record below `index`, then compact the engine. The
    /// last slot is always kept since recovery reads its term. Returns the
    /// number of records removed.
    ///
    /// Garbage collection only: length and last term are unaffected.
    pub fn remove_slot_before(&self, index: i64) -> Result<u64> {
        let mut state = self.state.write();
        let bound = index.min(state.length - 1);
        if bound <= 0 {
            return Ok(0);
        }
        let bound_key = slot_key(bound)?;

        let mut batch = WriteBatch::new();
        {
            let mut it = state.store.iter();
            it.seek(index_to_key(0).as_bytes());
            while it.valid() && it.key() < bound_key.as_bytes() {
                batch.delete(it.key());
                it.next();
            }
            it.status()?;
        }
        let removed = batch.len() as u64;
        state.store.write(batch)?;
        state.store.compact()?;

        debug!("Removed {} slots below {}", removed, bound);
        Ok(removed)
    }
}

fn slot_key(index: i64) -> Result<String> {
    let index = u64::try_from(index)
        .map_err(|_| Error::invalid_argument(format!("negative slot index {index}")))?;
    Ok(index_to_key(index))
}

fn decode_length(raw: &[u8]) -> Result<i64> {
    let text = std::str::from_utf8(raw)
        .map_err(|e| Error::data_loss(format!("log length record is not UTF-8: {e}")))?;
    let length = key_to_index(text)?;
    i64::try_from(length)
        .map_err(|_| Error::data_loss(format!("log length {length} out of range")))
}

fn read_record<S: OrderedStore>(store: &S, index: i64) -> Result<Option<LogEntry>> {
    let key = slot_key(index)?;
    match store.get(key.as_bytes())? {
        Some(raw) => Ok(Some(LogEntry::decode(&raw)?)),
        None => Ok(None),
    }
}
