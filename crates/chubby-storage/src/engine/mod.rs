//! Ordered key-value engine abstraction
//!
//! The log and the namespaced stores only need a durable sorted map with
//! point lookups, ordered iteration and atomic multi-key batches. That
//! capability is [`OrderedStore`]; [`RedbStore`] provides it on top of
//! redb.
//!
//! # Durability
//! A call to [`OrderedStore::put`], [`OrderedStore::delete`] or
//! [`OrderedStore::write`] returns only after the change is synced to
//! stable storage. A batch is all-or-nothing.

mod redb_store;

pub use redb_store::{RedbIterator, RedbStore};

use chubby_common::Error;
use chubby_common::config::{DataStoreConfig, LogStoreConfig};
use std::path::Path;

/// Engine tuning. Functional behaviour never depends on these.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineOptions {
    /// Compress stored blocks
    pub compress: bool,
    /// Block size in bytes
    pub block_size: usize,
    /// Write buffer / page cache size in bytes
    pub write_buffer_size: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        LogStoreConfig::default().into()
    }
}

impl From<LogStoreConfig> for EngineOptions {
    fn from(config: LogStoreConfig) -> Self {
        Self {
            compress: config.compress,
            block_size: config.block_size,
            write_buffer_size: config.write_buffer_size,
        }
    }
}

impl From<DataStoreConfig> for EngineOptions {
    fn from(config: DataStoreConfig) -> Self {
        Self {
            compress: config.compress,
            block_size: config.block_size_kb * 1024,
            write_buffer_size: config.write_buffer_size_mb * 1024 * 1024,
        }
    }
}

/// Single operation inside a [`WriteBatch`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// Ordered set of writes applied as one atomic unit
#[derive(Clone, Debug, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    /// Create an empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an insert or overwrite
    pub fn put(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> &mut Self {
        self.ops.push(BatchOp::Put {
            key: key.as_ref().to_vec(),
            value: value.as_ref().to_vec(),
        });
        self
    }

    /// Queue a removal
    pub fn delete(&mut self, key: impl AsRef<[u8]>) -> &mut Self {
        self.ops.push(BatchOp::Delete {
            key: key.as_ref().to_vec(),
        });
        self
    }

    /// Number of queued operations
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// True if nothing is queued
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Queued operations in order
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }
}

/// Durable sorted map of byte keys to byte values
pub trait OrderedStore: Send + Sync + Sized {
    /// Cursor type returned by [`OrderedStore::iter`]
    type Iter: StoreIterator;

    /// Open the store rooted at directory `path`, creating it if missing
    fn open(path: &Path, options: &EngineOptions) -> Result<Self, EngineError>;

    /// Point lookup
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError>;

    /// Insert or overwrite a single key
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), EngineError>;

    /// Remove a single key; removing an absent key succeeds
    fn delete(&self, key: &[u8]) -> Result<(), EngineError>;

    /// Apply every operation of `batch` atomically
    fn write(&self, batch: WriteBatch) -> Result<(), EngineError>;

    /// Cursor over a consistent snapshot of the store. Failures to take
    /// the snapshot are reported through [`StoreIterator::status`].
    fn iter(&self) -> Self::Iter;

    /// Reclaim space left behind by deletions
    fn compact(&mut self) -> Result<(), EngineError>;
}

/// Cursor over an [`OrderedStore`] snapshot, in ascending key order
pub trait StoreIterator {
    /// Position at the first key `>= key`
    fn seek(&mut self, key: &[u8]);

    /// Position at the smallest key
    fn seek_to_first(&mut self);

    /// Advance to the next key
    fn next(&mut self);

    /// True while positioned on an entry
    fn valid(&self) -> bool;

    /// Current key (empty when not valid)
    fn key(&self) -> &[u8];

    /// Current value (empty when not valid)
    fn value(&self) -> &[u8];

    /// Iteration error, distinct from reaching the end of the range
    fn status(&self) -> Result<(), EngineError>;
}

/// Error type for engine operations
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("redb error: {0}")]
    Database(#[from] redb::DatabaseError),
    #[error("redb storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("redb table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("redb transaction error: {0}")]
    Transaction(Box<redb::TransactionError>),
    #[error("redb commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("redb compaction error: {0}")]
    Compaction(#[from] redb::CompactionError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("iteration failed: {0}")]
    Iteration(String),
    #[error("{0}")]
    Other(String),
}

impl From<redb::TransactionError> for EngineError {
    fn from(e: redb::TransactionError) -> Self {
        Self::Transaction(Box::new(e))
    }
}

impl From<EngineError> for Error {
    fn from(e: EngineError) -> Self {
        Error::Internal(e.to_string())
    }
}
