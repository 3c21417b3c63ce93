//! [`OrderedStore`] backed by redb.
//!
//! Each store is one redb file (`engine.redb`) inside its own directory,
//! holding a single `kv` table. Write transactions commit with redb's
//! default immediate durability, i.e. fsync before `commit` returns.

use super::{BatchOp, EngineError, EngineOptions, OrderedStore, StoreIterator, WriteBatch};
use redb::{Database, ReadOnlyTable, TableDefinition};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File name of the redb database inside a store directory
pub const ENGINE_FILE_NAME: &str = "engine.redb";

const KV_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("kv");

type KvTable = ReadOnlyTable<&'static [u8], &'static [u8]>;

/// Persistent ordered store using redb.
pub struct RedbStore {
    db: Database,
    path: PathBuf,
}

impl RedbStore {
    /// Directory this store lives in
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn snapshot(&self) -> Result<KvTable, EngineError> {
        let read_txn = self.db.begin_read()?;
        Ok(read_txn.open_table(KV_TABLE)?)
    }
}

impl OrderedStore for RedbStore {
    type Iter = RedbIterator;

    fn open(path: &Path, options: &EngineOptions) -> Result<Self, EngineError> {
        std::fs::create_dir_all(path)?;

        // redb pages are neither compressed nor sized by the caller; only
        // the cache size is tunable.
        debug!(
            "Opening redb store at {:?} (cache {} bytes, compress={}, block_size={} ignored)",
            path, options.write_buffer_size, options.compress, options.block_size
        );
        let db = Database::builder()
            .set_cache_size(options.write_buffer_size)
            .create(path.join(ENGINE_FILE_NAME))?;

        // Create the table eagerly so later read txns don't fail
        let write_txn = db.begin_write()?;
        {
            let _t = write_txn.open_table(KV_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self {
            db,
            path: path.to_path_buf(),
        })
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError> {
        let table = self.snapshot()?;
        let value = table.get(key)?.map(|v| v.value().to_vec());
        Ok(value)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), EngineError> {
        let mut batch = WriteBatch::new();
        batch.put(key, value);
        self.write(batch)
    }

    fn delete(&self, key: &[u8]) -> Result<(), EngineError> {
        let mut batch = WriteBatch::new();
        batch.delete(key);
        self.write(batch)
    }

    fn write(&self, batch: WriteBatch) -> Result<(), EngineError> {
        if batch.is_empty() {
            return Ok(());
        }
        // An uncommitted transaction is rolled back when dropped, so an
        // early return leaves nothing of the batch behind.
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(KV_TABLE)?;
            for op in batch.ops() {
                match op {
                    BatchOp::Put { key, value } => {
                        table.insert(key.as_slice(), value.as_slice())?;
                    }
                    BatchOp::Delete { key } => {
                        table.remove(key.as_slice())?;
                    }
                }
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    fn iter(&self) -> RedbIterator {
        match self.snapshot() {
            Ok(table) => RedbIterator {
                table: Some(table),
                current: None,
                error: None,
            },
            Err(e) => RedbIterator {
                table: None,
                current: None,
                error: Some(e.to_string()),
            },
        }
    }

    fn compact(&mut self) -> Result<(), EngineError> {
        let compacted = self.db.compact()?;
        debug!("Compacted redb store at {:?}: {}", self.path, compacted);
        Ok(())
    }
}

/// Cursor over one redb read transaction.
///
/// Every step is a bounded range lookup from the current key, so the cursor
/// owns its position instead of borrowing a live range.
pub struct RedbIterator {
    table: Option<KvTable>,
    current: Option<(Vec<u8>, Vec<u8>)>,
    error: Option<String>,
}

impl RedbIterator {
    fn position(&mut self, lower: Bound<&[u8]>) {
        let Some(table) = &self.table else {
            self.current = None;
            return;
        };
        let found = table
            .range::<&[u8]>((lower, Bound::Unbounded))
            .and_then(|mut range| range.next().transpose())
            .map(|item| item.map(|(k, v)| (k.value().to_vec(), v.value().to_vec())));
        match found {
            Ok(current) => self.current = current,
            Err(e) => {
                self.current = None;
                self.error = Some(e.to_string());
            }
        }
    }
}

impl StoreIterator for RedbIterator {
    fn seek(&mut self, key: &[u8]) {
        self.position(Bound::Included(key));
    }

    fn seek_to_first(&mut self) {
        self.position(Bound::Unbounded);
    }

    fn next(&mut self) {
        if let Some((key, _)) = self.current.take() {
            self.position(Bound::Excluded(key.as_slice()));
        }
    }

    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn key(&self) -> &[u8] {
        self.current.as_ref().map_or(&[][..], |(k, _)| k.as_slice())
    }

    fn value(&self) -> &[u8] {
        self.current.as_ref().map_or(&[][..], |(_, v)| v.as_slice())
    }

    fn status(&self) -> Result<(), EngineError> {
        match &self.error {
            Some(msg) => Err(EngineError::Iteration(msg.clone())),
            None => Ok(()),
        }
    }
}
