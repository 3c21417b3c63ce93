//! Namespaced key-value store
//!
//! Each namespace is an independent [`OrderedStore`] rooted at
//! `{db_path}/{namespace}@db`. The open-handle map sits behind one mutex
//! that is held only to resolve a handle; reads and writes then run
//! against the shared engine without it.
//!
//! A closed namespace whose engine is still held by an iterator is
//! remembered, and reopening it picks that engine up again.

use crate::engine::{EngineOptions, OrderedStore, RedbStore, StoreIterator};
use chubby_common::config::DataStoreConfig;
use chubby_common::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Default (anonymous) namespace, opened on construction
pub const DEFAULT_NAMESPACE: &str = "";

/// Suffix of every namespace directory
pub const NAMESPACE_SUFFIX: &str = "@db";

/// Multiplexes one engine per namespace
pub struct Database<S: OrderedStore = RedbStore> {
    db_path: PathBuf,
    options: EngineOptions,
    handles: Mutex<Handles<S>>,
}

struct Handles<S> {
    open: HashMap<String, Arc<S>>,
    /// Closed namespaces whose engines iterators still hold
    closed: HashMap<String, Weak<S>>,
}

impl<S> Default for Handles<S> {
    fn default() -> Self {
        Self {
            open: HashMap::new(),
            closed: HashMap::new(),
        }
    }
}

impl<S: OrderedStore> Database<S> {
    /// Create the store under `db_path` and open [`DEFAULT_NAMESPACE`]
    pub fn new(db_path: impl AsRef<Path>, options: EngineOptions) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&db_path)?;

        let db = Self {
            db_path,
            options,
            handles: Mutex::new(Handles::default()),
        };
        db.open(DEFAULT_NAMESPACE)?;
        info!("Opened namespaced store at {:?}", db.db_path);
        Ok(db)
    }

    /// Create the store with engine tuning from configuration
    pub fn with_config(db_path: impl AsRef<Path>, config: &DataStoreConfig) -> Result<Self> {
        Self::new(db_path, config.clone().into())
    }

    /// Root directory of all namespaces
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Directory backing `namespace`
    pub fn namespace_path(&self, namespace: &str) -> PathBuf {
        self.db_path.join(format!("{namespace}{NAMESPACE_SUFFIX}"))
    }

    /// Open `namespace`, creating its storage if needed. Idempotent.
    pub fn open(&self, namespace: &str) -> Result<()> {
        validate_namespace(namespace)?;

        let mut handles = self.handles.lock();
        if handles.open.contains_key(namespace) {
            return Ok(());
        }
        if let Some(store) = handles.closed.remove(namespace).and_then(|w| w.upgrade()) {
            handles.open.insert(namespace.to_string(), store);
            debug!("Reopened namespace '{}' from a live engine", namespace);
            return Ok(());
        }
        let path = self.namespace_path(namespace);
        let store = S::open(&path, &self.options)?;
        handles.open.insert(namespace.to_string(), Arc::new(store));
        debug!("Opened namespace '{}' at {:?}", namespace, path);
        Ok(())
    }

    /// Close `namespace`. Idempotent.
    ///
    /// The engine shuts down once the last outstanding iterator over it is
    /// dropped.
    pub fn close(&self, namespace: &str) {
        let mut handles = self.handles.lock();
        handles.closed.retain(|_, store| store.strong_count() > 0);
        if let Some(store) = handles.open.remove(namespace) {
            if Arc::strong_count(&store) > 1 {
                handles
                    .closed
                    .insert(namespace.to_string(), Arc::downgrade(&store));
            }
            debug!("Closed namespace '{}'", namespace);
        }
    }

    /// True if `namespace` is open
    pub fn is_open(&self, namespace: &str) -> bool {
        self.handles.lock().open.contains_key(namespace)
    }

    /// Names of the open namespaces, sorted
    pub fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<_> = self.handles.lock().open.keys().cloned().collect();
        names.sort();
        names
    }

    /// Value of `key` in `namespace`
    pub fn get(&self, namespace: &str, key: &[u8]) -> Result<Vec<u8>> {
        let store = self.handle(namespace)?;
        store.get(key)?.ok_or_else(|| {
            Error::not_found(format!(
                "key '{}' not found in namespace '{}'",
                String::from_utf8_lossy(key),
                namespace
            ))
        })
    }

    /// Set `key` to `value` in `namespace`
    pub fn put(&self, namespace: &str, key: &[u8], value: &[u8]) -> Result<()> {
        let store = self.handle(namespace)?;
        store.put(key, value)?;
        Ok(())
    }

    /// Remove `key` from `namespace`; removing an absent key succeeds
    pub fn delete(&self, namespace: &str, key: &[u8]) -> Result<()> {
        let store = self.handle(namespace)?;
        store.delete(key)?;
        Ok(())
    }

    /// Iterator over a snapshot of `namespace`, or `None` if it is not open
    pub fn new_iterator(&self, namespace: &str) -> Option<NamespaceIterator<S>> {
        let store = self.handles.lock().open.get(namespace).cloned()?;
        Some(NamespaceIterator {
            inner: store.iter(),
            _store: store,
        })
    }

    fn handle(&self, namespace: &str) -> Result<Arc<S>> {
        let store = self.handles.lock().open.get(namespace).cloned();
        store.ok_or_else(|| {
            warn!("Namespace '{}' is not open", namespace);
            Error::not_found(format!("namespace '{namespace}' is not open"))
        })
    }
}

impl<S: OrderedStore> Drop for Database<S> {
    fn drop(&mut self) {
        let handles = std::mem::take(self.handles.get_mut());
        debug!("Closing {} namespaces at {:?}", handles.open.len(), self.db_path);
    }
}

/// A namespace name becomes a directory name, so it must stay inside
/// `db_path`.
fn validate_namespace(namespace: &str) -> Result<()> {
    if namespace.contains(['/', '\\', '\0']) || namespace.contains("..") {
        return Err(Error::invalid_argument(format!(
            "invalid namespace name '{namespace}'"
        )));
    }
    Ok(())
}

/// Iterator over one namespace.
///
/// Holds its own reference to the namespace engine, so closing the
/// namespace does not invalidate it.
pub struct NamespaceIterator<S: OrderedStore = RedbStore> {
    // Declared before `_store` so the snapshot is released first
    inner: S::Iter,
    _store: Arc<S>,
}

impl<S: OrderedStore> NamespaceIterator<S> {
    /// Position at the first key `>= key`
    pub fn seek(&mut self, key: &[u8]) {
        self.inner.seek(key);
    }

    /// Position at the smallest key
    pub fn seek_to_first(&mut self) {
        self.inner.seek_to_first();
    }

    /// Advance to the next key
    pub fn next(&mut self) {
        self.inner.next();
    }

    pub fn valid(&self) -> bool {
        self.inner.valid()
    }

    pub fn key(&self) -> &[u8] {
        self.inner.key()
    }

    pub fn value(&self) -> &[u8] {
        self.inner.value()
    }

    /// Engine iteration error, distinct from reaching the end
    pub fn status(&self) -> Result<()> {
        self.inner.status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chubby_common::ErrorKind;
    use tempfile::tempdir;

    fn open_db(dir: &Path) -> Database {
        Database::new(dir, EngineOptions::from(DataStoreConfig::default())).unwrap()
    }

    fn scan(db: &Database, namespace: &str) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut it = db.new_iterator(namespace).unwrap();
        let mut out = Vec::new();
        it.seek_to_first();
        while it.valid() {
            out.push((it.key().to_vec(), it.value().to_vec()));
            it.next();
        }
        it.status().unwrap();
        out
    }

    #[test]
    fn test_default_namespace_is_open() {
        let dir = tempdir().unwrap();
        let db = open_db(dir.path());

        assert!(db.is_open(DEFAULT_NAMESPACE));
        assert_eq!(db.namespaces(), vec![String::new()]);
        assert!(dir.path().join("@db").is_dir());
    }

    #[test]
    fn test_open_close_idempotent() {
        let dir = tempdir().unwrap();
        let db = open_db(dir.path());

        db.open("user1").unwrap();
        db.open("user1").unwrap();
        assert!(db.is_open("user1"));
        assert!(dir.path().join("user1@db").is_dir());

        db.close("user1");
        db.close("user1");
        db.close("never-opened");
        assert!(!db.is_open("user1"));
    }

    #[test]
    fn test_operations() {
        let dir = tempdir().unwrap();
        let db = open_db(dir.path());
        db.open("user1").unwrap();

        db.put("user1", b"/lock/a", b"owner=1").unwrap();
        assert_eq!(db.get("user1", b"/lock/a").unwrap(), b"owner=1");

        db.put("user1", b"/lock/a", b"owner=2").unwrap();
        assert_eq!(db.get("user1", b"/lock/a").unwrap(), b"owner=2");

        db.delete("user1", b"/lock/a").unwrap();
        let err = db.get("user1", b"/lock/a").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        db.delete("user1", b"/lock/a").unwrap();
    }

    #[test]
    fn test_unopened_namespace() {
        let dir = tempdir().unwrap();
        let db = open_db(dir.path());

        assert!(db.get("ghost", b"k").unwrap_err().is_not_found());
        assert!(db.put("ghost", b"k", b"v").unwrap_err().is_not_found());
        assert!(db.delete("ghost", b"k").unwrap_err().is_not_found());
        assert!(db.new_iterator("ghost").is_none());
        assert!(!dir.path().join("ghost@db").exists());
    }

    #[test]
    fn test_namespace_isolation() {
        let dir = tempdir().unwrap();
        let db = open_db(dir.path());
        db.open("a").unwrap();
        db.open("b").unwrap();

        db.put("a", b"K", b"V1").unwrap();
        db.put("b", b"K", b"V2").unwrap();
        assert_eq!(db.get("a", b"K").unwrap(), b"V1");
        assert_eq!(db.get("b", b"K").unwrap(), b"V2");
        assert!(db.get(DEFAULT_NAMESPACE, b"K").unwrap_err().is_not_found());

        db.close("a");
        assert!(db.get("a", b"K").unwrap_err().is_not_found());
        assert_eq!(db.get("b", b"K").unwrap(), b"V2");

        db.open("a").unwrap();
        assert_eq!(db.get("a", b"K").unwrap(), b"V1");
    }

    #[test]
    fn test_iterator() {
        let dir = tempdir().unwrap();
        let db = open_db(dir.path());
        for i in (0..10).rev() {
            let key = format!("key{i}");
            let value = format!("value{i}");
            db.put(DEFAULT_NAMESPACE, key.as_bytes(), value.as_bytes()).unwrap();
        }

        let entries = scan(&db, DEFAULT_NAMESPACE);
        assert_eq!(entries.len(), 10);
        assert_eq!(entries[0], (b"key0".to_vec(), b"value0".to_vec()));
        assert_eq!(entries[9], (b"key9".to_vec(), b"value9".to_vec()));

        let mut it = db.new_iterator(DEFAULT_NAMESPACE).unwrap();
        it.seek(b"key5");
        assert_eq!(it.key(), b"key5");
        it.next();
        assert_eq!(it.value(), b"value6");
        it.seek(b"key99");
        assert!(!it.valid());
        assert!(it.status().is_ok());
    }

    #[test]
    fn test_iterator_outlives_close() {
        let dir = tempdir().unwrap();
        let db = open_db(dir.path());
        db.open("tmp").unwrap();
        db.put("tmp", b"x", b"1").unwrap();

        let mut it = db.new_iterator("tmp").unwrap();
        db.close("tmp");

        it.seek_to_first();
        assert!(it.valid());
        assert_eq!(it.key(), b"x");
        drop(it);

        db.open("tmp").unwrap();
        assert_eq!(scan(&db, "tmp"), vec![(b"x".to_vec(), b"1".to_vec())]);
    }

    #[test]
    fn test_reopen_while_iterator_alive() {
        let dir = tempdir().unwrap();
        let db = open_db(dir.path());
        db.open("tmp").unwrap();
        db.put("tmp", b"x", b"1").unwrap();

        let mut it = db.new_iterator("tmp").unwrap();
        db.close("tmp");
        assert!(!db.is_open("tmp"));

        db.open("tmp").unwrap();
        assert!(db.is_open("tmp"));
        db.put("tmp", b"y", b"2").unwrap();
        assert_eq!(db.get("tmp", b"x").unwrap(), b"1");

        // The old snapshot is still readable and unaffected by the new write
        it.seek_to_first();
        assert_eq!(it.key(), b"x");
        it.next();
        assert!(!it.valid());
        drop(it);

        db.close("tmp");
        db.open("tmp").unwrap();
        assert_eq!(
            scan(&db, "tmp"),
            vec![(b"x".to_vec(), b"1".to_vec()), (b"y".to_vec(), b"2".to_vec())]
        );
    }

    #[test]
    fn test_new_reports_io_error() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();

        let err = Database::<RedbStore>::new(blocker.join("data"), EngineOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_reopen_database_preserves_data() {
        let dir = tempdir().unwrap();
        {
            let db = open_db(dir.path());
            db.open("user1").unwrap();
            db.put("user1", b"k", b"v").unwrap();
        }
        let db = open_db(dir.path());
        assert!(!db.is_open("user1"));
        db.open("user1").unwrap();
        assert_eq!(db.get("user1", b"k").unwrap(), b"v");
        assert_eq!(db.namespaces(), vec![String::new(), "user1".to_string()]);
    }

    #[test]
    fn test_invalid_namespace_names() {
        let dir = tempdir().unwrap();
        let db = open_db(dir.path());
        for name in ["../escape", "a/b", "a\\b", ".."] {
            let err = db.open(name).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument, "{name}");
        }
        assert_eq!(db.namespaces().len(), 1);
    }
}
