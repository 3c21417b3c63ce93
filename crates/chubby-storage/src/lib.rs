//! Chubby Storage - durable state of a lock-service node
//!
//! This crate implements the persistence layer a Raft-replicated lock
//! service depends on for correctness:
//! - Operation log keyed by slot index, with atomic batch append and
//!   suffix truncation
//! - Consensus metadata (current term, votes, root principal) in
//!   append-only files, independent of the log engine
//! - Namespaced key-value stores holding the applied state
//!
//! All three sit on an [`OrderedStore`], an embedded sorted key-value
//! engine with atomic, fsync-backed write batches. [`RedbStore`] is the
//! production engine.

pub mod binlog;
pub mod codec;
pub mod database;
pub mod engine;
pub mod entry;
pub mod meta;
mod meta_file;

// Re-exports
pub use binlog::{LogOptions, NO_TERM, OperationLog};
pub use codec::{index_to_key, key_to_index};
pub use database::{DEFAULT_NAMESPACE, Database, NamespaceIterator};
pub use engine::{EngineError, EngineOptions, OrderedStore, RedbStore, StoreIterator, WriteBatch};
pub use entry::{LogEntry, LogOperation};
pub use meta::{ConsensusMeta, RootInfo};
