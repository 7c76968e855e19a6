//! KvStore Capability and the Sled Engine
//!
//! [`KvStore`] is the narrow interface the rest of the crate consumes: point
//! gets and puts, existence checks, deletes, and `apply_batch`, the
//! single-transaction multi-key commit the batch writer relies on. All
//! operations are transactional at the engine layer.
//!
//! [`SledStore`] is the shipped implementation over an embedded sled tree.
//! sled's `apply_batch` applies the whole batch atomically, which is exactly
//! the commit discipline a flush needs.

use std::path::Path;

use bytes::Bytes;
use thiserror::Error;

use crate::protocol::KEY_LEN;

/// Errors surfaced by a store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The engine reported a fault (I/O, corruption, ...).
    #[error("engine error: {0}")]
    Engine(String),

    /// A batch commit was rejected by the engine.
    #[error("transaction aborted: {0}")]
    TransactionAborted(String),
}

impl From<sled::Error> for StoreError {
    fn from(e: sled::Error) -> Self {
        StoreError::Engine(e.to_string())
    }
}

/// The engine capability handlers and the batch writer consume.
///
/// Implementations must be safe to share across tasks; every method takes
/// `&self`. A missing key is not an error: `get` returns `None` and `exists`
/// returns `false`.
pub trait KvStore: Send + Sync + 'static {
    /// Point lookup. `None` when the key is absent.
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>, StoreError>;

    /// Point put. Overwrites any existing value.
    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    /// Existence check without materializing the value.
    fn exists(&self, key: &[u8]) -> Result<bool, StoreError>;

    /// Removes a key. Deleting an absent key is not an error.
    fn delete(&self, key: &[u8]) -> Result<(), StoreError>;

    /// Commits every pair in `batch` as one engine transaction.
    ///
    /// Either the whole batch becomes visible or none of it does. Ordering
    /// within the batch is unspecified.
    fn apply_batch(&self, batch: &[([u8; KEY_LEN], Bytes)]) -> Result<(), StoreError>;

    /// Flushes and releases engine resources. Called once at shutdown.
    fn close(&self) -> Result<(), StoreError>;
}

/// Embedded ordered KV engine backed by sled.
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    /// Opens (creating if necessary) a sled database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = sled::open(path.as_ref())?;
        Ok(Self { db })
    }

    /// Number of live keys. Used by tests and the stats surface.
    pub fn len(&self) -> usize {
        self.db.len()
    }

    /// True when the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }
}

impl KvStore for SledStore {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>, StoreError> {
        let found = self.db.get(key)?;
        Ok(found.map(|ivec| Bytes::copy_from_slice(&ivec)))
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.db.insert(key, value)?;
        Ok(())
    }

    fn exists(&self, key: &[u8]) -> Result<bool, StoreError> {
        Ok(self.db.contains_key(key)?)
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.db.remove(key)?;
        Ok(())
    }

    fn apply_batch(&self, batch: &[([u8; KEY_LEN], Bytes)]) -> Result<(), StoreError> {
        let mut engine_batch = sled::Batch::default();
        for (key, value) in batch {
            engine_batch.insert(&key[..], &value[..]);
        }
        self.db
            .apply_batch(engine_batch)
            .map_err(|e| StoreError::TransactionAborted(e.to_string()))
    }

    fn close(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}
