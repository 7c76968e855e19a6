//! Named Store Manager
//!
//! A name → engine map built once from configuration. Handlers look their
//! store up by name at wiring time and hold the `Arc` for the life of the
//! server; the map itself is never consulted on the hot path.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info};

use crate::config::StoreConfig;
use crate::storage::store::{KvStore, SledStore, StoreError};

/// Errors from store-manager operations.
#[derive(Debug, Error)]
pub enum StoreManagerError {
    /// No store is configured under the requested name.
    #[error("store not found: {0}")]
    NotFound(String),

    /// A store under this name already exists.
    #[error("store already registered: {0}")]
    AlreadyRegistered(String),

    /// Opening or closing an engine failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Holds every named engine instance for the life of the process.
pub struct StoreManager {
    stores: HashMap<String, Arc<dyn KvStore>>,
}

impl StoreManager {
    /// Opens every store named in `configs`.
    pub fn from_configs(configs: &[StoreConfig]) -> Result<Self, StoreManagerError> {
        let mut manager = Self {
            stores: HashMap::new(),
        };
        for cfg in configs {
            let store = SledStore::open(&cfg.path)?;
            info!(name = %cfg.name, path = %cfg.path.display(), "Opened store");
            manager.register(&cfg.name, Arc::new(store))?;
        }
        Ok(manager)
    }

    /// Creates an empty manager. Stores are added with [`register`].
    ///
    /// [`register`]: StoreManager::register
    pub fn new() -> Self {
        Self {
            stores: HashMap::new(),
        }
    }

    /// Adds a store under `name`. First registration wins.
    pub fn register(
        &mut self,
        name: &str,
        store: Arc<dyn KvStore>,
    ) -> Result<(), StoreManagerError> {
        if self.stores.contains_key(name) {
            return Err(StoreManagerError::AlreadyRegistered(name.to_string()));
        }
        self.stores.insert(name.to_string(), store);
        Ok(())
    }

    /// Looks up a store by name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn KvStore>, StoreManagerError> {
        self.stores
            .get(name)
            .cloned()
            .ok_or_else(|| StoreManagerError::NotFound(name.to_string()))
    }

    /// Registered store names, for diagnostics.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.stores.keys().map(String::as_str)
    }

    /// Closes every store, attempting all of them even when some fail.
    ///
    /// Returns the first error encountered, if any.
    pub fn close_all(&self) -> Result<(), StoreManagerError> {
        let mut first_err = None;
        for (name, store) in &self.stores {
            if let Err(e) = store.close() {
                error!(store = %name, error = %e, "Failed to close store");
                first_err.get_or_insert(e);
            } else {
                info!(store = %name, "Store closed");
            }
        }
        match first_err {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

impl Default for StoreManager {
    fn default() -> Self {
        Self::new()
    }
}
