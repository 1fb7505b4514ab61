//! In-memory storage adapter.
//!
//! Implements both [`ConfigPort`] and [`StoragePort`] over a map of
//! `namespace::key` blobs. Hosts that persist to disk or a hub database
//! wrap the same contract; this backend serves simulation and tests.
//!
//! - Config validation: [`DabConfig::validate`] runs before every save.
//! - Atomic writes: a blob is replaced whole or not at all.
//! - Optional capacity limit to exercise `StorageError::Full` paths.

use std::cell::RefCell;
use std::collections::HashMap;

use log::{info, warn};

use crate::app::ports::{ConfigError, ConfigPort, StorageError, StoragePort};
use crate::config::DabConfig;

const CONFIG_NAMESPACE: &str = "dab";
const CONFIG_KEY: &str = "config";

#[derive(Debug, Default)]
pub struct MemoryStore {
    store: RefCell<HashMap<String, Vec<u8>>>,
    /// Total bytes allowed across all blobs; `None` is unlimited.
    capacity: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        info!("MemoryStore: in-memory backend");
        Self::default()
    }

    pub fn with_capacity_limit(bytes: usize) -> Self {
        Self {
            capacity: Some(bytes),
            ..Self::default()
        }
    }

    fn composite_key(namespace: &str, key: &str) -> String {
        format!("{}::{}", namespace, key)
    }

    fn put(&self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let composite = Self::composite_key(namespace, key);
        let mut store = self.store.borrow_mut();
        if let Some(limit) = self.capacity {
            let others: usize = store
                .iter()
                .filter(|(k, _)| **k != composite)
                .map(|(_, v)| v.len())
                .sum();
            if others + data.len() > limit {
                warn!("MemoryStore: {} bytes for {} exceeds capacity", data.len(), composite);
                return Err(StorageError::Full);
            }
        }
        store.insert(composite, data.to_vec());
        Ok(())
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        self.store.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.borrow().is_empty()
    }

    /// Overwrite a blob without any checks (simulates external corruption).
    pub fn inject(&self, namespace: &str, key: &str, data: &[u8]) {
        self.store
            .borrow_mut()
            .insert(Self::composite_key(namespace, key), data.to_vec());
    }
}

impl ConfigPort for MemoryStore {
    fn load(&self) -> Result<DabConfig, ConfigError> {
        let key = Self::composite_key(CONFIG_NAMESPACE, CONFIG_KEY);
        match self.store.borrow().get(&key) {
            Some(bytes) => {
                let cfg: DabConfig =
                    postcard::from_bytes(bytes).map_err(|_| ConfigError::Corrupted)?;
                cfg.validate()?;
                info!("MemoryStore: loaded config");
                Ok(cfg)
            }
            None => {
                info!("MemoryStore: no stored config, using defaults");
                Ok(DabConfig::default())
            }
        }
    }

    fn save(&self, config: &DabConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let bytes = postcard::to_allocvec(config).map_err(|_| ConfigError::IoError)?;
        self.put(CONFIG_NAMESPACE, CONFIG_KEY, &bytes)
            .map_err(|e| match e {
                StorageError::Full => ConfigError::StorageFull,
                StorageError::NotFound | StorageError::IoError => ConfigError::IoError,
            })?;
        info!("MemoryStore: config saved ({} bytes)", bytes.len());
        Ok(())
    }
}

impl StoragePort for MemoryStore {
    fn read(&self, namespace: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        self.store
            .borrow()
            .get(&Self::composite_key(namespace, key))
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.put(namespace, key, data)
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        self.store
            .borrow_mut()
            .remove(&Self::composite_key(namespace, key));
        Ok(())
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        self.store
            .borrow()
            .contains_key(&Self::composite_key(namespace, key))
    }
}
