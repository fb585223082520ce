//! In-process state store (for testing and single-process runs).

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use super::StateStore;
use crate::error::{Error, Result};

type Hashes = HashMap<String, HashMap<String, String>>;

/// Hash store held in a mutex-guarded map.
///
/// Can be switched offline to exercise store-unavailability paths: while
/// offline every operation fails with [`Error::Store`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    hashes: Mutex<Hashes>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the store going away (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.offline.store(!available, Ordering::SeqCst);
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.hashes.lock().map(|h| h.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_hashes<T>(&self, f: impl FnOnce(&mut Hashes) -> T) -> Result<T> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Store("memory store is offline".to_string()));
        }
        let mut hashes = self
            .hashes
            .lock()
            .map_err(|_| Error::Store("memory store lock poisoned".to_string()))?;
        Ok(f(&mut hashes))
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn hset(&self, key: &str, fields: &[(&str, String)]) -> Result<()> {
        self.with_hashes(|hashes| {
            let hash = hashes.entry(key.to_string()).or_default();
            for (field, value) in fields {
                hash.insert(field.to_string(), value.clone());
            }
        })
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        self.with_hashes(|hashes| hashes.get(key).and_then(|h| h.get(field)).cloned())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        self.with_hashes(|hashes| hashes.get(key).cloned().unwrap_or_default())
    }

    async fn hdel(&self, key: &str, fields: &[&str]) -> Result<()> {
        self.with_hashes(|hashes| {
            if let Some(hash) = hashes.get_mut(key) {
                for field in fields {
                    hash.remove(*field);
                }
                // Redis drops a hash once its last field is gone.
                if hash.is_empty() {
                    hashes.remove(key);
                }
            }
        })
    }

    async fn del(&self, keys: &[&str]) -> Result<u64> {
        self.with_hashes(|hashes| {
            keys.iter()
                .filter(|key| hashes.remove(**key).is_some())
                .count() as u64
        })
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.with_hashes(|hashes| hashes.contains_key(key))
    }

    async fn ping(&self) -> Result<()> {
        self.with_hashes(|_| ())
    }
}
