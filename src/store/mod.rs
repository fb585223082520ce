//! Durable key-value state store.
//!
//! The [`StateStore`] trait is the contract the state tracker writes
//! through: hash fields addressed by key, plus key existence and deletion.
//! Backends are dumb stores; record layout, timestamps and status parsing
//! live in [`StateTracker`](crate::tracker::StateTracker).
//!
//! Backends are constructed explicitly and handed to the tracker, so the
//! connection's lifetime is owned by whoever opened it.

pub mod memory;
pub mod redis;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Hash-field key-value store.
///
/// Implementations must be `Send + Sync`; the tracker is shared across
/// worker tasks. Each call is a single round trip. There are no multi-key
/// transactions, and concurrent writers to the same key race field by field.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Set one or more fields on the hash at `key`, creating it if needed.
    async fn hset(&self, key: &str, fields: &[(&str, String)]) -> Result<()>;

    /// Read one field. `None` if the key or the field is absent.
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>>;

    /// Read every field of the hash. Empty if the key is absent.
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>>;

    /// Remove fields from the hash. Missing fields are ignored.
    async fn hdel(&self, key: &str, fields: &[&str]) -> Result<()>;

    /// Delete whole keys. Returns how many existed.
    async fn del(&self, keys: &[&str]) -> Result<u64>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Round-trip health check.
    async fn ping(&self) -> Result<()>;
}
