//! Redis state store.
//!
//! Each tracker key maps to one Redis hash. Commands are issued over a
//! [`MultiplexedConnection`], which clones cheaply: every clone shares the
//! same TCP connection, so each method clones it rather than locking.

use std::collections::HashMap;

use ::redis::AsyncCommands;
use ::redis::aio::MultiplexedConnection;
use async_trait::async_trait;
use tracing::debug;

use super::StateStore;
use crate::error::Result;

/// Redis-backed [`StateStore`].
#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
}

impl RedisStore {
    /// Connect to Redis. The URL format is
    /// `redis://[:<password>@]<host>:<port>[/<db>]`. Fails fast if the
    /// server cannot be reached.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = ::redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        debug!("redis state store connected");
        Ok(Self { conn })
    }

    /// Close the store. Pending commands on other clones still complete;
    /// the socket closes once the last clone is dropped.
    pub fn close(self) {
        drop(self.conn);
        debug!("redis state store closed");
    }
}

#[async_trait]
impl StateStore for RedisStore {
    async fn hset(&self, key: &str, fields: &[(&str, String)]) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.hset_multiple(key, fields).await?;
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.hget(key, field).await?)
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.conn.clone();
        Ok(conn.hgetall(key).await?)
    }

    async fn hdel(&self, key: &str, fields: &[&str]) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let _: i64 = conn.hdel(key, fields).await?;
        Ok(())
    }

    async fn del(&self, keys: &[&str]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        Ok(conn.del(keys).await?)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        Ok(conn.exists(key).await?)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = ::redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
