//! Redis cache backend (feature `redis`).
//!
//! Entries are plain string keys written with `SET key value EX ttl`, so the
//! TTL is enforced by Redis and several gateway instances share one keyspace.

use std::time::Duration;

use ::redis::aio::ConnectionManager;
use ::redis::{AsyncCommands, ConnectionAddr, ConnectionInfo};
use async_trait::async_trait;
use tracing::info;

use super::{CacheBackend, CacheResult};

/// [`CacheBackend`] over a multiplexed, auto-reconnecting Redis connection.
///
/// Cloning is cheap; clones share the connection.
#[derive(Clone)]
pub struct RedisBackend {
    conn: ConnectionManager,
}

impl RedisBackend {
    /// Connects to `url` (e.g. `redis://127.0.0.1:6379/0`).
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Redis`](super::CacheError::Redis) if the URL is
    /// invalid or the first connection cannot be established.
    pub async fn connect(url: &str) -> CacheResult<Self> {
        let client = ::redis::Client::open(url)?;
        let endpoint = endpoint(client.get_connection_info());
        let conn = ConnectionManager::new(client).await?;
        info!(%endpoint, "connected to redis cache backend");
        Ok(Self { conn })
    }

    /// Wraps an existing connection manager.
    pub fn from_manager(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

// Host, port and database of a connection, for logs. Credentials in the URL
// are left out.
fn endpoint(info: &ConnectionInfo) -> String {
    let addr = match &info.addr {
        ConnectionAddr::Tcp(host, port) | ConnectionAddr::TcpTls { host, port, .. } => {
            format!("{host}:{port}")
        }
        other => format!("{other:?}"),
    };
    format!("{addr}/{}", info.redis.db)
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        // EX takes whole seconds and rejects 0.
        let seconds = ttl.as_secs().max(1);
        let () = conn.set_ex(key, value, seconds).await?;
        Ok(())
    }
}
