use crate::domain::ports::StatusCache;
use crate::error::Result;
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::debug;

/// Status cache backed by Redis string keys.
///
/// `ConnectionManager` reconnects on its own and is cheap to clone, so each
/// call works on a clone of the shared handle.
#[derive(Clone)]
pub struct RedisStatusCache {
    connection: ConnectionManager,
}

/// Redis expiries are whole seconds: round up, with a floor of one second.
fn expiry_secs(ttl: Duration) -> u64 {
    let whole = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    whole.max(1)
}

impl RedisStatusCache {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        debug!(url, "connected to redis status cache");
        Ok(Self { connection })
    }
}

#[async_trait]
impl StatusCache for RedisStatusCache {
    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut con = self.connection.clone();
        let _: () = con.set(key, value).await?;
        Ok(())
    }

    async fn set_with_expiration(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut con = self.connection.clone();
        let _: () = con.set_ex(key, value, expiry_secs(ttl)).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut con = self.connection.clone();
        let value: Option<String> = con.get(key).await?;
        Ok(value)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut con = self.connection.clone();
        let _: () = con.del(key).await?;
        Ok(())
    }
}
