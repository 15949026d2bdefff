use std::time::Duration;

use fred::clients::Pool;
use fred::interfaces::ClientLike;
use fred::interfaces::KeysInterface;
use fred::interfaces::ServerInterface;
use fred::types::Builder;
use fred::types::Expiration;
use fred::types::config::Config;

use super::RateLimitStore;
use crate::error::ThrottleError;

/// Redis-backed record store, shared by every instance of the application.
///
/// Commands route through a connection pool; any connection or protocol
/// failure surfaces as [`ThrottleError::StorageUnavailable`].
pub struct RedisStore {
    pool: Pool,
}

impl RedisStore {
    /// Wrap an already-connected pool.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Connect a pool of `pool_size` clients to the server at `url`
    /// (`redis://host:port`).
    pub async fn connect(url: &str, pool_size: usize) -> Result<Self, ThrottleError> {
        let config = Config::from_url(url)?;
        let pool = Builder::from_config(config).build_pool(pool_size)?;
        let _connect = pool.init().await?;
        Ok(Self { pool })
    }
}

#[async_trait::async_trait]
impl RateLimitStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ThrottleError> {
        Ok(self.pool.get::<Option<Vec<u8>>, _>(key).await?)
    }

    async fn insert(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), ThrottleError> {
        let ttl_ms = ttl.as_millis().min(i64::MAX as u128) as i64;
        let _: () = self
            .pool
            .set(key, value, Some(Expiration::PX(ttl_ms)), None, false)
            .await?;
        Ok(())
    }

    async fn flush_all(&self) -> Result<(), ThrottleError> {
        let _: () = self.pool.flushall(false).await?;
        Ok(())
    }
}
