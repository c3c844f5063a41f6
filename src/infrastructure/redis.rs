use crate::domain::KeyValueStore;
use anyhow::Context;
use async_trait::async_trait;
use deadpool_redis::redis::AsyncCommands;
use deadpool_redis::{Config, Pool, Runtime};
use tracing::{error, info};

/// Redis-backed cache persistence.
///
/// Entries are written without an expiry; freshness is decided on read from
/// the timestamp stored inside each value.
pub struct RedisRepository {
    pool: Option<Pool>,
}

impl RedisRepository {
    pub fn new(url: Option<String>) -> Self {
        if let Some(redis_url) = url {
            match Config::from_url(&redis_url).create_pool(Some(Runtime::Tokio1)) {
                Ok(pool) => {
                    info!("Redis connection pool initialized");
                    Self { pool: Some(pool) }
                }
                Err(e) => {
                    error!("Failed to create Redis connection pool: {}", e);
                    Self { pool: None }
                }
            }
        } else {
            info!("Redis URL not provided, cache persistence disabled");
            Self { pool: None }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.pool.is_some()
    }
}

#[async_trait]
impl KeyValueStore for RedisRepository {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let Some(pool) = &self.pool else {
            return Ok(None);
        };
        let mut conn = pool.get().await.context("Failed to get Redis connection from pool")?;
        let value: Option<String> = conn
            .get(key)
            .await
            .with_context(|| format!("Redis GET {} failed", key))?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let Some(pool) = &self.pool else {
            return Ok(());
        };
        let mut conn = pool.get().await.context("Failed to get Redis connection from pool")?;
        let _: () = conn
            .set(key, value)
            .await
            .with_context(|| format!("Redis SET {} failed", key))?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
