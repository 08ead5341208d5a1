use std::{env, ops::Deref, sync::Arc};

use crate::error::{Error, Result};

/// Thin wrapper over a `deadpool_redis` connection pool, with an optional
/// key prefix so multiple logical deployments can share one Redis instance.
#[derive(Clone)]
pub struct RedisPool(Arc<RedisPoolInner>);

struct RedisPoolInner {
    pool: deadpool_redis::Pool,
    key_prefix: Option<String>,
}

impl Deref for RedisPool {
    type Target = deadpool_redis::Pool;

    fn deref(&self) -> &Self::Target {
        &self.0.pool
    }
}

impl RedisPool {
    pub fn new(connection: Option<String>, key_prefix: Option<String>) -> Result<RedisPool> {
        let redis_url = connection
            .or_else(|| env::var("REDIS_URL").ok())
            .ok_or_else(|| Error::ConfigError("REDIS_URL is required".to_string()))?;

        let pool = deadpool_redis::Config {
            url: Some(redis_url),
            connection: None,
            pool: None,
        }
        .create_pool(Some(deadpool_redis::Runtime::Tokio1))?;

        Ok(RedisPool(Arc::new(RedisPoolInner { pool, key_prefix })))
    }

    pub fn pool(&self) -> &deadpool_redis::Pool {
        &self.0.pool
    }

    pub fn key_prefix(&self) -> Option<&str> {
        self.0.key_prefix.as_deref()
    }

    /// Prefix a logical key name with the pool's key prefix, if any.
    pub fn key(&self, name: impl AsRef<str>) -> String {
        match self.key_prefix() {
            Some(prefix) => format!("{prefix}:{}", name.as_ref()),
            None => name.as_ref().to_string(),
        }
    }
}
