use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use tokio::sync::Mutex;

use crate::{error::Result, redis_pool::RedisPool};

/// Time-bounded exclusive claim on a named resource. At most one `(name,
/// owner)` pair may satisfy `now < acquired_until` at any instant.
#[async_trait]
pub trait LeaseStorage: Send + Sync {
    /// Succeeds if there is no current owner, or the current owner is
    /// `owner` (a renewal). Returns whether the lease is now held by
    /// `owner`.
    async fn maybe_acquire(&self, name: &str, owner: &str, ttl: Duration) -> Result<bool>;

    /// A no-op if `owner` does not currently hold the lease.
    async fn release(&self, name: &str, owner: &str) -> Result<()>;
}

struct Held {
    owner: String,
    acquired_until: chrono::DateTime<Utc>,
}

pub struct InMemoryLeaseStorage(Mutex<HashMap<String, Held>>);

impl InMemoryLeaseStorage {
    pub fn new() -> Self {
        InMemoryLeaseStorage(Mutex::new(HashMap::new()))
    }
}

impl Default for InMemoryLeaseStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LeaseStorage for InMemoryLeaseStorage {
    async fn maybe_acquire(&self, name: &str, owner: &str, ttl: Duration) -> Result<bool> {
        let mut leases = self.0.lock().await;
        let now = Utc::now();
        let acquired_until = now + chrono::Duration::from_std(ttl).unwrap_or_default();

        match leases.get(name) {
            Some(held) if held.owner != owner && now < held.acquired_until => Ok(false),
            _ => {
                leases.insert(
                    name.to_string(),
                    Held {
                        owner: owner.to_string(),
                        acquired_until,
                    },
                );
                Ok(true)
            }
        }
    }

    async fn release(&self, name: &str, owner: &str) -> Result<()> {
        let mut leases = self.0.lock().await;
        if let Some(held) = leases.get(name) {
            if held.owner == owner {
                leases.remove(name);
            }
        }
        Ok(())
    }
}

// KEYS[1]: lease key. ARGV[1]: owner. ARGV[2]: ttl in milliseconds.
//
// Succeeds (returns 1) if the key is unset or already owned by ARGV[1];
// a `SET key owner NX PX ttl` handles first acquisition, this script
// additionally covers renewal by the existing owner in one round trip.
const ACQUIRE_SCRIPT: &str = r##"
local current = redis.call("GET", KEYS[1])
if current == false or current == ARGV[1] then
    redis.call("SET", KEYS[1], ARGV[1], "PX", ARGV[2])
    return 1
end
return 0
"##;

// KEYS[1]: lease key. ARGV[1]: owner. Compare-and-delete.
const RELEASE_SCRIPT: &str = r##"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"##;

/// Redis-backed lease at `leases:{name}`, a string holding the owner with a
/// `PX` expiry.
pub struct RedisLeaseStorage {
    pool: RedisPool,
    acquire_script: redis::Script,
    release_script: redis::Script,
}

impl RedisLeaseStorage {
    pub fn new(pool: RedisPool) -> Self {
        RedisLeaseStorage {
            pool,
            acquire_script: redis::Script::new(ACQUIRE_SCRIPT),
            release_script: redis::Script::new(RELEASE_SCRIPT),
        }
    }

    fn lease_key(&self, name: &str) -> String {
        self.pool.key(format!("leases:{name}"))
    }
}

#[async_trait]
impl LeaseStorage for RedisLeaseStorage {
    async fn maybe_acquire(&self, name: &str, owner: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let acquired: i32 = self
            .acquire_script
            .key(self.lease_key(name))
            .arg(owner)
            .arg(ttl.as_millis() as i64)
            .invoke_async(&mut conn)
            .await?;
        Ok(acquired == 1)
    }

    async fn release(&self, name: &str, owner: &str) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let _: i32 = self
            .release_script
            .key(self.lease_key(name))
            .arg(owner)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }
}
