mod error;

pub use error::{Error, Result};

/// Where the priority queue, scraper registry, lease, and log stores live.
/// `InMemory` is single-process only, useful for development; `Redis` is
/// shared across nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageBackend {
    InMemory,
    Redis,
}

/// Process-wide settings assembled from the environment. Every field has a
/// sensible default except `redis_url`, which is required when
/// `storage_backend` is `Redis`.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Host the out-of-scope external API process binds to.
    pub bind_address: String,
    pub bind_port: u16,

    pub storage_backend: StorageBackend,
    pub redis_url: Option<String>,

    /// This node's identity when acquiring the scheduler lease.
    pub node_id: String,
    pub lease_ttl_secs: u64,

    pub worker_pool_size: usize,
    pub heartbeat_interval_secs: u64,
    pub heartbeat_retry_budget_secs: u64,
    pub default_request_timeout_secs: u64,

    pub scheduler_tick_interval_ms: u64,
    pub reaper_interval_secs: u64,
    pub reaper_dead_threshold_secs: u64,
    pub gc_interval_secs: u64,
    pub gc_retention: usize,
    pub scheduler_metrics_interval_secs: u64,
    pub backpressure_high_water_mark: usize,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let storage_backend = match envoption::with_default("STORAGE_BACKEND", "memory".to_string())?
            .to_ascii_lowercase()
            .as_str()
        {
            "memory" => StorageBackend::InMemory,
            "redis" => StorageBackend::Redis,
            other => return Err(Error::InvalidStorageBackend(other.to_string())),
        };
        let redis_url: Option<String> = envoption::optional("REDIS_URL")?;
        if storage_backend == StorageBackend::Redis && redis_url.is_none() {
            return Err(Error::MissingRedisUrl);
        }

        Ok(Settings {
            bind_address: envoption::with_default("BIND_ADDRESS", "127.0.0.1".to_string())?,
            bind_port: envoption::with_default("BIND_PORT", 8080u16)?,

            storage_backend,
            redis_url,

            node_id: envoption::optional("NODE_ID")?
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            lease_ttl_secs: envoption::with_default("LEASE_TTL_SECS", 60u64)?,

            worker_pool_size: envoption::with_default("WORKER_POOL_SIZE", 50usize)?,
            heartbeat_interval_secs: envoption::with_default("HEARTBEAT_INTERVAL_SECS", 5u64)?,
            heartbeat_retry_budget_secs: envoption::with_default(
                "HEARTBEAT_RETRY_BUDGET_SECS",
                30u64,
            )?,
            default_request_timeout_secs: envoption::with_default(
                "DEFAULT_REQUEST_TIMEOUT_SECS",
                30u64,
            )?,

            scheduler_tick_interval_ms: envoption::with_default("SCHEDULER_TICK_INTERVAL_MS", 500u64)?,
            reaper_interval_secs: envoption::with_default("REAPER_INTERVAL_SECS", 10u64)?,
            reaper_dead_threshold_secs: envoption::with_default(
                "REAPER_DEAD_THRESHOLD_SECS",
                25u64,
            )?,
            gc_interval_secs: envoption::with_default("GC_INTERVAL_SECS", 3600u64)?,
            gc_retention: envoption::with_default("GC_RETENTION", 50usize)?,
            scheduler_metrics_interval_secs: envoption::with_default(
                "SCHEDULER_METRICS_INTERVAL_SECS",
                5u64,
            )?,
            backpressure_high_water_mark: envoption::with_default(
                "BACKPRESSURE_HIGH_WATER_MARK",
                1000usize,
            )?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_environment_is_unset() {
        std::env::remove_var("STORAGE_BACKEND");
        std::env::remove_var("REDIS_URL");
        std::env::remove_var("WORKER_POOL_SIZE");
        let settings = Settings::from_env().unwrap();
        assert_eq!(settings.storage_backend, StorageBackend::InMemory);
        assert_eq!(settings.worker_pool_size, 50);
        assert_eq!(settings.bind_port, 8080);
    }

    #[test]
    fn redis_backend_without_url_is_an_error() {
        std::env::set_var("STORAGE_BACKEND", "redis");
        std::env::remove_var("REDIS_URL");
        assert_matches::assert_matches!(Settings::from_env(), Err(Error::MissingRedisUrl));
        std::env::remove_var("STORAGE_BACKEND");
    }
}
