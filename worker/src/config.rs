use std::time::Duration;

/// Tunables for the worker pool. Mirrors the scheduler's config shape: one
/// plain struct, independent durations, constructed once at server
/// composition.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of concurrent dequeue-and-run loops.
    pub pool_size: usize,
    /// How often a running task's heartbeat persists `last_active_at`.
    pub heartbeat_interval: Duration,
    /// How long the heartbeat keeps retrying a failing storage write before
    /// giving up and killing the task.
    pub heartbeat_retry_budget: Duration,
    /// Per-request timeout used when a handler doesn't override it.
    pub default_request_timeout: Duration,
    /// Ceiling for the dequeue loop's exponential backoff when the queue is
    /// empty.
    pub dequeue_backoff_max: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            pool_size: 50,
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_retry_budget: Duration::from_secs(30),
            default_request_timeout: Duration::from_secs(30),
            dequeue_backoff_max: Duration::from_secs(1),
        }
    }
}
