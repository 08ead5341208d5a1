use std::time::Duration;

/// Tunables for the four scheduler jobs. All periods are independent of
/// each other; the scheduler drives them off one tick loop so that within a
/// single process they still execute serially.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often the scheduler wakes to check whether any job is due.
    /// Must be no coarser than the finest schedule granularity in use
    /// (`every_second`), or fires will be delayed by up to this much.
    pub tick_interval: Duration,
    pub reaper_interval: Duration,
    /// A `STARTED` task whose `last_active_at` is older than this is
    /// presumed dead.
    pub reaper_dead_threshold: Duration,
    pub gc_interval: Duration,
    /// Terminal tasks retained per scraper after GC.
    pub gc_retention: usize,
    pub metrics_interval: Duration,
    /// Pending-task count at a priority above which new fires for that
    /// priority are skipped (backpressure).
    pub backpressure_high_water_mark: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            tick_interval: Duration::from_millis(500),
            reaper_interval: Duration::from_secs(10),
            reaper_dead_threshold: Duration::from_secs(25),
            gc_interval: Duration::from_secs(3600),
            gc_retention: 50,
            metrics_interval: Duration::from_secs(5),
            backpressure_high_water_mark: 1000,
        }
    }
}
