use std::sync::atomic::{AtomicU64, Ordering};

/// Scheduler-side counters. Separate from the `tracing` events emitted
/// alongside each skip/reap/GC so tests can assert on outcomes without
/// scraping logs.
#[derive(Default)]
pub struct SchedulerMetrics {
    pub concurrency_skips: AtomicU64,
    pub backpressure_skips: AtomicU64,
    pub reaped: AtomicU64,
    pub gc_deleted: AtomicU64,
    pub enqueued: AtomicU64,
}

impl SchedulerMetrics {
    pub fn new() -> Self {
        SchedulerMetrics::default()
    }

    pub fn snapshot(&self) -> SchedulerMetricsSnapshot {
        SchedulerMetricsSnapshot {
            concurrency_skips: self.concurrency_skips.load(Ordering::Relaxed),
            backpressure_skips: self.backpressure_skips.load(Ordering::Relaxed),
            reaped: self.reaped.load(Ordering::Relaxed),
            gc_deleted: self.gc_deleted.load(Ordering::Relaxed),
            enqueued: self.enqueued.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerMetricsSnapshot {
    pub concurrency_skips: u64,
    pub backpressure_skips: u64,
    pub reaped: u64,
    pub gc_deleted: u64,
    pub enqueued: u64,
}
