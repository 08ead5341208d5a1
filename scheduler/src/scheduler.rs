use std::{sync::Arc, time::Duration as StdDuration};

use chrono::Utc;
use scrapeworks_database::{Schedule, Scraper, ScraperId, ScraperStorage, TaskStatus};
use scrapeworks_graceful_shutdown::GracefulShutdownConsumer;
use scrapeworks_queues::{LeaseStateConsumer, Queue};
use tokio::sync::Mutex;
use tracing::{event, instrument, Level};

use crate::{config::SchedulerConfig, error::Result, metrics::SchedulerMetrics, trigger::TriggerState};

/// Runs the four periodic jobs (trigger evaluation, reaper, history GC,
/// metrics) while this process holds the scheduler lease. Standby
/// processes tick without doing any of the four jobs' work.
pub struct Scheduler {
    storage: Arc<dyn ScraperStorage>,
    queue: Queue,
    lease: LeaseStateConsumer,
    config: SchedulerConfig,
    metrics: Arc<SchedulerMetrics>,
    cursors: Mutex<fxhash::FxHashMap<ScraperId, TriggerState>>,
}

impl Scheduler {
    pub fn new(
        storage: Arc<dyn ScraperStorage>,
        queue: Queue,
        lease: LeaseStateConsumer,
        config: SchedulerConfig,
    ) -> Self {
        Scheduler {
            storage,
            queue,
            lease,
            config,
            metrics: Arc::new(SchedulerMetrics::new()),
            cursors: Mutex::new(fxhash::FxHashMap::default()),
        }
    }

    pub fn metrics(&self) -> Arc<SchedulerMetrics> {
        self.metrics.clone()
    }

    /// Re-evaluates every scraper's schedule and enqueues the ones that are
    /// due and pass the at-most-one-concurrent and backpressure checks.
    #[instrument(level = "debug", skip(self))]
    pub async fn evaluate_triggers(&self) -> Result<()> {
        let now = Utc::now();
        let scrapers = self.storage.list().await?;
        let mut cursors = self.cursors.lock().await;

        cursors.retain(|id, _| scrapers.iter().any(|s| &s.id == id));

        for scraper in &scrapers {
            if matches!(scraper.schedule, Schedule::Inactive) {
                cursors.remove(&scraper.id);
                continue;
            }

            let state = match cursors.get_mut(&scraper.id) {
                Some(state) => state,
                None => {
                    let Some(state) = TriggerState::new(&scraper.schedule, now)? else {
                        continue;
                    };
                    cursors.entry(scraper.id).or_insert(state)
                }
            };

            if !state.is_due(now) {
                continue;
            }

            self.try_enqueue(scraper).await?;
            cursors
                .get_mut(&scraper.id)
                .expect("cursor was just populated above")
                .advance(&scraper.schedule, now)?;
        }

        Ok(())
    }

    async fn try_enqueue(&self, scraper: &Scraper) -> Result<()> {
        let existing = self.queue.list_by_scraper(scraper.id).await?;
        if existing
            .iter()
            .any(|t| matches!(t.status, TaskStatus::Pending | TaskStatus::Started))
        {
            self.metrics
                .concurrency_skips
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            event!(Level::DEBUG, scraper = %scraper.id, "skipping fire: prior task still in flight");
            return Ok(());
        }

        let counts = self.queue.pending_counts().await?;
        let pending_at_priority = counts
            .iter()
            .find(|(p, _)| *p == scraper.schedule_priority)
            .map(|(_, c)| *c)
            .unwrap_or(0);
        if pending_at_priority >= self.config.backpressure_high_water_mark {
            self.metrics
                .backpressure_skips
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            event!(Level::WARN, scraper = %scraper.id, pending_at_priority, "skipping fire: backpressure high-water mark reached");
            return Ok(());
        }

        self.queue
            .enqueue(
                scraper.handler_name.clone(),
                scraper.config.clone(),
                scraper.schedule_priority,
                Some(scraper.id),
            )
            .await?;
        self.metrics
            .enqueued
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(())
    }

    /// Transitions `STARTED` tasks whose heartbeat has gone stale to `DEAD`.
    #[instrument(level = "debug", skip(self))]
    pub async fn run_reaper(&self) -> Result<()> {
        let now = Utc::now();
        let threshold = chrono::Duration::from_std(self.config.reaper_dead_threshold)
            .unwrap_or(chrono::Duration::seconds(25));

        for mut task in self.queue.list_active().await? {
            let last_active = task.last_active_at.unwrap_or(task.started_at.unwrap_or(task.created_at));
            if now - last_active < threshold {
                continue;
            }
            event!(Level::WARN, task = %task.id, "reaping task with stale heartbeat");
            task.status = TaskStatus::Dead;
            task.finished_at = Some(now);
            task.result = Some("heartbeat stale: worker presumed dead".to_string());
            self.queue.update(task).await?;
            self.metrics
                .reaped
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
        Ok(())
    }

    /// Retains `gc_retention` terminal tasks per scraper, deleting the rest.
    #[instrument(level = "debug", skip(self))]
    pub async fn run_gc(&self) -> Result<()> {
        let deleted = self.queue.delete_old(self.config.gc_retention).await?;
        if deleted > 0 {
            event!(Level::INFO, deleted, "garbage-collected old task history");
        }
        self.metrics
            .gc_deleted
            .fetch_add(deleted, std::sync::atomic::Ordering::Relaxed);
        Ok(())
    }

    /// Publishes `pending_count[priority]` and `active_tasks` gauges.
    #[instrument(level = "debug", skip(self))]
    pub async fn publish_metrics(&self) -> Result<()> {
        let counts = self.queue.pending_counts().await?;
        for (priority, count) in counts {
            event!(Level::DEBUG, priority = priority.as_str(), count, "pending_tasks");
        }
        let active = self.queue.list_active().await?.len();
        event!(Level::DEBUG, active_tasks = active, "active_tasks");
        Ok(())
    }

    /// Runs the tick loop until shutdown. Every tick evaluates triggers
    /// (cheap; scoped to whatever scrapers are due) and, when their own
    /// period has elapsed, runs the reaper, GC, and metrics jobs — all
    /// serially within this one task.
    pub fn run(self, mut shutdown: GracefulShutdownConsumer) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut last_reap = tokio::time::Instant::now();
            let mut last_gc = tokio::time::Instant::now();
            let mut last_metrics = tokio::time::Instant::now();

            loop {
                if self.lease.is_active() {
                    if let Err(e) = self.evaluate_triggers().await {
                        event!(Level::ERROR, error = %e, "trigger evaluation failed");
                    }

                    if last_reap.elapsed() >= self.config.reaper_interval {
                        if let Err(e) = self.run_reaper().await {
                            event!(Level::ERROR, error = %e, "reaper job failed");
                        }
                        last_reap = tokio::time::Instant::now();
                    }

                    if last_gc.elapsed() >= self.config.gc_interval {
                        if let Err(e) = self.run_gc().await {
                            event!(Level::ERROR, error = %e, "history GC job failed");
                        }
                        last_gc = tokio::time::Instant::now();
                    }

                    if last_metrics.elapsed() >= self.config.metrics_interval {
                        if let Err(e) = self.publish_metrics().await {
                            event!(Level::ERROR, error = %e, "metrics job failed");
                        }
                        last_metrics = tokio::time::Instant::now();
                    }
                }

                tokio::select! {
                    _ = tokio::time::sleep(self.config.tick_interval) => {}
                    _ = shutdown.wait_for_shutdown() => break,
                }
            }
        })
    }
}

#[allow(dead_code)]
fn assert_send_sync<T: Send + Sync>() {}
#[allow(dead_code)]
fn _assertions() {
    assert_send_sync::<Scheduler>();
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrapeworks_database::{
        InMemoryLeaseStorage, InMemoryQueueStorage, InMemoryScraperStorage, Priority, Schedule,
        Scraper, ScraperConfig,
    };
    use scrapeworks_graceful_shutdown::GracefulShutdown;
    use scrapeworks_queues::LeaseManager;

    fn sample_scraper(schedule: Schedule) -> Scraper {
        Scraper {
            id: scrapeworks_database::ScraperId::new(),
            name: "example".into(),
            handler_name: "static_scraper".into(),
            config: ScraperConfig::default(),
            schedule,
            schedule_priority: Priority::Normal,
        }
    }

    async fn active_scheduler(config: SchedulerConfig) -> (Scheduler, Arc<dyn ScraperStorage>) {
        let scraper_storage: Arc<dyn ScraperStorage> = Arc::new(InMemoryScraperStorage::new());
        let queue = Queue::new(Arc::new(InMemoryQueueStorage::new()));
        let lease_storage = Arc::new(InMemoryLeaseStorage::new());
        let (manager, consumer) = LeaseManager::new(
            lease_storage,
            "scheduler",
            "node-a",
            StdDuration::from_secs(60),
        );
        let shutdown = GracefulShutdown::new();
        manager.run(shutdown.consumer());
        // give the lease manager a tick to acquire, then let its renewal
        // loop keep running in the background for the rest of the test.
        tokio::time::sleep(StdDuration::from_millis(20)).await;

        (
            Scheduler::new(scraper_storage.clone(), queue, consumer, config),
            scraper_storage,
        )
    }

    #[tokio::test]
    async fn fires_an_every_second_scraper_once_due() {
        let (scheduler, storage) = active_scheduler(SchedulerConfig::default()).await;
        let scraper = sample_scraper(Schedule::EverySecond);
        storage.create(scraper.clone()).await.unwrap();

        scheduler.evaluate_triggers().await.unwrap();
        assert_eq!(scheduler.queue.list_by_scraper(scraper.id).await.unwrap().len(), 0);

        tokio::time::sleep(StdDuration::from_millis(1100)).await;
        scheduler.evaluate_triggers().await.unwrap();
        assert_eq!(scheduler.queue.list_by_scraper(scraper.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn skips_fire_while_a_prior_task_is_in_flight() {
        // S2: a running task blocks the next fire for the same scraper.
        let (scheduler, storage) = active_scheduler(SchedulerConfig::default()).await;
        let scraper = sample_scraper(Schedule::EverySecond);
        storage.create(scraper.clone()).await.unwrap();

        tokio::time::sleep(StdDuration::from_millis(1100)).await;
        scheduler.evaluate_triggers().await.unwrap();
        assert_eq!(scheduler.queue.list_by_scraper(scraper.id).await.unwrap().len(), 1);

        tokio::time::sleep(StdDuration::from_millis(1100)).await;
        scheduler.evaluate_triggers().await.unwrap();
        // Still just one task: the first is still PENDING, so the second
        // fire is skipped.
        assert_eq!(scheduler.queue.list_by_scraper(scraper.id).await.unwrap().len(), 1);
        assert_eq!(scheduler.metrics().snapshot().concurrency_skips, 1);
    }

    #[tokio::test]
    async fn inactive_schedule_never_fires() {
        let (scheduler, storage) = active_scheduler(SchedulerConfig::default()).await;
        let scraper = sample_scraper(Schedule::Inactive);
        storage.create(scraper.clone()).await.unwrap();

        tokio::time::sleep(StdDuration::from_millis(1100)).await;
        scheduler.evaluate_triggers().await.unwrap();
        assert_eq!(scheduler.queue.list_by_scraper(scraper.id).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn reaper_marks_stale_started_tasks_dead() {
        let mut config = SchedulerConfig::default();
        config.reaper_dead_threshold = StdDuration::from_millis(50);
        let (scheduler, _storage) = active_scheduler(config).await;

        let task_id = scheduler
            .queue
            .enqueue("static_scraper".into(), ScraperConfig::default(), Priority::Normal, None)
            .await
            .unwrap();
        scheduler.queue.dequeue().await.unwrap();

        tokio::time::sleep(StdDuration::from_millis(100)).await;
        scheduler.run_reaper().await.unwrap();

        let task = scheduler.queue.get(task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Dead);
        assert_eq!(scheduler.metrics().snapshot().reaped, 1);
    }
}
