use std::{sync::Arc, time::Duration};

use scrapeworks_config::{Settings, StorageBackend};
use scrapeworks_database::{
    InMemoryLeaseStorage, InMemoryLogStorage, InMemoryQueueStorage, InMemoryScraperStorage,
    LeaseStorage, LogStorage, QueueStorage, RedisLeaseStorage, RedisLogStorage,
    RedisPool, RedisQueueStorage, RedisScraperStorage, ScraperStorage,
};
use scrapeworks_graceful_shutdown::GracefulShutdown;
use scrapeworks_queues::{LeaseManager, Queue};
use scrapeworks_scheduler::{Scheduler, SchedulerConfig};
use scrapeworks_worker::{Worker, WorkerConfig};
use structopt::StructOpt;
use tracing::{event, Level};

#[derive(Debug, StructOpt)]
struct Args {
    #[structopt(long, help = "Run standby: skip starting the worker pool")]
    no_workers: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::from_args();

    scrapeworks::tracing_config::configure("scrapeworks-server");
    let settings = Settings::from_env()?;
    let mut shutdown = GracefulShutdown::new();

    let (scrapers, queue_storage, lease_storage, log_storage): (
        Arc<dyn ScraperStorage>,
        Arc<dyn QueueStorage>,
        Arc<dyn LeaseStorage>,
        Arc<dyn LogStorage>,
    ) = match settings.storage_backend {
        StorageBackend::InMemory => (
            Arc::new(InMemoryScraperStorage::new()),
            Arc::new(InMemoryQueueStorage::new()),
            Arc::new(InMemoryLeaseStorage::new()),
            Arc::new(InMemoryLogStorage::new()),
        ),
        StorageBackend::Redis => {
            let url = settings.redis_url.clone().expect("checked in Settings::from_env");
            let pool = RedisPool::new(Some(url), None)?;
            (
                Arc::new(RedisScraperStorage::new(pool.clone())),
                Arc::new(RedisQueueStorage::new(pool.clone())),
                Arc::new(RedisLeaseStorage::new(pool.clone())),
                Arc::new(RedisLogStorage::new(pool)),
            )
        }
    };

    let queue = Queue::new(queue_storage);
    let handlers = Arc::new(scrapeworks::default_handlers());
    let client = reqwest::Client::new();
    let middlewares = scrapeworks::default_middlewares(client.clone());

    let server = Arc::new(scrapeworks::Server::new(
        scrapers.clone(),
        queue.clone(),
        log_storage.clone(),
        handlers.clone(),
    ));
    event!(
        Level::INFO,
        read_only = server.is_read_only(),
        handlers = ?server.get_scraper_handlers(),
        "server composed"
    );

    let (lease_manager, lease_consumer) = LeaseManager::new(
        lease_storage,
        "scheduler",
        settings.node_id.clone(),
        Duration::from_secs(settings.lease_ttl_secs),
    );
    let lease_handle = lease_manager.run(shutdown.consumer());

    let scheduler = Scheduler::new(
        scrapers,
        queue.clone(),
        lease_consumer,
        SchedulerConfig {
            tick_interval: Duration::from_millis(settings.scheduler_tick_interval_ms),
            reaper_interval: Duration::from_secs(settings.reaper_interval_secs),
            reaper_dead_threshold: Duration::from_secs(settings.reaper_dead_threshold_secs),
            gc_interval: Duration::from_secs(settings.gc_interval_secs),
            gc_retention: settings.gc_retention,
            metrics_interval: Duration::from_secs(settings.scheduler_metrics_interval_secs),
            backpressure_high_water_mark: settings.backpressure_high_water_mark,
        },
    );
    let scheduler_handle = scheduler.run(shutdown.consumer());

    let worker_handle = if args.no_workers {
        None
    } else {
        let worker = Arc::new(Worker::new(
            queue,
            handlers,
            middlewares,
            client,
            log_storage,
            WorkerConfig {
                pool_size: settings.worker_pool_size,
                heartbeat_interval: Duration::from_secs(settings.heartbeat_interval_secs),
                heartbeat_retry_budget: Duration::from_secs(settings.heartbeat_retry_budget_secs),
                default_request_timeout: Duration::from_secs(settings.default_request_timeout_secs),
                ..Default::default()
            },
        ));
        Some(worker.run(shutdown.consumer()))
    };

    event!(
        Level::INFO,
        bind = %format!("{}:{}", settings.bind_address, settings.bind_port),
        "core ready; external API layer (out of scope) should bind here"
    );

    shutdown.shutdown_finished.await.ok();
    lease_handle.await.ok();
    scheduler_handle.await.ok();
    if let Some(h) = worker_handle {
        h.await.ok();
    }

    Ok(())
}
