use std::sync::Arc;

use scrapeworks_config::{Settings, StorageBackend};
use scrapeworks_database::{
    InMemoryLogStorage, InMemoryQueueStorage, InMemoryScraperStorage, LogStorage, Priority,
    QueueStorage, RedisLogStorage, RedisPool, RedisQueueStorage, RedisScraperStorage,
    ScraperConfig, ScraperId, ScraperStorage, TaskId,
};
use scrapeworks_queues::Queue;
use structopt::StructOpt;

/// Administrative CLI for an already-running installation. Talks to the
/// same storage the server process uses; does not itself run a scheduler
/// or worker pool.
#[derive(Debug, StructOpt)]
enum Command {
    /// List every persisted scraper.
    ListScrapers,
    /// Enqueue a run of a persisted scraper at its configured priority.
    Enqueue { scraper_id: ScraperId, priority: PriorityArg },
    /// Enqueue an ad-hoc task not tied to any scraper.
    RunEphemeral {
        handler_name: String,
        #[structopt(default_value = "normal")]
        priority: PriorityArg,
    },
    /// Print a task's current status.
    TaskStatus { task_id: TaskId },
    /// Print a task's log lines.
    Logs {
        task_id: TaskId,
        #[structopt(default_value = "0")]
        after_id: u64,
        #[structopt(default_value = "200")]
        max_lines: usize,
    },
}

#[derive(Debug, Clone, Copy)]
struct PriorityArg(Priority);

impl std::str::FromStr for PriorityArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "utmost" => Ok(PriorityArg(Priority::Utmost)),
            "high" => Ok(PriorityArg(Priority::High)),
            "normal" => Ok(PriorityArg(Priority::Normal)),
            other => Err(format!("unknown priority {other:?}, expected utmost|high|normal")),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    scrapeworks::tracing_config::configure("scrapeworks-ctl");

    let settings = Settings::from_env()?;
    let command = Command::from_args();

    let (scrapers, queue_storage, log_storage): (
        Arc<dyn ScraperStorage>,
        Arc<dyn QueueStorage>,
        Arc<dyn LogStorage>,
    ) = match settings.storage_backend {
        StorageBackend::InMemory => (
            Arc::new(InMemoryScraperStorage::new()),
            Arc::new(InMemoryQueueStorage::new()),
            Arc::new(InMemoryLogStorage::new()),
        ),
        StorageBackend::Redis => {
            let url = settings.redis_url.clone().expect("checked in Settings::from_env");
            let pool = RedisPool::new(Some(url), None)?;
            (
                Arc::new(RedisScraperStorage::new(pool.clone())),
                Arc::new(RedisQueueStorage::new(pool.clone())),
                Arc::new(RedisLogStorage::new(pool)),
            )
        }
    };
    let queue = Queue::new(queue_storage);
    let handlers = Arc::new(scrapeworks::default_handlers());
    let server = scrapeworks::Server::new(scrapers, queue, log_storage, handlers);

    match command {
        Command::ListScrapers => {
            let scrapers = server.get_scrapers().await?;
            println!("{}", serde_json::to_string_pretty(&scrapers)?);
        }
        Command::Enqueue { scraper_id, priority } => {
            let task_id = server.enqueue_scraper(scraper_id, priority.0).await?;
            println!("{task_id}");
        }
        Command::RunEphemeral { handler_name, priority } => {
            let task_id = server
                .run_ephemeral(handler_name, ScraperConfig::default(), priority.0)
                .await?;
            println!("{task_id}");
        }
        Command::TaskStatus { task_id } => {
            let task = server.get_task_instance(task_id).await?;
            println!("{}", serde_json::to_string_pretty(&task)?);
        }
        Command::Logs { task_id, after_id, max_lines } => {
            let lines = server.get_task_logs(task_id, after_id, max_lines).await?;
            for line in lines {
                println!("[{:>5}] {:?} {}", line.id, line.level, line.message);
            }
        }
    }

    Ok(())
}
