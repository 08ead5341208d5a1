use std::{str::FromStr, sync::Arc};

use scrapeworks_context::RegisteredMiddleware;
use scrapeworks_database::{
    LogLine, LogStorage, Priority, Schedule, Scraper, ScraperConfig, ScraperFilters, ScraperId,
    ScraperStorage, Task, TaskId,
};
use scrapeworks_handlers::HandlerRegistry;
use scrapeworks_queues::Queue;

use crate::error::{Error, Result};

/// Filters accepted by `search_scrapers`. Owned so the JSON-RPC layer can
/// build one from a deserialized request without fighting lifetimes.
#[derive(Clone, Debug, Default)]
pub struct ScraperSearch {
    pub handler_name: Option<String>,
    pub name_contains: Option<String>,
    pub schedule_active: Option<bool>,
}

/// The schedule kinds `get_schedules` advertises, in the order a UI should
/// offer them.
pub const SCHEDULE_KINDS: &[&str] = &[
    "inactive",
    "every_second",
    "every_minute",
    "every_hour",
    "every_day",
    "every_week",
    "crontab",
];

/// Wires storage, the queue, the log store, and the handler registry behind
/// the operation set an external API layer drives. One `Server` is shared
/// (via `Arc`) between that layer, the scheduler, and the worker pool — all
/// three read and mutate the same underlying stores.
pub struct Server {
    scrapers: Arc<dyn ScraperStorage>,
    queue: Queue,
    logs: Arc<dyn LogStorage>,
    handlers: Arc<HandlerRegistry>,
}

impl Server {
    pub fn new(
        scrapers: Arc<dyn ScraperStorage>,
        queue: Queue,
        logs: Arc<dyn LogStorage>,
        handlers: Arc<HandlerRegistry>,
    ) -> Self {
        Server {
            scrapers,
            queue,
            logs,
            handlers,
        }
    }

    pub fn queue(&self) -> Queue {
        self.queue.clone()
    }

    pub fn scrapers(&self) -> Arc<dyn ScraperStorage> {
        self.scrapers.clone()
    }

    pub fn logs(&self) -> Arc<dyn LogStorage> {
        self.logs.clone()
    }

    pub fn handlers(&self) -> Arc<HandlerRegistry> {
        self.handlers.clone()
    }

    pub async fn get_scrapers(&self) -> Result<Vec<Scraper>> {
        Ok(self.scrapers.list().await?)
    }

    pub async fn get_scraper(&self, id: ScraperId) -> Result<Scraper> {
        Ok(self.scrapers.get(id).await?)
    }

    pub async fn create_scraper(&self, scraper: Scraper) -> Result<Scraper> {
        self.validate_scraper(&scraper)?;
        Ok(self.scrapers.create(scraper).await?)
    }

    pub async fn update_scraper(&self, scraper: Scraper) -> Result<Scraper> {
        self.validate_scraper(&scraper)?;
        Ok(self.scrapers.update(scraper).await?)
    }

    pub async fn delete_scraper(&self, id: ScraperId) -> Result<()> {
        Ok(self.scrapers.delete(id).await?)
    }

    pub async fn search_scrapers(&self, filters: ScraperSearch) -> Result<Vec<Scraper>> {
        Ok(self
            .scrapers
            .search(ScraperFilters {
                handler_name: filters.handler_name.as_deref(),
                name_contains: filters.name_contains.as_deref(),
                schedule_active: filters.schedule_active,
            })
            .await?)
    }

    pub fn is_read_only(&self) -> bool {
        self.scrapers.is_read_only()
    }

    pub fn get_scraper_handlers(&self) -> Vec<&'static str> {
        self.handlers.names()
    }

    pub fn get_schedules(&self) -> &'static [&'static str] {
        SCHEDULE_KINDS
    }

    pub fn get_priorities(&self) -> [Priority; 3] {
        Priority::ORDER
    }

    pub async fn enqueue_scraper(&self, scraper_id: ScraperId, priority: Priority) -> Result<TaskId> {
        let scraper = self.scrapers.get(scraper_id).await?;
        Ok(self
            .queue
            .enqueue(scraper.handler_name, scraper.config, priority, Some(scraper_id))
            .await?)
    }

    pub async fn get_task_instances(&self, scraper_id: ScraperId) -> Result<Vec<Task>> {
        Ok(self.queue.list_by_scraper(scraper_id).await?)
    }

    pub async fn get_task_instance(&self, task_id: TaskId) -> Result<Task> {
        Ok(self.queue.get(task_id).await?)
    }

    pub async fn get_task_logs(
        &self,
        task_id: TaskId,
        last_log_line_id: u64,
        max_lines: usize,
    ) -> Result<Vec<LogLine>> {
        Ok(self.logs.read(task_id, last_log_line_id, max_lines).await?)
    }

    /// Runs an un-persisted, one-off task not tied to any `Scraper`. The
    /// queue records it with `scraper_id = None`; the worker pool picks it
    /// up exactly like any other pending task.
    pub async fn run_ephemeral(
        &self,
        handler_name: String,
        config: ScraperConfig,
        priority: Priority,
    ) -> Result<TaskId> {
        self.handlers.get(&handler_name)?;
        Ok(self.queue.enqueue(handler_name, config, priority, None).await?)
    }

    fn validate_scraper(&self, scraper: &Scraper) -> Result<()> {
        self.handlers.get(&scraper.handler_name)?;
        if let Schedule::Crontab(expr) = &scraper.schedule {
            cron::Schedule::from_str(expr)
                .map_err(|e| Error::ValidationError(format!("malformed crontab {expr:?}: {e}")))?;
        }
        Ok(())
    }
}

/// Assembles the middleware chain an installation runs for every task,
/// in registration order (request hooks run in this order; response hooks
/// in reverse). `client` is shared across the chain and every handler.
pub fn default_middlewares(client: reqwest::Client) -> Vec<RegisteredMiddleware> {
    vec![
        RegisteredMiddleware::new(Arc::new(
            scrapeworks_context::middlewares::UserAgentInjector::new(),
        )),
        RegisteredMiddleware::new(Arc::new(scrapeworks_context::middlewares::RobotsTxt::new(
            client,
        ))),
        RegisteredMiddleware::new(Arc::new(scrapeworks_context::middlewares::RateLimiter::new())),
        RegisteredMiddleware::new(Arc::new(scrapeworks_context::middlewares::ProxyInjector::new())),
        RegisteredMiddleware::new(Arc::new(scrapeworks_context::middlewares::RequestLogger::new())),
        RegisteredMiddleware::new(Arc::new(scrapeworks_context::middlewares::Parser::new())),
    ]
}

/// The built-in handler set every installation registers, plus whatever
/// custom handlers the embedding binary adds before `HandlerRegistry` is
/// frozen into a `Server`.
pub fn default_handlers() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(scrapeworks_handlers::DynamicHandler));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use scrapeworks_database::{InMemoryLogStorage, InMemoryQueueStorage, InMemoryScraperStorage};

    fn test_server() -> Server {
        Server::new(
            Arc::new(InMemoryScraperStorage::new()),
            Queue::new(Arc::new(InMemoryQueueStorage::new())),
            Arc::new(InMemoryLogStorage::new()),
            Arc::new(default_handlers()),
        )
    }

    fn scraper(handler_name: &str) -> Scraper {
        Scraper {
            id: ScraperId::new(),
            name: "test".into(),
            handler_name: handler_name.into(),
            config: ScraperConfig::default(),
            schedule: Schedule::Inactive,
            schedule_priority: Priority::Normal,
        }
    }

    #[tokio::test]
    async fn create_scraper_round_trips() {
        let server = test_server();
        let created = server.create_scraper(scraper("dynamic_scraper")).await.unwrap();
        let fetched = server.get_scraper(created.id).await.unwrap();
        assert_eq!(created, fetched);
    }

    #[tokio::test]
    async fn create_scraper_rejects_unknown_handler() {
        let server = test_server();
        assert_matches!(
            server.create_scraper(scraper("does_not_exist")).await,
            Err(Error::HandlerError(_))
        );
    }

    #[tokio::test]
    async fn create_scraper_rejects_malformed_crontab() {
        let server = test_server();
        let mut s = scraper("dynamic_scraper");
        s.schedule = Schedule::Crontab("not a cron expression".into());
        assert_matches!(
            server.create_scraper(s).await,
            Err(Error::ValidationError(_))
        );
    }

    #[tokio::test]
    async fn run_ephemeral_enqueues_without_a_scraper() {
        let server = test_server();
        let task_id = server
            .run_ephemeral("dynamic_scraper".into(), ScraperConfig::default(), Priority::High)
            .await
            .unwrap();
        let task = server.get_task_instance(task_id).await.unwrap();
        assert_eq!(task.scraper_id, None);
        assert_eq!(task.priority, Priority::High);
    }

    #[tokio::test]
    async fn enqueue_scraper_captures_its_config_at_enqueue_time() {
        let server = test_server();
        let created = server.create_scraper(scraper("dynamic_scraper")).await.unwrap();
        let task_id = server.enqueue_scraper(created.id, Priority::Utmost).await.unwrap();
        let task = server.get_task_instance(task_id).await.unwrap();
        assert_eq!(task.scraper_id, Some(created.id));
        assert_eq!(task.handler_name, "dynamic_scraper");
    }
}
