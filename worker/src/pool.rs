use std::sync::Arc;

use backoff::{backoff::Backoff, ExponentialBackoff};
use futures::stream::{FuturesUnordered, StreamExt};
use scrapeworks_context::RegisteredMiddleware;
use scrapeworks_database::LogStorage;
use scrapeworks_graceful_shutdown::GracefulShutdownConsumer;
use scrapeworks_handlers::HandlerRegistry;
use scrapeworks_queues::Queue;
use tokio::task::JoinHandle;
use tracing::{event, Level};

use crate::{config::WorkerConfig, task};

/// A fixed pool of dequeue-and-run loops sharing one queue, handler
/// registry, and middleware chain. `run` spawns the pool as a single
/// background task and returns immediately; the returned handle resolves
/// once every in-flight task has finished after shutdown.
pub struct Worker {
    queue: Queue,
    handlers: Arc<HandlerRegistry>,
    middlewares: Vec<RegisteredMiddleware>,
    client: reqwest::Client,
    logs: Arc<dyn LogStorage>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        queue: Queue,
        handlers: Arc<HandlerRegistry>,
        middlewares: Vec<RegisteredMiddleware>,
        client: reqwest::Client,
        logs: Arc<dyn LogStorage>,
        config: WorkerConfig,
    ) -> Self {
        Worker {
            queue,
            handlers,
            middlewares,
            client,
            logs,
            config,
        }
    }

    pub fn run(self: Arc<Self>, mut shutdown: GracefulShutdownConsumer) -> JoinHandle<()> {
        tokio::spawn(async move {
            let shutdown_fut = shutdown.wait_for_shutdown();
            tokio::pin!(shutdown_fut);

            let mut active_tasks = FuturesUnordered::<JoinHandle<()>>::new();
            let mut backoff = ExponentialBackoff {
                max_interval: self.config.dequeue_backoff_max,
                max_elapsed_time: None,
                ..Default::default()
            };
            let mut sleep_time = std::time::Duration::default();

            loop {
                let wait_for_slot = active_tasks.len() >= self.config.pool_size;
                let do_backoff = sleep_time > std::time::Duration::default();
                if wait_for_slot || do_backoff {
                    tokio::select! {
                        biased;

                        _ = &mut shutdown_fut => break,
                        res = active_tasks.select_next_some(), if wait_for_slot => {
                            if let Err(e) = res {
                                event!(Level::ERROR, error = %e, "task loop panicked");
                            }
                        },
                        _ = tokio::time::sleep(sleep_time), if do_backoff => {},
                    };
                }

                match self.queue.dequeue().await {
                    Ok(Some(dequeued)) => {
                        backoff.reset();
                        sleep_time = std::time::Duration::default();

                        let handlers = self.handlers.clone();
                        let middlewares = self.middlewares.clone();
                        let client = self.client.clone();
                        let queue = self.queue.clone();
                        let logs = self.logs.clone();
                        let config = self.config.clone();
                        active_tasks.push(tokio::spawn(task::run(
                            dequeued,
                            handlers,
                            middlewares,
                            client,
                            queue,
                            logs,
                            config,
                        )));
                    }
                    Ok(None) => {
                        sleep_time = backoff.next_backoff().unwrap_or(self.config.dequeue_backoff_max);
                    }
                    Err(e) => {
                        event!(Level::ERROR, error = %e, "dequeue failed");
                        sleep_time = backoff.next_backoff().unwrap_or(self.config.dequeue_backoff_max);
                    }
                }

                tokio::select! {
                    biased;
                    r = active_tasks.next() => if let Some(Err(e)) = r {
                        event!(Level::ERROR, error = %e, "task loop panicked");
                    },
                    _ = futures::future::ready(()) => {}
                };
            }

            while active_tasks.next().await.is_some() {}
        })
    }
}

#[allow(dead_code)]
fn assert_send_sync<T: Send + Sync>() {}
#[allow(dead_code)]
fn _assertions() {
    assert_send_sync::<Worker>();
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrapeworks_database::{InMemoryLogStorage, InMemoryQueueStorage, Priority, ScraperConfig, TaskStatus};
    use scrapeworks_graceful_shutdown::GracefulShutdown;
    use scrapeworks_handlers::Handler;
    use std::time::Duration;

    struct Echo;

    #[async_trait::async_trait]
    impl Handler for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }

        async fn run(&self, ctx: Arc<scrapeworks_context::ScraperContext>) -> anyhow::Result<String> {
            Ok(ctx.params.to_string())
        }
    }

    #[tokio::test]
    async fn drains_a_pending_task_to_completion() {
        let queue = Queue::new(Arc::new(InMemoryQueueStorage::new()));
        let task_id = queue
            .enqueue("echo".into(), ScraperConfig::default(), Priority::Normal, None)
            .await
            .unwrap();

        let mut handlers = HandlerRegistry::new();
        handlers.register(Arc::new(Echo));

        let worker = Arc::new(Worker::new(
            queue.clone(),
            Arc::new(handlers),
            Vec::new(),
            reqwest::Client::new(),
            Arc::new(InMemoryLogStorage::new()),
            WorkerConfig {
                pool_size: 4,
                dequeue_backoff_max: Duration::from_millis(20),
                ..Default::default()
            },
        ));

        let mut shutdown = GracefulShutdown::new();
        let handle = worker.run(shutdown.consumer());

        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let task = queue.get(task_id).await.unwrap();
                if task.status.is_terminal() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("task should complete");

        let task = queue.get(task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Succeeded);

        shutdown.shutdown();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("pool should shut down")
            .unwrap();
    }
}
