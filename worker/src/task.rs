use std::sync::Arc;

use chrono::Utc;
use scrapeworks_context::{CancelTrigger, RegisteredMiddleware, ScraperContext};
use scrapeworks_database::{LogLevel, Task, TaskId, TaskStatus};
use scrapeworks_handlers::HandlerRegistry;
use scrapeworks_queues::Queue;
use tokio::sync::oneshot;
use tracing::{event, instrument, Level};

use crate::{
    config::WorkerConfig,
    heartbeat::{self, CancelCause},
    log_sink::TaskLogSink,
};

enum Outcome {
    Succeeded(String),
    Failed(String),
    /// The heartbeat cancelled the handler; carries why, once known. `None`
    /// only if the heartbeat task itself died before reporting a cause.
    Cancelled(Option<CancelCause>),
}

/// Runs one dequeued task end to end: builds its context, races the handler
/// against the heartbeat's cancellation, and persists the terminal state.
/// A handler fault never escapes this function as an `Err` — it becomes a
/// `FAILED` task instead, so the pool loop that spawned this never sees a
/// panic or error from ordinary scrape failures.
#[instrument(level = "info", skip(task, handlers, middlewares, client, queue, logs, config), fields(task = %task.id, handler = %task.handler_name))]
pub async fn run(
    task: Task,
    handlers: Arc<HandlerRegistry>,
    middlewares: Vec<RegisteredMiddleware>,
    client: reqwest::Client,
    queue: Queue,
    logs: Arc<dyn scrapeworks_database::LogStorage>,
    config: WorkerConfig,
) {
    let task_id = task.id;
    let log_sink = TaskLogSink::new(logs, task_id);
    log_sink.log(LogLevel::Info, "task started").await;

    let (trigger, cancel) = CancelTrigger::new();
    let (stop_tx, stop_rx) = oneshot::channel();
    let heartbeat_handle = tokio::spawn(heartbeat::run(
        queue.clone(),
        task_id,
        config.heartbeat_interval,
        config.heartbeat_retry_budget,
        trigger,
        log_sink.clone(),
        stop_rx,
    ));

    let outcome = match handlers.get(&task.handler_name) {
        Err(e) => Outcome::Failed(e.to_string()),
        Ok(handler) => {
            let ctx = Arc::new(ScraperContext::new(
                client,
                middlewares,
                &task.config.middleware_overrides,
                task.config.params.clone(),
                cancel.clone(),
                config.default_request_timeout,
            ));

            let mut cancel_wait = cancel;
            tokio::select! {
                biased;
                _ = cancel_wait.cancelled() => Outcome::Cancelled(None),
                result = handler.run(ctx) => match result {
                    Ok(value) => Outcome::Succeeded(value),
                    Err(e) => Outcome::Failed(e.to_string()),
                },
            }
        }
    };

    stop_tx.send(()).ok();
    let cancel_cause = heartbeat_handle.await.ok().flatten();
    let outcome = match outcome {
        Outcome::Cancelled(_) => Outcome::Cancelled(cancel_cause),
        other => other,
    };

    finalize(&queue, &log_sink, task_id, outcome).await;
}

async fn finalize(queue: &Queue, logs: &TaskLogSink, task_id: TaskId, outcome: Outcome) {
    let mut task = match queue.get(task_id).await {
        Ok(task) => task,
        Err(e) => {
            event!(Level::ERROR, task = %task_id, error = %e, "could not load task to finalize it");
            return;
        }
    };

    if task.status.is_terminal() {
        // Someone else — the reaper, most likely — already settled this
        // task while we were racing its handler. Terminal state is
        // immutable; leave it exactly as they wrote it.
        event!(Level::INFO, task = %task_id, status = ?task.status, "task already terminal, not overwriting");
        return;
    }

    let (status, result, level, message): (_, _, _, &str) = match outcome {
        Outcome::Succeeded(value) => (TaskStatus::Succeeded, value, LogLevel::Info, "task succeeded"),
        Outcome::Failed(message) => (TaskStatus::Failed, message, LogLevel::Error, "task failed"),
        Outcome::Cancelled(cause) => {
            let result = match cause {
                Some(CancelCause::RetryBudgetExhausted) => {
                    "heartbeat storage failures exhausted the retry budget".to_string()
                }
                Some(CancelCause::ExternalStatus(status)) => {
                    format!("task cancelled: status externally moved to {status:?}")
                }
                None => "task cancelled".to_string(),
            };
            (TaskStatus::Killed, result, LogLevel::Warn, "task killed")
        }
    };

    task.status = status;
    task.result = Some(result);
    task.finished_at = Some(Utc::now());

    logs.log(level, message).await;
    if let Err(e) = queue.update(task).await {
        event!(Level::ERROR, task = %task_id, error = %e, "failed to persist terminal task state");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrapeworks_database::{
        InMemoryLogStorage, InMemoryQueueStorage, Priority, ScraperConfig,
    };
    use scrapeworks_handlers::Handler;
    use std::time::Duration;

    struct Echo;

    #[async_trait::async_trait]
    impl Handler for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }

        async fn run(&self, ctx: Arc<ScraperContext>) -> anyhow::Result<String> {
            Ok(ctx.params.to_string())
        }
    }

    struct AlwaysFails;

    #[async_trait::async_trait]
    impl Handler for AlwaysFails {
        fn name(&self) -> &'static str {
            "always_fails"
        }

        async fn run(&self, _ctx: Arc<ScraperContext>) -> anyhow::Result<String> {
            Err(anyhow::anyhow!("boom"))
        }
    }

    struct Never;

    #[async_trait::async_trait]
    impl Handler for Never {
        fn name(&self) -> &'static str {
            "never"
        }

        async fn run(&self, _ctx: Arc<ScraperContext>) -> anyhow::Result<String> {
            std::future::pending::<()>().await;
            unreachable!()
        }
    }

    async fn setup(handler: Arc<dyn Handler>, params: serde_json::Value) -> (Queue, scrapeworks_database::TaskId) {
        let storage = Arc::new(InMemoryQueueStorage::new());
        let queue = Queue::new(storage);
        let mut config = ScraperConfig::default();
        config.params = params;
        let task_id = queue
            .enqueue(handler.name().to_string(), config, Priority::Normal, None)
            .await
            .unwrap();
        let task = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(task.id, task_id);

        let mut handlers = HandlerRegistry::new();
        handlers.register(handler);

        tokio::spawn(run(
            task,
            Arc::new(handlers),
            Vec::new(),
            reqwest::Client::new(),
            queue.clone(),
            Arc::new(InMemoryLogStorage::new()),
            WorkerConfig {
                heartbeat_interval: Duration::from_secs(60),
                ..Default::default()
            },
        ))
        .await
        .unwrap();

        (queue, task_id)
    }

    #[tokio::test]
    async fn successful_handler_marks_task_succeeded() {
        let (queue, task_id) = setup(Arc::new(Echo), serde_json::json!("hi")).await;
        let task = queue.get(task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Succeeded);
        assert_eq!(task.result.as_deref(), Some("\"hi\""));
        assert!(task.finished_at.is_some());
    }

    #[tokio::test]
    async fn failing_handler_marks_task_failed() {
        let (queue, task_id) = setup(Arc::new(AlwaysFails), serde_json::json!(null)).await;
        let task = queue.get(task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.result.unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn unregistered_handler_name_marks_task_failed() {
        let storage = Arc::new(InMemoryQueueStorage::new());
        let queue = Queue::new(storage);
        let task_id = queue
            .enqueue("does_not_exist".into(), ScraperConfig::default(), Priority::Normal, None)
            .await
            .unwrap();
        let task = queue.dequeue().await.unwrap().unwrap();

        run(
            task,
            Arc::new(HandlerRegistry::new()),
            Vec::new(),
            reqwest::Client::new(),
            queue.clone(),
            Arc::new(InMemoryLogStorage::new()),
            WorkerConfig::default(),
        )
        .await;

        let task = queue.get(task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
    }

    /// Mirrors the reaper: it marks a STARTED task DEAD (with its own
    /// finished_at/result) concurrently with the worker racing the same
    /// task's handler to completion. The worker's own finalize must never
    /// clobber that terminal state.
    #[tokio::test]
    async fn finalize_does_not_clobber_a_task_the_reaper_already_marked_dead() {
        let storage = Arc::new(InMemoryQueueStorage::new());
        let queue = Queue::new(storage);
        let task_id = queue
            .enqueue("never".into(), ScraperConfig::default(), Priority::Normal, None)
            .await
            .unwrap();
        let task = queue.dequeue().await.unwrap().unwrap();

        let mut handlers = HandlerRegistry::new();
        handlers.register(Arc::new(Never));

        let handle = tokio::spawn(run(
            task,
            Arc::new(handlers),
            Vec::new(),
            reqwest::Client::new(),
            queue.clone(),
            Arc::new(InMemoryLogStorage::new()),
            WorkerConfig {
                heartbeat_interval: Duration::from_millis(10),
                ..Default::default()
            },
        ));

        // Give the worker a moment to move the task to STARTED, then reap it
        // exactly like the scheduler's reaper job would.
        tokio::time::sleep(Duration::from_millis(15)).await;
        let mut reaped = queue.get(task_id).await.unwrap();
        assert_eq!(reaped.status, TaskStatus::Started);
        reaped.status = TaskStatus::Dead;
        reaped.finished_at = Some(Utc::now());
        reaped.result = Some("heartbeat stale: worker presumed dead".to_string());
        queue.update(reaped).await.unwrap();

        handle.await.unwrap();

        let task = queue.get(task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Dead);
        assert_eq!(
            task.result.as_deref(),
            Some("heartbeat stale: worker presumed dead")
        );
    }
}
