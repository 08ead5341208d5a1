use std::time::Duration;

use backoff::{backoff::Backoff, ExponentialBackoff};
use chrono::Utc;
use scrapeworks_context::CancelTrigger;
use scrapeworks_database::{LogLevel, TaskId, TaskStatus};
use scrapeworks_queues::Queue;
use tokio::sync::oneshot;
use tracing::{event, Level};

use crate::log_sink::TaskLogSink;

/// Why the heartbeat cancelled the handler. Threaded through to `finalize`
/// so it can tell "someone else already finalized this task" (never
/// overwrite) apart from "we gave up waiting on storage" (the one case the
/// heartbeat itself gets to decide KILLED).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelCause {
    /// The task's stored status had already moved on — necessarily to a
    /// terminal state, since `STARTED` is the only non-terminal status
    /// after `PENDING` — before we next checked it. The reaper marking a
    /// stale task `DEAD` is the case this exists for.
    ExternalStatus(TaskStatus),
    /// Heartbeat couldn't persist `last_active_at` within the retry budget.
    RetryBudgetExhausted,
}

/// Whether the task was still `STARTED` as of this beat.
enum BeatStatus {
    Active,
    NoLongerStarted(TaskStatus),
}

enum RetryOutcome {
    Settled(BeatStatus),
    Stopped,
    BudgetExhausted,
}

/// Persists `last_active_at` every `interval` until `stop` fires. Cancels
/// `trigger` the moment the task's stored status moves on without us
/// (killed, reaped) or a storage fault outlives `retry_budget`, so the
/// handler invocation racing against the same token unwinds promptly
/// instead of running to completion unobserved. Returns why it cancelled,
/// or `None` if `stop` fired first (the ordinary, non-cancelled path).
pub async fn run(
    queue: Queue,
    task_id: TaskId,
    interval: Duration,
    retry_budget: Duration,
    trigger: CancelTrigger,
    logs: TaskLogSink,
    mut stop: oneshot::Receiver<()>,
) -> Option<CancelCause> {
    loop {
        tokio::select! {
            biased;
            _ = &mut stop => return None,
            _ = tokio::time::sleep(interval) => {}
        }

        match beat(&queue, task_id).await {
            Ok(BeatStatus::Active) => continue,
            Ok(BeatStatus::NoLongerStarted(status)) => {
                event!(Level::INFO, task = %task_id, ?status, "task is no longer STARTED, cancelling handler");
                trigger.cancel();
                return Some(CancelCause::ExternalStatus(status));
            }
            Err(e) => {
                event!(Level::WARN, task = %task_id, error = %e, "heartbeat write failed, retrying");
                match retry_until_settled(&queue, task_id, retry_budget, &mut stop).await {
                    RetryOutcome::Settled(BeatStatus::Active) => continue,
                    RetryOutcome::Settled(BeatStatus::NoLongerStarted(status)) => {
                        trigger.cancel();
                        return Some(CancelCause::ExternalStatus(status));
                    }
                    RetryOutcome::Stopped => return None,
                    RetryOutcome::BudgetExhausted => {
                        logs.log(
                            LogLevel::Error,
                            "heartbeat storage failures exhausted the retry budget, killing task",
                        )
                        .await;
                        trigger.cancel();
                        return Some(CancelCause::RetryBudgetExhausted);
                    }
                }
            }
        }
    }
}

async fn beat(queue: &Queue, task_id: TaskId) -> scrapeworks_queues::Result<BeatStatus> {
    let mut task = queue.get(task_id).await?;
    if task.status != TaskStatus::Started {
        return Ok(BeatStatus::NoLongerStarted(task.status));
    }
    task.last_active_at = Some(Utc::now());
    queue.update(task).await?;
    Ok(BeatStatus::Active)
}

/// Retries `beat` with exponential backoff until it stops erroring (settled,
/// whether still STARTED or not — that's not a fault), `stop` fires, or
/// `retry_budget` elapses with nothing but errors.
async fn retry_until_settled(
    queue: &Queue,
    task_id: TaskId,
    retry_budget: Duration,
    stop: &mut oneshot::Receiver<()>,
) -> RetryOutcome {
    let mut backoff = ExponentialBackoff {
        max_elapsed_time: Some(retry_budget),
        ..Default::default()
    };

    loop {
        match beat(queue, task_id).await {
            Ok(status) => return RetryOutcome::Settled(status),
            Err(e) => {
                let Some(delay) = backoff.next_backoff() else {
                    event!(Level::ERROR, task = %task_id, error = %e, "heartbeat retry budget exhausted");
                    return RetryOutcome::BudgetExhausted;
                };
                tokio::select! {
                    biased;
                    _ = &mut *stop => return RetryOutcome::Stopped,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrapeworks_context::CancelTrigger;
    use scrapeworks_database::{InMemoryLogStorage, InMemoryQueueStorage, Priority, ScraperConfig, Task};
    use std::sync::Arc;

    fn pending_task() -> Task {
        Task::new_pending(
            TaskId::new(),
            None,
            "static_scraper".into(),
            ScraperConfig::default(),
            Priority::Normal,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn persists_last_active_at_on_each_tick() {
        let storage = Arc::new(InMemoryQueueStorage::new());
        let queue = Queue::new(storage.clone());
        let task = pending_task();
        queue.enqueue(
            task.handler_name.clone(),
            task.config.clone(),
            task.priority,
            task.scraper_id,
        )
        .await
        .unwrap();
        let started = queue.dequeue().await.unwrap().unwrap();

        let (trigger, cancel) = CancelTrigger::new();
        let logs = TaskLogSink::new(Arc::new(InMemoryLogStorage::new()), started.id);
        let (stop_tx, stop_rx) = oneshot::channel();

        let handle = tokio::spawn(run(
            queue.clone(),
            started.id,
            Duration::from_millis(10),
            Duration::from_secs(1),
            trigger,
            logs,
            stop_rx,
        ));

        tokio::time::sleep(Duration::from_millis(35)).await;
        stop_tx.send(()).ok();
        let cause = handle.await.unwrap();

        let updated = queue.get(started.id).await.unwrap();
        assert!(updated.last_active_at.is_some());
        assert!(!cancel.is_cancelled());
        assert_eq!(cause, None);
    }

    #[tokio::test]
    async fn cancels_when_task_is_killed() {
        let storage = Arc::new(InMemoryQueueStorage::new());
        let queue = Queue::new(storage.clone());
        let task = pending_task();
        queue.enqueue(
            task.handler_name.clone(),
            task.config.clone(),
            task.priority,
            task.scraper_id,
        )
        .await
        .unwrap();
        let mut started = queue.dequeue().await.unwrap().unwrap();
        started.status = TaskStatus::Killed;
        queue.update(started.clone()).await.unwrap();

        let (trigger, cancel) = CancelTrigger::new();
        let logs = TaskLogSink::new(Arc::new(InMemoryLogStorage::new()), started.id);
        let (_stop_tx, stop_rx) = oneshot::channel();

        let cause = run(
            queue.clone(),
            started.id,
            Duration::from_millis(10),
            Duration::from_secs(1),
            trigger,
            logs,
            stop_rx,
        )
        .await;

        assert!(cancel.is_cancelled());
        assert_eq!(cause, Some(CancelCause::ExternalStatus(TaskStatus::Killed)));
    }

    /// The race the reaper creates: a STARTED task's status moves to DEAD
    /// out from under a still-running worker. The heartbeat must report
    /// that exact status, not a generic "killed", so the caller never
    /// re-labels a reaped task as KILLED.
    #[tokio::test]
    async fn reports_dead_when_reaper_marks_task_dead() {
        let storage = Arc::new(InMemoryQueueStorage::new());
        let queue = Queue::new(storage.clone());
        let task = pending_task();
        queue.enqueue(
            task.handler_name.clone(),
            task.config.clone(),
            task.priority,
            task.scraper_id,
        )
        .await
        .unwrap();
        let mut started = queue.dequeue().await.unwrap().unwrap();
        started.status = TaskStatus::Dead;
        started.finished_at = Some(Utc::now());
        started.result = Some("heartbeat stale: worker presumed dead".to_string());
        queue.update(started.clone()).await.unwrap();

        let (trigger, cancel) = CancelTrigger::new();
        let logs = TaskLogSink::new(Arc::new(InMemoryLogStorage::new()), started.id);
        let (_stop_tx, stop_rx) = oneshot::channel();

        let cause = run(
            queue.clone(),
            started.id,
            Duration::from_millis(10),
            Duration::from_secs(1),
            trigger,
            logs,
            stop_rx,
        )
        .await;

        assert!(cancel.is_cancelled());
        assert_eq!(cause, Some(CancelCause::ExternalStatus(TaskStatus::Dead)));
    }
}
