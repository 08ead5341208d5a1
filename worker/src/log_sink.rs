use std::sync::Arc;

use scrapeworks_database::{LogLevel, LogStorage, TaskId};
use tracing::{event, Level};

/// The log sink bound to a single running task. Lifecycle events (start,
/// heartbeat trouble, finish) are appended here; handler-internal console
/// output from the dynamic handler's sandbox is forwarded to `tracing`
/// separately rather than through this sink.
#[derive(Clone)]
pub struct TaskLogSink {
    storage: Arc<dyn LogStorage>,
    task_id: TaskId,
}

impl TaskLogSink {
    pub fn new(storage: Arc<dyn LogStorage>, task_id: TaskId) -> Self {
        TaskLogSink { storage, task_id }
    }

    pub async fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        if let Err(e) = self.storage.append(self.task_id, level, message).await {
            event!(Level::WARN, task = %self.task_id, error = %e, "failed to persist task log line");
        }
    }
}
