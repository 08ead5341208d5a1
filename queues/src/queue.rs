use std::sync::Arc;

use chrono::Utc;
use scrapeworks_database::{Priority, QueueStorage, ScraperConfig, ScraperId, Task, TaskId};

use crate::error::Result;

/// Thin wrapper over [`QueueStorage`] exposing the priority queue's
/// operations and metric hooks. Dequeue always scans priorities in the
/// platform's default strict order (`[UTMOST, HIGH, NORMAL]`).
#[derive(Clone)]
pub struct Queue {
    storage: Arc<dyn QueueStorage>,
}

impl Queue {
    pub fn new(storage: Arc<dyn QueueStorage>) -> Self {
        Queue { storage }
    }

    pub async fn enqueue(
        &self,
        handler_name: String,
        config: ScraperConfig,
        priority: Priority,
        scraper_id: Option<ScraperId>,
    ) -> Result<TaskId> {
        let task = Task::new_pending(
            TaskId::new(),
            scraper_id,
            handler_name,
            config,
            priority,
            Utc::now(),
        );
        let enqueued = self.storage.enqueue(task).await?;
        Ok(enqueued.id)
    }

    /// Non-blocking; returns `None` when every priority is empty.
    pub async fn dequeue(&self) -> Result<Option<Task>> {
        Ok(self.storage.dequeue(&Priority::ORDER).await?)
    }

    pub async fn update(&self, task: Task) -> Result<Task> {
        Ok(self.storage.update(task).await?)
    }

    pub async fn get(&self, task_id: TaskId) -> Result<Task> {
        Ok(self.storage.get(task_id).await?)
    }

    pub async fn list_by_scraper(&self, scraper_id: ScraperId) -> Result<Vec<Task>> {
        Ok(self.storage.list_by_scraper(scraper_id).await?)
    }

    pub async fn list_active(&self) -> Result<Vec<Task>> {
        Ok(self.storage.list_active().await?)
    }

    pub async fn delete_old(&self, retention: usize) -> Result<u64> {
        Ok(self.storage.delete_old(retention).await?)
    }

    /// `pending_count[priority]` metric, one gauge read per priority.
    pub async fn pending_counts(&self) -> Result<[(Priority, usize); 3]> {
        let mut counts = [
            (Priority::Utmost, 0),
            (Priority::High, 0),
            (Priority::Normal, 0),
        ];
        for (priority, count) in counts.iter_mut() {
            *count = self.storage.pending_count(*priority).await?;
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrapeworks_database::InMemoryQueueStorage;

    #[tokio::test]
    async fn enqueue_reports_pending_count() {
        let queue = Queue::new(Arc::new(InMemoryQueueStorage::new()));
        queue
            .enqueue(
                "static_scraper".into(),
                ScraperConfig::default(),
                Priority::Normal,
                None,
            )
            .await
            .unwrap();

        let counts = queue.pending_counts().await.unwrap();
        assert_eq!(counts[2], (Priority::Normal, 1));
    }
}
