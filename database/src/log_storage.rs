use std::collections::HashMap;

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::sync::Mutex;

use crate::{
    error::Result,
    ids::TaskId,
    model::{LogLevel, LogLine},
    redis_pool::RedisPool,
};

/// Append-only per-task log, fetchable incrementally by `(task_id,
/// last_seen_id, max)`.
#[async_trait]
pub trait LogStorage: Send + Sync {
    /// Appends a line, assigning it the next id for `task_id`.
    async fn append(&self, task_id: TaskId, level: LogLevel, message: String) -> Result<LogLine>;

    async fn read(&self, task_id: TaskId, after_id: u64, max: usize) -> Result<Vec<LogLine>>;
}

#[derive(Default)]
struct TaskLog {
    lines: Vec<LogLine>,
    next_id: u64,
}

pub struct InMemoryLogStorage(Mutex<HashMap<TaskId, TaskLog>>);

impl InMemoryLogStorage {
    pub fn new() -> Self {
        InMemoryLogStorage(Mutex::new(HashMap::new()))
    }
}

impl Default for InMemoryLogStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LogStorage for InMemoryLogStorage {
    async fn append(&self, task_id: TaskId, level: LogLevel, message: String) -> Result<LogLine> {
        let mut logs = self.0.lock().await;
        let log = logs.entry(task_id).or_default();
        log.next_id += 1;
        let line = LogLine {
            id: log.next_id,
            task_id,
            level,
            timestamp: chrono::Utc::now(),
            message,
        };
        log.lines.push(line.clone());
        Ok(line)
    }

    async fn read(&self, task_id: TaskId, after_id: u64, max: usize) -> Result<Vec<LogLine>> {
        let logs = self.0.lock().await;
        Ok(match logs.get(&task_id) {
            Some(log) => log
                .lines
                .iter()
                .filter(|l| l.id > after_id)
                .take(max)
                .cloned()
                .collect(),
            None => Vec::new(),
        })
    }
}

/// Redis-backed log: a list of JSON blobs at `logs:{task_id}`, with the next
/// id tracked separately at `logs:{task_id}:next_id`.
pub struct RedisLogStorage {
    pool: RedisPool,
}

impl RedisLogStorage {
    pub fn new(pool: RedisPool) -> Self {
        RedisLogStorage { pool }
    }

    fn list_key(&self, task_id: TaskId) -> String {
        self.pool.key(format!("logs:{task_id}"))
    }

    fn next_id_key(&self, task_id: TaskId) -> String {
        self.pool.key(format!("logs:{task_id}:next_id"))
    }
}

#[async_trait]
impl LogStorage for RedisLogStorage {
    async fn append(&self, task_id: TaskId, level: LogLevel, message: String) -> Result<LogLine> {
        let mut conn = self.pool.get().await?;
        let id: u64 = conn.incr(self.next_id_key(task_id), 1).await?;
        let line = LogLine {
            id,
            task_id,
            level,
            timestamp: chrono::Utc::now(),
            message,
        };
        let blob = serde_json::to_string(&line)?;
        let _: () = conn.rpush(self.list_key(task_id), blob).await?;
        Ok(line)
    }

    async fn read(&self, task_id: TaskId, after_id: u64, max: usize) -> Result<Vec<LogLine>> {
        let mut conn = self.pool.get().await?;
        let blobs: Vec<String> = conn.lrange(self.list_key(task_id), 0, -1).await?;
        let lines = blobs
            .into_iter()
            .map(|b| serde_json::from_str::<LogLine>(&b))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(lines
            .into_iter()
            .filter(|l| l.id > after_id)
            .take(max)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ids_increase_monotonically_and_read_respects_after_id() {
        let storage = InMemoryLogStorage::new();
        let task_id = TaskId::new();
        let first = storage
            .append(task_id, LogLevel::Info, "starting".into())
            .await
            .unwrap();
        let second = storage
            .append(task_id, LogLevel::Info, "fetched page 1".into())
            .await
            .unwrap();
        assert!(second.id > first.id);

        let all = storage.read(task_id, 0, 10).await.unwrap();
        assert_eq!(all.len(), 2);

        let only_new = storage.read(task_id, first.id, 10).await.unwrap();
        assert_eq!(only_new, vec![second]);
    }
}
