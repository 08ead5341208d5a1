use std::{collections::VecDeque, sync::Arc};

use async_trait::async_trait;
use chrono::Utc;
use fxhash::FxHashMap;
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tracing::instrument;

use crate::{
    error::{Error, Result},
    ids::{ScraperId, TaskId},
    model::{Priority, Task, TaskStatus},
    redis_pool::RedisPool,
};

/// Persistence contract for the priority task queue. Implementations must
/// make the `PENDING -> STARTED` transition in `dequeue` atomic with removal
/// from the pending set, so a crash mid-transition never leaves a task both
/// pending and owned by a worker.
#[async_trait]
pub trait QueueStorage: Send + Sync {
    async fn enqueue(&self, task: Task) -> Result<Task>;

    /// Scans `priorities` in order and returns the oldest `PENDING` task in
    /// the highest non-empty priority, or `None` if every scanned priority
    /// is empty. Non-blocking.
    async fn dequeue(&self, priorities: &[Priority]) -> Result<Option<Task>>;

    async fn update(&self, task: Task) -> Result<Task>;
    async fn get(&self, task_id: TaskId) -> Result<Task>;
    async fn list_by_scraper(&self, scraper_id: ScraperId) -> Result<Vec<Task>>;

    /// Every task currently `STARTED`, across all scrapers and ephemeral
    /// runs. Used by the reaper to find heartbeat-stale tasks.
    async fn list_active(&self) -> Result<Vec<Task>>;

    /// Retains the `retention` most recent terminal tasks per scraper,
    /// deleting older ones.
    async fn delete_old(&self, retention: usize) -> Result<u64>;

    async fn pending_count(&self, priority: Priority) -> Result<usize>;
}

struct InMemoryState {
    tasks: FxHashMap<TaskId, Task>,
    pending: FxHashMap<Priority, VecDeque<TaskId>>,
}

/// Single-mutex in-process queue. Linearizable by construction: every
/// operation holds the one lock for its whole critical section.
pub struct InMemoryQueueStorage(Mutex<InMemoryState>);

impl InMemoryQueueStorage {
    pub fn new() -> Self {
        let mut pending = FxHashMap::default();
        for p in Priority::ORDER {
            pending.insert(p, VecDeque::new());
        }
        InMemoryQueueStorage(Mutex::new(InMemoryState {
            tasks: FxHashMap::default(),
            pending,
        }))
    }
}

impl Default for InMemoryQueueStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueStorage for InMemoryQueueStorage {
    async fn enqueue(&self, task: Task) -> Result<Task> {
        let mut state = self.0.lock().await;
        state
            .pending
            .entry(task.priority)
            .or_default()
            .push_back(task.id);
        state.tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn dequeue(&self, priorities: &[Priority]) -> Result<Option<Task>> {
        let mut state = self.0.lock().await;
        let now = Utc::now();

        for priority in priorities {
            // Pending ids can go stale (e.g. after a manual kill), so skip
            // over any that no longer reference a PENDING task.
            let queue = state.pending.entry(*priority).or_default();
            while let Some(id) = queue.pop_front() {
                let is_pending = state
                    .tasks
                    .get(&id)
                    .map(|t| t.status == TaskStatus::Pending)
                    .unwrap_or(false);
                if !is_pending {
                    continue;
                }
                let task = state.tasks.get_mut(&id).unwrap();
                task.status = TaskStatus::Started;
                task.started_at = Some(now);
                task.last_active_at = Some(now);
                return Ok(Some(task.clone()));
            }
        }

        Ok(None)
    }

    async fn update(&self, task: Task) -> Result<Task> {
        let mut state = self.0.lock().await;
        if !state.tasks.contains_key(&task.id) {
            return Err(Error::NotFound {
                kind: "task",
                id: task.id.to_string(),
            });
        }
        state.tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn get(&self, task_id: TaskId) -> Result<Task> {
        let state = self.0.lock().await;
        state
            .tasks
            .get(&task_id)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                kind: "task",
                id: task_id.to_string(),
            })
    }

    async fn list_by_scraper(&self, scraper_id: ScraperId) -> Result<Vec<Task>> {
        let state = self.0.lock().await;
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| t.scraper_id == Some(scraper_id))
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    async fn list_active(&self) -> Result<Vec<Task>> {
        let state = self.0.lock().await;
        Ok(state
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Started)
            .cloned()
            .collect())
    }

    async fn delete_old(&self, retention: usize) -> Result<u64> {
        let mut state = self.0.lock().await;
        let mut by_scraper: FxHashMap<ScraperId, Vec<TaskId>> = FxHashMap::default();
        for task in state.tasks.values() {
            if let (Some(scraper_id), true) = (task.scraper_id, task.status.is_terminal()) {
                by_scraper.entry(scraper_id).or_default().push(task.id);
            }
        }

        let mut to_delete = Vec::new();
        for (_, mut ids) in by_scraper {
            ids.sort_by_key(|id| state.tasks[id].created_at);
            if ids.len() > retention {
                to_delete.extend(ids[..ids.len() - retention].iter().copied());
            }
        }

        for id in &to_delete {
            state.tasks.remove(id);
        }

        Ok(to_delete.len() as u64)
    }

    async fn pending_count(&self, priority: Priority) -> Result<usize> {
        let state = self.0.lock().await;
        Ok(state
            .pending
            .get(&priority)
            .map(|q| {
                q.iter()
                    .filter(|id| {
                        state
                            .tasks
                            .get(id)
                            .map(|t| t.status == TaskStatus::Pending)
                            .unwrap_or(false)
                    })
                    .count()
            })
            .unwrap_or(0))
    }
}

// KEYS: one priority list per scanned priority, in scan order.
// ARGV[1]: now, RFC3339. ARGV[2]: "tasks:" key prefix.
//
// Pops the head of the first non-empty list and flips the task blob's
// status to STARTED, stamping started_at/last_active_at. The list pop and
// the status flip happen inside one script invocation, so Redis can never
// observe the id as both queued and un-started.
const DEQUEUE_SCRIPT: &str = r##"
for i = 1, #KEYS do
    local id = redis.call("RPOP", KEYS[i])
    if id then
        local task_key = ARGV[2] .. id
        local blob = redis.call("GET", task_key)
        if blob then
            local task = cjson.decode(blob)
            task["status"] = "STARTED"
            task["started_at"] = ARGV[1]
            task["last_active_at"] = ARGV[1]
            local encoded = cjson.encode(task)
            redis.call("SET", task_key, encoded)
            return encoded
        end
    end
end
return false
"##;

/// Redis-backed queue shared across nodes. One list per priority
/// (`queue:{priority}`, `LPUSH`/`RPOP` for FIFO), task bodies in
/// `tasks:{id}`, and a per-scraper sorted set (`tasks:by_scraper:{id}`,
/// scored by `created_at`) for history listing and GC.
pub struct RedisQueueStorage {
    pool: RedisPool,
    dequeue_script: redis::Script,
}

impl RedisQueueStorage {
    pub fn new(pool: RedisPool) -> Self {
        RedisQueueStorage {
            pool,
            dequeue_script: redis::Script::new(DEQUEUE_SCRIPT),
        }
    }

    fn queue_key(&self, priority: Priority) -> String {
        self.pool.key(format!("queue:{}", priority.as_str()))
    }

    fn task_key(&self, id: TaskId) -> String {
        self.pool.key(format!("tasks:{id}"))
    }

    fn task_prefix(&self) -> String {
        self.pool.key("tasks:")
    }

    fn by_scraper_key(&self, scraper_id: ScraperId) -> String {
        self.pool.key(format!("tasks:by_scraper:{scraper_id}"))
    }

    /// Ephemeral tasks (`scraper_id: None`) have no scraper to index by, so
    /// they're tracked in a reserved bucket of the same sorted-set family.
    fn ephemeral_bucket_key(&self) -> String {
        self.pool.key("tasks:by_scraper:_ephemeral")
    }
}

#[async_trait]
impl QueueStorage for RedisQueueStorage {
    #[instrument(level = "debug", skip(self, task))]
    async fn enqueue(&self, task: Task) -> Result<Task> {
        let mut conn = self.pool.get().await?;
        let blob = serde_json::to_string(&task)?;
        let mut pipe = redis::pipe();
        pipe.atomic()
            .set(self.task_key(task.id), blob)
            .ignore()
            .lpush(self.queue_key(task.priority), task.id.to_string())
            .ignore();
        let by_scraper_key = match task.scraper_id {
            Some(scraper_id) => self.by_scraper_key(scraper_id),
            None => self.ephemeral_bucket_key(),
        };
        pipe.zadd(
            by_scraper_key,
            task.id.to_string(),
            task.created_at.timestamp_millis(),
        )
        .ignore();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(task)
    }

    async fn dequeue(&self, priorities: &[Priority]) -> Result<Option<Task>> {
        let mut conn = self.pool.get().await?;
        let mut invocation = self.dequeue_script.prepare_invoke();
        for priority in priorities {
            invocation.key(self.queue_key(*priority));
        }
        invocation.arg(Utc::now().to_rfc3339());
        invocation.arg(self.task_prefix());

        let result: Option<String> = invocation.invoke_async(&mut conn).await?;
        Ok(match result {
            Some(blob) => Some(serde_json::from_str(&blob)?),
            None => None,
        })
    }

    async fn update(&self, task: Task) -> Result<Task> {
        let mut conn = self.pool.get().await?;
        let exists: bool = conn.exists(self.task_key(task.id)).await?;
        if !exists {
            return Err(Error::NotFound {
                kind: "task",
                id: task.id.to_string(),
            });
        }
        let blob = serde_json::to_string(&task)?;
        let _: () = conn.set(self.task_key(task.id), blob).await?;
        Ok(task)
    }

    async fn get(&self, task_id: TaskId) -> Result<Task> {
        let mut conn = self.pool.get().await?;
        let blob: Option<String> = conn.get(self.task_key(task_id)).await?;
        match blob {
            Some(b) => Ok(serde_json::from_str(&b)?),
            None => Err(Error::NotFound {
                kind: "task",
                id: task_id.to_string(),
            }),
        }
    }

    async fn list_by_scraper(&self, scraper_id: ScraperId) -> Result<Vec<Task>> {
        let mut conn = self.pool.get().await?;
        let ids: Vec<String> = conn.zrange(self.by_scraper_key(scraper_id), 0, -1).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = ids
            .iter()
            .map(|id| self.pool.key(format!("tasks:{id}")))
            .collect();
        let blobs: Vec<Option<String>> = conn.mget(keys).await?;
        Ok(blobs
            .into_iter()
            .flatten()
            .map(|b| serde_json::from_str(&b))
            .collect::<std::result::Result<Vec<_>, _>>()?)
    }

    async fn list_active(&self) -> Result<Vec<Task>> {
        let mut conn = self.pool.get().await?;
        let prefix = self.pool.key("tasks:by_scraper:");
        let pattern = format!("{prefix}*");
        let bucket_keys: Vec<String> = conn.keys(pattern).await?;

        let mut ids: Vec<String> = Vec::new();
        for bucket in &bucket_keys {
            let bucket_ids: Vec<String> = conn.zrange(bucket, 0, -1).await?;
            ids.extend(bucket_ids);
        }
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = ids
            .iter()
            .map(|id| self.pool.key(format!("tasks:{id}")))
            .collect();
        let blobs: Vec<Option<String>> = conn.mget(keys).await?;
        let tasks = blobs
            .into_iter()
            .flatten()
            .map(|b| serde_json::from_str::<Task>(&b))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tasks
            .into_iter()
            .filter(|t| t.status == TaskStatus::Started)
            .collect())
    }

    async fn delete_old(&self, retention: usize) -> Result<u64> {
        let mut conn = self.pool.get().await?;
        let prefix = self.pool.key("tasks:by_scraper:");
        let pattern = format!("{prefix}*");
        let scraper_set_keys: Vec<String> = conn.keys(pattern).await?;

        let mut deleted = 0u64;
        for set_key in scraper_set_keys {
            let ids: Vec<String> = conn.zrange(&set_key, 0, -1).await?;
            if ids.len() <= retention {
                continue;
            }
            let stale = &ids[..ids.len() - retention];
            for id in stale {
                let task_key = self.pool.key(format!("tasks:{id}"));
                let blob: Option<String> = conn.get(&task_key).await?;
                let is_terminal = blob
                    .and_then(|b| serde_json::from_str::<Task>(&b).ok())
                    .map(|t| t.status.is_terminal())
                    .unwrap_or(false);
                if !is_terminal {
                    continue;
                }
                let _: () = conn.del(&task_key).await?;
                let _: () = conn.zrem(&set_key, id).await?;
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn pending_count(&self, priority: Priority) -> Result<usize> {
        let mut conn = self.pool.get().await?;
        let len: usize = conn.llen(self.queue_key(priority)).await?;
        Ok(len)
    }
}
