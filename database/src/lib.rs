pub mod error;
pub mod ids;
pub mod lease_storage;
pub mod log_storage;
pub mod model;
pub mod queue_storage;
pub mod redis_pool;
pub mod scraper_storage;

pub use error::{Error, Result};
pub use ids::{ScraperId, TaskId};
pub use lease_storage::{InMemoryLeaseStorage, LeaseStorage, RedisLeaseStorage};
pub use log_storage::{InMemoryLogStorage, LogStorage, RedisLogStorage};
pub use model::*;
pub use queue_storage::{InMemoryQueueStorage, QueueStorage, RedisQueueStorage};
pub use redis_pool::RedisPool;
pub use scraper_storage::{InMemoryScraperStorage, RedisScraperStorage, ScraperStorage};
