use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::sync::RwLock;
use tracing::instrument;

use crate::{
    error::{Error, Result},
    ids::ScraperId,
    model::{Scraper, ScraperFilters},
    redis_pool::RedisPool,
};

/// Persistence contract for scrapers. `create`/`update`/`delete` fail with
/// [`Error::ReadOnly`] when the backing store is read-only; `get` fails with
/// [`Error::NotFound`] when the scraper is absent, while `maybe_get` reports
/// absence without failing.
#[async_trait]
pub trait ScraperStorage: Send + Sync {
    async fn list(&self) -> Result<Vec<Scraper>>;
    async fn get(&self, id: ScraperId) -> Result<Scraper>;
    async fn maybe_get(&self, id: ScraperId) -> Result<Option<Scraper>>;
    async fn search(&self, filters: ScraperFilters<'_>) -> Result<Vec<Scraper>>;
    async fn create(&self, scraper: Scraper) -> Result<Scraper>;
    async fn update(&self, scraper: Scraper) -> Result<Scraper>;
    async fn delete(&self, id: ScraperId) -> Result<()>;
    fn is_read_only(&self) -> bool;
}

fn matches(scraper: &Scraper, filters: &ScraperFilters<'_>) -> bool {
    if let Some(handler_name) = filters.handler_name {
        if scraper.handler_name != handler_name {
            return false;
        }
    }
    if let Some(needle) = filters.name_contains {
        if !scraper.name.contains(needle) {
            return false;
        }
    }
    if let Some(active) = filters.schedule_active {
        let is_active = !matches!(scraper.schedule, crate::model::Schedule::Inactive);
        if is_active != active {
            return false;
        }
    }
    true
}

/// Single-process store for development and tests.
pub struct InMemoryScraperStorage {
    scrapers: RwLock<BTreeMap<ScraperId, Scraper>>,
    read_only: bool,
}

impl InMemoryScraperStorage {
    pub fn new() -> Self {
        InMemoryScraperStorage {
            scrapers: RwLock::new(BTreeMap::new()),
            read_only: false,
        }
    }

    pub fn read_only(scrapers: Vec<Scraper>) -> Self {
        InMemoryScraperStorage {
            scrapers: RwLock::new(scrapers.into_iter().map(|s| (s.id, s)).collect()),
            read_only: true,
        }
    }
}

impl Default for InMemoryScraperStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScraperStorage for InMemoryScraperStorage {
    async fn list(&self) -> Result<Vec<Scraper>> {
        Ok(self.scrapers.read().await.values().cloned().collect())
    }

    async fn get(&self, id: ScraperId) -> Result<Scraper> {
        self.maybe_get(id).await?.ok_or_else(|| Error::NotFound {
            kind: "scraper",
            id: id.to_string(),
        })
    }

    async fn maybe_get(&self, id: ScraperId) -> Result<Option<Scraper>> {
        Ok(self.scrapers.read().await.get(&id).cloned())
    }

    async fn search(&self, filters: ScraperFilters<'_>) -> Result<Vec<Scraper>> {
        Ok(self
            .scrapers
            .read()
            .await
            .values()
            .filter(|s| matches(s, &filters))
            .cloned()
            .collect())
    }

    async fn create(&self, scraper: Scraper) -> Result<Scraper> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        let mut scrapers = self.scrapers.write().await;
        scrapers.insert(scraper.id, scraper.clone());
        Ok(scraper)
    }

    async fn update(&self, scraper: Scraper) -> Result<Scraper> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        let mut scrapers = self.scrapers.write().await;
        if !scrapers.contains_key(&scraper.id) {
            return Err(Error::NotFound {
                kind: "scraper",
                id: scraper.id.to_string(),
            });
        }
        scrapers.insert(scraper.id, scraper.clone());
        Ok(scraper)
    }

    async fn delete(&self, id: ScraperId) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        self.scrapers
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound {
                kind: "scraper",
                id: id.to_string(),
            })
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}

/// Redis-backed store shared across nodes. Scrapers live as JSON blobs at
/// `scrapers:{id}`, with membership tracked in the `scraper_ids` set, per
/// the persisted state layout in the platform's external-interfaces spec.
pub struct RedisScraperStorage {
    pool: RedisPool,
    read_only: bool,
}

impl RedisScraperStorage {
    pub fn new(pool: RedisPool) -> Self {
        RedisScraperStorage {
            pool,
            read_only: false,
        }
    }

    fn scraper_key(&self, id: ScraperId) -> String {
        self.pool.key(format!("scrapers:{id}"))
    }

    fn ids_key(&self) -> String {
        self.pool.key("scraper_ids")
    }
}

#[async_trait]
impl ScraperStorage for RedisScraperStorage {
    #[instrument(level = "debug", skip(self))]
    async fn list(&self) -> Result<Vec<Scraper>> {
        let mut conn = self.pool.get().await?;
        let ids: Vec<String> = conn.smembers(self.ids_key()).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = ids
            .iter()
            .map(|id| self.pool.key(format!("scrapers:{id}")))
            .collect();
        let blobs: Vec<Option<String>> = conn.mget(keys).await?;
        Ok(blobs
            .into_iter()
            .flatten()
            .map(|b| serde_json::from_str(&b))
            .collect::<std::result::Result<Vec<_>, _>>()?)
    }

    async fn get(&self, id: ScraperId) -> Result<Scraper> {
        self.maybe_get(id).await?.ok_or_else(|| Error::NotFound {
            kind: "scraper",
            id: id.to_string(),
        })
    }

    async fn maybe_get(&self, id: ScraperId) -> Result<Option<Scraper>> {
        let mut conn = self.pool.get().await?;
        let blob: Option<String> = conn.get(self.scraper_key(id)).await?;
        Ok(match blob {
            Some(b) => Some(serde_json::from_str(&b)?),
            None => None,
        })
    }

    async fn search(&self, filters: ScraperFilters<'_>) -> Result<Vec<Scraper>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|s| matches(s, &filters))
            .collect())
    }

    async fn create(&self, scraper: Scraper) -> Result<Scraper> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        let mut conn = self.pool.get().await?;
        let blob = serde_json::to_string(&scraper)?;
        let _: () = redis::pipe()
            .atomic()
            .set(self.scraper_key(scraper.id), blob)
            .ignore()
            .sadd(self.ids_key(), scraper.id.to_string())
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(scraper)
    }

    async fn update(&self, scraper: Scraper) -> Result<Scraper> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        if self.maybe_get(scraper.id).await?.is_none() {
            return Err(Error::NotFound {
                kind: "scraper",
                id: scraper.id.to_string(),
            });
        }
        let mut conn = self.pool.get().await?;
        let blob = serde_json::to_string(&scraper)?;
        let _: () = conn.set(self.scraper_key(scraper.id), blob).await?;
        Ok(scraper)
    }

    async fn delete(&self, id: ScraperId) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        let mut conn = self.pool.get().await?;
        let removed: i64 = redis::pipe()
            .atomic()
            .del(self.scraper_key(id))
            .ignore()
            .srem(self.ids_key(), id.to_string())
            .query_async(&mut conn)
            .await?;
        if removed == 0 {
            return Err(Error::NotFound {
                kind: "scraper",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Priority, Schedule, ScraperConfig};

    fn sample(id: ScraperId) -> Scraper {
        Scraper {
            id,
            name: "example.com listing".into(),
            handler_name: "static_scraper".into(),
            config: ScraperConfig::default(),
            schedule: Schedule::EveryHour,
            schedule_priority: Priority::Normal,
        }
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let storage = InMemoryScraperStorage::new();
        let id = ScraperId::new();
        let created = storage.create(sample(id)).await.unwrap();
        let fetched = storage.get(id).await.unwrap();
        assert_eq!(created, fetched);
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let storage = InMemoryScraperStorage::new();
        let err = storage.get(ScraperId::new()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "scraper", .. }));
    }

    #[tokio::test]
    async fn maybe_get_missing_is_none() {
        let storage = InMemoryScraperStorage::new();
        assert_eq!(storage.maybe_get(ScraperId::new()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn read_only_rejects_mutation() {
        let id = ScraperId::new();
        let storage = InMemoryScraperStorage::read_only(vec![sample(id)]);
        assert!(storage.is_read_only());
        assert!(matches!(
            storage.create(sample(ScraperId::new())).await,
            Err(Error::ReadOnly)
        ));
        assert!(matches!(storage.delete(id).await, Err(Error::ReadOnly)));
    }

    #[tokio::test]
    async fn search_filters_by_handler_name() {
        let storage = InMemoryScraperStorage::new();
        let a = sample(ScraperId::new());
        let mut b = sample(ScraperId::new());
        b.handler_name = "dynamic_scraper".into();
        storage.create(a.clone()).await.unwrap();
        storage.create(b).await.unwrap();

        let found = storage
            .search(ScraperFilters {
                handler_name: Some("static_scraper"),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(found, vec![a]);
    }
}
