use std::sync::Arc;

use async_trait::async_trait;
use fxhash::FxHashMap;
use scrapeworks_context::ScraperContext;

use crate::error::{Error, Result};

/// User-supplied or built-in scrape logic. A handler receives the task's
/// context (HTTP client + middleware chain + the scraper's `params`) and
/// produces the task's result string, or faults and becomes the task's
/// `FAILED` message.
#[async_trait]
pub trait Handler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, ctx: Arc<ScraperContext>) -> anyhow::Result<String>;
}

/// Name -> handler resolution. Immutable after construction: handlers are
/// registered once at server composition and never added to or removed from
/// at runtime, matching `handler_name` being validated at scraper creation.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: FxHashMap<&'static str, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        HandlerRegistry::default()
    }

    pub fn register(&mut self, handler: Arc<dyn Handler>) -> &mut Self {
        self.handlers.insert(handler.name(), handler);
        self
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Handler>> {
        self.handlers
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                name: name.to_string(),
            })
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.handlers.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    struct Echo;

    #[async_trait]
    impl Handler for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }

        async fn run(&self, ctx: Arc<ScraperContext>) -> anyhow::Result<String> {
            Ok(ctx.params.to_string())
        }
    }

    #[test]
    fn resolves_registered_handler_by_name() {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(Echo));

        assert!(registry.get("echo").is_ok());
        assert_eq!(registry.names(), vec!["echo"]);
    }

    #[test]
    fn unknown_handler_name_errors() {
        let registry = HandlerRegistry::new();
        assert_matches!(registry.get("missing"), Err(Error::NotFound { name }) if name == "missing");
    }
}
