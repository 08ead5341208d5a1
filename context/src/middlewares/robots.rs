use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{event, Level};

use crate::{error::MiddlewareError, middleware::Middleware, request::Request};

const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
enum ViolationStrategy {
    Log,
    Throw,
}

#[derive(Debug, Deserialize)]
struct RobotsConfig {
    violation_strategy: ViolationStrategy,
}

#[derive(Clone)]
struct Rule {
    disallow: bool,
    prefix: String,
}

struct CacheEntry {
    rules: Vec<Rule>,
    expires_at: Instant,
}

/// Fetches and caches `robots.txt` per host, blocking or logging disallowed
/// paths. A fetch failure (5xx, timeout, connection error) fails open: the
/// request is allowed and nothing is cached, so the next request retries.
pub struct RobotsTxt {
    client: reqwest::Client,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl RobotsTxt {
    pub fn new(client: reqwest::Client) -> Self {
        RobotsTxt {
            client,
            cache: Mutex::new(HashMap::new()),
        }
    }

    async fn rules_for(&self, base: &url::Url) -> Option<Vec<Rule>> {
        let host = base.host_str()?.to_string();

        if let Some(entry) = self.cache.lock().unwrap().get(&host) {
            if entry.expires_at > Instant::now() {
                return Some(entry.rules.clone());
            }
        }

        let mut robots_url = base.clone();
        robots_url.set_path("/robots.txt");
        robots_url.set_query(None);

        let response = match self.client.get(robots_url).send().await {
            Ok(r) if r.status().is_success() => r,
            _ => return None,
        };

        let ttl = response
            .headers()
            .get(reqwest::header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_max_age)
            .unwrap_or(DEFAULT_CACHE_TTL);

        let body = response.text().await.unwrap_or_default();
        let rules = parse_robots_txt(&body);

        self.cache.lock().unwrap().insert(
            host,
            CacheEntry {
                rules: rules.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Some(rules)
    }
}

fn parse_max_age(cache_control: &str) -> Option<Duration> {
    cache_control.split(',').find_map(|directive| {
        let directive = directive.trim();
        let rest = directive.strip_prefix("max-age=")?;
        rest.parse::<u64>().ok().map(Duration::from_secs)
    })
}

fn parse_robots_txt(body: &str) -> Vec<Rule> {
    let mut rules = Vec::new();
    let mut applies_to_us = false;
    for line in body.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();
        match key.as_str() {
            "user-agent" => applies_to_us = value == "*",
            "disallow" if applies_to_us && !value.is_empty() => rules.push(Rule {
                disallow: true,
                prefix: value.to_string(),
            }),
            "allow" if applies_to_us && !value.is_empty() => rules.push(Rule {
                disallow: false,
                prefix: value.to_string(),
            }),
            _ => {}
        }
    }
    rules
}

fn is_disallowed(rules: &[Rule], path: &str) -> bool {
    let best = rules
        .iter()
        .filter(|r| path.starts_with(r.prefix.as_str()))
        .max_by_key(|r| r.prefix.len());
    matches!(best, Some(r) if r.disallow)
}

#[async_trait]
impl Middleware for RobotsTxt {
    fn name(&self) -> &'static str {
        "robots_txt"
    }

    fn default_config(&self) -> Value {
        json!({ "violation_strategy": "THROW" })
    }

    async fn on_request(
        &self,
        request: Request,
        config: &Value,
    ) -> Result<Request, MiddlewareError> {
        let config: RobotsConfig =
            serde_json::from_value(config.clone()).map_err(|e| MiddlewareError::Failure {
                middleware: self.name(),
                source: e.into(),
            })?;

        let Ok(url) = url::Url::parse(&request.url) else {
            return Ok(request);
        };

        let Some(rules) = self.rules_for(&url).await else {
            return Ok(request);
        };

        if is_disallowed(&rules, url.path()) {
            match config.violation_strategy {
                ViolationStrategy::Throw => {
                    return Err(MiddlewareError::Violation {
                        middleware: self.name(),
                        reason: format!("{} disallowed by robots.txt", url.path()),
                    });
                }
                ViolationStrategy::Log => {
                    event!(
                        Level::WARN,
                        path = %url.path(),
                        "robots.txt disallows this path, continuing by configuration"
                    );
                }
            }
        }

        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disallow_blocks_matching_prefix() {
        let rules = parse_robots_txt("User-agent: *\nDisallow: /private\n");
        assert!(is_disallowed(&rules, "/private/data"));
        assert!(!is_disallowed(&rules, "/public"));
    }

    #[test]
    fn more_specific_allow_overrides_disallow() {
        let rules = parse_robots_txt("User-agent: *\nDisallow: /private\nAllow: /private/public\n");
        assert!(!is_disallowed(&rules, "/private/public/page"));
        assert!(is_disallowed(&rules, "/private/secret"));
    }

    #[test]
    fn rules_outside_the_wildcard_group_are_ignored() {
        let rules = parse_robots_txt("User-agent: Googlebot\nDisallow: /only-for-google\n");
        assert!(!is_disallowed(&rules, "/only-for-google"));
    }

    #[test]
    fn parses_max_age_from_cache_control() {
        assert_eq!(
            parse_max_age("public, max-age=120"),
            Some(Duration::from_secs(120))
        );
        assert_eq!(parse_max_age("no-cache"), None);
    }
}
