use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{error::MiddlewareError, middleware::Middleware, request::Request};

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
enum Strategy {
    Wait,
    Throw,
}

#[derive(Debug, Deserialize)]
struct RateLimiterConfig {
    max_requests: u32,
    time_window_ms: u64,
    rate_limited_strategy: Strategy,
}

/// Leaky-bucket rate limiter, tracked per host. `WAIT` asks the caller to
/// retry after the bucket drains; `THROW` fails the request outright.
#[derive(Default)]
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        RateLimiter::default()
    }
}

#[async_trait]
impl Middleware for RateLimiter {
    fn name(&self) -> &'static str {
        "rate_limiter"
    }

    fn default_config(&self) -> Value {
        json!({
            "max_requests": 60,
            "time_window_ms": 60_000,
            "rate_limited_strategy": "WAIT",
        })
    }

    async fn on_request(
        &self,
        request: Request,
        config: &Value,
    ) -> Result<Request, MiddlewareError> {
        let config: RateLimiterConfig =
            serde_json::from_value(config.clone()).map_err(|e| MiddlewareError::Failure {
                middleware: self.name(),
                source: e.into(),
            })?;
        let host = url::Url::parse(&request.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_owned))
            .unwrap_or_default();
        let window = Duration::from_millis(config.time_window_ms);
        let now = Instant::now();

        let wait = {
            let mut buckets = self.buckets.lock().unwrap();
            let bucket = buckets.entry(host).or_default();
            while let Some(&front) = bucket.front() {
                if now.duration_since(front) >= window {
                    bucket.pop_front();
                } else {
                    break;
                }
            }
            if bucket.len() < config.max_requests as usize {
                bucket.push_back(now);
                None
            } else {
                let oldest = *bucket.front().unwrap();
                Some(window.saturating_sub(now.duration_since(oldest)))
            }
        };

        match wait {
            None => Ok(request),
            Some(delay) => match config.rate_limited_strategy {
                Strategy::Wait => Err(MiddlewareError::RetryAfter {
                    middleware: self.name(),
                    delay,
                }),
                Strategy::Throw => Err(MiddlewareError::Failure {
                    middleware: self.name(),
                    source: anyhow::anyhow!(
                        "rate limit exceeded: {} requests per {:?}",
                        config.max_requests,
                        window
                    ),
                }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_requests_within_capacity() {
        let limiter = RateLimiter::new();
        let config = json!({"max_requests": 2, "time_window_ms": 60_000, "rate_limited_strategy": "WAIT"});
        let req = Request::new(reqwest::Method::GET, "https://example.com/a");
        assert!(limiter.on_request(req.clone(), &config).await.is_ok());
        assert!(limiter.on_request(req, &config).await.is_ok());
    }

    #[tokio::test]
    async fn blocks_the_request_at_capacity_with_wait_strategy() {
        let limiter = RateLimiter::new();
        let config =
            json!({"max_requests": 1, "time_window_ms": 60_000, "rate_limited_strategy": "WAIT"});
        let req = Request::new(reqwest::Method::GET, "https://example.com/a");
        assert!(limiter.on_request(req.clone(), &config).await.is_ok());
        let err = limiter.on_request(req, &config).await.unwrap_err();
        assert!(matches!(err, MiddlewareError::RetryAfter { .. }));
    }

    #[tokio::test]
    async fn throw_strategy_fails_instead_of_retrying() {
        let limiter = RateLimiter::new();
        let config = json!({"max_requests": 1, "time_window_ms": 60_000, "rate_limited_strategy": "THROW"});
        let req = Request::new(reqwest::Method::GET, "https://example.com/a");
        assert!(limiter.on_request(req.clone(), &config).await.is_ok());
        let err = limiter.on_request(req, &config).await.unwrap_err();
        assert!(matches!(err, MiddlewareError::Failure { .. }));
    }

    #[tokio::test]
    async fn buckets_are_tracked_independently_per_host() {
        let limiter = RateLimiter::new();
        let config =
            json!({"max_requests": 1, "time_window_ms": 60_000, "rate_limited_strategy": "THROW"});
        let a = Request::new(reqwest::Method::GET, "https://a.example.com/");
        let b = Request::new(reqwest::Method::GET, "https://b.example.com/");
        assert!(limiter.on_request(a, &config).await.is_ok());
        assert!(limiter.on_request(b, &config).await.is_ok());
    }
}
