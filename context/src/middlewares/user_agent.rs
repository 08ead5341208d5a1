use async_trait::async_trait;
use rand::seq::SliceRandom;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{error::MiddlewareError, middleware::Middleware, request::Request};

#[derive(Debug, Deserialize)]
struct UserAgentConfig {
    #[serde(default)]
    use_external_data: bool,
    #[serde(default)]
    browsers: Vec<String>,
}

const DEFAULT_BROWSERS: &[&str] = &["chrome", "firefox", "safari", "edge"];

fn user_agent_for(browser: &str) -> &'static str {
    match browser.to_ascii_lowercase().as_str() {
        "firefox" => "Mozilla/5.0 (X11; Linux x86_64; rv:109.0) Gecko/20100101 Firefox/115.0",
        "safari" => "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.5 Safari/605.1.15",
        "edge" => "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/115.0.0.0 Safari/537.36 Edg/115.0.1901.188",
        _ => "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/115.0.0.0 Safari/537.36",
    }
}

/// Injects a plausible `User-Agent` header when the handler didn't set one.
/// `use_external_data` is reserved for sourcing the browser pool from a
/// refreshed external list; until that's wired up it falls back to the
/// built-in pool same as the default.
pub struct UserAgentInjector;

impl UserAgentInjector {
    pub fn new() -> Self {
        UserAgentInjector
    }
}

impl Default for UserAgentInjector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Middleware for UserAgentInjector {
    fn name(&self) -> &'static str {
        "user_agent"
    }

    fn default_config(&self) -> Value {
        json!({
            "use_external_data": false,
            "browsers": DEFAULT_BROWSERS,
        })
    }

    async fn on_request(
        &self,
        mut request: Request,
        config: &Value,
    ) -> Result<Request, MiddlewareError> {
        if request.has_header("User-Agent") {
            return Ok(request);
        }

        let config: UserAgentConfig =
            serde_json::from_value(config.clone()).map_err(|e| MiddlewareError::Failure {
                middleware: self.name(),
                source: e.into(),
            })?;

        let pool: Vec<&str> = if config.browsers.is_empty() {
            DEFAULT_BROWSERS.to_vec()
        } else {
            config.browsers.iter().map(String::as_str).collect()
        };

        let chosen = pool
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or("chrome");
        request.headers.insert(
            "User-Agent".to_string(),
            user_agent_for(chosen).to_string(),
        );
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn injects_a_user_agent_when_absent() {
        let mw = UserAgentInjector::new();
        let config = mw.default_config();
        let request = Request::new(reqwest::Method::GET, "https://example.com");
        let request = mw.on_request(request, &config).await.unwrap();
        assert!(request.has_header("User-Agent"));
    }

    #[tokio::test]
    async fn leaves_an_existing_user_agent_untouched() {
        let mw = UserAgentInjector::new();
        let config = mw.default_config();
        let request = Request::new(reqwest::Method::GET, "https://example.com")
            .header("User-Agent", "custom/1.0");
        let request = mw.on_request(request, &config).await.unwrap();
        assert_eq!(request.headers.get("User-Agent").unwrap(), "custom/1.0");
    }
}
