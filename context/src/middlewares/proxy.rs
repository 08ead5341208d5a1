use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    error::MiddlewareError,
    middleware::Middleware,
    request::{ProxyOptions, Request},
};

#[derive(Debug, Deserialize)]
struct ProxyAuthConfig {
    user: String,
    pass: String,
}

#[derive(Debug, Deserialize)]
struct ProxyConfig {
    proxy: Option<String>,
    proxy_auth: Option<ProxyAuthConfig>,
}

/// Attaches an HTTP proxy (and optional basic auth) to outgoing requests.
/// The actual client rebuild happens at dispatch time, since reqwest only
/// takes a proxy at client construction.
pub struct ProxyInjector;

impl ProxyInjector {
    pub fn new() -> Self {
        ProxyInjector
    }
}

impl Default for ProxyInjector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Middleware for ProxyInjector {
    fn name(&self) -> &'static str {
        "proxy"
    }

    fn default_config(&self) -> Value {
        json!({ "proxy": null, "proxy_auth": null })
    }

    async fn on_request(
        &self,
        mut request: Request,
        config: &Value,
    ) -> Result<Request, MiddlewareError> {
        let config: ProxyConfig =
            serde_json::from_value(config.clone()).map_err(|e| MiddlewareError::Failure {
                middleware: self.name(),
                source: e.into(),
            })?;

        if let Some(url) = config.proxy {
            request.proxy = Some(ProxyOptions {
                url,
                auth: config.proxy_auth.map(|a| (a.user, a.pass)),
            });
        }

        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn attaches_proxy_and_auth_from_config() {
        let mw = ProxyInjector::new();
        let config = json!({
            "proxy": "http://proxy.example.com:8080",
            "proxy_auth": {"user": "alice", "pass": "secret"},
        });
        let request = Request::new(reqwest::Method::GET, "https://example.com");
        let request = mw.on_request(request, &config).await.unwrap();
        let proxy = request.proxy.expect("proxy should be set");
        assert_eq!(proxy.url, "http://proxy.example.com:8080");
        assert_eq!(proxy.auth, Some(("alice".to_string(), "secret".to_string())));
    }

    #[tokio::test]
    async fn leaves_request_unproxied_when_unconfigured() {
        let mw = ProxyInjector::new();
        let config = mw.default_config();
        let request = Request::new(reqwest::Method::GET, "https://example.com");
        let request = mw.on_request(request, &config).await.unwrap();
        assert!(request.proxy.is_none());
    }
}
