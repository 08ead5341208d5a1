use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{event, Level};

use crate::{error::MiddlewareError, middleware::Middleware, request::Request, request::Response};

#[derive(Debug, Deserialize)]
struct LoggingConfig {
    #[serde(default = "default_true")]
    log_request: bool,
    #[serde(default = "default_true")]
    log_response: bool,
}

fn default_true() -> bool {
    true
}

/// Logs requests and/or responses through `tracing`. Purely observational:
/// never mutates the request or response.
pub struct RequestLogger;

impl RequestLogger {
    pub fn new() -> Self {
        RequestLogger
    }
}

impl Default for RequestLogger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Middleware for RequestLogger {
    fn name(&self) -> &'static str {
        "logging"
    }

    fn default_config(&self) -> Value {
        json!({ "log_request": true, "log_response": true })
    }

    async fn on_request(
        &self,
        request: Request,
        config: &Value,
    ) -> Result<Request, MiddlewareError> {
        let config: LoggingConfig =
            serde_json::from_value(config.clone()).map_err(|e| MiddlewareError::Failure {
                middleware: self.name(),
                source: e.into(),
            })?;
        if config.log_request {
            event!(Level::INFO, method = %request.method, url = %request.url, "scraper request");
        }
        Ok(request)
    }

    async fn on_response(
        &self,
        request: &Request,
        response: Response,
        config: &Value,
    ) -> Result<Response, MiddlewareError> {
        let config: LoggingConfig =
            serde_json::from_value(config.clone()).map_err(|e| MiddlewareError::Failure {
                middleware: self.name(),
                source: e.into(),
            })?;
        if config.log_response {
            event!(
                Level::INFO,
                method = %request.method,
                url = %request.url,
                status = %response.status,
                "scraper response"
            );
        }
        Ok(response)
    }
}
