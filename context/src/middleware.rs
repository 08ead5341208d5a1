use async_trait::async_trait;
use serde_json::Value;

use crate::{error::MiddlewareError, request::Request, request::Response};

/// A named component that intercepts outgoing requests and/or incoming
/// responses. Both hooks default to passing the value through unchanged, so
/// a purely functional middleware (e.g. the parser) only needs to implement
/// `name` and `default_config`.
#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &'static str;

    fn default_config(&self) -> Value {
        Value::Object(serde_json::Map::new())
    }

    async fn on_request(
        &self,
        request: Request,
        _config: &Value,
    ) -> Result<Request, MiddlewareError> {
        Ok(request)
    }

    async fn on_response(
        &self,
        _request: &Request,
        response: Response,
        _config: &Value,
    ) -> Result<Response, MiddlewareError> {
        Ok(response)
    }
}
