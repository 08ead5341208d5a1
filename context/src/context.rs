use std::{any::Any, collections::BTreeMap, sync::Arc, time::Duration};

use fxhash::FxHashMap;
use reqwest::Method;
use serde_json::Value;
use tracing::{event, instrument, Level};

use crate::{
    cancel::CancelToken,
    config_merge::deep_merge,
    error::{ContextError, MiddlewareError},
    middleware::Middleware,
    request::{Request, Response},
};

/// A middleware registered with the context, kept both as a chain
/// participant (`dyn Middleware`) and as a type-erased handle so handlers
/// can recover the concrete type for functional middleware (the parser)
/// through [`ScraperContext::attribute`].
#[derive(Clone)]
pub struct RegisteredMiddleware {
    chain: Arc<dyn Middleware>,
    any: Arc<dyn Any + Send + Sync>,
}

impl RegisteredMiddleware {
    pub fn new<M: Middleware + 'static>(middleware: Arc<M>) -> Self {
        RegisteredMiddleware {
            chain: middleware.clone(),
            any: middleware,
        }
    }
}

/// Verb-specific overrides for a single request.
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    pub headers: BTreeMap<String, String>,
    pub query: Vec<(String, String)>,
    pub json: Option<Value>,
    pub body: Option<String>,
    pub timeout: Option<Duration>,
}

const MAX_MIDDLEWARE_RETRIES: u32 = 5;

/// Per-task facade handed to handlers: HTTP verbs routed through the
/// middleware chain, the scraper's `params`, and named access to
/// functional middleware utilities.
pub struct ScraperContext {
    client: reqwest::Client,
    middlewares: Vec<RegisteredMiddleware>,
    effective_configs: FxHashMap<&'static str, Value>,
    pub params: Value,
    cancel: CancelToken,
    default_timeout: Duration,
}

impl ScraperContext {
    pub fn new(
        client: reqwest::Client,
        middlewares: Vec<RegisteredMiddleware>,
        middleware_overrides: &BTreeMap<String, Value>,
        params: Value,
        cancel: CancelToken,
        default_timeout: Duration,
    ) -> Self {
        let mut effective_configs = FxHashMap::default();
        for m in &middlewares {
            let name = m.chain.name();
            let default = m.chain.default_config();
            let config = match middleware_overrides.get(name) {
                Some(overlay) => deep_merge(&default, overlay),
                None => default,
            };
            effective_configs.insert(name, config);
        }

        for unknown in middleware_overrides
            .keys()
            .filter(|name| !effective_configs.contains_key(name.as_str()))
        {
            event!(
                Level::WARN,
                middleware = %unknown,
                "middleware override references an unregistered middleware"
            );
        }

        ScraperContext {
            client,
            middlewares,
            effective_configs,
            params,
            cancel,
            default_timeout,
        }
    }

    /// Recovers a registered middleware's concrete type by name, for
    /// functional middleware that expose callable helpers to handlers
    /// (e.g. the HTML parser).
    pub fn attribute<T: Send + Sync + 'static>(&self, name: &str) -> Option<Arc<T>> {
        self.middlewares
            .iter()
            .find(|m| m.chain.name() == name)
            .and_then(|m| m.any.clone().downcast::<T>().ok())
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub async fn get(&self, url: &str, opts: RequestOptions) -> Result<Response, ContextError> {
        self.execute(Method::GET, url, opts).await
    }

    pub async fn post(&self, url: &str, opts: RequestOptions) -> Result<Response, ContextError> {
        self.execute(Method::POST, url, opts).await
    }

    pub async fn put(&self, url: &str, opts: RequestOptions) -> Result<Response, ContextError> {
        self.execute(Method::PUT, url, opts).await
    }

    pub async fn delete(&self, url: &str, opts: RequestOptions) -> Result<Response, ContextError> {
        self.execute(Method::DELETE, url, opts).await
    }

    pub async fn head(&self, url: &str, opts: RequestOptions) -> Result<Response, ContextError> {
        self.execute(Method::HEAD, url, opts).await
    }

    pub async fn options(&self, url: &str, opts: RequestOptions) -> Result<Response, ContextError> {
        self.execute(Method::OPTIONS, url, opts).await
    }

    pub async fn patch(&self, url: &str, opts: RequestOptions) -> Result<Response, ContextError> {
        self.execute(Method::PATCH, url, opts).await
    }

    #[instrument(level = "debug", skip(self, opts), fields(%method, %url))]
    async fn execute(
        &self,
        method: Method,
        url: &str,
        opts: RequestOptions,
    ) -> Result<Response, ContextError> {
        if self.cancel.is_cancelled() {
            return Err(ContextError::Cancelled);
        }

        let mut retries_remaining = FxHashMap::default();

        loop {
            let mut request = Request::new(method.clone(), url);
            request.headers.extend(opts.headers.clone());
            request.query = opts.query.clone();
            request.json_body = opts.json.clone();
            request.body = opts.body.clone();
            request.timeout = opts.timeout.unwrap_or(self.default_timeout);

            match self.run_request_hooks(request, &mut retries_remaining).await? {
                HookOutcome::Proceed(request) => {
                    let response = self.dispatch(request.clone()).await?;
                    return self.run_response_hooks(&request, response).await;
                }
                HookOutcome::RetryPipeline => continue,
            }
        }
    }

    async fn run_request_hooks(
        &self,
        mut request: Request,
        retries_remaining: &mut FxHashMap<&'static str, u32>,
    ) -> Result<HookOutcome, ContextError> {
        for m in &self.middlewares {
            if self.cancel.is_cancelled() {
                return Err(ContextError::Cancelled);
            }
            let name = m.chain.name();
            let config = &self.effective_configs[name];
            match m.chain.on_request(request.clone(), config).await {
                Ok(updated) => request = updated,
                Err(MiddlewareError::Skip { .. }) => {
                    return Err(MiddlewareError::Skip {
                        middleware: name,
                        reason: "dropped by middleware".to_string(),
                    }
                    .into());
                }
                Err(MiddlewareError::RetryAfter { delay, .. }) => {
                    let attempts = retries_remaining.entry(name).or_insert(0);
                    *attempts += 1;
                    if *attempts > MAX_MIDDLEWARE_RETRIES {
                        return Err(ContextError::RetryBudgetExhausted {
                            middleware: name,
                            attempts: *attempts,
                        });
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.cancel.clone().cancelled() => return Err(ContextError::Cancelled),
                    }
                    return Ok(HookOutcome::RetryPipeline);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(HookOutcome::Proceed(request))
    }

    async fn run_response_hooks(
        &self,
        request: &Request,
        response: Response,
    ) -> Result<Response, ContextError> {
        let mut response = response;
        for m in self.middlewares.iter().rev() {
            let name = m.chain.name();
            let config = &self.effective_configs[name];
            response = m.chain.on_response(request, response, config).await?;
        }
        Ok(response)
    }

    async fn dispatch(&self, request: Request) -> Result<Response, ContextError> {
        let owned_client;
        let client = match &request.proxy {
            Some(proxy) => {
                owned_client = self.client_with_proxy(proxy)?;
                &owned_client
            }
            None => &self.client,
        };
        let mut builder = client.request(request.method.clone(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(json) = &request.json_body {
            builder = builder.json(json);
        } else if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        builder = builder.timeout(request.timeout);

        let mut cancel = self.cancel.clone();
        tokio::select! {
            result = builder.send() => Ok(Response::from_reqwest(result?)),
            _ = cancel.cancelled() => Err(ContextError::Cancelled),
        }
    }
}

impl ScraperContext {
    fn client_with_proxy(
        &self,
        proxy: &crate::request::ProxyOptions,
    ) -> Result<reqwest::Client, ContextError> {
        let mut p = reqwest::Proxy::all(&proxy.url)?;
        if let Some((user, pass)) = &proxy.auth {
            p = p.basic_auth(user, pass);
        }
        Ok(reqwest::Client::builder().proxy(p).build()?)
    }
}

enum HookOutcome {
    Proceed(Request),
    RetryPipeline,
}
