use std::collections::BTreeMap;

/// A request in flight through the middleware chain. Built from the verb
/// call's arguments and then mutated in place by each `on_request` hook.
#[derive(Clone, Debug)]
pub struct Request {
    pub method: reqwest::Method,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub query: Vec<(String, String)>,
    pub json_body: Option<serde_json::Value>,
    pub body: Option<String>,
    pub timeout: std::time::Duration,
    pub proxy: Option<ProxyOptions>,
}

/// Set by the proxy middleware and consumed at dispatch time, since reqwest
/// only accepts a proxy at client-construction, not per request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProxyOptions {
    pub url: String,
    pub auth: Option<(String, String)>,
}

impl Request {
    pub fn new(method: reqwest::Method, url: impl Into<String>) -> Self {
        Request {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            query: Vec::new(),
            json_body: None,
            body: None,
            timeout: std::time::Duration::from_secs(30),
            proxy: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.keys().any(|k| k.eq_ignore_ascii_case(name))
    }
}

/// The response a handler observes after every `on_response` hook has run.
/// Wraps `reqwest::Response` directly to keep the body streaming until a
/// handler or middleware actually reads it.
pub struct Response {
    pub status: reqwest::StatusCode,
    pub headers: reqwest::header::HeaderMap,
    inner: reqwest::Response,
}

impl Response {
    pub fn from_reqwest(inner: reqwest::Response) -> Self {
        Response {
            status: inner.status(),
            headers: inner.headers().clone(),
            inner,
        }
    }

    pub async fn text(self) -> Result<String, reqwest::Error> {
        self.inner.text().await
    }

    pub async fn json<T: serde::de::DeserializeOwned>(self) -> Result<T, reqwest::Error> {
        self.inner.json().await
    }

    pub async fn bytes(self) -> Result<bytes::Bytes, reqwest::Error> {
        self.inner.bytes().await
    }
}
