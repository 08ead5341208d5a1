use std::time::Duration;

use thiserror::Error;

/// Failure modes a middleware hook may raise, matching the per-request
/// execution contract: a request can be dropped (`Skip`), retried after a
/// delay (`RetryAfter`), or fail outright. A response hook can additionally
/// flag a policy violation.
#[derive(Debug, Error)]
pub enum MiddlewareError {
    #[error("{middleware} dropped the request: {reason}")]
    Skip { middleware: &'static str, reason: String },

    #[error("{middleware} asked to retry after {delay:?}")]
    RetryAfter {
        middleware: &'static str,
        delay: Duration,
    },

    #[error("{middleware} rejected the response: {reason}")]
    Violation { middleware: &'static str, reason: String },

    #[error("{middleware} failed: {source}")]
    Failure {
        middleware: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Debug, Error)]
pub enum ContextError {
    #[error(transparent)]
    Middleware(#[from] MiddlewareError),

    #[error("request cancelled")]
    Cancelled,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("retry budget exhausted for {middleware} after {attempts} attempts")]
    RetryBudgetExhausted {
        middleware: &'static str,
        attempts: u32,
    },

    #[error(transparent)]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderName),

    #[error(transparent)]
    InvalidHeaderValue(#[from] reqwest::header::InvalidHeaderValue),
}
