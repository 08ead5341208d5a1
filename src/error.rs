use thiserror::Error;

/// Stable error taxonomy surfaced at the `Server` boundary. Each variant's
/// `Display` is what a JSON-RPC caller sees in `error.message`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("storage is read-only")]
    ReadOnly,

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("handler error: {0}")]
    HandlerError(String),

    #[error("middleware violation ({middleware}): {message}")]
    MiddlewareViolation { middleware: String, message: String },

    #[error("rate limited by {middleware}")]
    RateLimited { middleware: String },

    #[error("task cancelled")]
    Cancelled,

    #[error("task presumed dead: {0}")]
    Dead(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<scrapeworks_database::Error> for Error {
    fn from(e: scrapeworks_database::Error) -> Self {
        match e {
            scrapeworks_database::Error::NotFound { kind, id } => Error::NotFound { kind, id },
            scrapeworks_database::Error::ReadOnly => Error::ReadOnly,
            scrapeworks_database::Error::ValidationError(msg) => Error::ValidationError(msg),
            other => Error::StorageUnavailable(other.to_string()),
        }
    }
}

impl From<scrapeworks_queues::Error> for Error {
    fn from(e: scrapeworks_queues::Error) -> Self {
        match e {
            scrapeworks_queues::Error::DatabaseError(db) => db.into(),
        }
    }
}

impl From<scrapeworks_handlers::Error> for Error {
    fn from(e: scrapeworks_handlers::Error) -> Self {
        Error::HandlerError(e.to_string())
    }
}
