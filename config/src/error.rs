use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("environment variable error: {0}")]
    EnvOption(String),

    #[error("STORAGE_BACKEND must be \"memory\" or \"redis\", got {0:?}")]
    InvalidStorageBackend(String),

    #[error("REDIS_URL is required when STORAGE_BACKEND=redis")]
    MissingRedisUrl,
}

impl<T: std::error::Error> From<envoption::EnvOptionError<T>> for Error {
    fn from(e: envoption::EnvOptionError<T>) -> Self {
        Error::EnvOption(e.to_string())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
