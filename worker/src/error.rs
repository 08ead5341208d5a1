use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Queue(#[from] scrapeworks_queues::Error),

    #[error(transparent)]
    Database(#[from] scrapeworks_database::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
