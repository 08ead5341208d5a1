use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    DatabaseError(#[from] scrapeworks_database::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
