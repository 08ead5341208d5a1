pub mod error;
pub mod server;
pub mod tracing_config;

pub use error::{Error, Result};
pub use server::{default_handlers, default_middlewares, Server, ScraperSearch};
