pub mod cancel;
pub mod config_merge;
pub mod context;
pub mod error;
pub mod middleware;
pub mod middlewares;
pub mod request;

pub use cancel::{CancelToken, CancelTrigger};
pub use context::{RegisteredMiddleware, RequestOptions, ScraperContext};
pub use error::{ContextError, MiddlewareError};
pub use middleware::Middleware;
pub use request::{Request, Response};
