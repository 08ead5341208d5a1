pub mod console;
pub mod dynamic;
pub mod error;
pub mod handler;
pub mod ops;
pub mod permissions;
pub mod runtime;

pub use dynamic::DynamicHandler;
pub use error::{Error, Result};
pub use handler::{Handler, HandlerRegistry};
