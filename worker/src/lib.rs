mod config;
mod error;
mod heartbeat;
mod log_sink;
mod pool;
mod task;

pub use config::WorkerConfig;
pub use error::{Error, Result};
pub use log_sink::TaskLogSink;
pub use pool::Worker;
