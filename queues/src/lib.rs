mod error;
mod lease;
mod queue;

pub use error::{Error, Result};
pub use lease::{LeaseManager, LeaseStateConsumer};
pub use queue::Queue;
