use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, PartialOrd, Ord, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsoleLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl From<usize> for ConsoleLevel {
    fn from(value: usize) -> Self {
        match value {
            0 => Self::Debug,
            1 => Self::Info,
            2 => Self::Warn,
            3 => Self::Error,
            _ => Self::Debug,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConsoleMessage {
    pub level: ConsoleLevel,
    pub time: DateTime<Utc>,
    pub message: String,
}

/// Forwards a script's `console.*` call to `tracing`. The sandbox is torn
/// down at the end of every invocation, so this is the only durable record
/// of handler-internal console output — it rides the same subscriber as
/// everything else instead of a separate per-task buffer.
pub fn emit(message: ConsoleMessage) {
    match message.level {
        ConsoleLevel::Debug => tracing::event!(tracing::Level::DEBUG, console = %message.message),
        ConsoleLevel::Info => tracing::event!(tracing::Level::INFO, console = %message.message),
        ConsoleLevel::Warn => tracing::event!(tracing::Level::WARN, console = %message.message),
        ConsoleLevel::Error => tracing::event!(tracing::Level::ERROR, console = %message.message),
    }
}
