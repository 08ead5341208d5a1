use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::ids::{ScraperId, TaskId};

/// Total order used by dequeue: UTMOST < HIGH < NORMAL.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, JsonSchema, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Utmost = 0,
    High = 1,
    Normal = 2,
}

impl Priority {
    /// Default priority scan order for `QueueStorage::dequeue`.
    pub const ORDER: [Priority; 3] = [Priority::Utmost, Priority::High, Priority::Normal];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Utmost => "utmost",
            Priority::High => "high",
            Priority::Normal => "normal",
        }
    }
}

/// A scraper's trigger. `Inactive` means no job is ever scheduled for it.
#[derive(Clone, Debug, PartialEq, Eq, JsonSchema, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Schedule {
    Inactive,
    EverySecond,
    EveryMinute,
    EveryHour,
    EveryDay,
    EveryWeek,
    /// Crontab expression understood by the `cron` crate:
    /// `second minute hour day-of-month month day-of-week year`.
    Crontab(String),
}

impl Schedule {
    /// The fixed interval this schedule represents, if any. Crontab and
    /// Inactive schedules return `None` — crontab fire times are computed
    /// directly from the expression, and inactive schedules never fire.
    pub fn interval(&self) -> Option<chrono::Duration> {
        match self {
            Schedule::Inactive => None,
            Schedule::EverySecond => Some(chrono::Duration::seconds(1)),
            Schedule::EveryMinute => Some(chrono::Duration::minutes(1)),
            Schedule::EveryHour => Some(chrono::Duration::hours(1)),
            Schedule::EveryDay => Some(chrono::Duration::days(1)),
            Schedule::EveryWeek => Some(chrono::Duration::weeks(1)),
            Schedule::Crontab(_) => None,
        }
    }
}

/// Per-scraper configuration: arbitrary handler params plus per-middleware
/// config overrides, deep-merged onto each middleware's default config.
#[derive(Clone, Debug, Default, PartialEq, JsonSchema, Serialize, Deserialize)]
pub struct ScraperConfig {
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub middleware_overrides: BTreeMap<String, serde_json::Value>,
}

#[derive(Clone, Debug, PartialEq, JsonSchema, Serialize, Deserialize)]
pub struct Scraper {
    pub id: ScraperId,
    pub name: String,
    pub handler_name: String,
    pub config: ScraperConfig,
    pub schedule: Schedule,
    pub schedule_priority: Priority,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScraperFilters<'a> {
    pub handler_name: Option<&'a str>,
    pub name_contains: Option<&'a str>,
    pub schedule_active: Option<bool>,
}

/// The lifecycle a task moves through. Once terminal (`Succeeded`, `Failed`,
/// `Killed`, `Dead`) it is immutable except for garbage collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, JsonSchema, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Started,
    Succeeded,
    Failed,
    Killed,
    Dead,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Killed | TaskStatus::Dead
        )
    }
}

#[derive(Clone, Debug, PartialEq, JsonSchema, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    /// `None` for ephemeral tasks not tied to a persisted scraper.
    pub scraper_id: Option<ScraperId>,
    pub handler_name: String,
    pub config: ScraperConfig,
    pub priority: Priority,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_active_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Option<String>,
}

impl Task {
    pub fn new_pending(
        id: TaskId,
        scraper_id: Option<ScraperId>,
        handler_name: String,
        config: ScraperConfig,
        priority: Priority,
        created_at: DateTime<Utc>,
    ) -> Self {
        Task {
            id,
            scraper_id,
            handler_name,
            config,
            priority,
            status: TaskStatus::Pending,
            created_at,
            started_at: None,
            last_active_at: None,
            finished_at: None,
            result: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub name: String,
    pub owner: String,
    pub acquired_until: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq, JsonSchema, Serialize, Deserialize)]
pub struct LogLine {
    /// Monotonically increasing per task.
    pub id: u64,
    pub task_id: TaskId,
    pub level: LogLevel,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}
