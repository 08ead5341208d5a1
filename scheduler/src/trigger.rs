use std::str::FromStr;

use chrono::{DateTime, Utc};
use scrapeworks_database::Schedule;

use crate::error::{Error, Result};

/// Per-scraper schedule cursor. Interval schedules advance by a fixed step
/// from the previous fire time (drift-free); crontab schedules recompute
/// fresh from `now` each time. Either way, if multiple fires were missed
/// while the scraper was unobserved, only the next single fire is kept —
/// missed occurrences are never queued up.
#[derive(Debug, Clone, Copy)]
pub struct TriggerState {
    next_fire: DateTime<Utc>,
}

impl TriggerState {
    /// `None` for `Schedule::Inactive`, which is never scheduled.
    pub fn new(schedule: &Schedule, now: DateTime<Utc>) -> Result<Option<Self>> {
        let next_fire = match first_fire(schedule, now)? {
            Some(t) => t,
            None => return Ok(None),
        };
        Ok(Some(TriggerState { next_fire }))
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.next_fire
    }

    /// Moves the cursor to the next fire strictly after `now`, regardless of
    /// whether the due fire was actually enqueued (backpressure/concurrency
    /// skips still consume the tick; the next fire handles the retry).
    pub fn advance(&mut self, schedule: &Schedule, now: DateTime<Utc>) -> Result<()> {
        match schedule.interval() {
            Some(interval) => {
                let mut next = self.next_fire + interval;
                while next <= now {
                    next += interval;
                }
                self.next_fire = next;
                Ok(())
            }
            None => match schedule {
                Schedule::Crontab(expr) => {
                    let parsed = cron::Schedule::from_str(expr)?;
                    self.next_fire = parsed
                        .upcoming(Utc)
                        .next()
                        .unwrap_or(now + chrono::Duration::weeks(52));
                    Ok(())
                }
                Schedule::Inactive => unreachable!("inactive schedules have no TriggerState"),
                _ => unreachable!("interval schedule without an interval()"),
            },
        }
    }
}

fn first_fire(schedule: &Schedule, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
    match schedule {
        Schedule::Inactive => Ok(None),
        Schedule::Crontab(expr) => {
            let parsed = cron::Schedule::from_str(expr).map_err(Error::InvalidCrontab)?;
            Ok(Some(
                parsed.upcoming(Utc).next().unwrap_or(now + chrono::Duration::weeks(52)),
            ))
        }
        _ => Ok(Some(now + schedule.interval().expect("non-crontab, non-inactive schedules have an interval"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn inactive_schedule_has_no_trigger_state() {
        let now = Utc.timestamp_opt(0, 0).unwrap();
        assert!(TriggerState::new(&Schedule::Inactive, now).unwrap().is_none());
    }

    #[test]
    fn interval_schedule_advances_without_drift() {
        let now = t("2024-01-01T00:00:00Z");
        let mut state = TriggerState::new(&Schedule::EveryMinute, now).unwrap().unwrap();
        let first_fire = now + chrono::Duration::minutes(1);
        assert_eq!(state.is_due(first_fire), true);
        state.advance(&Schedule::EveryMinute, first_fire).unwrap();
        assert_eq!(state.is_due(first_fire), false);
        assert_eq!(state.is_due(first_fire + chrono::Duration::minutes(1)), true);
    }

    #[test]
    fn missed_interval_fires_coalesce_to_one() {
        let now = t("2024-01-01T00:00:00Z");
        let mut state = TriggerState::new(&Schedule::EveryMinute, now).unwrap().unwrap();
        // 10 minutes pass with no observation in between.
        let later = now + chrono::Duration::minutes(10);
        assert!(state.is_due(later));
        state.advance(&Schedule::EveryMinute, later).unwrap();
        // The cursor should sit just past `later`, not 10 fires behind it.
        assert!(!state.is_due(later));
        assert!(state.is_due(later + chrono::Duration::minutes(1)));
    }

    #[test]
    fn crontab_fires_on_the_next_matching_time() {
        let now = Utc::now();
        let state = TriggerState::new(&Schedule::Crontab("0 * * * * * *".into()), now)
            .unwrap()
            .unwrap();
        assert!(!state.is_due(now));
    }
}
