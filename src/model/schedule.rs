//! Periodic schedules attached to task units.
//!
//! Schedules are metadata for the beat. The orchestration core never
//! evaluates them itself.

use chrono::{DateTime, Datelike, DurationRound, TimeDelta, Timelike, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_QUEUE: &str = "default";

/// Recurrence plus routing for a scheduled unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodicSchedule {
    pub recurrence: Recurrence,
    /// Queue the beat routes submissions to.
    pub queue: String,
}

impl PeriodicSchedule {
    pub fn every_secs(secs: u64) -> Self {
        Self {
            recurrence: Recurrence::Every { secs },
            queue: DEFAULT_QUEUE.to_string(),
        }
    }

    pub fn cron(spec: CronSpec) -> Self {
        Self {
            recurrence: Recurrence::Cron(spec),
            queue: DEFAULT_QUEUE.to_string(),
        }
    }

    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    /// Is a run due at `now`, given the last run (or the reference instant
    /// the beat started from)?
    pub fn is_due(
        &self,
        last_run: Option<DateTime<Utc>>,
        reference: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> bool {
        match &self.recurrence {
            Recurrence::Every { secs } => match last_run {
                None => true,
                Some(last) => now - last >= TimeDelta::seconds(*secs as i64),
            },
            Recurrence::Cron(spec) => spec
                .next_after(last_run.unwrap_or(reference))
                .is_some_and(|next| next <= now),
        }
    }
}

/// How often a scheduled unit fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Recurrence {
    /// Fixed interval, measured from the previous run.
    Every { secs: u64 },
    /// Calendar recurrence, UTC.
    Cron(CronSpec),
}

impl std::fmt::Display for Recurrence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Recurrence::Every { secs } => write!(f, "every {secs}s"),
            Recurrence::Cron(spec) => write!(f, "cron({spec})"),
        }
    }
}

// ---------------------------------------------------------------------------
// Cron
// ---------------------------------------------------------------------------

/// Calendar schedule. `None` in a field means "every".
///
/// Day of week counts from Sunday = 0, so Monday is 1.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronSpec {
    pub minute: Option<u32>,
    pub hour: Option<u32>,
    pub day_of_month: Option<u32>,
    pub month: Option<u32>,
    pub day_of_week: Option<u32>,
}

/// Upper bound for the next-fire search: any satisfiable spec fires within
/// a few years (Feb 29 on a given weekday is the worst case).
const MAX_SEARCH_DAYS: i64 = 366 * 8;

impl CronSpec {
    /// Fires once a day at `hour:minute`.
    pub fn daily_at(hour: u32, minute: u32) -> Self {
        Self {
            minute: Some(minute),
            hour: Some(hour),
            ..Self::default()
        }
    }

    /// Fires once a week on `day_of_week` at `hour:minute`.
    pub fn weekly_at(day_of_week: u32, hour: u32, minute: u32) -> Self {
        Self {
            minute: Some(minute),
            hour: Some(hour),
            day_of_week: Some(day_of_week),
            ..Self::default()
        }
    }

    fn day_matches(&self, t: DateTime<Utc>) -> bool {
        self.month.is_none_or(|m| m == t.month())
            && self.day_of_month.is_none_or(|d| d == t.day())
            && self
                .day_of_week
                .is_none_or(|d| d % 7 == t.weekday().num_days_from_sunday())
    }

    /// First matching minute strictly after `after`, or `None` if the spec
    /// can never fire (e.g. February 31st).
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let one_minute = TimeDelta::minutes(1);
        let mut t = after.duration_trunc(one_minute).ok()? + one_minute;
        let limit = after + TimeDelta::days(MAX_SEARCH_DAYS);

        while t <= limit {
            if !self.day_matches(t) {
                let midnight = t.duration_trunc(TimeDelta::days(1)).ok()?;
                t = midnight + TimeDelta::days(1);
                continue;
            }
            if self.hour.is_some_and(|h| h != t.hour()) {
                t = t.duration_trunc(TimeDelta::hours(1)).ok()? + TimeDelta::hours(1);
                continue;
            }
            if self.minute.is_some_and(|m| m != t.minute()) {
                t += one_minute;
                continue;
            }
            return Some(t);
        }
        None
    }
}

impl std::fmt::Display for CronSpec {
    /// Standard five-field form: `minute hour day-of-month month day-of-week`.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let field = |v: Option<u32>| v.map_or_else(|| "*".to_string(), |n| n.to_string());
        write!(
            f,
            "{} {} {} {} {}",
            field(self.minute),
            field(self.hour),
            field(self.day_of_month),
            field(self.month),
            field(self.day_of_week)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn daily_fires_same_day_when_time_not_reached() {
        let spec = CronSpec::daily_at(2, 0);
        assert_eq!(spec.next_after(at(2026, 3, 10, 1, 15)), Some(at(2026, 3, 10, 2, 0)));
    }

    #[test]
    fn daily_rolls_to_next_day_after_fire_time() {
        let spec = CronSpec::daily_at(2, 0);
        assert_eq!(spec.next_after(at(2026, 3, 10, 2, 0)), Some(at(2026, 3, 11, 2, 0)));
    }

    #[test]
    fn weekly_finds_next_monday() {
        // 2026-03-11 is a Wednesday.
        let spec = CronSpec::weekly_at(1, 7, 0);
        assert_eq!(spec.next_after(at(2026, 3, 11, 12, 0)), Some(at(2026, 3, 16, 7, 0)));
    }

    #[test]
    fn impossible_date_never_fires() {
        let spec = CronSpec {
            day_of_month: Some(31),
            month: Some(2),
            ..CronSpec::default()
        };
        assert_eq!(spec.next_after(at(2026, 1, 1, 0, 0)), None);
    }

    #[test]
    fn displays_five_fields() {
        assert_eq!(CronSpec::weekly_at(1, 7, 0).to_string(), "0 7 * * 1");
    }

    #[test]
    fn interval_due_when_never_run_or_elapsed() {
        let schedule = PeriodicSchedule::every_secs(300);
        let now = at(2026, 3, 10, 12, 0);
        assert!(schedule.is_due(None, now, now));
        assert!(!schedule.is_due(Some(now - TimeDelta::seconds(299)), now, now));
        assert!(schedule.is_due(Some(now - TimeDelta::seconds(300)), now, now));
    }
}
