//! Due-ness of a schedule entry at a given instant.

use audience_core::Trigger;
use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Where an entry is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Due,
    Running,
}

/// Whether an entry should run at `now`.
///
/// - Daily: the wall-clock hour and minute equal `run_time` and the entry has
///   not run yet today. A tick that misses the minute skips that day.
/// - Interval: never run, or at least `interval_hours` since `last_run`.
pub fn is_due<Tz: TimeZone>(
    trigger: &Trigger,
    last_run: Option<DateTime<Utc>>,
    now: &DateTime<Tz>,
) -> bool {
    match trigger {
        Trigger::Daily { run_time } => {
            let at_minute = now.hour() == run_time.hour() && now.minute() == run_time.minute();
            let ran_today = last_run.is_some_and(|last| {
                last.with_timezone(&now.timezone()).date_naive() >= now.date_naive()
            });
            at_minute && !ran_today
        }
        Trigger::Interval { interval_hours } => match last_run {
            None => true,
            Some(last) => {
                now.with_timezone(&Utc) - last >= Duration::hours(i64::from(*interval_hours))
            }
        },
    }
}

/// Earliest instant at or after `now` when the entry becomes due.
/// `None` when the local run time does not exist (a DST gap).
pub fn next_due<Tz: TimeZone>(
    trigger: &Trigger,
    last_run: Option<DateTime<Utc>>,
    now: &DateTime<Tz>,
) -> Option<DateTime<Tz>> {
    if is_due(trigger, last_run, now) {
        return Some(now.clone());
    }
    match trigger {
        Trigger::Daily { run_time } => {
            let tz = now.timezone();
            let today = now.date_naive();
            let ran_today = last_run
                .is_some_and(|last| last.with_timezone(&tz).date_naive() >= today);
            let today_at = tz
                .from_local_datetime(&today.and_time(run_time.as_naive()))
                .earliest();
            match today_at {
                Some(at) if at > *now && !ran_today => Some(at),
                _ => {
                    let tomorrow = today.succ_opt()?;
                    tz.from_local_datetime(&tomorrow.and_time(run_time.as_naive()))
                        .earliest()
                }
            }
        }
        Trigger::Interval { interval_hours } => {
            let last = last_run?;
            let at = last + Duration::hours(i64::from(*interval_hours));
            Some(at.with_timezone(&now.timezone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audience_core::TimeOfDay;
    use chrono::FixedOffset;

    fn at(hour: u32, minute: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2026, 6, 15, hour, minute, 0)
            .unwrap()
    }

    fn daily_nine() -> Trigger {
        Trigger::Daily {
            run_time: TimeOfDay::new(9, 0).unwrap(),
        }
    }

    #[test]
    fn test_daily_fires_only_in_its_minute() {
        let trigger = daily_nine();
        assert!(is_due(&trigger, None, &at(9, 0)));
        assert!(!is_due(&trigger, None, &at(9, 1)));
        assert!(!is_due(&trigger, None, &at(8, 59)));
    }

    #[test]
    fn test_daily_runs_once_per_day() {
        let trigger = daily_nine();
        let ran_this_morning = at(9, 0).with_timezone(&Utc);
        assert!(!is_due(&trigger, Some(ran_this_morning), &at(9, 0)));

        let ran_yesterday = (at(9, 0) - Duration::days(1)).with_timezone(&Utc);
        assert!(is_due(&trigger, Some(ran_yesterday), &at(9, 0)));
    }

    #[test]
    fn test_daily_compares_calendar_dates_in_local_time() {
        // 23:30 local on the 14th is 22:30 UTC on the 14th; still "yesterday".
        let trigger = Trigger::Daily {
            run_time: TimeOfDay::new(0, 15).unwrap(),
        };
        let late_last_night = (at(0, 15) - Duration::minutes(45)).with_timezone(&Utc);
        assert!(is_due(&trigger, Some(late_last_night), &at(0, 15)));
    }

    #[test]
    fn test_interval_threshold() {
        let trigger = Trigger::Interval { interval_hours: 6 };
        let now = at(12, 0);
        assert!(is_due(&trigger, None, &now));

        let five_hours_ago = (now - Duration::hours(5)).with_timezone(&Utc);
        assert!(!is_due(&trigger, Some(five_hours_ago), &now));

        let six_hours_one_minute_ago =
            (now - Duration::hours(6) - Duration::minutes(1)).with_timezone(&Utc);
        assert!(is_due(&trigger, Some(six_hours_one_minute_ago), &now));

        let exactly_six = (now - Duration::hours(6)).with_timezone(&Utc);
        assert!(is_due(&trigger, Some(exactly_six), &now));
    }

    #[test]
    fn test_next_due_daily() {
        let trigger = daily_nine();
        assert_eq!(next_due(&trigger, None, &at(8, 0)), Some(at(9, 0)));
        assert_eq!(next_due(&trigger, None, &at(9, 0)), Some(at(9, 0)));
        assert_eq!(
            next_due(&trigger, None, &at(9, 1)),
            Some(at(9, 0) + Duration::days(1))
        );

        let ran = Some(at(9, 0).with_timezone(&Utc));
        assert_eq!(
            next_due(&trigger, ran, &at(9, 0)),
            Some(at(9, 0) + Duration::days(1))
        );
    }

    #[test]
    fn test_next_due_interval() {
        let trigger = Trigger::Interval { interval_hours: 6 };
        let now = at(12, 0);
        assert_eq!(next_due(&trigger, None, &now), Some(now));

        let last = (now - Duration::hours(2)).with_timezone(&Utc);
        assert_eq!(next_due(&trigger, Some(last), &now), Some(now + Duration::hours(4)));
    }
}
