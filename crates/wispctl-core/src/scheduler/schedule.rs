// ── Job timing ──
//
// The original cron strings (`*/5 * * * *`, `0 2 1 * *`) reduce to three
// shapes here, expressed as plain arithmetic so next-fire computation is
// unit-testable without a clock.

use std::time::Duration;

use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, TimeZone, Utc};

/// When a job fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Fixed interval from "now".
    Every(Duration),
    /// Once a day at a fixed UTC wall-clock time.
    DailyAt { hour: u32, minute: u32 },
    /// Once a month on a fixed day at a fixed UTC wall-clock time.
    MonthlyAt { day: u32, hour: u32, minute: u32 },
}

impl Schedule {
    /// The first fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            Self::Every(interval) => {
                after
                    + ChronoDuration::from_std(interval)
                        .unwrap_or_else(|_| ChronoDuration::seconds(60))
            }
            Self::DailyAt { hour, minute } => {
                let candidate = at_time(after.date_naive(), hour, minute);
                if candidate > after {
                    candidate
                } else {
                    at_time(after.date_naive() + ChronoDuration::days(1), hour, minute)
                }
            }
            Self::MonthlyAt { day, hour, minute } => {
                let this_month = month_day(after.year(), after.month(), day);
                let candidate = at_time(this_month, hour, minute);
                if candidate > after {
                    candidate
                } else {
                    let (year, month) = if after.month() == 12 {
                        (after.year() + 1, 1)
                    } else {
                        (after.year(), after.month() + 1)
                    };
                    at_time(month_day(year, month, day), hour, minute)
                }
            }
        }
    }
}

/// Resolve a day-of-month, clamping past the month's end (day 31 in a
/// 30-day month fires on the 30th).
fn month_day(year: i32, month: u32, day: u32) -> NaiveDate {
    let mut d = day.max(1);
    loop {
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, d) {
            return date;
        }
        d -= 1;
    }
}

fn at_time(date: NaiveDate, hour: u32, minute: u32) -> DateTime<Utc> {
    let naive = date
        .and_hms_opt(hour.min(23), minute.min(59), 0)
        .unwrap_or_else(|| date.and_hms_opt(0, 0, 0).expect("midnight exists"));
    Utc.from_utc_datetime(&naive)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn interval_adds_the_interval() {
        let schedule = Schedule::Every(Duration::from_secs(300));
        assert_eq!(
            schedule.next_after(at("2026-03-01T10:00:00Z")),
            at("2026-03-01T10:05:00Z")
        );
    }

    #[test]
    fn daily_fires_later_today_or_tomorrow() {
        let schedule = Schedule::DailyAt { hour: 8, minute: 0 };
        assert_eq!(
            schedule.next_after(at("2026-03-01T06:30:00Z")),
            at("2026-03-01T08:00:00Z")
        );
        assert_eq!(
            schedule.next_after(at("2026-03-01T08:00:00Z")),
            at("2026-03-02T08:00:00Z")
        );
    }

    #[test]
    fn daily_crosses_month_and_year_boundaries() {
        let schedule = Schedule::DailyAt { hour: 8, minute: 0 };
        assert_eq!(
            schedule.next_after(at("2026-12-31T09:00:00Z")),
            at("2027-01-01T08:00:00Z")
        );
    }

    #[test]
    fn monthly_fires_this_month_or_next() {
        let schedule = Schedule::MonthlyAt {
            day: 1,
            hour: 2,
            minute: 0,
        };
        assert_eq!(
            schedule.next_after(at("2026-03-01T01:00:00Z")),
            at("2026-03-01T02:00:00Z")
        );
        assert_eq!(
            schedule.next_after(at("2026-03-15T12:00:00Z")),
            at("2026-04-01T02:00:00Z")
        );
    }

    #[test]
    fn monthly_rolls_over_the_year() {
        let schedule = Schedule::MonthlyAt {
            day: 1,
            hour: 2,
            minute: 0,
        };
        assert_eq!(
            schedule.next_after(at("2026-12-02T00:00:00Z")),
            at("2027-01-01T02:00:00Z")
        );
    }

    #[test]
    fn monthly_clamps_short_months() {
        let schedule = Schedule::MonthlyAt {
            day: 31,
            hour: 0,
            minute: 0,
        };
        assert_eq!(
            schedule.next_after(at("2026-02-01T00:00:00Z")),
            at("2026-02-28T00:00:00Z")
        );
    }
}
