use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;

// Where "now" falls relative to the scheduled test window. Derived once at
// load; per-second ticking is the runner's job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleWindow {
    BeforeStart { seconds_until_start: u64 },
    Open { seconds_until_end: u64 },
    Closed,
}

pub fn compute_initial_state(
    scheduled_start: DateTime<Utc>,
    duration_minutes: u32,
    now: DateTime<Utc>,
) -> ScheduleWindow {
    let end = scheduled_start + Duration::minutes(i64::from(duration_minutes));
    if now < scheduled_start {
        ScheduleWindow::BeforeStart {
            seconds_until_start: seconds_between(now, scheduled_start),
        }
    } else if now < end {
        ScheduleWindow::Open {
            seconds_until_end: seconds_between(now, end),
        }
    } else {
        ScheduleWindow::Closed
    }
}

// Whole seconds from `now` until `then`, floored and clamped at zero.
pub fn seconds_between(now: DateTime<Utc>, then: DateTime<Utc>) -> u64 {
    (then - now).num_seconds().max(0) as u64
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// Settable clock for tests and replayed sessions.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *crate::lock(&self.now) = now;
    }

    pub fn advance_seconds(&self, seconds: i64) {
        let mut now = crate::lock(&self.now);
        *now += Duration::seconds(seconds);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *crate::lock(&self.now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, min: u32, sec: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, hour, min, sec).unwrap()
    }

    #[test]
    fn before_start_counts_down_to_start() {
        let window = compute_initial_state(at(10, 0, 0), 10, at(9, 58, 0));
        assert_eq!(
            window,
            ScheduleWindow::BeforeStart {
                seconds_until_start: 120
            }
        );
    }

    #[test]
    fn open_window_counts_down_to_end() {
        let window = compute_initial_state(at(10, 0, 0), 10, at(10, 4, 0));
        assert_eq!(
            window,
            ScheduleWindow::Open {
                seconds_until_end: 360
            }
        );
    }

    #[test]
    fn window_opens_exactly_at_start() {
        let window = compute_initial_state(at(10, 0, 0), 10, at(10, 0, 0));
        assert_eq!(
            window,
            ScheduleWindow::Open {
                seconds_until_end: 600
            }
        );
    }

    #[test]
    fn window_closes_exactly_at_end() {
        let window = compute_initial_state(at(10, 0, 0), 10, at(10, 10, 0));
        assert_eq!(window, ScheduleWindow::Closed);
    }

    #[test]
    fn computation_is_deterministic() {
        let first = compute_initial_state(at(10, 0, 0), 30, at(9, 12, 41));
        let second = compute_initial_state(at(10, 0, 0), 30, at(9, 12, 41));
        assert_eq!(first, second);
    }

    #[test]
    fn seconds_between_clamps_at_zero() {
        assert_eq!(seconds_between(at(10, 0, 1), at(10, 0, 0)), 0);
        assert_eq!(seconds_between(at(10, 0, 0), at(10, 0, 1)), 1);
    }
}
