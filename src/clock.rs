//! Wall-clock abstraction so timestamps are injectable and tests deterministic.

use chrono::{DateTime, Local, TimeZone};

/// Source of wall-clock time for log lines, reports, and memory snapshots.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

/// Production clock reading the system's local time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Clock pinned to one instant. Test helper; compiled unconditionally so
/// scenario tests in other modules can construct it.
#[derive(Clone, Copy, Debug)]
pub struct FixedClock(pub DateTime<Local>);

impl FixedClock {
    pub fn new(dt: DateTime<Local>) -> Self {
        Self(dt)
    }
}

impl Default for FixedClock {
    fn default() -> Self {
        Self(Local.with_ymd_and_hms(2024, 1, 15, 9, 30, 0).unwrap())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Local> {
        self.0
    }
}

/// Timestamp for process log lines and report process lists: `MM/DD/YYYY HH:MM:SS AM/PM`.
pub fn log_timestamp(clock: &dyn Clock) -> String {
    format_timestamp(&clock.now())
}

/// Format an already-captured instant in the log timestamp style.
pub fn format_timestamp(dt: &DateTime<Local>) -> String {
    dt.format("%m/%d/%Y %I:%M:%S %p").to_string()
}

/// Timestamp for memory snapshot headers: `MM/DD/YYYY HH:MM:SS` (24-hour).
pub fn snapshot_timestamp(clock: &dyn Clock) -> String {
    clock.now().format("%m/%d/%Y %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_formats_log_timestamp() {
        let clock = FixedClock::default();
        assert_eq!(log_timestamp(&clock), "01/15/2024 09:30:00 AM");
    }

    #[test]
    fn fixed_clock_formats_snapshot_timestamp() {
        let clock = FixedClock(Local.with_ymd_and_hms(2024, 1, 15, 21, 5, 9).unwrap());
        assert_eq!(snapshot_timestamp(&clock), "01/15/2024 21:05:09");
    }

    #[test]
    fn system_clock_advances() {
        let clock = SystemClock;
        assert!(clock.now() <= clock.now());
    }
}
