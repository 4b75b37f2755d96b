use chrono::{NaiveDateTime, Timelike};

/// Source of wall-clock time for ledger decisions.
pub trait Clock {
    fn now(&self) -> NaiveDateTime;
}

/// Local wall-clock time, truncated to whole seconds (the ledger's storage precision).
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        let now = chrono::Local::now().naive_local();
        now.with_nanosecond(0).unwrap_or(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_has_no_subsecond_part() {
        assert_eq!(SystemClock.now().nanosecond(), 0);
    }
}
