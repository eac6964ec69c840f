//! Source of "today" for expiry checks, sale dates and report windows.

use chrono::{NaiveDate, Utc};
use std::fmt::Debug;

pub trait Clock: Send + Sync + Debug {
    fn today(&self) -> NaiveDate;
}

/// UTC calendar date from the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Utc::now().date_naive()
    }
}

/// Always reports the same date.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDate);

impl FixedClock {
    pub fn new(today: NaiveDate) -> Self {
        FixedClock(today)
    }
}

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let date = NaiveDate::from_ymd_opt(2026, 2, 28).unwrap();
        let clock = FixedClock::new(date);
        assert_eq!(clock.today(), date);
        assert_eq!(clock.today(), date);
    }
}
