//! Calendar clock used for throttle expiry.
//!
//! Expiry is tracked at date granularity in UTC, so the port only exposes
//! `today()`. [`MockClock`] is available in test builds.

use chrono::{NaiveDate, Utc};

/// Source of the current UTC date
pub trait Clock {
    fn today(&self) -> NaiveDate;
}

/// System clock reading the UTC wall-clock date
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Utc::now().date_naive()
    }
}

#[cfg(test)]
pub use mock::MockClock;
