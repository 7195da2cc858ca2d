//! Source of the current calendar day.
//!
//! Booking rules compare visit dates at day granularity, so the engine only
//! ever asks for "today" and never for a timestamp.

use chrono::{NaiveDate, Utc};

/// Provides the current calendar day.
pub trait Clock: Send + Sync {
    /// The current day.
    fn today(&self) -> NaiveDate;
}

/// Wall clock using the UTC calendar day.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Utc::now().date_naive()
    }
}

/// Clock frozen on a single day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}
