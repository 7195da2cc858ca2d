//! Monthly reservation rollups.
//!
//! Stats are advisory reads and take no part in admission decisions.

use std::collections::BTreeMap;

use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::reservation::Reservation;
use crate::types::Money;

/// Aggregates for one calendar month of visit dates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyStats {
    /// First day of the month.
    pub month: NaiveDate,
    /// Number of reservations.
    pub reservation_count: u64,
    /// Sum of reservation totals.
    pub total_revenue: Money,
    /// Sum of reserved quantities.
    pub total_tickets: u64,
    /// Mean reservation total, rounded half away from zero to the cent.
    pub average_revenue: Money,
}

/// First day included in the twelve month window ending on `today`.
pub fn window_start(today: NaiveDate) -> NaiveDate {
    today
        .checked_sub_months(Months::new(12))
        .unwrap_or(NaiveDate::MIN)
}

/// First day of the month containing `date`.
pub fn month_of(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Groups reservations visiting on or after `since` by calendar month,
/// most recent month first.
pub fn rollup<'a, I>(reservations: I, since: NaiveDate) -> Vec<MonthlyStats>
where
    I: IntoIterator<Item = &'a Reservation>,
{
    let mut months: BTreeMap<NaiveDate, (u64, Money, u64)> = BTreeMap::new();

    for reservation in reservations
        .into_iter()
        .filter(|reservation| reservation.date >= since)
    {
        let entry = months
            .entry(month_of(reservation.date))
            .or_insert((0, Money::ZERO, 0));
        entry.0 += 1;
        entry.1 = entry.1.plus(reservation.total_price);
        entry.2 += u64::from(reservation.quantity.count());
    }

    months
        .into_iter()
        .rev()
        .map(|(month, (count, revenue, tickets))| MonthlyStats {
            month,
            reservation_count: count,
            total_revenue: revenue,
            total_tickets: tickets,
            average_revenue: Money::average(revenue, count),
        })
        .collect()
}
