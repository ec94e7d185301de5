//! Trading-day calendar for the Taiwan market.
//!
//! The default implementation knows weekends plus an embedded holiday set.
//! Anything smarter (an exchange calendar service) can be substituted
//! through the trait.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use std::collections::HashSet;

/// Decides whether the market trades on a given date.
pub trait TradingCalendar: Send + Sync {
    fn is_trading_day(&self, date: NaiveDate) -> bool;

    /// Walk backwards to the nearest trading day at or before `date`.
    fn latest_trading_day(&self, date: NaiveDate) -> NaiveDate {
        let mut current = date;
        // Bounded walk; no market closes for weeks on end
        for _ in 0..30 {
            if self.is_trading_day(current) {
                return current;
            }
            current -= Duration::days(1);
        }
        current
    }
}

/// Weekday calendar with an embedded TWSE holiday set (2024 through 2026).
pub struct WeekdayCalendar {
    holidays: HashSet<NaiveDate>,
}

impl WeekdayCalendar {
    pub fn new() -> Self {
        let holidays = HOLIDAYS
            .iter()
            .filter_map(|(y, m, d)| NaiveDate::from_ymd_opt(*y, *m, *d))
            .collect();
        Self { holidays }
    }
}

impl Default for WeekdayCalendar {
    fn default() -> Self {
        Self::new()
    }
}

impl TradingCalendar for WeekdayCalendar {
    fn is_trading_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.holidays.contains(&date)
    }
}

/// TWSE market closures, per the exchange's published calendar.
const HOLIDAYS: &[(i32, u32, u32)] = &[
    // 2024
    (2024, 1, 1),
    (2024, 2, 8),
    (2024, 2, 9),
    (2024, 2, 12),
    (2024, 2, 13),
    (2024, 2, 14),
    (2024, 2, 28),
    (2024, 4, 4),
    (2024, 4, 5),
    (2024, 5, 1),
    (2024, 6, 10),
    (2024, 9, 17),
    (2024, 10, 10),
    // 2025
    (2025, 1, 1),
    (2025, 1, 23),
    (2025, 1, 24),
    (2025, 1, 27),
    (2025, 1, 28),
    (2025, 1, 29),
    (2025, 1, 30),
    (2025, 1, 31),
    (2025, 2, 28),
    (2025, 4, 3),
    (2025, 4, 4),
    (2025, 5, 1),
    (2025, 5, 30),
    (2025, 9, 29),
    (2025, 10, 6),
    (2025, 10, 10),
    (2025, 10, 24),
    (2025, 12, 25),
    // 2026
    (2026, 1, 1),
    (2026, 1, 2),
    (2026, 2, 16),
    (2026, 2, 17),
    (2026, 2, 18),
    (2026, 2, 19),
    (2026, 2, 20),
    (2026, 2, 27),
    (2026, 4, 3),
    (2026, 4, 6),
    (2026, 5, 1),
    (2026, 6, 19),
    (2026, 9, 25),
    (2026, 10, 9),
];

#[cfg(test)]
mod tests {
    use super::*;

    fn cal() -> WeekdayCalendar {
        WeekdayCalendar::new()
    }

    #[test]
    fn test_weekday_trades() {
        // A plain Thursday
        let d = NaiveDate::from_ymd_opt(2025, 6, 5).unwrap();
        assert!(cal().is_trading_day(d));
    }

    #[test]
    fn test_weekend_closed() {
        let sat = NaiveDate::from_ymd_opt(2025, 6, 7).unwrap();
        let sun = NaiveDate::from_ymd_opt(2025, 6, 8).unwrap();
        assert!(!cal().is_trading_day(sat));
        assert!(!cal().is_trading_day(sun));
    }

    #[test]
    fn test_holiday_closed() {
        // Lunar New Year 2025
        let d = NaiveDate::from_ymd_opt(2025, 1, 29).unwrap();
        assert!(!cal().is_trading_day(d));
    }

    #[test]
    fn test_latest_trading_day_rolls_back() {
        // Sunday rolls back to Friday
        let sun = NaiveDate::from_ymd_opt(2025, 6, 8).unwrap();
        let fri = NaiveDate::from_ymd_opt(2025, 6, 6).unwrap();
        assert_eq!(cal().latest_trading_day(sun), fri);
    }

    #[test]
    fn test_latest_trading_day_identity() {
        let d = NaiveDate::from_ymd_opt(2025, 6, 5).unwrap();
        assert_eq!(cal().latest_trading_day(d), d);
    }

    #[test]
    fn test_latest_trading_day_over_holiday_block() {
        // During the 2025 Lunar New Year closure, Feb 1 (Sat) rolls all
        // the way back to Jan 22 (Wed)
        let d = NaiveDate::from_ymd_opt(2025, 2, 1).unwrap();
        let expected = NaiveDate::from_ymd_opt(2025, 1, 22).unwrap();
        assert_eq!(cal().latest_trading_day(d), expected);
    }
}
