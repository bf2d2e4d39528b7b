//! Sending-calendar holidays.
//!
//! Mailbox providers behave differently around these dates (volume spikes,
//! stricter filtering), so precedent recorded on one is compared with
//! precedent from others.

use chrono::{Datelike, NaiveDate, TimeDelta, Weekday};

/// Returns the holiday falling on `date`, if any.
#[must_use]
pub fn holiday_on(date: NaiveDate) -> Option<&'static str> {
    let fixed = match (date.month(), date.day()) {
        (1, 1) => Some("New Year's Day"),
        (2, 14) => Some("Valentine's Day"),
        (7, 4) => Some("Independence Day"),
        (10, 31) => Some("Halloween"),
        (12, 24) => Some("Christmas Eve"),
        (12, 25) => Some("Christmas Day"),
        (12, 31) => Some("New Year's Eve"),
        _ => None,
    };
    if fixed.is_some() {
        return fixed;
    }

    let thanksgiving = NaiveDate::from_weekday_of_month_opt(date.year(), 11, Weekday::Thu, 4)?;
    if date == thanksgiving {
        Some("Thanksgiving")
    } else if date == thanksgiving + TimeDelta::days(1) {
        Some("Black Friday")
    } else if date == thanksgiving + TimeDelta::days(4) {
        Some("Cyber Monday")
    } else {
        None
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_fixed_dates() {
        assert_eq!(holiday_on(date(2024, 12, 25)), Some("Christmas Day"));
        assert_eq!(holiday_on(date(2024, 7, 4)), Some("Independence Day"));
        assert_eq!(holiday_on(date(2024, 3, 12)), None);
    }

    #[test]
    fn test_thanksgiving_weekend() {
        assert_eq!(holiday_on(date(2024, 11, 28)), Some("Thanksgiving"));
        assert_eq!(holiday_on(date(2024, 11, 29)), Some("Black Friday"));
        assert_eq!(holiday_on(date(2024, 12, 2)), Some("Cyber Monday"));
        assert_eq!(holiday_on(date(2025, 11, 27)), Some("Thanksgiving"));
    }
}
