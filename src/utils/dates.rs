//! Report date-range computation.

use chrono::{Days, Local, NaiveDate};

/// How far back the report window starts.
pub const LOOKBACK_DAYS: u64 = 20;

/// Start date for the report window, formatted the way the portal's date
/// inputs expect: zero-padded `MM/DD/YYYY`.
pub fn report_start_date(today: NaiveDate) -> String {
    let start = today
        .checked_sub_days(Days::new(LOOKBACK_DAYS))
        .unwrap_or(today);
    start.format("%m/%d/%Y").to_string()
}

/// `report_start_date` anchored at the local calendar date of the run.
pub fn report_start_date_today() -> String {
    report_start_date(Local::now().date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_plain_lookback() {
        assert_eq!(report_start_date(date(2024, 3, 15)), "02/24/2024");
    }

    #[test]
    fn test_year_rollover() {
        assert_eq!(report_start_date(date(2024, 1, 5)), "12/16/2023");
    }

    #[test]
    fn test_leap_february_rollover() {
        assert_eq!(report_start_date(date(2024, 3, 1)), "02/10/2024");
    }

    #[test]
    fn test_zero_padding() {
        assert_eq!(report_start_date(date(2024, 7, 25)), "07/05/2024");
    }
}
