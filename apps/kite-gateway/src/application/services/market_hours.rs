//! NSE trading session clock.
//!
//! Exchange holidays are not tracked; a holiday reports as a regular
//! weekday session.

use chrono::{DateTime, Datelike, FixedOffset, NaiveTime, Utc, Weekday};
use serde::Serialize;

/// India Standard Time: fixed UTC+05:30, no daylight saving.
pub const IST: FixedOffset = match FixedOffset::east_opt(19_800) {
    Some(offset) => offset,
    None => panic!("IST offset out of range"),
};

/// Trading phase of the cash market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MarketPhase {
    /// Pre-open call auction (09:00 to 09:15 IST).
    PreOpen,
    /// Continuous trading (09:15 to 15:30 IST).
    Open,
    /// Outside trading hours or on a weekend.
    Closed,
}

impl MarketPhase {
    /// Phase at `now`.
    #[must_use]
    pub fn at(now: DateTime<Utc>) -> Self {
        let ist = now.with_timezone(&IST);
        if matches!(ist.weekday(), Weekday::Sat | Weekday::Sun) {
            return Self::Closed;
        }

        let time = ist.time();
        if time >= hm(9, 0) && time < hm(9, 15) {
            Self::PreOpen
        } else if time >= hm(9, 15) && time < hm(15, 30) {
            Self::Open
        } else {
            Self::Closed
        }
    }

    /// Whether continuous trading is running.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use test_case::test_case;

    use super::*;

    // 2024-06-03 is a Monday.
    fn utc(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, day, hour, minute, 0).unwrap()
    }

    #[test_case(utc(3, 3, 29), MarketPhase::Closed ; "08:59 ist closed")]
    #[test_case(utc(3, 3, 30), MarketPhase::PreOpen ; "09:00 ist pre-open")]
    #[test_case(utc(3, 3, 45), MarketPhase::Open ; "09:15 ist open")]
    #[test_case(utc(3, 9, 59), MarketPhase::Open ; "15:29 ist still open")]
    #[test_case(utc(3, 10, 0), MarketPhase::Closed ; "15:30 ist closed")]
    #[test_case(utc(8, 5, 0), MarketPhase::Closed ; "saturday closed")]
    #[test_case(utc(9, 5, 0), MarketPhase::Closed ; "sunday closed")]
    fn phase_by_clock(now: DateTime<Utc>, expected: MarketPhase) {
        assert_eq!(MarketPhase::at(now), expected);
    }

    #[test]
    fn only_open_phase_is_open() {
        assert!(MarketPhase::Open.is_open());
        assert!(!MarketPhase::PreOpen.is_open());
        assert!(!MarketPhase::Closed.is_open());
    }

    #[test]
    fn ist_is_five_thirty_ahead() {
        assert_eq!(IST.local_minus_utc(), 5 * 3600 + 30 * 60);
        let open = utc(3, 3, 45).with_timezone(&IST);
        assert_eq!(open.time(), hm(9, 15));
    }
}
