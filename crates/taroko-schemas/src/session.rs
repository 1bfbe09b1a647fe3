//! Taipei trading-session calendar.
//!
//! Deterministic, pure logic. No IO, no wall-clock reads — callers pass
//! timestamps in.
//!
//! # Rules
//!
//! - Regular session: 09:00–13:30 Taipei, Monday–Friday.
//! - Opening/closing auction windows (09:00–09:30 and 13:00–13:30) carry a
//!   slippage surcharge and are the deferral windows for delayed execution.
//! - Exchange holidays are a hardcoded table for 2024–2026; a bar or tick on
//!   a holiday is non-trading time.
//! - Futures contracts expire on the third Wednesday of each month, shifted
//!   to the prior trading day when that Wednesday is a holiday.

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Asia::Taipei;
use chrono_tz::Tz;

/// The exchange timezone. All session math happens here.
pub const TAIPEI: Tz = Taipei;

/// Taiwan exchange holidays (settlement holidays included), 2024–2026.
/// Weekend days are excluded by the weekday rule and are not listed.
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
    (2025, 10, 6),
    (2025, 10, 10),
    // 2026
    (2026, 1, 1),
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

/// `true` when `date` (Taipei-local) is a weekday and not an exchange holiday.
pub fn is_trading_day(date: NaiveDate) -> bool {
    match date.weekday() {
        Weekday::Sat | Weekday::Sun => return false,
        _ => {}
    }
    !HOLIDAYS
        .iter()
        .any(|&(y, m, d)| date == NaiveDate::from_ymd_opt(y, m, d).unwrap())
}

/// `true` when `now` falls inside the regular session (09:00–13:30 Taipei)
/// on a trading day.
pub fn in_trading_window(now: DateTime<Utc>) -> bool {
    let local = now.with_timezone(&TAIPEI);
    if !is_trading_day(local.date_naive()) {
        return false;
    }
    let t = local.time();
    t >= NaiveTime::from_hms_opt(9, 0, 0).unwrap() && t < NaiveTime::from_hms_opt(13, 30, 0).unwrap()
}

/// `true` inside the opening (09:00–09:30) or closing (13:00–13:30) auction
/// windows — the high-slippage periods.
pub fn in_auction_window(now: DateTime<Utc>) -> bool {
    let local = now.with_timezone(&TAIPEI);
    if !is_trading_day(local.date_naive()) {
        return false;
    }
    let t = local.time();
    let open_lo = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
    let open_hi = NaiveTime::from_hms_opt(9, 30, 0).unwrap();
    let close_lo = NaiveTime::from_hms_opt(13, 0, 0).unwrap();
    let close_hi = NaiveTime::from_hms_opt(13, 30, 0).unwrap();
    (t >= open_lo && t < open_hi) || (t >= close_lo && t < close_hi)
}

/// `true` inside the opening auction window only (09:00–09:30). Deferred
/// (non-urgent) orders wait this window out; the closing window has nothing
/// after it to defer to.
pub fn in_opening_auction(now: DateTime<Utc>) -> bool {
    let local = now.with_timezone(&TAIPEI);
    if !is_trading_day(local.date_naive()) {
        return false;
    }
    let t = local.time();
    t >= NaiveTime::from_hms_opt(9, 0, 0).unwrap() && t < NaiveTime::from_hms_opt(9, 30, 0).unwrap()
}

/// The end of today's opening auction window (09:30 Taipei), in UTC.
pub fn opening_auction_end(now: DateTime<Utc>) -> DateTime<Utc> {
    let local = now.with_timezone(&TAIPEI).date_naive();
    taipei_to_utc(local, NaiveTime::from_hms_opt(9, 30, 0).unwrap())
}

/// Taipei-local trade date identifier (YYYYMMDD).
pub fn day_id(now: DateTime<Utc>) -> u32 {
    let local = now.with_timezone(&TAIPEI).date_naive();
    (local.year() as u32) * 10_000 + local.month() * 100 + local.day()
}

/// Taipei-local trade date.
pub fn trade_date(now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&TAIPEI).date_naive()
}

/// The Monday strictly after `date` — when a weekly-loss pause lifts.
pub fn next_monday(date: NaiveDate) -> NaiveDate {
    let mut d = date.succ_opt().unwrap();
    while d.weekday() != Weekday::Mon {
        d = d.succ_opt().unwrap();
    }
    d
}

/// Monday of the ISO week containing `date` — the start of the rolling
/// weekly-loss window.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    let mut d = date;
    while d.weekday() != Weekday::Mon {
        d = d.pred_opt().unwrap();
    }
    d
}

/// Convert a Taipei-local date + time into UTC.
pub fn taipei_to_utc(date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    TAIPEI
        .from_local_datetime(&date.and_time(time))
        .single()
        .expect("Taipei has no DST transitions")
        .with_timezone(&Utc)
}

/// Futures expiration dates for `year`: the third Wednesday of each month,
/// shifted back to the prior trading day while it lands on a holiday.
pub fn futures_expirations(year: i32) -> Vec<NaiveDate> {
    (1..=12)
        .map(|month| {
            let mut d = NaiveDate::from_ymd_opt(year, month, 1).unwrap();
            while d.weekday() != Weekday::Wed {
                d = d.succ_opt().unwrap();
            }
            d = d + chrono::Duration::days(14);
            while !is_trading_day(d) {
                d = d.pred_opt().unwrap();
            }
            d
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc_at(date: (i32, u32, u32), hms: (u32, u32, u32)) -> DateTime<Utc> {
        taipei_to_utc(
            NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            NaiveTime::from_hms_opt(hms.0, hms.1, hms.2).unwrap(),
        )
    }

    #[test]
    fn weekday_session_is_open() {
        // 2025-06-03 is a Tuesday with no holiday.
        assert!(in_trading_window(utc_at((2025, 6, 3), (10, 0, 0))));
    }

    #[test]
    fn session_closed_before_open_and_after_close() {
        assert!(!in_trading_window(utc_at((2025, 6, 3), (8, 59, 59))));
        assert!(!in_trading_window(utc_at((2025, 6, 3), (13, 30, 0))));
    }

    #[test]
    fn weekend_is_closed() {
        // 2025-06-07 is a Saturday.
        assert!(!in_trading_window(utc_at((2025, 6, 7), (10, 0, 0))));
    }

    #[test]
    fn lunar_new_year_is_closed() {
        assert!(!is_trading_day(NaiveDate::from_ymd_opt(2025, 1, 29).unwrap()));
        assert!(!in_trading_window(utc_at((2025, 1, 29), (10, 0, 0))));
    }

    #[test]
    fn auction_windows_detected() {
        assert!(in_auction_window(utc_at((2025, 6, 3), (9, 10, 0))));
        assert!(in_auction_window(utc_at((2025, 6, 3), (13, 10, 0))));
        assert!(!in_auction_window(utc_at((2025, 6, 3), (11, 0, 0))));
    }

    #[test]
    fn day_id_is_taipei_local() {
        // 23:30 UTC on June 2 is already June 3 in Taipei.
        let dt = Utc.with_ymd_and_hms(2025, 6, 2, 23, 30, 0).unwrap();
        assert_eq!(day_id(dt), 20_250_603);
    }

    #[test]
    fn next_monday_skips_to_following_week() {
        // Friday 2025-06-06 -> Monday 2025-06-09
        let fri = NaiveDate::from_ymd_opt(2025, 6, 6).unwrap();
        assert_eq!(next_monday(fri), NaiveDate::from_ymd_opt(2025, 6, 9).unwrap());
        // Monday maps to the NEXT Monday, not itself.
        let mon = NaiveDate::from_ymd_opt(2025, 6, 9).unwrap();
        assert_eq!(next_monday(mon), NaiveDate::from_ymd_opt(2025, 6, 16).unwrap());
    }

    #[test]
    fn week_start_is_monday() {
        let thu = NaiveDate::from_ymd_opt(2025, 6, 5).unwrap();
        assert_eq!(week_start(thu), NaiveDate::from_ymd_opt(2025, 6, 2).unwrap());
    }

    #[test]
    fn twelve_expirations_per_year() {
        let exps = futures_expirations(2025);
        assert_eq!(exps.len(), 12);
        for d in &exps {
            assert!(is_trading_day(*d), "expiration {d} must be a trading day");
        }
        // June 2025: third Wednesday is the 18th, a plain trading day.
        assert_eq!(exps[5], NaiveDate::from_ymd_opt(2025, 6, 18).unwrap());
    }

    #[test]
    fn expiration_shifts_back_past_holiday() {
        // January 2025: third Wednesday is Jan 15 (trading day, unshifted).
        let exps = futures_expirations(2025);
        assert_eq!(exps[0], NaiveDate::from_ymd_opt(2025, 1, 15).unwrap());
    }
}
