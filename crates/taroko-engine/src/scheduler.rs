//! Periodic task cadences.
//!
//! Pure next-fire computations (Taipei-local) plus the spawner that turns
//! them into long-lived tasks feeding [`EngineCommand`]s back into the
//! runner's queue:
//!
//! - every 5 minutes inside the trading window: drawdown check
//! - 14:30 Taipei, weekdays: end-of-day statistics
//! - Monday 08:30: weekly report
//! - January 1 00:00: next year's futures expirations
//! - 1st of month 01:00: economic-event cleanup

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use taroko_schemas::session;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::handle::EngineCommand;

/// Drawdown-monitor cadence inside the trading window.
pub const DRAWDOWN_CHECK_SECS: u64 = 5 * 60;

fn taipei_date_time(now: DateTime<Utc>) -> (NaiveDate, NaiveTime) {
    let local = now.with_timezone(&session::TAIPEI);
    (local.date_naive(), local.time())
}

/// Next weekday occurrence of `time` (Taipei), strictly after `now`.
pub fn next_weekday_at(now: DateTime<Utc>, time: NaiveTime) -> DateTime<Utc> {
    let (mut date, local_time) = taipei_date_time(now);
    if local_time >= time || matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
        date = date.succ_opt().unwrap();
    }
    while matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
        date = date.succ_opt().unwrap();
    }
    session::taipei_to_utc(date, time)
}

/// Next Monday at `time` (Taipei), strictly after `now`.
pub fn next_monday_at(now: DateTime<Utc>, time: NaiveTime) -> DateTime<Utc> {
    let (date, local_time) = taipei_date_time(now);
    let mut target = date;
    while target.weekday() != Weekday::Mon {
        target = target.succ_opt().unwrap();
    }
    if target == date && local_time >= time {
        target = session::next_monday(date);
    }
    session::taipei_to_utc(target, time)
}

/// Next 1st-of-month at `time` (Taipei), strictly after `now`.
pub fn next_month_first_at(now: DateTime<Utc>, time: NaiveTime) -> DateTime<Utc> {
    let (date, local_time) = taipei_date_time(now);
    let this_first = NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap();
    let target = if date == this_first && local_time < time {
        this_first
    } else {
        next_month(this_first)
    };
    session::taipei_to_utc(target, time)
}

/// Next January 1 00:00 (Taipei), strictly after `now`.
pub fn next_new_year(now: DateTime<Utc>) -> DateTime<Utc> {
    let (date, _) = taipei_date_time(now);
    let target = NaiveDate::from_ymd_opt(date.year() + 1, 1, 1).unwrap();
    session::taipei_to_utc(target, NaiveTime::MIN)
}

fn next_month(first: NaiveDate) -> NaiveDate {
    if first.month() == 12 {
        NaiveDate::from_ymd_opt(first.year() + 1, 1, 1).unwrap()
    } else {
        NaiveDate::from_ymd_opt(first.year(), first.month() + 1, 1).unwrap()
    }
}

/// Spawn the five periodic feeders. Each loop sleeps to its next fire time
/// and enqueues a command; the runner executes the task body on its own
/// thread of control.
pub fn spawn_scheduler(tx: mpsc::Sender<EngineCommand>) {
    // Drawdown monitor: fixed interval, gated on the trading window.
    {
        let tx = tx.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(DRAWDOWN_CHECK_SECS));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if session::in_trading_window(Utc::now())
                    && tx.send(EngineCommand::DrawdownCheck).await.is_err()
                {
                    return;
                }
            }
        });
    }

    spawn_calendar_task(tx.clone(), "eod-statistics", || EngineCommand::EodStatistics, |now| {
        next_weekday_at(now, NaiveTime::from_hms_opt(14, 30, 0).unwrap())
    });
    spawn_calendar_task(tx.clone(), "weekly-report", || EngineCommand::WeeklyReport, |now| {
        next_monday_at(now, NaiveTime::from_hms_opt(8, 30, 0).unwrap())
    });
    spawn_calendar_task(
        tx.clone(),
        "yearly-expirations",
        || EngineCommand::GenerateExpirations,
        next_new_year,
    );
    spawn_calendar_task(tx, "monthly-cleanup", || EngineCommand::MonthlyCleanup, |now| {
        next_month_first_at(now, NaiveTime::from_hms_opt(1, 0, 0).unwrap())
    });
}

fn spawn_calendar_task(
    tx: mpsc::Sender<EngineCommand>,
    label: &'static str,
    command: fn() -> EngineCommand,
    next_fire: fn(DateTime<Utc>) -> DateTime<Utc>,
) {
    tokio::spawn(async move {
        loop {
            let now = Utc::now();
            let fire_at = next_fire(now);
            let wait = (fire_at - now).max(Duration::zero());
            info!(task = label, at = %fire_at, "scheduled");
            tokio::time::sleep(wait.to_std().unwrap_or_default()).await;
            if tx.send(command()).await.is_err() {
                warn!(task = label, "engine queue closed; scheduler task exits");
                return;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn taipei(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        session::taipei_to_utc(
            NaiveDate::from_ymd_opt(y, m, d).unwrap(),
            NaiveTime::from_hms_opt(h, min, 0).unwrap(),
        )
    }

    #[test]
    fn eod_fires_same_day_before_1430() {
        // Tuesday 10:00 -> Tuesday 14:30.
        let now = taipei(2025, 6, 3, 10, 0);
        let fire = next_weekday_at(now, NaiveTime::from_hms_opt(14, 30, 0).unwrap());
        assert_eq!(fire, taipei(2025, 6, 3, 14, 30));
    }

    #[test]
    fn eod_rolls_to_next_weekday_after_1430() {
        // Friday 15:00 -> Monday 14:30.
        let now = taipei(2025, 6, 6, 15, 0);
        let fire = next_weekday_at(now, NaiveTime::from_hms_opt(14, 30, 0).unwrap());
        assert_eq!(fire, taipei(2025, 6, 9, 14, 30));
    }

    #[test]
    fn eod_skips_weekends() {
        // Saturday -> Monday 14:30.
        let now = taipei(2025, 6, 7, 9, 0);
        let fire = next_weekday_at(now, NaiveTime::from_hms_opt(14, 30, 0).unwrap());
        assert_eq!(fire, taipei(2025, 6, 9, 14, 30));
    }

    #[test]
    fn weekly_fires_monday_0830() {
        // Wednesday -> next Monday 08:30.
        let now = taipei(2025, 6, 4, 12, 0);
        let fire = next_monday_at(now, NaiveTime::from_hms_opt(8, 30, 0).unwrap());
        assert_eq!(fire, taipei(2025, 6, 9, 8, 30));

        // Monday 08:00 fires the same morning.
        let now = taipei(2025, 6, 9, 8, 0);
        let fire = next_monday_at(now, NaiveTime::from_hms_opt(8, 30, 0).unwrap());
        assert_eq!(fire, taipei(2025, 6, 9, 8, 30));

        // Monday 09:00 waits a week.
        let now = taipei(2025, 6, 9, 9, 0);
        let fire = next_monday_at(now, NaiveTime::from_hms_opt(8, 30, 0).unwrap());
        assert_eq!(fire, taipei(2025, 6, 16, 8, 30));
    }

    #[test]
    fn monthly_cleanup_first_at_0100() {
        let now = taipei(2025, 6, 15, 12, 0);
        let fire = next_month_first_at(now, NaiveTime::from_hms_opt(1, 0, 0).unwrap());
        assert_eq!(fire, taipei(2025, 7, 1, 1, 0));

        // December rolls into January.
        let now = taipei(2025, 12, 15, 12, 0);
        let fire = next_month_first_at(now, NaiveTime::from_hms_opt(1, 0, 0).unwrap());
        assert_eq!(fire, taipei(2026, 1, 1, 1, 0));
    }

    #[test]
    fn yearly_fires_jan_1_midnight() {
        let now = taipei(2025, 6, 3, 10, 0);
        assert_eq!(next_new_year(now), taipei(2026, 1, 1, 0, 0));
    }

    #[test]
    fn fire_times_are_strictly_future() {
        let now = Utc.with_ymd_and_hms(2025, 6, 3, 2, 0, 0).unwrap();
        assert!(next_weekday_at(now, NaiveTime::from_hms_opt(14, 30, 0).unwrap()) > now);
        assert!(next_monday_at(now, NaiveTime::from_hms_opt(8, 30, 0).unwrap()) > now);
        assert!(next_month_first_at(now, NaiveTime::from_hms_opt(1, 0, 0).unwrap()) > now);
        assert!(next_new_year(now) > now);
    }
}
