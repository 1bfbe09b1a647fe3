//! Process-wide engine state cells.
//!
//! Process-wide singleton flags — active stock, pause flag,
//! emergency flag, go-live pending window, and the in-progress guards for
//! history download and backtest — live here as atomics behind narrow
//! APIs. Writers: the command dispatcher and the engine loop. Readers:
//! everyone.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Duration, Utc};

/// How long a `/golive` request stays confirmable.
pub const GOLIVE_PENDING_MINUTES: i64 = 10;

#[derive(Debug)]
pub struct EngineState {
    active_stock: RwLock<String>,
    paused: AtomicBool,
    emergency: AtomicBool,
    /// `true` when orders go to the live account; `false` in simulation.
    live: AtomicBool,
    golive_pending_until: Mutex<Option<DateTime<Utc>>>,
    history_in_progress: AtomicBool,
    backtest_in_progress: AtomicBool,
}

impl EngineState {
    pub fn new(active_stock: impl Into<String>) -> Self {
        Self {
            active_stock: RwLock::new(active_stock.into()),
            paused: AtomicBool::new(false),
            emergency: AtomicBool::new(false),
            live: AtomicBool::new(false),
            golive_pending_until: Mutex::new(None),
            history_in_progress: AtomicBool::new(false),
            backtest_in_progress: AtomicBool::new(false),
        }
    }

    // -- active stock -------------------------------------------------------

    pub fn active_stock(&self) -> String {
        match self.active_stock.read() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Returns the previous symbol.
    pub fn set_active_stock(&self, symbol: impl Into<String>) -> String {
        let mut guard = match self.active_stock.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::replace(&mut *guard, symbol.into())
    }

    // -- pause / emergency --------------------------------------------------

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    pub fn is_emergency(&self) -> bool {
        self.emergency.load(Ordering::SeqCst)
    }

    pub fn set_emergency(&self) {
        self.emergency.store(true, Ordering::SeqCst);
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn clear_emergency(&self) {
        self.emergency.store(false, Ordering::SeqCst);
    }

    // -- live / simulation --------------------------------------------------

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    pub fn set_live(&self, live: bool) {
        self.live.store(live, Ordering::SeqCst);
    }

    // -- go-live two-step ---------------------------------------------------

    /// Arm the pending window; `/confirmlive` must land within it.
    pub fn arm_golive(&self, now: DateTime<Utc>) {
        let until = now + Duration::minutes(GOLIVE_PENDING_MINUTES);
        *self.golive_lock() = Some(until);
    }

    /// Consume the pending window. `true` only when armed and unexpired.
    pub fn take_golive(&self, now: DateTime<Utc>) -> bool {
        let mut guard = self.golive_lock();
        match *guard {
            Some(until) if now <= until => {
                *guard = None;
                true
            }
            _ => {
                *guard = None;
                false
            }
        }
    }

    pub fn golive_pending(&self, now: DateTime<Utc>) -> bool {
        matches!(*self.golive_lock(), Some(until) if now <= until)
    }

    fn golive_lock(&self) -> std::sync::MutexGuard<'_, Option<DateTime<Utc>>> {
        match self.golive_pending_until.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    // -- exclusive-run guards ----------------------------------------------

    /// CAS claim for the history download; `false` when one is running.
    pub fn claim_history_run(&self) -> bool {
        self.history_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn release_history_run(&self) {
        self.history_in_progress.store(false, Ordering::SeqCst);
    }

    /// CAS claim for a backtest; `false` when one is running.
    pub fn claim_backtest_run(&self) -> bool {
        self.backtest_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn release_backtest_run(&self) {
        self.backtest_in_progress.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 3, 2, 0, 0).unwrap()
    }

    #[test]
    fn active_stock_swap_returns_previous() {
        let s = EngineState::new("2454.TW");
        let old = s.set_active_stock("2330.TW");
        assert_eq!(old, "2454.TW");
        assert_eq!(s.active_stock(), "2330.TW");
    }

    #[test]
    fn emergency_implies_pause() {
        let s = EngineState::new("2454.TW");
        s.set_emergency();
        assert!(s.is_emergency());
        assert!(s.is_paused());
    }

    #[test]
    fn golive_window_confirms_within_10_minutes() {
        let s = EngineState::new("2454.TW");
        s.arm_golive(now());
        assert!(s.golive_pending(now() + Duration::minutes(9)));
        assert!(s.take_golive(now() + Duration::minutes(9)));
        // Consumed: a second confirm fails.
        assert!(!s.take_golive(now() + Duration::minutes(9)));
    }

    #[test]
    fn golive_window_expires_after_10_minutes() {
        let s = EngineState::new("2454.TW");
        s.arm_golive(now());
        assert!(!s.take_golive(now() + Duration::minutes(11)));
    }

    #[test]
    fn run_guards_are_exclusive() {
        let s = EngineState::new("2454.TW");
        assert!(s.claim_history_run());
        assert!(!s.claim_history_run());
        s.release_history_run();
        assert!(s.claim_history_run());

        assert!(s.claim_backtest_run());
        assert!(!s.claim_backtest_run());
    }
}
