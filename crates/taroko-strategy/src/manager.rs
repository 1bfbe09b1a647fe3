//! Main/shadow strategy orchestration.
//!
//! The manager owns one **main** slot bound to the active stock plus any
//! number of **shadow** slots, each with its own symbol. Per tick every
//! enabled strategy is evaluated concurrently on the blocking pool with a
//! hard 200 ms deadline — a slow strategy degrades to a neutral signal and
//! cannot delay the others past the barrier.
//!
//! Shadow performance feeds [`ShadowPerfStore`]; the periodic drawdown check
//! consults it and hot-swaps the main strategy when its trailing max
//! drawdown breaches the configured threshold. Stock changes are never
//! automatic — a swap exchanges strategies, not symbols.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use taroko_config::RiskSettings;
use taroko_schemas::{session, Bar, TradeSignal};
use tracing::{info, warn};

use crate::types::{PortfolioView, Strategy, STRATEGY_DEADLINE_MS};

type SharedStrategy = Arc<Mutex<Box<dyn Strategy>>>;

fn lock_strategy(s: &SharedStrategy) -> std::sync::MutexGuard<'_, Box<dyn Strategy>> {
    // A poisoned lock means a strategy panicked mid-evaluate; its rolling
    // state is still usable and the engine must not die with it.
    match s.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ---------------------------------------------------------------------------
// Slots
// ---------------------------------------------------------------------------

/// One strategy bound to one symbol.
pub struct StrategySlot {
    pub symbol: String,
    pub enabled: bool,
    name: String,
    market_code: String,
    strategy: SharedStrategy,
}

impl StrategySlot {
    pub fn new(symbol: impl Into<String>, strategy: Box<dyn Strategy>) -> Self {
        let name = strategy.name().to_string();
        let market_code = strategy.market_code().to_string();
        Self {
            symbol: symbol.into(),
            enabled: true,
            name,
            market_code,
            strategy: Arc::new(Mutex::new(strategy)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn market_code(&self) -> &str {
        &self.market_code
    }
}

/// The per-tick barrier result: the main signal drives live orders; shadow
/// signals are persisted afterwards, never before.
#[derive(Debug, Clone)]
pub struct TickSignals {
    pub main: TradeSignal,
    /// `(symbol, signal)` per enabled shadow slot that had a bar this tick.
    pub shadows: Vec<(String, TradeSignal)>,
}

/// Emitted when the drawdown monitor replaces the main strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct SwapEvent {
    pub old_main: String,
    pub new_main: String,
    pub main_drawdown_pct: f64,
    pub candidate_sharpe: f64,
    pub at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Shadow performance store
// ---------------------------------------------------------------------------

/// Per-strategy daily shadow returns (percent), the raw material for the
/// swap decision. Fed by the EOD task from shadow results; mirrored into
/// `strategy_performance` rows by the caller.
#[derive(Debug, Clone, Default)]
pub struct ShadowPerfStore {
    returns: BTreeMap<String, Vec<(NaiveDate, f64)>>,
}

impl ShadowPerfStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_return(&mut self, strategy: &str, date: NaiveDate, return_pct: f64) {
        let series = self.returns.entry(strategy.to_string()).or_default();
        match series.last() {
            Some((last, _)) if *last == date => {
                // Same-day re-record replaces (EOD task may re-run).
                series.pop();
            }
            _ => {}
        }
        series.push((date, return_pct));
        series.sort_by_key(|(d, _)| *d);
    }

    fn window(&self, strategy: &str, lookback_days: i64, asof: NaiveDate) -> Vec<f64> {
        let floor = asof - chrono::Duration::days(lookback_days);
        self.returns
            .get(strategy)
            .map(|series| {
                series
                    .iter()
                    .filter(|(d, _)| *d > floor && *d <= asof)
                    .map(|(_, r)| *r)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Annualised Sharpe over the trailing window (None below 5 samples).
    pub fn sharpe(&self, strategy: &str, lookback_days: i64, asof: NaiveDate) -> Option<f64> {
        let rets = self.window(strategy, lookback_days, asof);
        if rets.len() < 5 {
            return None;
        }
        let n = rets.len() as f64;
        let mean = rets.iter().sum::<f64>() / n;
        let var = rets.iter().map(|r| (r - mean) * (r - mean)).sum::<f64>() / n;
        let std = var.sqrt();
        if std <= f64::EPSILON {
            return Some(0.0);
        }
        Some(mean / std * 252.0_f64.sqrt())
    }

    /// Trailing max drawdown as a positive percent (None below 2 samples).
    pub fn max_drawdown_pct(
        &self,
        strategy: &str,
        lookback_days: i64,
        asof: NaiveDate,
    ) -> Option<f64> {
        let rets = self.window(strategy, lookback_days, asof);
        if rets.len() < 2 {
            return None;
        }
        let mut equity = 1.0_f64;
        let mut peak = 1.0_f64;
        let mut mdd = 0.0_f64;
        for r in rets {
            equity *= 1.0 + r / 100.0;
            if equity > peak {
                peak = equity;
            }
            let dd = (peak - equity) / peak * 100.0;
            if dd > mdd {
                mdd = dd;
            }
        }
        Some(mdd)
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

pub struct StrategyManager {
    main: StrategySlot,
    shadows: Vec<StrategySlot>,
    perf: ShadowPerfStore,
    settings: RiskSettings,
}

impl StrategyManager {
    pub fn new(main: StrategySlot, settings: RiskSettings) -> Self {
        Self {
            main,
            shadows: Vec::new(),
            perf: ShadowPerfStore::new(),
            settings,
        }
    }

    pub fn add_shadow(&mut self, slot: StrategySlot) {
        self.shadows.push(slot);
    }

    pub fn main_symbol(&self) -> &str {
        &self.main.symbol
    }

    pub fn main_name(&self) -> &str {
        self.main.name()
    }

    pub fn shadow_names(&self) -> Vec<String> {
        self.shadows.iter().map(|s| s.name.clone()).collect()
    }

    pub fn perf_store(&mut self) -> &mut ShadowPerfStore {
        &mut self.perf
    }

    /// Rebind the main slot to a new symbol (operator `/change-stock`).
    /// The strategy's rolling state is reset — history of another symbol
    /// must not leak into the new one.
    pub fn rebind_main_symbol(&mut self, symbol: impl Into<String>) {
        self.main.symbol = symbol.into();
        lock_strategy(&self.main.strategy).reset();
    }

    /// Replace the main strategy outright (operator `/set-main-strategy`).
    pub fn set_main_strategy(&mut self, strategy: Box<dyn Strategy>) {
        self.main.name = strategy.name().to_string();
        self.main.market_code = strategy.market_code().to_string();
        self.main.strategy = Arc::new(Mutex::new(strategy));
    }

    // -----------------------------------------------------------------------
    // Tick evaluation
    // -----------------------------------------------------------------------

    /// Evaluate every enabled strategy concurrently (single barrier).
    ///
    /// Evaluations run on the blocking pool; each is raced against the
    /// 200 ms deadline and degrades to a neutral signal on overrun. The
    /// main signal is always present (neutral when its symbol has no bar
    /// this tick).
    pub async fn evaluate_tick(
        &self,
        views: &BTreeMap<String, PortfolioView>,
        bars: &BTreeMap<String, Bar>,
    ) -> TickSignals {
        let main_handle = self.spawn_eval(&self.main, views, bars);

        let shadow_handles: Vec<(String, Option<_>)> = self
            .shadows
            .iter()
            .map(|slot| (slot.symbol.clone(), self.spawn_eval(slot, views, bars)))
            .collect();

        let main = match main_handle {
            Some((name, handle)) => Self::await_deadline(name, handle).await,
            None => TradeSignal::neutral(self.main.name(), "no bar for symbol"),
        };

        let mut shadows = Vec::new();
        for (symbol, handle) in shadow_handles {
            if let Some((name, handle)) = handle {
                let sig = Self::await_deadline(name, handle).await;
                shadows.push((symbol, sig));
            }
        }

        TickSignals { main, shadows }
    }

    fn spawn_eval(
        &self,
        slot: &StrategySlot,
        views: &BTreeMap<String, PortfolioView>,
        bars: &BTreeMap<String, Bar>,
    ) -> Option<(String, tokio::task::JoinHandle<TradeSignal>)> {
        if !slot.enabled {
            return None;
        }
        let bar = bars.get(&slot.symbol)?.clone();
        let view = views
            .get(&slot.symbol)
            .copied()
            .unwrap_or_else(|| PortfolioView::flat(0));
        let strategy = Arc::clone(&slot.strategy);
        let name = slot.name.clone();
        let handle = tokio::task::spawn_blocking(move || {
            let mut guard = lock_strategy(&strategy);
            guard.evaluate(&view, &bar)
        });
        Some((name, handle))
    }

    async fn await_deadline(
        name: String,
        handle: tokio::task::JoinHandle<TradeSignal>,
    ) -> TradeSignal {
        match tokio::time::timeout(Duration::from_millis(STRATEGY_DEADLINE_MS), handle).await {
            Ok(Ok(sig)) => sig,
            Ok(Err(join_err)) => {
                warn!(strategy = %name, "strategy task failed: {join_err}");
                TradeSignal::neutral(&name, "evaluation failed")
            }
            Err(_) => {
                warn!(strategy = %name, "strategy exceeded {STRATEGY_DEADLINE_MS}ms deadline");
                TradeSignal::neutral(&name, "deadline")
            }
        }
    }

    // -----------------------------------------------------------------------
    // Drawdown-driven swap
    // -----------------------------------------------------------------------

    /// Swap the main strategy for the best shadow candidate when the main's
    /// trailing max drawdown breaches the threshold. Returns the event to
    /// persist/notify, or `None` when nothing changed.
    pub fn check_drawdown_swap(&mut self, now: DateTime<Utc>) -> Option<SwapEvent> {
        let today = session::trade_date(now);
        let lookback = self.settings.swap_lookback_days;

        let mdd = self
            .perf
            .max_drawdown_pct(self.main.name(), lookback, today)?;
        if mdd <= self.settings.swap_mdd_threshold_pct {
            return None;
        }

        let main_code = self.main.market_code.clone();
        let mut best: Option<(usize, f64)> = None;
        for (idx, slot) in self.shadows.iter().enumerate() {
            if !slot.enabled || slot.market_code != main_code {
                continue;
            }
            let Some(sharpe) = self.perf.sharpe(slot.name(), lookback, today) else {
                continue;
            };
            match best {
                Some((_, best_sharpe)) if sharpe <= best_sharpe => {}
                _ => best = Some((idx, sharpe)),
            }
        }

        let (idx, candidate_sharpe) = best?;
        let old_main = self.main.name.clone();

        // Atomic exchange: the shadow's strategy becomes main, the demoted
        // main keeps running in the shadow slot. Both restart clean.
        let shadow = &mut self.shadows[idx];
        std::mem::swap(&mut self.main.strategy, &mut shadow.strategy);
        std::mem::swap(&mut self.main.name, &mut shadow.name);
        std::mem::swap(&mut self.main.market_code, &mut shadow.market_code);
        lock_strategy(&self.main.strategy).reset();
        lock_strategy(&shadow.strategy).reset();

        let event = SwapEvent {
            old_main,
            new_main: self.main.name.clone(),
            main_drawdown_pct: mdd,
            candidate_sharpe,
            at: now,
        };
        info!(
            old = %event.old_main,
            new = %event.new_main,
            mdd_pct = event.main_drawdown_pct,
            "strategy hot-swap triggered"
        );
        Some(event)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
