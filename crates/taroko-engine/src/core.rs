//! The trading engine tick state machine.
//!
//! Single logical writer over the ledger. Per tick:
//!
//! ```text
//! tick:
//!   roll daily/weekly realized accumulators
//!   if outside trading window: report (EOD due?); return
//!   risk = gatekeeper.check()
//!   if fatal: flatten all, pause, notify; return
//!   signals = manager.evaluate_tick()           (single barrier, 200ms/strategy)
//!   if holding: exit signal | reversal | max-hold | stop-loss -> route exit
//!   else:      entry signal && risk.allow      -> size -> route entry
//!   report signals, veto, executions, realized, unrealized snapshot
//! ```
//!
//! The core is IO-free apart from the order gateway inside the router;
//! persistence and chat delivery happen in the runner, driven by the
//! returned [`TickReport`].

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use taroko_config::RiskSettings;
use taroko_execution::{
    size_position, ExecutionReport, ExecutionRouter, OrderGateway, OrderStatus, SizingInput,
};
use taroko_ledger::{Ledger, LedgerSnapshot, Position, RealizedPnl};
use taroko_risk::{
    evaluate_golive, CheckKind, GoLiveReport, RiskDecision, RiskGatekeeper, RiskInput, SimRecord,
};
use taroko_schemas::{
    f64_to_micros, micros_to_f64, session, Bar, LotType, OrderRequest, Side, SignalDirection,
    TradeSignal, TradingMode, MICROS_SCALE,
};
use taroko_strategy::{PortfolioView, StrategyManager, SwapEvent};
use tracing::{info, warn};

use crate::handle::{StatusReport, StockChange};
use crate::state::EngineState;

/// Static engine wiring.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub trading_mode: TradingMode,
    pub lot_type: LotType,
    /// Average daily volume estimate for the slippage model.
    pub adv: f64,
    pub initial_equity_micros: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            trading_mode: TradingMode::Stock,
            lot_type: LotType::Odd,
            adv: 2_000_000.0,
            initial_equity_micros: 1_000_000 * MICROS_SCALE,
        }
    }
}

/// What a tick amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickPhase {
    /// Outside the trading window; `eod_due` asks the runner to run the
    /// end-of-day tasks once.
    OutsideWindow { eod_due: bool },
    /// A fatal risk breach tripped the emergency shutdown.
    Fatal,
    /// Normal evaluation (orders may or may not have been routed).
    Evaluated,
}

/// Everything the runner must persist/notify after one tick.
#[derive(Debug)]
pub struct TickReport {
    pub phase: TickPhase,
    pub main_signal: Option<TradeSignal>,
    pub shadow_signals: Vec<(String, TradeSignal)>,
    pub veto: Option<RiskDecision>,
    pub executions: Vec<ExecutionReport>,
    pub realized: Vec<RealizedPnl>,
    pub unrealized_micros: i64,
    /// Chat messages the runner must deliver.
    pub notices: Vec<String>,
    /// Whether the main signal drove an order this tick.
    pub acted_on_main: bool,
}

impl TickReport {
    /// An empty report for out-of-tick flows (shutdown flatten).
    pub fn shutdown_scratch() -> Self {
        Self::idle(false)
    }

    fn idle(eod_due: bool) -> Self {
        Self {
            phase: TickPhase::OutsideWindow { eod_due },
            main_signal: None,
            shadow_signals: Vec::new(),
            veto: None,
            executions: Vec::new(),
            realized: Vec::new(),
            unrealized_micros: 0,
            notices: Vec::new(),
            acted_on_main: false,
        }
    }
}

pub struct EngineCore<G: OrderGateway> {
    state: Arc<EngineState>,
    settings: RiskSettings,
    config: EngineConfig,
    ledger: Ledger,
    gatekeeper: RiskGatekeeper,
    manager: StrategyManager,
    router: ExecutionRouter<G>,
    equity_micros: i64,
    /// Latest volatility estimate (fraction, e.g. 0.02) fed by the runner.
    volatility: f64,
    marks: BTreeMap<String, i64>,
    day: Option<NaiveDate>,
    daily_realized_micros: i64,
    week: Option<NaiveDate>,
    weekly_realized_micros: i64,
    eod_done_for: Option<NaiveDate>,
}

impl<G: OrderGateway> EngineCore<G> {
    pub fn new(
        state: Arc<EngineState>,
        settings: RiskSettings,
        config: EngineConfig,
        manager: StrategyManager,
        router: ExecutionRouter<G>,
    ) -> Self {
        let gatekeeper = RiskGatekeeper::new(settings.clone());
        let ledger = Ledger::new(config.trading_mode);
        let equity_micros = config.initial_equity_micros;
        Self {
            state,
            settings,
            config,
            ledger,
            gatekeeper,
            manager,
            router,
            equity_micros,
            volatility: 0.0,
            marks: BTreeMap::new(),
            day: None,
            daily_realized_micros: 0,
            week: None,
            weekly_realized_micros: 0,
            eod_done_for: None,
        }
    }

    // -----------------------------------------------------------------------
    // Runner-fed context
    // -----------------------------------------------------------------------

    pub fn set_equity_micros(&mut self, equity_micros: i64) {
        self.equity_micros = equity_micros;
    }

    pub fn set_volatility(&mut self, volatility: f64) {
        self.volatility = volatility;
    }

    pub fn state(&self) -> &Arc<EngineState> {
        &self.state
    }

    pub fn gatekeeper_mut(&mut self) -> &mut RiskGatekeeper {
        &mut self.gatekeeper
    }

    pub fn manager_mut(&mut self) -> &mut StrategyManager {
        &mut self.manager
    }

    pub fn ledger_snapshot(&self) -> LedgerSnapshot {
        self.ledger.snapshot()
    }

    pub fn daily_realized_micros(&self) -> i64 {
        self.daily_realized_micros
    }

    /// Closed-trade counts for one Taipei trade day: `(total, winners)`.
    pub fn closed_trades_on(&self, date: NaiveDate) -> (i64, i64) {
        let mut total = 0;
        let mut wins = 0;
        for r in self.ledger.realized_entries() {
            if session::trade_date(r.ts) == date {
                total += 1;
                if r.pnl_micros - r.fee_micros - r.tax_micros > 0 {
                    wins += 1;
                }
            }
        }
        (total, wins)
    }

    // -----------------------------------------------------------------------
    // The tick
    // -----------------------------------------------------------------------

    pub async fn tick(&mut self, now: DateTime<Utc>, bars: BTreeMap<String, Bar>) -> TickReport {
        self.roll_accumulators(now);

        if !session::in_trading_window(now) {
            let today = session::trade_date(now);
            let eod_due = session::is_trading_day(today)
                && self.eod_done_for != Some(today)
                && now >= session::taipei_to_utc(today, chrono::NaiveTime::from_hms_opt(13, 30, 0).unwrap());
            return TickReport::idle(eod_due);
        }

        for (symbol, bar) in &bars {
            self.marks.insert(symbol.clone(), bar.close_micros);
        }

        let active = self.state.active_stock();
        let risk = self.gatekeeper.check(&RiskInput {
            now,
            symbol: active.clone(),
            kind: CheckKind::Entry,
            daily_realized_micros: self.daily_realized_micros,
            weekly_realized_micros: self.weekly_realized_micros,
        });

        if risk.is_fatal() {
            let mut report = TickReport::idle(false);
            report.phase = TickPhase::Fatal;
            report.veto = Some(risk.clone());
            self.emergency_shutdown(now, &risk.reason, &mut report).await;
            return report;
        }

        // Strategy barrier: the main signal decides; shadows are recorded
        // afterwards.
        let views = self.build_views(&bars);
        let signals = self.manager.evaluate_tick(&views, &bars).await;

        let mut report = TickReport {
            phase: TickPhase::Evaluated,
            main_signal: Some(signals.main.clone()),
            shadow_signals: signals.shadows,
            veto: None,
            executions: Vec::new(),
            realized: Vec::new(),
            unrealized_micros: 0,
            notices: Vec::new(),
            acted_on_main: false,
        };

        let mark = self.marks.get(&active).copied();
        let position = self.ledger.get(&active).cloned();

        match (position, mark) {
            (Some(pos), Some(mark)) if pos.quantity != 0 => {
                if let Some(reason) = self.exit_reason(&signals.main, &pos, mark, now) {
                    let notice = reason.clone();
                    self.route_exit(&active, &pos, mark, now, &reason, &mut report).await;
                    report.notices.push(notice);
                    report.acted_on_main = true;
                }
            }
            _ => {
                if signals.main.direction.is_entry() {
                    if risk.allow {
                        if let Some(mark) = mark {
                            self.route_entry(&active, &signals.main, mark, now, &mut report).await;
                        }
                    } else {
                        report.veto = Some(risk.clone());
                    }
                }
            }
        }

        report.unrealized_micros = self
            .marks
            .get(&active)
            .map(|m| self.ledger.unrealized_micros(&active, *m))
            .unwrap_or(0);

        report
    }

    /// Exit precedence: explicit exit / reversal, then the max-hold clock,
    /// then the stop-loss.
    fn exit_reason(
        &self,
        signal: &TradeSignal,
        pos: &Position,
        mark: i64,
        now: DateTime<Utc>,
    ) -> Option<String> {
        let reversal = (pos.quantity > 0 && signal.direction == SignalDirection::Short)
            || (pos.quantity < 0 && signal.direction == SignalDirection::Long);
        if signal.direction == SignalDirection::Exit || reversal {
            return Some(format!("signal exit: {}", signal.reason));
        }

        if let Some(held) = pos.minutes_held(now) {
            if held > self.settings.max_hold_minutes {
                return Some(format!(
                    "{}-MIN HARD EXIT after {held} minutes",
                    self.settings.max_hold_minutes
                ));
            }
        }

        let unrealized = pos.unrealized_micros(mark);
        let stop = self.stop_threshold_micros(pos);
        if stop > 0 && unrealized <= -stop {
            return Some(format!(
                "stop-loss: unrealized {:.0} breaches -{:.0}",
                micros_to_f64(unrealized),
                micros_to_f64(stop)
            ));
        }

        None
    }

    /// Stock: percent of entry notional. Futures: points per contract (the
    /// configurable threshold, never hard-coded).
    fn stop_threshold_micros(&self, pos: &Position) -> i64 {
        match pos.trading_mode {
            TradingMode::Stock => {
                let notional = (pos.quantity.abs() as i128
                    * pos.avg_entry_price_micros as i128) as f64;
                (notional * self.settings.stock_stop_loss_pct / 100.0) as i64
            }
            TradingMode::Futures | TradingMode::StockAndFutures => {
                f64_to_micros(self.settings.futures_stop_loss_per_contract)
                    .saturating_mul(pos.quantity.abs())
            }
        }
    }

    async fn route_exit(
        &mut self,
        symbol: &str,
        pos: &Position,
        mark: i64,
        now: DateTime<Utc>,
        reason: &str,
        report: &mut TickReport,
    ) {
        let side = if pos.quantity > 0 { Side::Sell } else { Side::Buy };
        let order = OrderRequest::new(symbol, side, pos.quantity.abs(), mark, self.config.lot_type)
            .exit();
        info!(symbol, reason, qty = pos.quantity.abs(), "routing exit");
        let exec = self
            .router
            .execute(order, self.volatility, self.config.adv, now)
            .await;
        self.absorb_execution(&exec, reason, report);
    }

    async fn route_entry(
        &mut self,
        symbol: &str,
        signal: &TradeSignal,
        mark: i64,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) {
        let (win_rate, avg_win, avg_loss) = self.kelly_stats();
        let sizing = size_position(
            &SizingInput {
                equity_micros: self.equity_micros,
                price_micros: mark,
                win_rate,
                avg_win,
                avg_loss,
                atr: None,
                lot_type: self.config.lot_type,
            },
            &self.settings,
        );
        if sizing.shares < 1 {
            info!(symbol, "entry skipped: {}", sizing.reasoning);
            return;
        }

        let side = match signal.direction {
            SignalDirection::Long => Side::Buy,
            SignalDirection::Short => Side::Sell,
            _ => return,
        };
        let order = OrderRequest::new(symbol, side, sizing.shares, mark, self.config.lot_type);
        info!(
            symbol,
            qty = sizing.shares,
            method = sizing.method.as_str(),
            "routing entry ({})",
            signal.reason
        );
        let exec = self
            .router
            .execute(order, self.volatility, self.config.adv, now)
            .await;
        report.acted_on_main = exec.status == OrderStatus::Filled;
        self.absorb_execution(&exec, &signal.reason, report);
    }

    /// Apply an execution's fills to the ledger and fold realized P&L into
    /// the breaker accumulators.
    fn absorb_execution(&mut self, exec: &ExecutionReport, reason: &str, report: &mut TickReport) {
        for fill in &exec.fills {
            match self.ledger.apply(fill) {
                Ok(Some(mut realized)) => {
                    realized.reason = reason.to_string();
                    self.note_realized(&realized);
                    report.realized.push(realized);
                }
                Ok(None) => {}
                Err(e) => warn!("fill rejected by ledger: {e}"),
            }
        }
        report.executions.push(exec.clone());
    }

    fn note_realized(&mut self, realized: &RealizedPnl) {
        let net = realized.pnl_micros - realized.fee_micros - realized.tax_micros;
        self.daily_realized_micros = self.daily_realized_micros.saturating_add(net);
        self.weekly_realized_micros = self.weekly_realized_micros.saturating_add(net);
    }

    fn roll_accumulators(&mut self, now: DateTime<Utc>) {
        let today = session::trade_date(now);
        if self.day != Some(today) {
            self.day = Some(today);
            self.daily_realized_micros = 0;
        }
        let week = session::week_start(today);
        if self.week != Some(week) {
            self.week = Some(week);
            self.weekly_realized_micros = 0;
        }
    }

    fn build_views(&self, bars: &BTreeMap<String, Bar>) -> BTreeMap<String, PortfolioView> {
        bars.keys()
            .map(|symbol| {
                let pos = self.ledger.get(symbol);
                (
                    symbol.clone(),
                    PortfolioView {
                        equity_micros: self.equity_micros,
                        position_qty: pos.map(|p| p.quantity).unwrap_or(0),
                        avg_entry_price_micros: pos.map(|p| p.avg_entry_price_micros).unwrap_or(0),
                    },
                )
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Emergency shutdown
    // -----------------------------------------------------------------------

    /// Flatten everything via immediate emergency orders, pause the engine,
    /// and queue the shutdown notice.
    pub async fn emergency_shutdown(
        &mut self,
        now: DateTime<Utc>,
        reason: &str,
        report: &mut TickReport,
    ) {
        warn!(reason, "EMERGENCY SHUTDOWN triggered");
        self.state.set_emergency();

        for symbol in self.ledger.open_symbols() {
            let Some(pos) = self.ledger.get(&symbol).cloned() else {
                continue;
            };
            let mark = self
                .marks
                .get(&symbol)
                .copied()
                .unwrap_or(pos.avg_entry_price_micros);
            let side = if pos.quantity > 0 { Side::Sell } else { Side::Buy };
            let order =
                OrderRequest::new(&symbol, side, pos.quantity.abs(), mark, self.config.lot_type)
                    .emergency();
            let exec = self
                .router
                .execute(order, self.volatility, self.config.adv, now)
                .await;
            self.absorb_execution(&exec, "emergency flatten", report);
        }

        report.notices.push(format!(
            "🚨 EMERGENCY SHUTDOWN: {reason}. All positions flattened; engine paused."
        ));
    }

    /// Orderly flatten for cooperative shutdown: exit orders, no emergency
    /// flag, engine left resumable.
    pub async fn flatten_all_for_shutdown(&mut self, report: &mut TickReport) {
        let now = Utc::now();
        for symbol in self.ledger.open_symbols() {
            let Some(pos) = self.ledger.get(&symbol).cloned() else {
                continue;
            };
            let mark = self
                .marks
                .get(&symbol)
                .copied()
                .unwrap_or(pos.avg_entry_price_micros);
            self.route_exit(&symbol, &pos, mark, now, "shutdown flatten", report)
                .await;
        }
    }

    // -----------------------------------------------------------------------
    // Operator actions (applied between ticks by the runner)
    // -----------------------------------------------------------------------

    pub fn pause(&mut self) {
        self.state.set_paused(true);
        self.gatekeeper.set_paused(true);
    }

    pub fn resume(&mut self) {
        self.state.set_paused(false);
        self.state.clear_emergency();
        self.gatekeeper.set_paused(false);
    }

    /// Flatten any open position in the old stock, then commit the new
    /// active symbol and rebind the main strategy.
    pub async fn change_stock(
        &mut self,
        new_symbol: &str,
        now: DateTime<Utc>,
    ) -> Result<(StockChange, TickReport), String> {
        if new_symbol.trim().is_empty() || !new_symbol.contains('.') {
            return Err(format!(
                "invalid symbol '{new_symbol}': expected e.g. 2330.TW"
            ));
        }

        let old_symbol = self.state.active_stock();
        let mut report = TickReport::idle(false);
        let mut flattened_qty = 0;

        if let Some(pos) = self.ledger.get(&old_symbol).cloned() {
            if pos.quantity != 0 {
                let mark = self
                    .marks
                    .get(&old_symbol)
                    .copied()
                    .unwrap_or(pos.avg_entry_price_micros);
                flattened_qty = pos.quantity.abs();
                self.route_exit(&old_symbol, &pos, mark, now, "stock change", &mut report)
                    .await;
                if self.ledger.quantity(&old_symbol) != 0 {
                    return Err(format!(
                        "could not flatten {old_symbol} before switching; position unchanged"
                    ));
                }
            }
        }

        self.state.set_active_stock(new_symbol);
        self.manager.rebind_main_symbol(new_symbol);
        info!(old = %old_symbol, new = %new_symbol, "active stock changed");

        Ok((
            StockChange {
                old_symbol,
                new_symbol: new_symbol.to_string(),
                flattened_qty,
            },
            report,
        ))
    }

    /// Two-step go-live: arm the 10-minute confirmation window.
    pub fn golive(&mut self, now: DateTime<Utc>) -> String {
        self.state.arm_golive(now);
        format!(
            "Go-live armed. Reply /confirmlive within {} minutes to switch to live orders.",
            crate::state::GOLIVE_PENDING_MINUTES
        )
    }

    /// Confirm go-live inside the pending window, gated on the simulated
    /// track record.
    pub fn confirmlive(&mut self, now: DateTime<Utc>, record: &SimRecord) -> Result<String, String> {
        if !self.state.take_golive(now) {
            return Err("no pending /golive request (or the 10-minute window expired)".to_string());
        }
        let report: GoLiveReport = evaluate_golive(record, &self.settings);
        if !report.passed() {
            return Err(format!(
                "go-live rejected:\n- {}",
                report.reasons.join("\n- ")
            ));
        }
        self.state.set_live(true);
        Ok("live trading ENABLED — orders now route to the live account".to_string())
    }

    pub fn backtosim(&mut self) -> String {
        self.state.set_live(false);
        "simulation mode restored — live orders disabled".to_string()
    }

    pub fn status(&self) -> StatusReport {
        let active = self.state.active_stock();
        let position = self.ledger.get(&active).cloned();
        let unrealized = self
            .marks
            .get(&active)
            .map(|m| self.ledger.unrealized_micros(&active, *m))
            .unwrap_or(0);
        StatusReport {
            active_stock: active,
            main_strategy: self.manager.main_name().to_string(),
            paused: self.state.is_paused(),
            emergency: self.state.is_emergency(),
            live: self.state.is_live(),
            position,
            daily_realized_micros: self.daily_realized_micros,
            unrealized_micros: unrealized,
        }
    }

    /// The 5-minute drawdown monitor body.
    pub fn drawdown_check(&mut self, now: DateTime<Utc>) -> Option<SwapEvent> {
        self.manager.check_drawdown_swap(now)
    }

    pub fn mark_eod_done(&mut self, date: NaiveDate) {
        self.eod_done_for = Some(date);
    }

    // -----------------------------------------------------------------------
    // Sizing statistics
    // -----------------------------------------------------------------------

    /// Kelly inputs from the trailing realized history; `None`s until 10
    /// closed trades exist (the sizer then falls back).
    fn kelly_stats(&self) -> (Option<f64>, Option<f64>, Option<f64>) {
        let entries = self.ledger.realized_entries();
        if entries.len() < 10 {
            return (None, None, None);
        }
        let tail = &entries[entries.len().saturating_sub(20)..];
        let wins: Vec<f64> = tail
            .iter()
            .filter(|r| r.pnl_micros > 0)
            .map(|r| micros_to_f64(r.pnl_micros))
            .collect();
        let losses: Vec<f64> = tail
            .iter()
            .filter(|r| r.pnl_micros < 0)
            .map(|r| micros_to_f64(-r.pnl_micros))
            .collect();
        if wins.is_empty() || losses.is_empty() {
            return (None, None, None);
        }
        let win_rate = wins.len() as f64 / tail.len() as f64;
        let avg_win = wins.iter().sum::<f64>() / wins.len() as f64;
        let avg_loss = losses.iter().sum::<f64>() / losses.len() as f64;
        (Some(win_rate), Some(avg_win), Some(avg_loss))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
