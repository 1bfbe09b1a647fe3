//! The replay engine.
//!
//! Pipeline per bar: validate → mark → strategy → execute (exit before
//! entry) → equity point. Execution reuses the ledger's averaging
//! semantics and the live slippage model with the bar's historical
//! timestamp, so replayed costs track what the router would have paid.

use taroko_config::RiskSettings;
use taroko_schemas::{
    apply_bps, mul_qty_price_micros, Bar, FillRecord, LotType, Side, SignalDirection, TradingMode,
};
use taroko_execution::{
    size_position, SizingInput, SlippageInput, SlippageModel, FEE_BPS, SELL_TAX_BPS,
};
use taroko_ledger::Ledger;
use taroko_strategy::{PortfolioView, Strategy};
use uuid::Uuid;

use crate::metrics::{compute_metrics, StrategyMetrics};

/// Replay configuration.
#[derive(Debug, Clone)]
pub struct BacktestConfig {
    pub initial_capital_micros: i64,
    pub lot_type: LotType,
    /// Average daily volume used by the slippage model.
    pub adv: f64,
    pub risk: RiskSettings,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            // 1M TWD starting capital.
            initial_capital_micros: 1_000_000 * 1_000_000,
            lot_type: LotType::Odd,
            adv: 2_000_000.0,
            risk: RiskSettings::default(),
        }
    }
}

/// Replay failures.
#[derive(Debug, Clone, PartialEq)]
pub enum BacktestError {
    /// An incomplete bar reached the replay (anti-lookahead).
    IncompleteBar { symbol: String, ts: i64 },
    /// Bars must arrive time-ascending.
    UnsortedBars { prev_ts: i64, ts: i64 },
    /// A bar violated the OHLC invariant.
    BadBar(String),
}

impl std::fmt::Display for BacktestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BacktestError::IncompleteBar { symbol, ts } => {
                write!(f, "incomplete bar: {symbol} @ ts={ts}")
            }
            BacktestError::UnsortedBars { prev_ts, ts } => {
                write!(f, "bars out of order: {ts} after {prev_ts}")
            }
            BacktestError::BadBar(msg) => write!(f, "bad bar: {msg}"),
        }
    }
}

impl std::error::Error for BacktestError {}

/// The replay output: metrics plus the raw curves for downstream analysis.
#[derive(Debug, Clone)]
pub struct BacktestReport {
    pub strategy_name: String,
    pub metrics: StrategyMetrics,
    pub equity_curve: Vec<(i64, i64)>,
    pub realized_pnl_micros: Vec<i64>,
    pub fills: Vec<FillRecord>,
}

pub struct BacktestEngine {
    config: BacktestConfig,
    slippage: SlippageModel,
}

impl BacktestEngine {
    pub fn new(config: BacktestConfig) -> Self {
        Self {
            config,
            slippage: SlippageModel::new(),
        }
    }

    /// Replay `bars` (sorted, complete) through `strategy`.
    pub fn run(
        &self,
        strategy: &mut dyn Strategy,
        bars: &[Bar],
    ) -> Result<BacktestReport, BacktestError> {
        let mut ledger = Ledger::new(TradingMode::Stock);
        let mut cash = self.config.initial_capital_micros;
        let mut equity_curve = Vec::with_capacity(bars.len());
        let mut realized = Vec::new();
        let mut fills = Vec::new();
        let mut prev_ts: Option<i64> = None;

        for bar in bars {
            if !bar.is_complete {
                return Err(BacktestError::IncompleteBar {
                    symbol: bar.symbol.clone(),
                    ts: bar.ts.timestamp(),
                });
            }
            if let Err(e) = bar.validate() {
                return Err(BacktestError::BadBar(e.to_string()));
            }
            if let Some(p) = prev_ts {
                if bar.ts.timestamp() < p {
                    return Err(BacktestError::UnsortedBars {
                        prev_ts: p,
                        ts: bar.ts.timestamp(),
                    });
                }
            }
            prev_ts = Some(bar.ts.timestamp());

            let qty = ledger.quantity(&bar.symbol);
            let equity = cash.saturating_add(mul_qty_price_micros(qty, bar.close_micros));
            let view = PortfolioView {
                equity_micros: equity,
                position_qty: qty,
                avg_entry_price_micros: ledger
                    .get(&bar.symbol)
                    .map(|p| p.avg_entry_price_micros)
                    .unwrap_or(0),
            };

            let signal = strategy.evaluate(&view, bar);

            match signal.direction {
                SignalDirection::Exit if qty != 0 => {
                    self.close_position(&mut ledger, &mut cash, &mut realized, &mut fills, bar);
                }
                SignalDirection::Long | SignalDirection::Short => {
                    let want_long = signal.direction == SignalDirection::Long;
                    if (qty > 0) != want_long && qty != 0 {
                        // Opposing signal closes first; re-entry happens on a
                        // later bar if the signal persists.
                        self.close_position(&mut ledger, &mut cash, &mut realized, &mut fills, bar);
                    } else if qty == 0 {
                        self.open_position(
                            &mut ledger,
                            &mut cash,
                            &mut fills,
                            bar,
                            equity,
                            want_long,
                        );
                    }
                }
                _ => {}
            }

            let qty = ledger.quantity(&bar.symbol);
            let equity = cash.saturating_add(mul_qty_price_micros(qty, bar.close_micros));
            equity_curve.push((bar.ts.timestamp(), equity));
        }

        // Liquidate any residual open position at the final close so the
        // metrics reflect a finished run.
        if let Some(last) = bars.last() {
            if ledger.quantity(&last.symbol) != 0 {
                self.close_position(&mut ledger, &mut cash, &mut realized, &mut fills, last);
                let equity = cash;
                if let Some(point) = equity_curve.last_mut() {
                    point.1 = equity;
                }
            }
        }

        let metrics = compute_metrics(
            self.config.initial_capital_micros,
            &equity_curve,
            &realized,
        );

        Ok(BacktestReport {
            strategy_name: strategy.name().to_string(),
            metrics,
            equity_curve,
            realized_pnl_micros: realized,
            fills,
        })
    }

    fn open_position(
        &self,
        ledger: &mut Ledger,
        cash: &mut i64,
        fills: &mut Vec<FillRecord>,
        bar: &Bar,
        equity: i64,
        long: bool,
    ) {
        let sizing = size_position(
            &SizingInput {
                equity_micros: equity,
                price_micros: bar.close_micros,
                win_rate: None,
                avg_win: None,
                avg_loss: None,
                atr: None,
                lot_type: self.config.lot_type,
            },
            &self.config.risk,
        );
        if sizing.shares < 1 {
            return;
        }

        let side = if long { Side::Buy } else { Side::Sell };
        let fill = self.costed_fill(bar, side, sizing.shares);
        self.settle(cash, &fill);
        // Invariants hold by construction here; a violation is a replay bug,
        // not a data problem.
        if ledger.apply(&fill).is_ok() {
            fills.push(fill);
        }
    }

    fn close_position(
        &self,
        ledger: &mut Ledger,
        cash: &mut i64,
        realized: &mut Vec<i64>,
        fills: &mut Vec<FillRecord>,
        bar: &Bar,
    ) {
        let qty = ledger.quantity(&bar.symbol);
        if qty == 0 {
            return;
        }
        let side = if qty > 0 { Side::Sell } else { Side::Buy };
        let fill = self.costed_fill(bar, side, qty.abs());
        self.settle(cash, &fill);
        if let Ok(Some(r)) = ledger.apply(&fill) {
            realized.push(r.pnl_micros - r.fee_micros - r.tax_micros);
        }
        fills.push(fill);
    }

    /// Fill at the bar close adjusted by the modelled slippage (worse for
    /// the taker in both directions), with fee and sell tax attached.
    fn costed_fill(&self, bar: &Bar, side: Side, quantity: i64) -> FillRecord {
        let rate = self.slippage.rate_bps(&SlippageInput {
            adv: self.config.adv,
            order_qty: quantity as f64,
            now: bar.ts,
            historical_bps: None,
        });
        let bps = rate.round() as i64;
        let price = match side {
            Side::Buy => apply_bps(bar.close_micros, bps),
            Side::Sell => apply_bps(bar.close_micros, -bps),
        };

        let notional = mul_qty_price_micros(quantity, price);
        let fee = (notional as f64 * FEE_BPS / 10_000.0).round() as i64;
        let tax = match side {
            Side::Sell => (notional as f64 * SELL_TAX_BPS / 10_000.0).round() as i64,
            Side::Buy => 0,
        };

        FillRecord::new(Uuid::new_v4(), &bar.symbol, side, quantity, price, bar.ts)
            .with_costs(fee, tax, rate)
    }

    fn settle(&self, cash: &mut i64, fill: &FillRecord) {
        let notional = mul_qty_price_micros(fill.quantity, fill.price_micros);
        match fill.side {
            Side::Buy => {
                *cash = cash
                    .saturating_sub(notional)
                    .saturating_sub(fill.fee_micros);
            }
            Side::Sell => {
                *cash = cash
                    .saturating_add(notional)
                    .saturating_sub(fill.fee_micros)
                    .saturating_sub(fill.tax_micros);
            }
        }
    }
}
