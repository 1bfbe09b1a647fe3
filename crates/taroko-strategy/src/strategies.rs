//! The concrete strategy family.
//!
//! Each strategy is fully parameterised through its constructor so the same
//! types serve live trading, shadow evaluation, and walk-forward grid
//! search. All three work on bar closes converted to f64 once per bar;
//! signal decisions stay deterministic because the inputs are integer
//! micros.

use taroko_schemas::{micros_to_f64, Bar, SignalDirection, TradeSignal};

use crate::types::{PortfolioView, RollingWindow, Strategy, StrategyKind};

const TW_MARKET: &str = "TW";

// ---------------------------------------------------------------------------
// Momentum
// ---------------------------------------------------------------------------

/// Rate-of-change momentum: long when the close has risen more than
/// `threshold_pct` over `lookback` bars, short on the mirror condition,
/// exit an open position when the momentum turns against it.
#[derive(Debug, Clone)]
pub struct MomentumStrategy {
    name: String,
    lookback: usize,
    threshold_pct: f64,
    closes: RollingWindow,
}

impl MomentumStrategy {
    pub fn new(lookback: usize, threshold_pct: f64) -> Self {
        Self {
            name: format!("momentum_{lookback}_{threshold_pct}"),
            lookback,
            threshold_pct,
            closes: RollingWindow::new(lookback + 1),
        }
    }

    fn roc_pct(&self) -> Option<f64> {
        if !self.closes.is_full() {
            return None;
        }
        let oldest = self.closes.first()?;
        let newest = self.closes.last()?;
        if oldest <= 0.0 {
            return None;
        }
        Some((newest - oldest) / oldest * 100.0)
    }
}

impl Strategy for MomentumStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::Momentum
    }

    fn market_code(&self) -> &str {
        TW_MARKET
    }

    fn evaluate(&mut self, view: &PortfolioView, bar: &Bar) -> TradeSignal {
        self.closes.push(micros_to_f64(bar.close_micros));

        let roc = match self.roc_pct() {
            Some(r) => r,
            None => return TradeSignal::neutral(&self.name, "warmup"),
        };

        if view.position_qty > 0 && roc < 0.0 {
            return TradeSignal::new(
                SignalDirection::Exit,
                0.8,
                format!("momentum reversed: roc {roc:.2}%"),
                &self.name,
            );
        }
        if view.position_qty < 0 && roc > 0.0 {
            return TradeSignal::new(
                SignalDirection::Exit,
                0.8,
                format!("momentum reversed: roc {roc:.2}%"),
                &self.name,
            );
        }

        let confidence = (roc.abs() / (3.0 * self.threshold_pct)).min(1.0);
        if roc > self.threshold_pct {
            TradeSignal::new(
                SignalDirection::Long,
                confidence,
                format!("roc {roc:.2}% > {:.2}%", self.threshold_pct),
                &self.name,
            )
        } else if roc < -self.threshold_pct {
            TradeSignal::new(
                SignalDirection::Short,
                confidence,
                format!("roc {roc:.2}% < -{:.2}%", self.threshold_pct),
                &self.name,
            )
        } else {
            TradeSignal::neutral(&self.name, format!("roc {roc:.2}% inside band"))
        }
    }

    fn reset(&mut self) {
        self.closes.clear();
    }
}

// ---------------------------------------------------------------------------
// Mean reversion
// ---------------------------------------------------------------------------

/// Z-score mean reversion: fade moves beyond `z_entry` standard deviations
/// from the rolling mean; exit once the close returns inside `z_exit`.
#[derive(Debug, Clone)]
pub struct MeanReversionStrategy {
    name: String,
    z_entry: f64,
    z_exit: f64,
    closes: RollingWindow,
}

impl MeanReversionStrategy {
    pub fn new(lookback: usize, z_entry: f64, z_exit: f64) -> Self {
        Self {
            name: format!("mean_reversion_{lookback}_{z_entry}"),
            z_entry,
            z_exit,
            closes: RollingWindow::new(lookback),
        }
    }
}

impl Strategy for MeanReversionStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::MeanReversion
    }

    fn market_code(&self) -> &str {
        TW_MARKET
    }

    fn evaluate(&mut self, view: &PortfolioView, bar: &Bar) -> TradeSignal {
        self.closes.push(micros_to_f64(bar.close_micros));

        if !self.closes.is_full() {
            return TradeSignal::neutral(&self.name, "warmup");
        }
        let std = self.closes.std();
        if std <= f64::EPSILON {
            return TradeSignal::neutral(&self.name, "zero variance");
        }
        let z = (self.closes.last().unwrap_or(0.0) - self.closes.mean()) / std;

        if view.position_qty != 0 && z.abs() < self.z_exit {
            return TradeSignal::new(
                SignalDirection::Exit,
                0.7,
                format!("z {z:.2} back inside exit band"),
                &self.name,
            );
        }

        let confidence = ((z.abs() - self.z_entry) / self.z_entry).clamp(0.0, 1.0).max(0.5);
        if z > self.z_entry {
            TradeSignal::new(
                SignalDirection::Short,
                confidence,
                format!("z {z:.2} above {:.2}", self.z_entry),
                &self.name,
            )
        } else if z < -self.z_entry {
            TradeSignal::new(
                SignalDirection::Long,
                confidence,
                format!("z {z:.2} below -{:.2}", self.z_entry),
                &self.name,
            )
        } else {
            TradeSignal::neutral(&self.name, format!("z {z:.2} inside band"))
        }
    }

    fn reset(&mut self) {
        self.closes.clear();
    }
}

// ---------------------------------------------------------------------------
// Channel breakout
// ---------------------------------------------------------------------------

/// Donchian-style channel breakout: enter on a close beyond the rolling
/// `lookback`-bar extreme, exit when the close crosses the shorter
/// `exit_lookback` channel against the position.
#[derive(Debug, Clone)]
pub struct ChannelBreakoutStrategy {
    name: String,
    entry_highs: RollingWindow,
    entry_lows: RollingWindow,
    exit_highs: RollingWindow,
    exit_lows: RollingWindow,
}

impl ChannelBreakoutStrategy {
    pub fn new(lookback: usize, exit_lookback: usize) -> Self {
        Self {
            name: format!("breakout_{lookback}_{exit_lookback}"),
            entry_highs: RollingWindow::new(lookback),
            entry_lows: RollingWindow::new(lookback),
            exit_highs: RollingWindow::new(exit_lookback),
            exit_lows: RollingWindow::new(exit_lookback),
        }
    }
}

impl Strategy for ChannelBreakoutStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::Breakout
    }

    fn market_code(&self) -> &str {
        TW_MARKET
    }

    fn evaluate(&mut self, view: &PortfolioView, bar: &Bar) -> TradeSignal {
        let close = micros_to_f64(bar.close_micros);

        // Channel extremes exclude the current bar — compare first, then push.
        let ready = self.entry_highs.is_full();
        let entry_high = self.entry_highs.max();
        let entry_low = self.entry_lows.min();
        let exit_high = self.exit_highs.max();
        let exit_low = self.exit_lows.min();

        self.entry_highs.push(micros_to_f64(bar.high_micros));
        self.entry_lows.push(micros_to_f64(bar.low_micros));
        self.exit_highs.push(micros_to_f64(bar.high_micros));
        self.exit_lows.push(micros_to_f64(bar.low_micros));

        if !ready {
            return TradeSignal::neutral(&self.name, "warmup");
        }

        if view.position_qty > 0 && close < exit_low {
            return TradeSignal::new(
                SignalDirection::Exit,
                0.8,
                format!("close {close:.2} below exit channel {exit_low:.2}"),
                &self.name,
            );
        }
        if view.position_qty < 0 && close > exit_high {
            return TradeSignal::new(
                SignalDirection::Exit,
                0.8,
                format!("close {close:.2} above exit channel {exit_high:.2}"),
                &self.name,
            );
        }

        if close > entry_high {
            let confidence = (0.6 + (close - entry_high) / entry_high * 10.0).min(1.0);
            TradeSignal::new(
                SignalDirection::Long,
                confidence,
                format!("breakout above {entry_high:.2}"),
                &self.name,
            )
        } else if close < entry_low {
            let confidence = (0.6 + (entry_low - close) / entry_low * 10.0).min(1.0);
            TradeSignal::new(
                SignalDirection::Short,
                confidence,
                format!("breakdown below {entry_low:.2}"),
                &self.name,
            )
        } else {
            TradeSignal::neutral(&self.name, "inside channel")
        }
    }

    fn reset(&mut self) {
        self.entry_highs.clear();
        self.entry_lows.clear();
        self.exit_highs.clear();
        self.exit_lows.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
