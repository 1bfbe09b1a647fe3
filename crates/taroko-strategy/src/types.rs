use taroko_schemas::{Bar, TradeSignal};

/// Per-strategy evaluation deadline. A strategy that exceeds it is treated
/// as neutral for that tick; it cannot hold up the others.
pub const STRATEGY_DEADLINE_MS: u64 = 200;

/// What family a strategy belongs to (persisted with signals and swaps).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Momentum,
    MeanReversion,
    Breakout,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Momentum => "momentum",
            StrategyKind::MeanReversion => "mean_reversion",
            StrategyKind::Breakout => "breakout",
        }
    }
}

/// The deterministic slice of portfolio state a strategy is allowed to see.
/// Intentionally minimal: no ledger handle, no IO, no clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PortfolioView {
    pub equity_micros: i64,
    /// Signed quantity in the strategy's symbol (0 when flat).
    pub position_qty: i64,
    pub avg_entry_price_micros: i64,
}

impl PortfolioView {
    pub fn flat(equity_micros: i64) -> Self {
        Self {
            equity_micros,
            position_qty: 0,
            avg_entry_price_micros: 0,
        }
    }
}

/// The strategy contract.
///
/// `evaluate` must be deterministic for a given internal state + inputs.
/// `Send` because evaluations run on worker tasks.
pub trait Strategy: Send {
    /// Stable identity (registry key, persisted with every signal).
    fn name(&self) -> &str;

    fn kind(&self) -> StrategyKind;

    /// Market this strategy is eligible for (e.g. `"TW"`); swap candidates
    /// must match the outgoing main strategy's code.
    fn market_code(&self) -> &str;

    /// Produce a signal for one bar.
    fn evaluate(&mut self, view: &PortfolioView, bar: &Bar) -> TradeSignal;

    /// Drop all internal rolling state.
    fn reset(&mut self);
}

// ---------------------------------------------------------------------------
// Rolling window
// ---------------------------------------------------------------------------

/// A bounded FIFO of f64 samples with the rolling statistics the concrete
/// strategies need. Oldest sample is evicted on overflow.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    max_len: usize,
    samples: Vec<f64>,
}

impl RollingWindow {
    pub fn new(max_len: usize) -> Self {
        debug_assert!(max_len > 0);
        Self {
            max_len,
            samples: Vec::with_capacity(max_len),
        }
    }

    pub fn push(&mut self, v: f64) {
        if self.samples.len() == self.max_len {
            self.samples.remove(0);
        }
        self.samples.push(v);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() == self.max_len
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn first(&self) -> Option<f64> {
        self.samples.first().copied()
    }

    pub fn last(&self) -> Option<f64> {
        self.samples.last().copied()
    }

    pub fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    /// Population standard deviation.
    pub fn std(&self) -> f64 {
        if self.samples.len() < 2 {
            return 0.0;
        }
        let m = self.mean();
        let var = self.samples.iter().map(|v| (v - m) * (v - m)).sum::<f64>()
            / self.samples.len() as f64;
        var.sqrt()
    }

    pub fn max(&self) -> f64 {
        self.samples.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn min(&self) -> f64 {
        self.samples.iter().copied().fold(f64::INFINITY, f64::min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_evicts_oldest() {
        let mut w = RollingWindow::new(3);
        for v in [1.0, 2.0, 3.0, 4.0] {
            w.push(v);
        }
        assert_eq!(w.len(), 3);
        assert_eq!(w.first(), Some(2.0));
        assert_eq!(w.last(), Some(4.0));
    }

    #[test]
    fn stats_on_known_series() {
        let mut w = RollingWindow::new(4);
        for v in [2.0, 4.0, 4.0, 6.0] {
            w.push(v);
        }
        assert_eq!(w.mean(), 4.0);
        // population variance = (4+0+0+4)/4 = 2
        assert!((w.std() - 2.0_f64.sqrt()).abs() < 1e-12);
        assert_eq!(w.max(), 6.0);
        assert_eq!(w.min(), 2.0);
    }

    #[test]
    fn std_needs_two_samples() {
        let mut w = RollingWindow::new(4);
        w.push(5.0);
        assert_eq!(w.std(), 0.0);
    }
}
