//! taroko-ledger
//!
//! The position ledger — source of truth for positions and P&L.
//!
//! # Purpose
//! Maps `symbol → Position` under a single logical writer (the engine loop).
//! This module owns the invariant-checking boundary:
//!
//! - No zero/negative fill quantity or price reaches the accounting rules.
//! - `quantity == 0 ⇔ entry_time == None` holds after every mutation.
//! - Averaging: adding to a same-sign position re-weights the average entry
//!   price; a sign flip realizes P&L on the closed portion and reseeds the
//!   entry at the fill price for the residual.
//! - `flatten` produces exactly one realized P&L entry.
//!
//! # Determinism
//! Pure integer arithmetic (i128 intermediates), no IO, no clock reads.
//! Two ledgers fed the same fill sequence always produce identical state.

mod accounting;
mod position;

pub use accounting::RealizedPnl;
pub use position::Position;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use taroko_schemas::{mul_qty_price_micros, FillRecord, Side, TradingMode};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// All invariant violations the ledger can surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Fill quantity must be strictly positive.
    NonPositiveQty { qty: i64 },
    /// Fill price must be strictly positive.
    NonPositivePrice { price_micros: i64 },
    /// Fill fees/tax must be non-negative.
    NegativeCost { amount_micros: i64 },
    /// Symbol must be non-empty.
    EmptySymbol,
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NonPositiveQty { qty } => {
                write!(f, "ledger invariant: qty must be > 0, got {qty}")
            }
            Self::NonPositivePrice { price_micros } => {
                write!(f, "ledger invariant: price_micros must be > 0, got {price_micros}")
            }
            Self::NegativeCost { amount_micros } => {
                write!(f, "ledger invariant: costs must be >= 0, got {amount_micros}")
            }
            Self::EmptySymbol => write!(f, "ledger invariant: symbol must not be empty"),
        }
    }
}

impl std::error::Error for LedgerError {}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// A point-in-time read-only view of the ledger. Cloned on every call to
/// [`Ledger::snapshot`]; everyone but the engine loop reads these.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerSnapshot {
    pub positions: BTreeMap<String, Position>,
    pub realized_pnl_micros: i64,
    pub fill_count: usize,
}

impl LedgerSnapshot {
    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn quantity(&self, symbol: &str) -> i64 {
        self.positions.get(symbol).map(|p| p.quantity).unwrap_or(0)
    }

    pub fn is_flat(&self) -> bool {
        self.positions.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// The ledger proper. Exclusive writer = engine loop; everyone else gets
/// snapshots.
#[derive(Debug, Clone)]
pub struct Ledger {
    trading_mode: TradingMode,
    positions: BTreeMap<String, Position>,
    realized: Vec<RealizedPnl>,
    realized_pnl_micros: i64,
    fill_count: usize,
}

impl Ledger {
    pub fn new(trading_mode: TradingMode) -> Self {
        Self {
            trading_mode,
            positions: BTreeMap::new(),
            realized: Vec::new(),
            realized_pnl_micros: 0,
            fill_count: 0,
        }
    }

    // -----------------------------------------------------------------------
    // Write surface
    // -----------------------------------------------------------------------

    /// Apply a fill, enforcing invariants. Returns the realized P&L entry if
    /// the fill closed (part of) an opposing position. The ledger is **not**
    /// mutated on error.
    pub fn apply(&mut self, fill: &FillRecord) -> Result<Option<RealizedPnl>, LedgerError> {
        Self::validate_fill(fill)?;

        let pos = self
            .positions
            .entry(fill.symbol.clone())
            .or_insert_with(|| Position::flat(fill.symbol.clone(), self.trading_mode));

        let realized = accounting::apply_fill(pos, fill);
        self.fill_count += 1;

        if pos.quantity == 0 {
            self.positions.remove(&fill.symbol);
        }

        if let Some(r) = &realized {
            self.realized_pnl_micros = self.realized_pnl_micros.saturating_add(r.pnl_micros);
            self.realized.push(r.clone());
        }

        Ok(realized)
    }

    /// Close the whole position at `price_micros`. Produces exactly one
    /// realized entry; a no-op returning `None` when already flat.
    pub fn flatten(
        &mut self,
        symbol: &str,
        price_micros: i64,
        ts: DateTime<Utc>,
        reason: &str,
    ) -> Result<Option<RealizedPnl>, LedgerError> {
        if price_micros <= 0 {
            return Err(LedgerError::NonPositivePrice { price_micros });
        }
        let qty = self.positions.get(symbol).map(|p| p.quantity).unwrap_or(0);
        if qty == 0 {
            return Ok(None);
        }

        let side = if qty > 0 { Side::Sell } else { Side::Buy };
        let fill = FillRecord::new(Uuid::new_v4(), symbol, side, qty.abs(), price_micros, ts);
        let mut realized = self.apply(&fill)?;
        if let Some(r) = realized.as_mut() {
            r.reason = reason.to_string();
            // keep the stored copy in sync
            if let Some(last) = self.realized.last_mut() {
                last.reason = reason.to_string();
            }
        }
        Ok(realized)
    }

    // -----------------------------------------------------------------------
    // Read surface
    // -----------------------------------------------------------------------

    pub fn get(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn quantity(&self, symbol: &str) -> i64 {
        self.positions.get(symbol).map(|p| p.quantity).unwrap_or(0)
    }

    pub fn is_flat(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn open_symbols(&self) -> Vec<String> {
        self.positions.keys().cloned().collect()
    }

    pub fn realized_pnl_micros(&self) -> i64 {
        self.realized_pnl_micros
    }

    pub fn realized_entries(&self) -> &[RealizedPnl] {
        &self.realized
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            positions: self.positions.clone(),
            realized_pnl_micros: self.realized_pnl_micros,
            fill_count: self.fill_count,
        }
    }

    /// Unrealized P&L for one symbol at `mark_micros` (0 when flat).
    pub fn unrealized_micros(&self, symbol: &str, mark_micros: i64) -> i64 {
        self.positions
            .get(symbol)
            .map(|p| p.unrealized_micros(mark_micros))
            .unwrap_or(0)
    }

    /// Mark-to-market equity: `cash + Σ(qty × mark)` over open positions.
    /// Symbols without a mark contribute at their entry price.
    pub fn equity_micros(&self, cash_micros: i64, marks: &BTreeMap<String, i64>) -> i64 {
        let mut equity = cash_micros;
        for (sym, pos) in &self.positions {
            let mark = *marks.get(sym).unwrap_or(&pos.avg_entry_price_micros);
            equity = equity.saturating_add(mul_qty_price_micros(pos.quantity, mark));
        }
        equity
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    fn validate_fill(fill: &FillRecord) -> Result<(), LedgerError> {
        if fill.symbol.trim().is_empty() {
            return Err(LedgerError::EmptySymbol);
        }
        if fill.quantity <= 0 {
            return Err(LedgerError::NonPositiveQty { qty: fill.quantity });
        }
        if fill.price_micros <= 0 {
            return Err(LedgerError::NonPositivePrice {
                price_micros: fill.price_micros,
            });
        }
        if fill.fee_micros < 0 {
            return Err(LedgerError::NegativeCost {
                amount_micros: fill.fee_micros,
            });
        }
        if fill.tax_micros < 0 {
            return Err(LedgerError::NegativeCost {
                amount_micros: fill.tax_micros,
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use taroko_schemas::MICROS_SCALE;

    const M: i64 = MICROS_SCALE;

    fn ts(min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 3, 2, min, 0).unwrap()
    }

    fn fill(symbol: &str, side: Side, qty: i64, price: i64, min: u32) -> FillRecord {
        FillRecord::new(Uuid::new_v4(), symbol, side, qty, price * M, ts(min))
    }

    // --- Invariant enforcement ---

    #[test]
    fn rejects_empty_symbol() {
        let mut l = Ledger::new(TradingMode::Stock);
        let f = FillRecord::new(Uuid::new_v4(), " ", Side::Buy, 1, M, ts(0));
        assert_eq!(l.apply(&f), Err(LedgerError::EmptySymbol));
        assert!(l.is_flat());
    }

    #[test]
    fn rejects_nonpositive_price_on_flatten() {
        let mut l = Ledger::new(TradingMode::Stock);
        let err = l.flatten("2454.TW", 0, ts(0), "x").unwrap_err();
        assert_eq!(err, LedgerError::NonPositivePrice { price_micros: 0 });
    }

    // --- Entry / averaging ---

    #[test]
    fn flat_to_long_sets_entry_time() {
        let mut l = Ledger::new(TradingMode::Stock);
        l.apply(&fill("2454.TW", Side::Buy, 2, 22_500, 1)).unwrap();
        let p = l.get("2454.TW").unwrap();
        assert_eq!(p.quantity, 2);
        assert_eq!(p.avg_entry_price_micros, 22_500 * M);
        assert_eq!(p.entry_time, Some(ts(1)));
    }

    #[test]
    fn same_direction_add_reweights_average_and_keeps_entry_time() {
        let mut l = Ledger::new(TradingMode::Stock);
        l.apply(&fill("2330.TW", Side::Buy, 1_000, 500, 1)).unwrap();
        l.apply(&fill("2330.TW", Side::Buy, 1_000, 520, 5)).unwrap();
        let p = l.get("2330.TW").unwrap();
        assert_eq!(p.quantity, 2_000);
        // (1000*500 + 1000*520) / 2000 = 510
        assert_eq!(p.avg_entry_price_micros, 510 * M);
        assert_eq!(p.entry_time, Some(ts(1)));
    }

    #[test]
    fn partial_close_realizes_and_keeps_average() {
        let mut l = Ledger::new(TradingMode::Stock);
        l.apply(&fill("2330.TW", Side::Buy, 2_000, 500, 1)).unwrap();
        let r = l
            .apply(&fill("2330.TW", Side::Sell, 500, 510, 10))
            .unwrap()
            .unwrap();
        // realized = (510-500)*500 = 5_000
        assert_eq!(r.pnl_micros, 5_000 * M);
        let p = l.get("2330.TW").unwrap();
        assert_eq!(p.quantity, 1_500);
        assert_eq!(p.avg_entry_price_micros, 500 * M);
        assert_eq!(p.entry_time, Some(ts(1)));
    }

    #[test]
    fn full_close_clears_position_and_entry_time() {
        let mut l = Ledger::new(TradingMode::Stock);
        l.apply(&fill("2330.TW", Side::Buy, 1_000, 500, 1)).unwrap();
        let r = l
            .apply(&fill("2330.TW", Side::Sell, 1_000, 495, 20))
            .unwrap()
            .unwrap();
        assert_eq!(r.pnl_micros, -5_000 * M);
        assert!(l.get("2330.TW").is_none());
        assert!(l.is_flat());
    }

    #[test]
    fn sign_flip_realizes_closed_portion_and_reseeds_entry() {
        let mut l = Ledger::new(TradingMode::Futures);
        l.apply(&fill("TXF", Side::Buy, 2, 22_500, 1)).unwrap();
        // Sell 5 @ 22_600: closes 2 long (+100*2), opens 3 short @ 22_600.
        let r = l.apply(&fill("TXF", Side::Sell, 5, 22_600, 30)).unwrap().unwrap();
        assert_eq!(r.quantity_closed, 2);
        assert_eq!(r.pnl_micros, 200 * M);
        let p = l.get("TXF").unwrap();
        assert_eq!(p.quantity, -3);
        assert_eq!(p.avg_entry_price_micros, 22_600 * M);
        assert_eq!(p.entry_time, Some(ts(30)));
    }

    #[test]
    fn short_close_pnl_is_entry_minus_exit() {
        let mut l = Ledger::new(TradingMode::Futures);
        l.apply(&fill("TXF", Side::Sell, 2, 22_600, 1)).unwrap();
        let r = l.apply(&fill("TXF", Side::Buy, 2, 22_500, 15)).unwrap().unwrap();
        // (22600-22500)*2 = 200
        assert_eq!(r.pnl_micros, 200 * M);
        assert!(l.is_flat());
    }

    // --- Flatten ---

    #[test]
    fn flatten_produces_exactly_one_realized_entry() {
        let mut l = Ledger::new(TradingMode::Stock);
        l.apply(&fill("2454.TW", Side::Buy, 70, 1_000, 1)).unwrap();
        let r = l.flatten("2454.TW", 1_010 * M, ts(40), "stock change").unwrap().unwrap();
        assert_eq!(r.quantity_closed, 70);
        assert_eq!(r.reason, "stock change");
        assert_eq!(l.realized_entries().len(), 1);
        assert!(l.is_flat());
    }

    #[test]
    fn flatten_when_flat_is_noop() {
        let mut l = Ledger::new(TradingMode::Stock);
        assert_eq!(l.flatten("2454.TW", M, ts(0), "x").unwrap(), None);
        assert_eq!(l.realized_entries().len(), 0);
    }

    #[test]
    fn flatten_a_short_buys_back() {
        let mut l = Ledger::new(TradingMode::Futures);
        l.apply(&fill("TXF", Side::Sell, 3, 22_000, 1)).unwrap();
        let r = l.flatten("TXF", 21_900 * M, ts(9), "eod").unwrap().unwrap();
        assert_eq!(r.pnl_micros, 300 * M);
        assert!(l.is_flat());
    }

    // --- Accounting identity ---

    #[test]
    fn accounting_identity_over_fill_sequence() {
        // sum(realized) + unrealized(mark) == sum(signed_qty * (mark - fill_price))
        let mut l = Ledger::new(TradingMode::Stock);
        let fills = [
            fill("X", Side::Buy, 100, 50, 1),
            fill("X", Side::Buy, 50, 56, 2),
            fill("X", Side::Sell, 120, 60, 3),
            fill("X", Side::Sell, 80, 58, 4), // flips short 50
            fill("X", Side::Buy, 20, 55, 5),
        ];
        for f in &fills {
            l.apply(f).unwrap();
        }

        let mark = 57 * M;
        let lhs = l.realized_pnl_micros() + l.unrealized_micros("X", mark);
        let rhs: i64 = fills
            .iter()
            .map(|f| f.signed_qty() * (mark - f.price_micros))
            .sum();
        assert_eq!(lhs, rhs);
    }

    // --- Marks / equity ---

    #[test]
    fn equity_includes_open_positions_at_mark() {
        let mut l = Ledger::new(TradingMode::Stock);
        l.apply(&fill("2330.TW", Side::Buy, 1_000, 500, 1)).unwrap();
        let marks = BTreeMap::from([("2330.TW".to_string(), 510 * M)]);
        // cash 1_000_000 + 1000*510
        assert_eq!(l.equity_micros(1_000_000 * M, &marks), (1_000_000 + 510_000) * M);
    }

    #[test]
    fn snapshot_is_detached_copy() {
        let mut l = Ledger::new(TradingMode::Stock);
        l.apply(&fill("2330.TW", Side::Buy, 1_000, 500, 1)).unwrap();
        let snap = l.snapshot();
        l.flatten("2330.TW", 505 * M, ts(30), "x").unwrap();
        assert_eq!(snap.quantity("2330.TW"), 1_000);
        assert_eq!(l.quantity("2330.TW"), 0);
    }
}
