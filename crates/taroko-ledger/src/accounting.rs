//! The raw averaging/realization mechanics. Pure, integer-only; the
//! invariant-checking boundary lives in `lib.rs`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use taroko_schemas::FillRecord;

use crate::position::Position;

/// One realized P&L event (a close, partial close, or flatten).
///
/// `pnl_micros` is gross of fees/tax — the costs ride along separately so
/// the accounting identity over fill sequences stays exact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealizedPnl {
    pub symbol: String,
    pub quantity_closed: i64,
    pub entry_price_micros: i64,
    pub exit_price_micros: i64,
    pub pnl_micros: i64,
    pub fee_micros: i64,
    pub tax_micros: i64,
    pub ts: DateTime<Utc>,
    pub reason: String,
}

/// Apply one fill to a position, returning the realized entry when the fill
/// closed against an opposing position.
///
/// Rules (average-cost):
/// - flat → open: seed quantity/average/entry_time from the fill.
/// - same sign: `new_avg = (old_qty*old_avg + add_qty*add_px) / (old_qty+add_qty)`
///   (i128 intermediates, truncating division); entry_time preserved.
/// - opposite sign: realize on `min(|fill|, |position|)`; if the fill
///   overshoots, the residual reseeds the position at the fill price with a
///   fresh entry_time.
pub fn apply_fill(pos: &mut Position, fill: &FillRecord) -> Option<RealizedPnl> {
    let signed = fill.signed_qty();
    debug_assert!(signed != 0);

    if pos.quantity == 0 {
        pos.quantity = signed;
        pos.avg_entry_price_micros = fill.price_micros;
        pos.entry_time = Some(fill.ts);
        return None;
    }

    if pos.quantity.signum() == signed.signum() {
        // Same-direction add: re-weight the average, keep entry_time.
        let old_qty = pos.quantity.abs() as i128;
        let add_qty = signed.abs() as i128;
        let weighted = old_qty * pos.avg_entry_price_micros as i128
            + add_qty * fill.price_micros as i128;
        pos.avg_entry_price_micros = (weighted / (old_qty + add_qty)) as i64;
        pos.quantity += signed;
        return None;
    }

    // Opposing fill: close up to the open quantity.
    let closable = pos.quantity.abs().min(signed.abs());
    let pnl_per_unit = if pos.quantity > 0 {
        fill.price_micros as i128 - pos.avg_entry_price_micros as i128
    } else {
        pos.avg_entry_price_micros as i128 - fill.price_micros as i128
    };
    let pnl = clamp_i128(pnl_per_unit * closable as i128);

    let realized = RealizedPnl {
        symbol: pos.symbol.clone(),
        quantity_closed: closable,
        entry_price_micros: pos.avg_entry_price_micros,
        exit_price_micros: fill.price_micros,
        pnl_micros: pnl,
        fee_micros: fill.fee_micros,
        tax_micros: fill.tax_micros,
        ts: fill.ts,
        reason: "close".to_string(),
    };

    let residual = signed + pos.quantity; // what remains after netting
    if residual == 0 {
        *pos = Position::flat(pos.symbol.clone(), pos.trading_mode);
    } else if residual.signum() == pos.quantity.signum() {
        // Partial close: direction unchanged, average unchanged.
        pos.quantity = residual;
    } else {
        // Flip: residual opens a fresh position at the fill price.
        pos.quantity = residual;
        pos.avg_entry_price_micros = fill.price_micros;
        pos.entry_time = Some(fill.ts);
    }

    Some(realized)
}

fn clamp_i128(x: i128) -> i64 {
    if x > i64::MAX as i128 {
        i64::MAX
    } else if x < i64::MIN as i128 {
        i64::MIN
    } else {
        x as i64
    }
}
