//! Micros fixed-point helpers.
//!
//! All money amounts in this system use a 1e-6 (micros) fixed-point
//! representation stored as `i64`: 1 TWD (or 1 index point) = 1_000_000
//! micros. Prices crossing the bridge boundary arrive as JSON floats or
//! decimal strings and are converted here exactly once; everything inward of
//! the adapters is integer arithmetic so replays are bit-reproducible.

use anyhow::{anyhow, Result};

/// 1 currency unit = 1_000_000 micros.
pub const MICROS_SCALE: i64 = 1_000_000;

/// Parse a decimal string (e.g. `"182.34"`) into micros without going
/// through floating point.
///
/// Accepts an optional leading sign and at most six fractional digits;
/// extra fractional digits are rejected rather than silently rounded.
pub fn price_to_micros(s: &str) -> Result<i64> {
    let s = s.trim();
    if s.is_empty() {
        return Err(anyhow!("empty price string"));
    }

    let (neg, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };

    let (int_part, frac_part) = match digits.split_once('.') {
        Some((i, f)) => (i, f),
        None => (digits, ""),
    };

    if int_part.is_empty() && frac_part.is_empty() {
        return Err(anyhow!("invalid price string '{s}'"));
    }
    if frac_part.len() > 6 {
        return Err(anyhow!("price '{s}' has more than 6 fractional digits"));
    }
    if !int_part.chars().all(|c| c.is_ascii_digit())
        || !frac_part.chars().all(|c| c.is_ascii_digit())
    {
        return Err(anyhow!("invalid price string '{s}'"));
    }

    let int_val: i64 = if int_part.is_empty() {
        0
    } else {
        int_part
            .parse()
            .map_err(|_| anyhow!("integer part of '{s}' out of range"))?
    };

    let mut frac_val: i64 = 0;
    if !frac_part.is_empty() {
        frac_val = frac_part
            .parse()
            .map_err(|_| anyhow!("fractional part of '{s}' out of range"))?;
        for _ in frac_part.len()..6 {
            frac_val *= 10;
        }
    }

    let magnitude = int_val
        .checked_mul(MICROS_SCALE)
        .and_then(|v| v.checked_add(frac_val))
        .ok_or_else(|| anyhow!("price '{s}' overflows micros"))?;

    Ok(if neg { -magnitude } else { magnitude })
}

/// Convert a bridge-boundary float into micros (round-half-away-from-zero).
///
/// Only for values arriving as JSON numbers; internal arithmetic never
/// round-trips through f64.
pub fn f64_to_micros(v: f64) -> i64 {
    (v * MICROS_SCALE as f64).round() as i64
}

/// Convert micros back to f64 for display and analytics.
pub fn micros_to_f64(m: i64) -> f64 {
    m as f64 / MICROS_SCALE as f64
}

/// Multiply a per-unit price by a share quantity with an i128 intermediate,
/// clamped into i64.
pub fn mul_qty_price_micros(qty: i64, price_micros: i64) -> i64 {
    let wide = (qty as i128) * (price_micros as i128);
    clamp_i128(wide)
}

/// Apply a basis-point adjustment to a price: positive bps moves the price
/// up, negative down. Deterministic integer arithmetic.
pub fn apply_bps(price_micros: i64, bps: i64) -> i64 {
    let adj = (price_micros as i128 * bps as i128) / 10_000i128;
    clamp_i128(price_micros as i128 + adj)
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
