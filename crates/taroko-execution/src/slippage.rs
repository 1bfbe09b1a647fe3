//! The adaptive slippage model.
//!
//! Rate in basis points:
//! `total = base + volumeFactor + timeFactor + sizeFactor`, blended 70/30
//! with the historically realized rate when one is available.
//!
//! - `base = 5 bps`
//! - `volumeFactor = 15 · max(0, 1 − ADV/1_000_000)`
//! - `timeFactor = 10 bps` inside the Taipei opening/closing auction
//!   windows, else 0
//! - `sizeFactor = 5 · max(0, orderSize/ADV − 0.01) / 0.01`
//!
//! Total expected transaction cost adds the 0.1425% brokerage fee and the
//! 0.3% securities tax on sells.

use chrono::{DateTime, Utc};
use taroko_schemas::{session, Side};

/// Brokerage fee, basis points (0.1425%).
pub const FEE_BPS: f64 = 14.25;

/// Securities transaction tax on sells, basis points (0.3%).
pub const SELL_TAX_BPS: f64 = 30.0;

const BASE_BPS: f64 = 5.0;
const VOLUME_COEF_BPS: f64 = 15.0;
const ADV_THRESHOLD: f64 = 1_000_000.0;
const TIME_BPS: f64 = 10.0;
const SIZE_COEF_BPS: f64 = 5.0;
const SIZE_REF_FRACTION: f64 = 0.01;
const MODEL_WEIGHT: f64 = 0.7;
const HISTORY_WEIGHT: f64 = 0.3;

/// Inputs for one slippage estimate.
#[derive(Debug, Clone)]
pub struct SlippageInput {
    /// Average daily volume in shares.
    pub adv: f64,
    /// Order size in shares.
    pub order_qty: f64,
    /// Submission time (the time factor is Taipei-session aware).
    pub now: DateTime<Utc>,
    /// Historically realized slippage for the symbol, if known.
    pub historical_bps: Option<f64>,
}

/// Stateless estimator; constants only, so it is shared freely between the
/// live router and the backtest cost model.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlippageModel;

impl SlippageModel {
    pub fn new() -> Self {
        Self
    }

    /// The modelled slippage rate, blended with history when available.
    pub fn rate_bps(&self, inp: &SlippageInput) -> f64 {
        let volume_factor = if inp.adv > 0.0 {
            VOLUME_COEF_BPS * (1.0 - inp.adv / ADV_THRESHOLD).max(0.0)
        } else {
            VOLUME_COEF_BPS
        };

        let time_factor = if session::in_auction_window(inp.now) {
            TIME_BPS
        } else {
            0.0
        };

        let size_factor = if inp.adv > 0.0 {
            SIZE_COEF_BPS * (inp.order_qty / inp.adv - SIZE_REF_FRACTION).max(0.0)
                / SIZE_REF_FRACTION
        } else {
            0.0
        };

        let model = BASE_BPS + volume_factor + time_factor + size_factor;

        match inp.historical_bps {
            Some(hist) if hist >= 0.0 => MODEL_WEIGHT * model + HISTORY_WEIGHT * hist,
            _ => model,
        }
    }

    /// Slippage + fee (+ tax when selling), in basis points.
    pub fn total_cost_bps(&self, side: Side, inp: &SlippageInput) -> f64 {
        let tax = match side {
            Side::Sell => SELL_TAX_BPS,
            Side::Buy => 0.0,
        };
        self.rate_bps(inp) + FEE_BPS + tax
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use taroko_schemas::session::taipei_to_utc;

    fn at(hms: (u32, u32, u32)) -> DateTime<Utc> {
        // Tuesday 2025-06-03, a plain trading day.
        taipei_to_utc(
            NaiveDate::from_ymd_opt(2025, 6, 3).unwrap(),
            NaiveTime::from_hms_opt(hms.0, hms.1, hms.2).unwrap(),
        )
    }

    fn input(adv: f64, qty: f64, hms: (u32, u32, u32)) -> SlippageInput {
        SlippageInput {
            adv,
            order_qty: qty,
            now: at(hms),
            historical_bps: None,
        }
    }

    #[test]
    fn liquid_midday_small_order_is_base_only() {
        let m = SlippageModel::new();
        // ADV above threshold, tiny order, mid-session.
        let rate = m.rate_bps(&input(2_000_000.0, 1_000.0, (11, 0, 0)));
        assert!((rate - 5.0).abs() < 1e-9);
    }

    #[test]
    fn thin_volume_adds_up_to_15_bps() {
        let m = SlippageModel::new();
        // ADV = 0.5M -> volumeFactor = 15 * 0.5 = 7.5.
        let rate = m.rate_bps(&input(500_000.0, 1_000.0, (11, 0, 0)));
        assert!((rate - 12.5).abs() < 1e-9);
    }

    #[test]
    fn auction_windows_add_10_bps() {
        let m = SlippageModel::new();
        let open = m.rate_bps(&input(2_000_000.0, 1_000.0, (9, 10, 0)));
        let close = m.rate_bps(&input(2_000_000.0, 1_000.0, (13, 10, 0)));
        let mid = m.rate_bps(&input(2_000_000.0, 1_000.0, (11, 0, 0)));
        assert!((open - (mid + 10.0)).abs() < 1e-9);
        assert!((close - (mid + 10.0)).abs() < 1e-9);
    }

    #[test]
    fn oversized_order_scales_size_factor() {
        let m = SlippageModel::new();
        // qty/ADV = 0.03 -> (0.03-0.01)/0.01 = 2 -> 10 bps extra.
        let rate = m.rate_bps(&input(2_000_000.0, 60_000.0, (11, 0, 0)));
        assert!((rate - 15.0).abs() < 1e-9);
    }

    #[test]
    fn historical_blend_is_70_30() {
        let m = SlippageModel::new();
        let mut inp = input(2_000_000.0, 1_000.0, (11, 0, 0));
        inp.historical_bps = Some(25.0);
        // 0.7*5 + 0.3*25 = 11.0
        assert!((m.rate_bps(&inp) - 11.0).abs() < 1e-9);
    }

    #[test]
    fn sell_cost_includes_tax() {
        let m = SlippageModel::new();
        let inp = input(2_000_000.0, 1_000.0, (11, 0, 0));
        let buy = m.total_cost_bps(Side::Buy, &inp);
        let sell = m.total_cost_bps(Side::Sell, &inp);
        assert!((buy - (5.0 + FEE_BPS)).abs() < 1e-9);
        assert!((sell - buy - SELL_TAX_BPS).abs() < 1e-9);
    }

    #[test]
    fn zero_adv_is_fully_penalized() {
        let m = SlippageModel::new();
        let rate = m.rate_bps(&input(0.0, 1_000.0, (11, 0, 0)));
        assert!((rate - 20.0).abs() < 1e-9);
    }
}
