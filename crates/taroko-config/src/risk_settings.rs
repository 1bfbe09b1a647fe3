use serde::{Deserialize, Serialize};

/// Trading tunables with conservative defaults.
///
/// Values are plain units (TWD, percent, minutes) — they are operator-facing
/// and land in chat replies; micros conversion happens at the point of use.
/// Overridable from `risk_settings` / `system_config` rows at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskSettings {
    /// Daily realized-loss breaker (TWD). Breach is fatal: flatten + pause.
    pub daily_loss_limit: f64,
    /// Rolling weekly realized-loss breaker (TWD). Breach pauses until the
    /// following Monday.
    pub weekly_loss_limit: f64,
    /// Per-trade risk fraction of equity for the sizer.
    pub risk_pct_per_trade: f64,
    /// Kelly fraction hard cap before halving.
    pub kelly_cap: f64,
    /// ATR sizing multiplier.
    pub atr_multiplier: f64,
    /// Maximum position notional as a fraction of equity.
    pub max_position_pct: f64,
    /// Stock stop-loss as a percent of entry notional.
    pub stock_stop_loss_pct: f64,
    /// Futures stop-loss in index points per contract (breach at
    /// `-threshold * contracts`).
    pub futures_stop_loss_per_contract: f64,
    /// Hard time-based exit for any open position (minutes).
    pub max_hold_minutes: i64,
    /// Earnings-blackout cache refresh interval (days).
    pub blackout_refresh_ttl_days: i64,
    /// A recent LLM `BLOCK` insight vetoes entries for this many minutes.
    pub llm_block_window_min: i64,
    /// Strategy hot-swap trigger: trailing max drawdown percent.
    pub swap_mdd_threshold_pct: f64,
    /// Trailing window for the swap Sharpe comparison (days).
    pub swap_lookback_days: i64,
    /// Go-live gate: minimum simulated trades.
    pub golive_min_trades: i64,
    /// Go-live gate: minimum win rate percent.
    pub golive_min_win_rate_pct: f64,
    /// Go-live gate: maximum historical drawdown percent.
    pub golive_max_drawdown_pct: f64,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            daily_loss_limit: 4_500.0,
            weekly_loss_limit: 12_000.0,
            risk_pct_per_trade: 0.01,
            kelly_cap: 0.25,
            atr_multiplier: 2.0,
            max_position_pct: 0.10,
            stock_stop_loss_pct: 2.0,
            futures_stop_loss_per_contract: 500.0,
            max_hold_minutes: 45,
            blackout_refresh_ttl_days: 7,
            llm_block_window_min: 30,
            swap_mdd_threshold_pct: 15.0,
            swap_lookback_days: 30,
            golive_min_trades: 20,
            golive_min_win_rate_pct: 45.0,
            golive_max_drawdown_pct: 20.0,
        }
    }
}
