//! taroko-backtest
//!
//! Deterministic historical replay plus the walk-forward optimizer.
//!
//! The replay engine consumes a sorted sequence of complete bars, drives a
//! strategy through the same ledger semantics and cost model the live
//! engine uses, and reduces the run to per-strategy metrics. Same input +
//! same strategy + same config ⇒ byte-identical metrics.

mod engine;
mod metrics;
mod walkforward;

pub use engine::{BacktestConfig, BacktestEngine, BacktestError, BacktestReport};
pub use metrics::{compute_metrics, StrategyMetrics, MIN_VALID_TRADES};
pub use walkforward::{
    detect_overfit, generate_windows, WalkForwardConfig, WalkForwardOptimizer, WalkForwardReport,
    WalkForwardWindow, WindowResult,
};
