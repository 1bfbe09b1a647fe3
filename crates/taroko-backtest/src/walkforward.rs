//! Walk-forward optimization.
//!
//! Windows slide train→test through history (train:test 3:1, step 20 days,
//! test ≥ 20 days). Inside a window the parameter grid is scored on the
//! training slice with a multi-objective fitness, the winner re-runs on the
//! untouched test slice, and the IS/OOS pair feeds the overfit detector.
//! Candidates evaluate in parallel; windows stay sequential so the logs
//! read in order.

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use taroko_schemas::Bar;
use taroko_strategy::{build_strategy, param_grid};
use tracing::info;

use crate::engine::{BacktestConfig, BacktestEngine};
use crate::metrics::StrategyMetrics;

// ---------------------------------------------------------------------------
// Windows
// ---------------------------------------------------------------------------

/// One train/test window. Invariant:
/// `train_start <= train_end < test_start <= test_end`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkForwardWindow {
    pub index: usize,
    pub train_start: NaiveDate,
    pub train_end: NaiveDate,
    pub test_start: NaiveDate,
    pub test_end: NaiveDate,
}

impl WalkForwardWindow {
    pub fn is_well_formed(&self) -> bool {
        self.train_start <= self.train_end
            && self.train_end < self.test_start
            && self.test_start <= self.test_end
    }

    /// Train:test length ratio in days.
    pub fn ratio(&self) -> f64 {
        let train = (self.train_end - self.train_start).num_days() + 1;
        let test = (self.test_end - self.test_start).num_days() + 1;
        train as f64 / test as f64
    }
}

/// Window-generation knobs.
#[derive(Debug, Clone)]
pub struct WalkForwardConfig {
    /// Train days per test day.
    pub train_test_ratio: f64,
    /// Slide between consecutive windows (days).
    pub step_days: i64,
    /// Test slice length (days, minimum 20).
    pub test_days: i64,
}

impl Default for WalkForwardConfig {
    fn default() -> Self {
        Self {
            train_test_ratio: 3.0,
            step_days: 20,
            test_days: 20,
        }
    }
}

/// Generate sequential windows covering `[start, end]`.
pub fn generate_windows(
    start: NaiveDate,
    end: NaiveDate,
    cfg: &WalkForwardConfig,
) -> Vec<WalkForwardWindow> {
    let test_days = cfg.test_days.max(20);
    let train_days = ((test_days as f64) * cfg.train_test_ratio).round() as i64;
    let mut windows = Vec::new();

    let mut train_start = start;
    let mut index = 0usize;
    loop {
        let train_end = train_start + chrono::Duration::days(train_days - 1);
        let test_start = train_end + chrono::Duration::days(1);
        let test_end = test_start + chrono::Duration::days(test_days - 1);
        if test_end > end {
            break;
        }
        let w = WalkForwardWindow {
            index,
            train_start,
            train_end,
            test_start,
            test_end,
        };
        debug_assert!(w.is_well_formed());
        windows.push(w);
        index += 1;
        train_start = train_start + chrono::Duration::days(cfg.step_days);
    }

    windows
}

// ---------------------------------------------------------------------------
// Fitness + overfit detection
// ---------------------------------------------------------------------------

/// Multi-objective fitness over candidates in one window:
/// `0.4·norm(Sharpe) + 0.35·norm(Sortino) + 0.25·norm(Calmar)`, times a
/// trade-count penalty (< 20 trades) and a drawdown penalty (> 20% MDD).
fn fitness_scores(candidates: &[StrategyMetrics]) -> Vec<f64> {
    let norm = |vals: Vec<f64>| -> Vec<f64> {
        let lo = vals.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = vals.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if (hi - lo).abs() < f64::EPSILON {
            return vec![0.5; vals.len()];
        }
        vals.iter().map(|v| (v - lo) / (hi - lo)).collect()
    };

    let sharpe = norm(candidates.iter().map(|m| m.sharpe).collect());
    let sortino = norm(candidates.iter().map(|m| m.sortino).collect());
    let calmar = norm(candidates.iter().map(|m| m.calmar).collect());

    candidates
        .iter()
        .enumerate()
        .map(|(i, m)| {
            let base = 0.4 * sharpe[i] + 0.35 * sortino[i] + 0.25 * calmar[i];
            let trade_penalty = (m.total_trades as f64 / 20.0).min(1.0);
            let dd_penalty = if m.max_drawdown_pct > 20.0 {
                (1.0 - (m.max_drawdown_pct - 20.0) / 80.0).max(0.1)
            } else {
                1.0
            };
            base * trade_penalty * dd_penalty
        })
        .collect()
}

/// Overfit rules — any one flags the window:
/// - IS Sharpe > 0 while OOS Sharpe < 0
/// - IS/OOS Sharpe ratio > 2
/// - OOS return < −5% while IS return > 0
pub fn detect_overfit(is: &StrategyMetrics, oos: &StrategyMetrics) -> bool {
    if is.sharpe > 0.0 && oos.sharpe < 0.0 {
        return true;
    }
    if oos.sharpe > f64::EPSILON && is.sharpe / oos.sharpe > 2.0 {
        return true;
    }
    if oos.total_return_pct < -5.0 && is.total_return_pct > 0.0 {
        return true;
    }
    false
}

fn robustness_score(is_sharpe: f64, oos_sharpe: f64) -> f64 {
    if is_sharpe.abs() < f64::EPSILON {
        return 0.0;
    }
    (100.0 * oos_sharpe / is_sharpe).clamp(0.0, 100.0)
}

// ---------------------------------------------------------------------------
// Optimizer
// ---------------------------------------------------------------------------

/// One window's outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowResult {
    pub window: WalkForwardWindow,
    pub optimal_params: BTreeMap<String, f64>,
    pub in_sample: StrategyMetrics,
    pub out_of_sample: StrategyMetrics,
    pub is_oos_sharpe_ratio: f64,
    pub robustness_score: f64,
    pub is_overfit: bool,
}

/// The aggregate walk-forward report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkForwardReport {
    pub strategy_family: String,
    pub windows: Vec<WindowResult>,
    pub avg_robustness_score: f64,
    pub avg_is_oos_sharpe_ratio: f64,
    pub overfit_warning: bool,
    /// "High" | "Medium" | "Low" from the flagged-window fraction.
    pub confidence: String,
}

pub struct WalkForwardOptimizer {
    engine: BacktestEngine,
    family: String,
}

impl WalkForwardOptimizer {
    pub fn new(config: BacktestConfig, family: impl Into<String>) -> Self {
        Self {
            engine: BacktestEngine::new(config),
            family: family.into(),
        }
    }

    /// Run the full walk-forward over sorted daily bars.
    pub fn optimize(&self, bars: &[Bar], windows: &[WalkForwardWindow]) -> WalkForwardReport {
        let grid = param_grid(&self.family);
        let mut results = Vec::new();

        for window in windows {
            let train = slice_bars(bars, window.train_start, window.train_end);
            let test = slice_bars(bars, window.test_start, window.test_end);
            if train.is_empty() || test.is_empty() {
                continue;
            }

            // Grid candidates score in parallel on the training slice.
            let candidates: Vec<(BTreeMap<String, f64>, StrategyMetrics)> = grid
                .par_iter()
                .filter_map(|params| {
                    let mut strategy = build_strategy(&self.family, params).ok()?;
                    let report = self.engine.run(strategy.as_mut(), &train).ok()?;
                    Some((params.clone(), report.metrics))
                })
                .collect();

            let valid: Vec<&(BTreeMap<String, f64>, StrategyMetrics)> =
                candidates.iter().filter(|(_, m)| m.is_valid).collect();
            if valid.is_empty() {
                info!(window = window.index, "no candidate reached the trade minimum; window skipped");
                continue;
            }

            let metrics_only: Vec<StrategyMetrics> =
                valid.iter().map(|(_, m)| m.clone()).collect();
            let scores = fitness_scores(&metrics_only);
            let winner_idx = scores
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(i, _)| i)
                .unwrap_or(0);

            let (optimal_params, in_sample) = valid[winner_idx].clone();

            // Re-evaluate the winner on the untouched test slice.
            let out_of_sample = match build_strategy(&self.family, &optimal_params) {
                Ok(mut strategy) => match self.engine.run(strategy.as_mut(), &test) {
                    Ok(report) => report.metrics,
                    Err(_) => continue,
                },
                Err(_) => continue,
            };

            let is_oos_sharpe_ratio = if out_of_sample.sharpe.abs() > f64::EPSILON {
                in_sample.sharpe / out_of_sample.sharpe
            } else {
                f64::INFINITY
            };
            let robustness = robustness_score(in_sample.sharpe, out_of_sample.sharpe);
            let is_overfit = detect_overfit(&in_sample, &out_of_sample);

            info!(
                window = window.index,
                is_sharpe = in_sample.sharpe,
                oos_sharpe = out_of_sample.sharpe,
                robustness,
                is_overfit,
                "walk-forward window complete"
            );

            results.push(WindowResult {
                window: window.clone(),
                optimal_params,
                in_sample,
                out_of_sample,
                is_oos_sharpe_ratio,
                robustness_score: robustness,
                is_overfit,
            });
        }

        aggregate(&self.family, results)
    }
}

fn slice_bars(bars: &[Bar], start: NaiveDate, end: NaiveDate) -> Vec<Bar> {
    bars.iter()
        .filter(|b| {
            let d = b.ts.date_naive();
            d >= start && d <= end
        })
        .cloned()
        .collect()
}

fn aggregate(family: &str, windows: Vec<WindowResult>) -> WalkForwardReport {
    let n = windows.len();
    let avg_robustness_score = if n > 0 {
        windows.iter().map(|w| w.robustness_score).sum::<f64>() / n as f64
    } else {
        0.0
    };
    let finite_ratios: Vec<f64> = windows
        .iter()
        .map(|w| w.is_oos_sharpe_ratio)
        .filter(|r| r.is_finite())
        .collect();
    let avg_is_oos_sharpe_ratio = if finite_ratios.is_empty() {
        0.0
    } else {
        finite_ratios.iter().sum::<f64>() / finite_ratios.len() as f64
    };

    let flagged = windows.iter().filter(|w| w.is_overfit).count();
    let flagged_fraction = if n > 0 { flagged as f64 / n as f64 } else { 0.0 };
    let overfit_warning = flagged_fraction >= 0.25;
    let confidence = if flagged_fraction >= 0.5 {
        "Low"
    } else if flagged_fraction >= 0.25 {
        "Medium"
    } else {
        "High"
    }
    .to_string();

    WalkForwardReport {
        strategy_family: family.to_string(),
        windows,
        avg_robustness_score,
        avg_is_oos_sharpe_ratio,
        overfit_warning,
        confidence,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use taroko_schemas::{f64_to_micros, Timeframe};

    fn window(train: (i32, u32, u32), days: i64) -> WalkForwardWindow {
        let train_start = NaiveDate::from_ymd_opt(train.0, train.1, train.2).unwrap();
        let train_end = train_start + chrono::Duration::days(days * 3 - 1);
        let test_start = train_end + chrono::Duration::days(1);
        WalkForwardWindow {
            index: 0,
            train_start,
            train_end,
            test_start,
            test_end: test_start + chrono::Duration::days(days - 1),
        }
    }

    #[test]
    fn every_generated_window_is_well_formed() {
        let start = NaiveDate::from_ymd_opt(2015, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let windows = generate_windows(start, end, &WalkForwardConfig::default());
        assert!(!windows.is_empty());
        for w in &windows {
            assert!(w.is_well_formed(), "window {w:?} malformed");
            assert!(w.ratio() >= 1.0, "train:test ratio must be >= 1");
        }
    }

    #[test]
    fn ten_years_daily_yields_at_least_12_windows() {
        // 10 years daily, 3:1, step 20, test 20 -> comfortably over 12 windows.
        let start = NaiveDate::from_ymd_opt(2015, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();
        let windows = generate_windows(start, end, &WalkForwardConfig::default());
        assert!(windows.len() >= 12, "got {}", windows.len());
        // Sequential indexes.
        for (i, w) in windows.iter().enumerate() {
            assert_eq!(w.index, i);
        }
    }

    #[test]
    fn test_slice_is_never_shorter_than_20_days() {
        let cfg = WalkForwardConfig {
            test_days: 5, // below the floor; generation must clamp up
            ..WalkForwardConfig::default()
        };
        let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2021, 12, 31).unwrap();
        for w in generate_windows(start, end, &cfg) {
            let test_len = (w.test_end - w.test_start).num_days() + 1;
            assert!(test_len >= 20);
        }
    }

    fn metrics(sharpe: f64, ret: f64) -> StrategyMetrics {
        StrategyMetrics {
            total_return_pct: ret,
            sharpe,
            sortino: sharpe,
            calmar: sharpe,
            max_drawdown_pct: 5.0,
            win_rate_pct: 50.0,
            total_trades: 25,
            final_equity_micros: 1_000_000,
            is_valid: true,
        }
    }

    #[test]
    fn overfit_flag_for_positive_is_negative_oos() {
        // Spec property: IS Sharpe 1.5, OOS Sharpe -0.2 => overfit.
        assert!(detect_overfit(&metrics(1.5, 10.0), &metrics(-0.2, -1.0)));
    }

    #[test]
    fn overfit_flag_for_ratio_above_two() {
        assert!(detect_overfit(&metrics(2.1, 10.0), &metrics(1.0, 3.0)));
        assert!(!detect_overfit(&metrics(1.5, 10.0), &metrics(1.0, 3.0)));
    }

    #[test]
    fn overfit_flag_for_oos_loss_with_is_gain() {
        assert!(detect_overfit(&metrics(0.5, 10.0), &metrics(0.4, -6.0)));
    }

    #[test]
    fn robustness_clamps_to_0_100() {
        assert_eq!(robustness_score(1.0, 2.0), 100.0);
        assert_eq!(robustness_score(1.0, -1.0), 0.0);
        assert!((robustness_score(2.0, 1.0) - 50.0).abs() < 1e-9);
        assert_eq!(robustness_score(0.0, 1.0), 0.0);
    }

    #[test]
    fn fitness_penalizes_thin_trading_and_deep_drawdown() {
        let good = metrics(2.0, 10.0);
        let mut thin = metrics(2.0, 10.0);
        thin.total_trades = 5;
        let mut deep = metrics(2.0, 10.0);
        deep.max_drawdown_pct = 40.0;

        let scores = fitness_scores(&[good, thin, deep]);
        assert!(scores[0] > scores[1]);
        assert!(scores[0] > scores[2]);
    }

    fn daily_bar(i: usize, close: f64) -> Bar {
        let px = f64_to_micros(close);
        Bar {
            symbol: "2454.TW".to_string(),
            timeframe: Timeframe::D1,
            ts: Utc.with_ymd_and_hms(2023, 1, 2, 5, 30, 0).unwrap()
                + chrono::Duration::days(i as i64),
            open_micros: px,
            high_micros: f64_to_micros(close * 1.01),
            low_micros: f64_to_micros(close * 0.99),
            close_micros: px,
            volume: 1_000_000,
            is_complete: true,
        }
    }

    #[test]
    fn optimize_produces_window_results_and_aggregate() {
        // ~400 days of a fast price wave; long train slices so the active
        // candidates clear the trade minimum.
        let bars: Vec<Bar> = (0..400)
            .map(|i| daily_bar(i, 100.0 + 12.0 * ((i as f64) / 3.0).sin()))
            .collect();
        let start = bars.first().unwrap().ts.date_naive();
        let end = bars.last().unwrap().ts.date_naive();
        let cfg = WalkForwardConfig {
            train_test_ratio: 3.0,
            step_days: 30,
            test_days: 60,
        };
        let windows = generate_windows(start, end, &cfg);
        assert!(windows.len() >= 3);

        let optimizer = WalkForwardOptimizer::new(BacktestConfig::default(), "momentum");
        let report = optimizer.optimize(&bars, &windows);

        assert_eq!(report.strategy_family, "momentum");
        assert!(!report.windows.is_empty());
        for w in &report.windows {
            assert!(w.window.is_well_formed());
            assert!(!w.optimal_params.is_empty());
            assert!((0.0..=100.0).contains(&w.robustness_score));
        }
        assert!(report.avg_robustness_score >= 0.0);
        assert!(["High", "Medium", "Low"].contains(&report.confidence.as_str()));
    }
}
