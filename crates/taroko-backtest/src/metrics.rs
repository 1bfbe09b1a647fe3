//! Metric reduction over an equity curve and realized-trade list.
//!
//! Sharpe is `√252 · mean/std` of period returns (population std) —
//! validated against hand-computed references in the tests below. Sortino
//! uses downside deviation only; Calmar is CAGR over |max drawdown|.

use serde::{Deserialize, Serialize};
use taroko_schemas::micros_to_f64;

/// A backtest needs at least this many closed trades to count for
/// optimization.
pub const MIN_VALID_TRADES: usize = 10;

/// Per-strategy replay metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyMetrics {
    pub total_return_pct: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub calmar: f64,
    /// Positive percent (8.0 == an 8% peak-to-trough decline).
    pub max_drawdown_pct: f64,
    pub win_rate_pct: f64,
    pub total_trades: usize,
    pub final_equity_micros: i64,
    /// `total_trades >= MIN_VALID_TRADES`.
    pub is_valid: bool,
}

/// Reduce an equity curve (`(epoch_secs, equity_micros)`, time-ascending)
/// and the realized P&L list (micros) to metrics.
pub fn compute_metrics(
    initial_equity_micros: i64,
    equity_curve: &[(i64, i64)],
    realized_pnl_micros: &[i64],
) -> StrategyMetrics {
    let final_equity_micros = equity_curve
        .last()
        .map(|(_, e)| *e)
        .unwrap_or(initial_equity_micros);

    let initial = micros_to_f64(initial_equity_micros).max(1e-9);
    let final_eq = micros_to_f64(final_equity_micros);
    let total_return_pct = (final_eq / initial - 1.0) * 100.0;

    let returns = period_returns(equity_curve);
    let (mean, std) = mean_std(&returns);
    let sharpe = if std <= f64::EPSILON {
        0.0
    } else {
        mean / std * 252.0_f64.sqrt()
    };

    let downside = downside_deviation(&returns);
    let sortino = if downside <= f64::EPSILON {
        0.0
    } else {
        mean / downside * 252.0_f64.sqrt()
    };

    let max_drawdown_pct = max_drawdown_pct(equity_curve);

    let cagr = compute_cagr(equity_curve, initial_equity_micros);
    let calmar = if max_drawdown_pct <= f64::EPSILON {
        0.0
    } else {
        cagr * 100.0 / max_drawdown_pct
    };

    let total_trades = realized_pnl_micros.len();
    let wins = realized_pnl_micros.iter().filter(|p| **p > 0).count();
    let win_rate_pct = if total_trades > 0 {
        wins as f64 / total_trades as f64 * 100.0
    } else {
        0.0
    };

    StrategyMetrics {
        total_return_pct,
        sharpe,
        sortino,
        calmar,
        max_drawdown_pct,
        win_rate_pct,
        total_trades,
        final_equity_micros,
        is_valid: total_trades >= MIN_VALID_TRADES,
    }
}

/// Simple period-over-period returns of the equity curve.
fn period_returns(curve: &[(i64, i64)]) -> Vec<f64> {
    curve
        .windows(2)
        .filter_map(|w| {
            let prev = w[0].1 as f64;
            if prev.abs() < 1.0 {
                None
            } else {
                Some((w[1].1 as f64 - prev) / prev)
            }
        })
        .collect()
}

fn mean_std(returns: &[f64]) -> (f64, f64) {
    if returns.is_empty() {
        return (0.0, 0.0);
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let var = returns.iter().map(|r| (r - mean) * (r - mean)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Root-mean-square of negative returns only.
fn downside_deviation(returns: &[f64]) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let n = returns.len() as f64;
    let sum_sq = returns
        .iter()
        .filter(|r| **r < 0.0)
        .map(|r| r * r)
        .sum::<f64>();
    (sum_sq / n).sqrt()
}

fn max_drawdown_pct(curve: &[(i64, i64)]) -> f64 {
    let mut peak = f64::MIN;
    let mut mdd = 0.0_f64;
    for (_, eq) in curve {
        let e = *eq as f64;
        if e > peak {
            peak = e;
        }
        if peak > 0.0 {
            let dd = (peak - e) / peak * 100.0;
            if dd > mdd {
                mdd = dd;
            }
        }
    }
    mdd
}

fn compute_cagr(curve: &[(i64, i64)], initial_micros: i64) -> f64 {
    let (Some(first), Some(last)) = (curve.first(), curve.last()) else {
        return 0.0;
    };
    let secs = (last.0 - first.0).max(1) as f64;
    let years = secs / (365.25 * 24.0 * 3600.0);
    if years <= 0.0 {
        return 0.0;
    }
    let start = (initial_micros as f64).max(1.0);
    let end = (last.1 as f64).max(1.0);
    (end / start).powf(1.0 / years) - 1.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use taroko_schemas::MICROS_SCALE;

    const M: i64 = MICROS_SCALE;

    fn curve(points: &[i64]) -> Vec<(i64, i64)> {
        points
            .iter()
            .enumerate()
            .map(|(i, e)| (1_700_000_000 + i as i64 * 86_400, e * M))
            .collect()
    }

    #[test]
    fn sharpe_matches_hand_computed_reference() {
        // Equity 100 -> 101 -> 100.495 -> 102.00 (returns +1%, -0.5%, +1.5%).
        let c = curve(&[100, 101]);
        let mut c = c;
        c.push((c.last().unwrap().0 + 86_400, (100.495 * M as f64) as i64));
        c.push((c.last().unwrap().0 + 86_400, (102.0 * M as f64) as i64));

        let m = compute_metrics(100 * M, &c, &[]);
        // returns ~ [0.01, -0.005, 0.0149758]; mean ≈ 0.0066586,
        // population std ≈ 0.0084905, sharpe ≈ 0.78424 * sqrt(252) ≈ 12.45.
        let expected = 0.0066586 / 0.0084905 * 252.0_f64.sqrt();
        assert!(
            (m.sharpe - expected).abs() < 0.05,
            "sharpe {} vs expected {expected}",
            m.sharpe
        );
        assert!(m.sharpe > 0.0);
    }

    #[test]
    fn flat_curve_has_zero_sharpe_not_nan() {
        let m = compute_metrics(100 * M, &curve(&[100, 100, 100]), &[]);
        assert_eq!(m.sharpe, 0.0);
        assert_eq!(m.sortino, 0.0);
        assert!(m.sharpe.is_finite());
    }

    #[test]
    fn max_drawdown_peak_to_trough() {
        // Peak 120, trough 90 -> 25%.
        let m = compute_metrics(100 * M, &curve(&[100, 120, 90, 110]), &[]);
        assert!((m.max_drawdown_pct - 25.0).abs() < 1e-9);
    }

    #[test]
    fn win_rate_and_validity() {
        let pnls: Vec<i64> = vec![5, -3, 7, -1, 2, 2, -4, 9, 1, -2]
            .into_iter()
            .map(|p| p * M)
            .collect();
        let m = compute_metrics(100 * M, &curve(&[100, 105]), &pnls);
        assert_eq!(m.total_trades, 10);
        assert!((m.win_rate_pct - 60.0).abs() < 1e-9);
        assert!(m.is_valid);

        let m = compute_metrics(100 * M, &curve(&[100, 105]), &pnls[..9]);
        assert!(!m.is_valid);
    }

    #[test]
    fn total_return_from_final_equity() {
        let m = compute_metrics(100 * M, &curve(&[100, 110]), &[]);
        assert!((m.total_return_pct - 10.0).abs() < 1e-9);
        assert_eq!(m.final_equity_micros, 110 * M);
    }

    #[test]
    fn sortino_ignores_upside_volatility() {
        // Strongly positive but volatile upside, single small dip.
        let up = compute_metrics(100 * M, &curve(&[100, 110, 125, 124, 140]), &[]);
        assert!(up.sortino > up.sharpe);
    }

    #[test]
    fn empty_curve_is_safe() {
        let m = compute_metrics(100 * M, &[], &[]);
        assert_eq!(m.final_equity_micros, 100 * M);
        assert_eq!(m.total_return_pct, 0.0);
        assert!(!m.is_valid);
    }
}
