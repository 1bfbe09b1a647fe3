use anyhow::{bail, Result};
use taroko_backtest::{generate_windows, BacktestConfig, WalkForwardConfig, WalkForwardOptimizer};
use taroko_config::AppConfig;
use tracing::info;

use super::{db_pool, load_daily_bars, resolve_symbol, Outcome};

pub async fn run(
    config: AppConfig,
    years: i64,
    strategy: String,
    symbol: Option<String>,
) -> Result<Outcome> {
    if years < 1 {
        bail!("walk-forward needs at least 1 year of history");
    }

    let pool = db_pool(&config).await?;
    let symbol = resolve_symbol(&pool, symbol).await?;
    let bars = load_daily_bars(&pool, &symbol, years).await?;
    if bars.is_empty() {
        bail!("no stored bars for {symbol}; run download-history first");
    }

    let start = bars.first().map(|b| b.ts.date_naive()).unwrap_or_default();
    let end = bars.last().map(|b| b.ts.date_naive()).unwrap_or_default();
    let windows = generate_windows(start, end, &WalkForwardConfig::default());
    if windows.is_empty() {
        bail!("history span {start}..{end} is too short for a single train/test window");
    }
    info!(symbol, windows = windows.len(), "walk-forward starting");

    let optimizer = WalkForwardOptimizer::new(
        BacktestConfig {
            risk: config.risk.clone(),
            ..BacktestConfig::default()
        },
        &strategy,
    );
    let report = optimizer.optimize(&bars, &windows);

    println!("strategy_family        = {}", report.strategy_family);
    println!("symbol                 = {symbol}");
    println!("windows                = {}", report.windows.len());
    println!("avgRobustnessScore     = {:.1}", report.avg_robustness_score);
    println!("avgIsOosSharpeRatio    = {:.3}", report.avg_is_oos_sharpe_ratio);
    println!("overfitWarning         = {}", report.overfit_warning);
    println!("confidence             = {}", report.confidence);
    for w in &report.windows {
        println!(
            "  window {:>2}: train {}..{} test {}..{}  IS sharpe {:.2}  OOS sharpe {:.2}  robustness {:.0}{}",
            w.window.index,
            w.window.train_start,
            w.window.train_end,
            w.window.test_start,
            w.window.test_end,
            w.in_sample.sharpe,
            w.out_of_sample.sharpe,
            w.robustness_score,
            if w.is_overfit { "  [OVERFIT]" } else { "" },
        );
    }

    Ok(Outcome::Clean)
}
