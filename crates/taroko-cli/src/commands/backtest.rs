use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use taroko_backtest::{BacktestConfig, BacktestEngine};
use taroko_config::AppConfig;
use taroko_schemas::micros_to_f64;
use taroko_strategy::build_strategy;
use tracing::info;

use super::{db_pool, load_daily_bars, resolve_symbol, Outcome};

pub async fn run(
    config: AppConfig,
    years: i64,
    strategy: String,
    symbol: Option<String>,
) -> Result<Outcome> {
    if years < 1 {
        bail!("backtest needs at least 1 year of history");
    }

    let pool = db_pool(&config).await?;
    let symbol = resolve_symbol(&pool, symbol).await?;
    let bars = load_daily_bars(&pool, &symbol, years).await?;
    if bars.is_empty() {
        bail!("no stored bars for {symbol}; run download-history first");
    }
    info!(symbol, bars = bars.len(), "replaying");

    let mut instance = build_strategy(&strategy, &BTreeMap::new())
        .with_context(|| format!("unknown strategy family '{strategy}'"))?;
    let engine = BacktestEngine::new(BacktestConfig {
        risk: config.risk.clone(),
        ..BacktestConfig::default()
    });
    let report = engine.run(instance.as_mut(), &bars)?;

    let m = &report.metrics;
    println!("strategy        = {}", report.strategy_name);
    println!("symbol          = {symbol}");
    println!("bars            = {}", bars.len());
    println!("total_return    = {:.2}%", m.total_return_pct);
    println!("sharpe          = {:.3}", m.sharpe);
    println!("sortino         = {:.3}", m.sortino);
    println!("calmar          = {:.3}", m.calmar);
    println!("max_drawdown    = {:.2}%", m.max_drawdown_pct);
    println!("win_rate        = {:.1}%", m.win_rate_pct);
    println!("total_trades    = {}", m.total_trades);
    println!("final_equity    = {:.0}", micros_to_f64(m.final_equity_micros));
    println!("valid           = {}", m.is_valid);

    Ok(Outcome::Clean)
}
