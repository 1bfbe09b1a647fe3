//! Strategy binding / configuration / blackout repositories.
//!
//! `active_strategy` is the authoritative current binding per market code;
//! `strategy_config` carries enablement + parameters only.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use sqlx::PgPool;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ActiveStrategyRow {
    pub market_code: String,
    pub strategy_name: String,
    pub parameters: Value,
}

/// The authoritative current binding for a market, if one exists.
pub async fn get_active_strategy(
    pool: &PgPool,
    market_code: &str,
) -> Result<Option<ActiveStrategyRow>> {
    let row = sqlx::query_as::<_, ActiveStrategyRow>(
        "select market_code, strategy_name, parameters from active_strategy where market_code = $1",
    )
    .bind(market_code)
    .fetch_optional(pool)
    .await
    .context("get_active_strategy failed")?;
    Ok(row)
}

/// Rebind the market's main strategy (operator command or automatic swap).
pub async fn set_active_strategy(
    pool: &PgPool,
    market_code: &str,
    strategy_name: &str,
    parameters: &Value,
) -> Result<()> {
    sqlx::query(
        r#"
        insert into active_strategy (market_code, strategy_name, parameters, updated_at)
        values ($1, $2, $3, now())
        on conflict (market_code) do update
          set strategy_name = excluded.strategy_name,
              parameters = excluded.parameters,
              updated_at = now()
        "#,
    )
    .bind(market_code)
    .bind(strategy_name)
    .bind(parameters)
    .execute(pool)
    .await
    .context("set_active_strategy failed")?;
    Ok(())
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StrategyConfigRow {
    pub strategy_name: String,
    pub enabled: bool,
    pub priority: i32,
    pub market_code: String,
    pub parameters: Value,
}

/// Enablement + parameters for every known strategy, priority order.
pub async fn load_strategy_configs(pool: &PgPool) -> Result<Vec<StrategyConfigRow>> {
    let rows = sqlx::query_as::<_, StrategyConfigRow>(
        r#"
        select strategy_name, enabled, priority, market_code, parameters
        from strategy_config
        order by priority desc, strategy_name asc
        "#,
    )
    .fetch_all(pool)
    .await
    .context("load_strategy_configs failed")?;
    Ok(rows)
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ShadowStockRow {
    pub rank: i32,
    pub symbol: String,
    pub strategy_name: String,
    pub enabled: bool,
}

/// Shadow slots in rank order.
pub async fn load_shadow_stocks(pool: &PgPool) -> Result<Vec<ShadowStockRow>> {
    let rows = sqlx::query_as::<_, ShadowStockRow>(
        "select rank, symbol, strategy_name, enabled from shadow_mode_stock order by rank asc",
    )
    .fetch_all(pool)
    .await
    .context("load_shadow_stocks failed")?;
    Ok(rows)
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BlackoutRow {
    pub symbol: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// All earnings-blackout windows (the gatekeeper caches these).
pub async fn load_blackout_windows(pool: &PgPool) -> Result<Vec<BlackoutRow>> {
    let rows = sqlx::query_as::<_, BlackoutRow>(
        "select symbol, start_date, end_date from earnings_blackout_date order by symbol, start_date",
    )
    .fetch_all(pool)
    .await
    .context("load_blackout_windows failed")?;
    Ok(rows)
}

/// Record a blackout-cache refresh.
pub async fn touch_blackout_meta(pool: &PgPool, refreshed_at: DateTime<Utc>) -> Result<()> {
    sqlx::query(
        r#"
        insert into earnings_blackout_meta (id, refreshed_at, source)
        values (1, $1, 'scheduler')
        on conflict (id) do update set refreshed_at = excluded.refreshed_at
        "#,
    )
    .bind(refreshed_at)
    .execute(pool)
    .await
    .context("touch_blackout_meta failed")?;
    Ok(())
}

/// Record one strategy's daily shadow performance.
pub async fn insert_strategy_performance(
    pool: &PgPool,
    strategy_name: &str,
    trade_date: NaiveDate,
    return_pct: f64,
    trades: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        insert into strategy_performance (strategy_name, trade_date, return_pct, trades)
        values ($1, $2, $3, $4)
        on conflict (strategy_name, trade_date) do update
          set return_pct = excluded.return_pct,
              trades = excluded.trades
        "#,
    )
    .bind(strategy_name)
    .bind(trade_date)
    .bind(return_pct)
    .bind(trades)
    .execute(pool)
    .await
    .context("insert_strategy_performance failed")?;
    Ok(())
}
