pub mod backtest;
pub mod download;
pub mod serve;
pub mod walkforward;

use anyhow::Result;
use chrono::{DateTime, Utc};
use taroko_config::{AppConfig, ACTIVE_STOCK_KEY, DEFAULT_ACTIVE_STOCK};
use taroko_db::{BarRow, PgPool};
use taroko_schemas::{Bar, Timeframe};

/// How a subcommand ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Clean,
    Interrupted,
}

/// Connect + migrate.
pub async fn db_pool(config: &AppConfig) -> Result<PgPool> {
    let pool = taroko_db::connect(&config.postgres).await?;
    taroko_db::migrate(&pool).await?;
    Ok(pool)
}

/// The symbol a command targets: explicit flag, else the persisted active
/// stock, else the default.
pub async fn resolve_symbol(pool: &PgPool, explicit: Option<String>) -> Result<String> {
    if let Some(symbol) = explicit {
        return Ok(symbol);
    }
    Ok(taroko_db::config_get(pool, ACTIVE_STOCK_KEY)
        .await?
        .unwrap_or_else(|| DEFAULT_ACTIVE_STOCK.to_string()))
}

/// Load sorted daily bars for the trailing `years`.
pub async fn load_daily_bars(
    pool: &PgPool,
    symbol: &str,
    years: i64,
) -> Result<Vec<Bar>> {
    let end: DateTime<Utc> = Utc::now();
    let start = end - chrono::Duration::days(years * 365);
    let rows = taroko_db::fetch_bars(pool, symbol, Timeframe::D1.as_str(), start, end).await?;
    Ok(rows.into_iter().filter_map(row_to_bar).collect())
}

fn row_to_bar(row: BarRow) -> Option<Bar> {
    let timeframe = Timeframe::parse(&row.timeframe).ok()?;
    let bar = Bar {
        symbol: row.symbol,
        timeframe,
        ts: row.ts,
        open_micros: row.open_micros,
        high_micros: row.high_micros,
        low_micros: row.low_micros,
        close_micros: row.close_micros,
        volume: row.volume,
        is_complete: row.is_complete,
    };
    bar.validate().ok()?;
    Some(bar)
}
