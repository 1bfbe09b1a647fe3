//! Bar / market-data repositories, including the ingestor's transactional
//! batch insert.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

/// A canonical bar row (micros prices). `(symbol, timeframe, ts)` is the
/// uniqueness key.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct BarRow {
    pub symbol: String,
    pub timeframe: String,
    pub ts: DateTime<Utc>,
    pub open_micros: i64,
    pub high_micros: i64,
    pub low_micros: i64,
    pub close_micros: i64,
    pub volume: i64,
    pub is_complete: bool,
}

/// Truncate the historical tables. The ingestor's truncate-once guard makes
/// sure this runs exactly once per run.
pub async fn truncate_history(pool: &PgPool) -> Result<()> {
    sqlx::query("truncate table bar, market_data")
        .execute(pool)
        .await
        .context("truncate_history failed")?;
    Ok(())
}

/// Insert one batch of bars plus the derived market-data rows atomically.
///
/// Idempotent: re-running the same batch upserts rather than duplicating.
/// Returns `(bar_rows, market_data_rows)` affected.
pub async fn insert_history_batch(pool: &PgPool, batch: &[BarRow]) -> Result<(u64, u64)> {
    if batch.is_empty() {
        return Ok((0, 0));
    }

    let mut tx = pool.begin().await.context("begin history batch tx")?;
    let mut bar_rows = 0u64;
    let mut md_rows = 0u64;

    for bar in batch {
        let res = sqlx::query(
            r#"
            insert into bar (
              symbol, timeframe, ts,
              open_micros, high_micros, low_micros, close_micros,
              volume, is_complete
            )
            values ($1,$2,$3,$4,$5,$6,$7,$8,$9)
            on conflict (symbol, timeframe, ts) do update
              set open_micros  = excluded.open_micros,
                  high_micros  = excluded.high_micros,
                  low_micros   = excluded.low_micros,
                  close_micros = excluded.close_micros,
                  volume       = excluded.volume,
                  is_complete  = excluded.is_complete,
                  ingested_at  = now()
            "#,
        )
        .bind(&bar.symbol)
        .bind(&bar.timeframe)
        .bind(bar.ts)
        .bind(bar.open_micros)
        .bind(bar.high_micros)
        .bind(bar.low_micros)
        .bind(bar.close_micros)
        .bind(bar.volume)
        .bind(bar.is_complete)
        .execute(&mut *tx)
        .await
        .context("bar upsert failed")?;
        bar_rows += res.rows_affected();

        let res = sqlx::query(
            r#"
            insert into market_data (symbol, ts, price_micros, volume, source)
            values ($1,$2,$3,$4,'history')
            on conflict (symbol, ts, source) do update
              set price_micros = excluded.price_micros,
                  volume       = excluded.volume
            "#,
        )
        .bind(&bar.symbol)
        .bind(bar.ts)
        .bind(bar.close_micros)
        .bind(bar.volume)
        .execute(&mut *tx)
        .await
        .context("market_data upsert failed")?;
        md_rows += res.rows_affected();
    }

    tx.commit().await.context("commit history batch tx")?;
    Ok((bar_rows, md_rows))
}

/// Fetch bars sorted by timestamp for the backtest loader.
pub async fn fetch_bars(
    pool: &PgPool,
    symbol: &str,
    timeframe: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<BarRow>> {
    let rows = sqlx::query_as::<_, BarRow>(
        r#"
        select symbol, timeframe, ts,
               open_micros, high_micros, low_micros, close_micros,
               volume, is_complete
        from bar
        where symbol = $1 and timeframe = $2 and ts >= $3 and ts <= $4
        order by ts asc
        "#,
    )
    .bind(symbol)
    .bind(timeframe)
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await
    .context("fetch_bars failed")?;
    Ok(rows)
}

/// Monthly cleanup: drop economic events older than the cutoff.
pub async fn delete_economic_events_older_than(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
) -> Result<u64> {
    let res = sqlx::query("delete from economic_event where ts < $1")
        .bind(cutoff)
        .execute(pool)
        .await
        .context("economic_event cleanup failed")?;
    Ok(res.rows_affected())
}
