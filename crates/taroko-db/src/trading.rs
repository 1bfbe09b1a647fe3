//! Trade / signal / veto / insight / statistics repositories.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct NewTrade {
    pub trade_id: Uuid,
    pub order_ref: Uuid,
    pub symbol: String,
    pub side: String,
    pub quantity: i64,
    pub price_micros: i64,
    pub fee_micros: i64,
    pub tax_micros: i64,
    pub slippage_bps: f64,
    pub realized_pnl_micros: Option<i64>,
    pub reason: Option<String>,
    pub mode: String,
    pub ts: DateTime<Utc>,
}

pub async fn insert_trade(pool: &PgPool, t: &NewTrade) -> Result<()> {
    sqlx::query(
        r#"
        insert into trade (
          trade_id, order_ref, symbol, side, quantity, price_micros,
          fee_micros, tax_micros, slippage_bps, realized_pnl_micros,
          reason, mode, ts
        ) values ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13)
        "#,
    )
    .bind(t.trade_id)
    .bind(t.order_ref)
    .bind(&t.symbol)
    .bind(&t.side)
    .bind(t.quantity)
    .bind(t.price_micros)
    .bind(t.fee_micros)
    .bind(t.tax_micros)
    .bind(t.slippage_bps)
    .bind(t.realized_pnl_micros)
    .bind(&t.reason)
    .bind(&t.mode)
    .bind(t.ts)
    .execute(pool)
    .await
    .context("insert_trade failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct NewSignal {
    pub signal_id: Uuid,
    pub strategy_name: String,
    pub symbol: String,
    pub direction: String,
    pub confidence: f64,
    pub reason: String,
    pub acted: bool,
    pub ts: DateTime<Utc>,
}

pub async fn insert_signal(pool: &PgPool, s: &NewSignal) -> Result<()> {
    sqlx::query(
        r#"
        insert into signal (
          signal_id, strategy_name, symbol, direction, confidence, reason, acted, ts
        ) values ($1,$2,$3,$4,$5,$6,$7,$8)
        "#,
    )
    .bind(s.signal_id)
    .bind(&s.strategy_name)
    .bind(&s.symbol)
    .bind(&s.direction)
    .bind(s.confidence)
    .bind(&s.reason)
    .bind(s.acted)
    .bind(s.ts)
    .execute(pool)
    .await
    .context("insert_signal failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct NewVetoEvent {
    pub veto_id: Uuid,
    pub source: String,
    pub reason: String,
    pub severity: String,
    pub affected_symbols: Vec<String>,
    pub ts: DateTime<Utc>,
}

pub async fn insert_veto_event(pool: &PgPool, v: &NewVetoEvent) -> Result<()> {
    sqlx::query(
        r#"
        insert into veto_event (veto_id, source, reason, severity, affected_symbols, ts)
        values ($1,$2,$3,$4,$5,$6)
        "#,
    )
    .bind(v.veto_id)
    .bind(&v.source)
    .bind(&v.reason)
    .bind(&v.severity)
    .bind(&v.affected_symbols)
    .bind(v.ts)
    .execute(pool)
    .await
    .context("insert_veto_event failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct NewEvent {
    pub event_id: Uuid,
    pub event_type: String,
    pub payload: Value,
    pub ts: DateTime<Utc>,
}

pub async fn insert_event(pool: &PgPool, e: &NewEvent) -> Result<()> {
    sqlx::query("insert into event (event_id, event_type, payload, ts) values ($1,$2,$3,$4)")
        .bind(e.event_id)
        .bind(&e.event_type)
        .bind(&e.payload)
        .bind(e.ts)
        .execute(pool)
        .await
        .context("insert_event failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct NewLlmInsight {
    pub insight_id: Uuid,
    pub ts: DateTime<Utc>,
    pub insight_type: String,
    pub symbol: Option<String>,
    pub trade_id: Option<Uuid>,
    pub signal_id: Option<Uuid>,
    pub event_id: Option<Uuid>,
    pub content: String,
    pub confidence: Option<f64>,
    pub processing_time_ms: i64,
    pub success: bool,
}

pub async fn insert_llm_insight(pool: &PgPool, i: &NewLlmInsight) -> Result<()> {
    sqlx::query(
        r#"
        insert into llm_insight (
          insight_id, ts, insight_type, symbol, trade_id, signal_id, event_id,
          content, confidence, processing_time_ms, success
        ) values ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)
        "#,
    )
    .bind(i.insight_id)
    .bind(i.ts)
    .bind(&i.insight_type)
    .bind(&i.symbol)
    .bind(i.trade_id)
    .bind(i.signal_id)
    .bind(i.event_id)
    .bind(&i.content)
    .bind(i.confidence)
    .bind(i.processing_time_ms)
    .bind(i.success)
    .execute(pool)
    .await
    .context("insert_llm_insight failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DailyStatisticsRow {
    pub trade_date: NaiveDate,
    pub symbol: String,
    pub total_trades: i64,
    pub winning_trades: i64,
    pub win_rate_pct: f64,
    pub realized_pnl_micros: i64,
    pub unrealized_pnl_micros: i64,
    pub sharpe: Option<f64>,
    pub sortino: Option<f64>,
    pub calmar: Option<f64>,
    pub llm_summary: Option<String>,
    pub consistency: Option<f64>,
}

pub async fn upsert_daily_statistics(pool: &PgPool, d: &DailyStatisticsRow) -> Result<()> {
    sqlx::query(
        r#"
        insert into daily_statistics (
          trade_date, symbol, total_trades, winning_trades, win_rate_pct,
          realized_pnl_micros, unrealized_pnl_micros, sharpe, sortino, calmar,
          llm_summary, consistency
        ) values ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)
        on conflict (trade_date, symbol) do update
          set total_trades = excluded.total_trades,
              winning_trades = excluded.winning_trades,
              win_rate_pct = excluded.win_rate_pct,
              realized_pnl_micros = excluded.realized_pnl_micros,
              unrealized_pnl_micros = excluded.unrealized_pnl_micros,
              sharpe = excluded.sharpe,
              sortino = excluded.sortino,
              calmar = excluded.calmar,
              llm_summary = excluded.llm_summary,
              consistency = excluded.consistency
        "#,
    )
    .bind(d.trade_date)
    .bind(&d.symbol)
    .bind(d.total_trades)
    .bind(d.winning_trades)
    .bind(d.win_rate_pct)
    .bind(d.realized_pnl_micros)
    .bind(d.unrealized_pnl_micros)
    .bind(d.sharpe)
    .bind(d.sortino)
    .bind(d.calmar)
    .bind(&d.llm_summary)
    .bind(d.consistency)
    .execute(pool)
    .await
    .context("upsert_daily_statistics failed")?;
    Ok(())
}

/// `true` when clearly negative news touching the symbol landed within the
/// window — the scheduler refreshes the gatekeeper's news-veto flag from
/// this.
pub async fn has_recent_negative_news(
    pool: &PgPool,
    symbol: &str,
    since: DateTime<Utc>,
) -> Result<bool> {
    let (n,): (i64,) = sqlx::query_as(
        r#"
        select count(*)::bigint
        from economic_news
        where ts >= $1
          and sentiment < -0.5
          and (symbols = '{}' or $2 = any(symbols))
        "#,
    )
    .bind(since)
    .bind(symbol)
    .fetch_one(pool)
    .await
    .context("negative news query failed")?;
    Ok(n > 0)
}

/// The most recent LLM `BLOCK` recommendation for the symbol, if any.
pub async fn latest_llm_block(
    pool: &PgPool,
    symbol: &str,
) -> Result<Option<DateTime<Utc>>> {
    let row: Option<(DateTime<Utc>,)> = sqlx::query_as(
        r#"
        select ts
        from llm_insight
        where symbol = $1
          and insight_type = 'recommendation'
          and content like 'BLOCK%'
          and success
        order by ts desc
        limit 1
        "#,
    )
    .bind(symbol)
    .fetch_optional(pool)
    .await
    .context("llm block query failed")?;
    Ok(row.map(|(ts,)| ts))
}

/// Numeric overrides from the `risk_settings` table (key → value).
pub async fn load_risk_overrides(pool: &PgPool) -> Result<Vec<(String, f64)>> {
    let rows: Vec<(String, f64)> = sqlx::query_as("select key, value from risk_settings")
        .fetch_all(pool)
        .await
        .context("risk_settings load failed")?;
    Ok(rows)
}

/// Aggregate simulated track record (the go-live gate input).
#[derive(Debug, Clone, PartialEq)]
pub struct SimTradeStats {
    pub total_trades: i64,
    pub win_rate_pct: f64,
    pub max_drawdown_pct: f64,
}

/// Compute the simulated track record: closed-trade count and win rate
/// from `trade`, max drawdown from the daily realized P&L series.
pub async fn sim_trade_stats(pool: &PgPool) -> Result<SimTradeStats> {
    let (total, wins): (i64, i64) = sqlx::query_as(
        r#"
        select count(*)::bigint,
               count(*) filter (where realized_pnl_micros > 0)::bigint
        from trade
        where mode = 'sim' and realized_pnl_micros is not null
        "#,
    )
    .fetch_one(pool)
    .await
    .context("sim trade counts failed")?;

    let daily: Vec<(i64,)> = sqlx::query_as(
        r#"
        select realized_pnl_micros
        from daily_statistics
        order by trade_date asc
        "#,
    )
    .fetch_all(pool)
    .await
    .context("daily pnl series failed")?;

    // Peak-to-trough on the cumulative P&L curve, as percent of the peak
    // equity proxy (cumulative + 1 unit to avoid division by zero).
    let mut cum = 0.0_f64;
    let mut peak = 0.0_f64;
    let mut mdd = 0.0_f64;
    for (pnl,) in &daily {
        cum += *pnl as f64 / 1_000_000.0;
        if cum > peak {
            peak = cum;
        }
        let base = peak.abs().max(1.0);
        let dd = (peak - cum) / base * 100.0;
        if dd > mdd {
            mdd = dd;
        }
    }

    let win_rate_pct = if total > 0 {
        wins as f64 / total as f64 * 100.0
    } else {
        0.0
    };

    Ok(SimTradeStats {
        total_trades: total,
        win_rate_pct,
        max_drawdown_pct: mdd,
    })
}
