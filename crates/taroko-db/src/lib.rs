//! taroko-db
//!
//! Postgres access layer: pool construction, embedded migrations, and thin
//! repository functions over the prescribed tables. No business logic lives
//! here — callers hand in fully-formed row structs and interpret the rows
//! they get back.

pub mod market;
pub mod strategy_store;
pub mod trading;

pub use market::{
    delete_economic_events_older_than, fetch_bars, insert_history_batch, truncate_history, BarRow,
};
pub use strategy_store::{
    get_active_strategy, insert_strategy_performance, load_blackout_windows, load_shadow_stocks,
    load_strategy_configs, set_active_strategy, touch_blackout_meta, ActiveStrategyRow,
    BlackoutRow, ShadowStockRow, StrategyConfigRow,
};
pub use trading::{
    has_recent_negative_news, insert_event, insert_llm_insight, insert_signal, insert_trade,
    insert_veto_event, latest_llm_block, load_risk_overrides, sim_trade_stats,
    upsert_daily_statistics, DailyStatisticsRow, NewEvent, NewLlmInsight, NewSignal, NewTrade,
    NewVetoEvent, SimTradeStats,
};

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
pub use sqlx::PgPool;
use taroko_config::PostgresConfig;

/// Connect to Postgres using resolved configuration.
pub async fn connect(cfg: &PostgresConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&cfg.url())
        .await
        .context("failed to connect to Postgres")?;
    Ok(pool)
}

/// Run embedded migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Simple status probe (connectivity + schema presence).
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (has_bar,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='bar'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_schema: has_bar,
    })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_schema: bool,
}

// ---------------------------------------------------------------------------
// system_config
// ---------------------------------------------------------------------------

/// Read one `system_config` value.
pub async fn config_get(pool: &PgPool, key: &str) -> Result<Option<String>> {
    let row: Option<(String,)> =
        sqlx::query_as("select value from system_config where key = $1")
            .bind(key)
            .fetch_optional(pool)
            .await
            .with_context(|| format!("config_get {key} failed"))?;
    Ok(row.map(|(v,)| v))
}

/// Upsert one `system_config` value.
pub async fn config_set(pool: &PgPool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        r#"
        insert into system_config (key, value) values ($1, $2)
        on conflict (key) do update set value = excluded.value
        "#,
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await
    .with_context(|| format!("config_set {key} failed"))?;
    Ok(())
}
