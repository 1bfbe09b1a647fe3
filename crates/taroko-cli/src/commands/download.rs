use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::Utc;
use taroko_bridge::BridgeClient;
use taroko_config::AppConfig;
use taroko_history::{download_history, PgHistorySink};
use taroko_schemas::Timeframe;
use tracing::info;

use super::{db_pool, resolve_symbol, Outcome};

pub async fn run(config: AppConfig, years: i64, symbol: Option<String>) -> Result<Outcome> {
    if years < 1 {
        bail!("download-history needs at least 1 year");
    }

    let pool = db_pool(&config).await?;
    let symbol = resolve_symbol(&pool, symbol).await?;
    let bridge = BridgeClient::new(&config.bridge_url);
    let sink = Arc::new(PgHistorySink::new(pool));

    let end = Utc::now().date_naive();
    let start = end - chrono::Duration::days(years * 365);
    info!(%symbol, %start, %end, "history download starting");

    let report = download_history(
        bridge,
        sink,
        vec![symbol.clone()],
        Timeframe::D1.as_str().to_string(),
        start,
        end,
    )
    .await?;

    println!("symbol            = {symbol}");
    println!("range             = {start}..{end}");
    println!("rows_received     = {}", report.rows_received);
    println!("bar_rows_written  = {}", report.bar_rows_written);
    println!("batches           = {}", report.batches);
    println!("truncated         = {}", report.truncated);
    println!("producer_errors   = {}", report.producer_errors);

    if report.producer_errors > 0 {
        bail!("{} producer range(s) failed; rerun to fill the gaps", report.producer_errors);
    }
    Ok(Outcome::Clean)
}
