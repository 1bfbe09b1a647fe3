//! taroko-history
//!
//! Bulk historical ingestion:
//! **many producer downloaders → bounded queue (5 000) → single writer →
//! transactional batches of 1 000 (bars + derived market-data rows)**.
//!
//! A process-wide compare-and-set flag truncates the historical tables
//! exactly once per run (reset on failure so a retry can truncate again).
//! Downloads are split into ≤ 365-day requests; the writer consumes until
//! every producer has finished AND the queue is drained, bounded by a
//! 5-minute timeout after the completion signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use taroko_bridge::{parse_bridge_timestamp, with_retry, BridgeClient};
use taroko_db::BarRow;
use taroko_schemas::f64_to_micros;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Bounded queue capacity between producers and the writer.
pub const QUEUE_CAPACITY: usize = 5_000;

/// Rows per bulk insert.
pub const BATCH_SIZE: usize = 1_000;

/// Maximum span of a single download request.
pub const MAX_REQUEST_DAYS: i64 = 365;

/// Writer drain deadline after producers signal completion.
pub const WRITER_TIMEOUT: Duration = Duration::from_secs(5 * 60);

// ---------------------------------------------------------------------------
// Truncate-once guard
// ---------------------------------------------------------------------------

/// Compare-and-set guard ensuring the historical tables are truncated
/// exactly once per ingestion run, no matter how many producers race the
/// start.
#[derive(Debug, Default)]
pub struct TruncateGuard {
    truncated: AtomicBool,
}

impl TruncateGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` exactly once — the caller that wins performs the truncate.
    pub fn try_claim(&self) -> bool {
        self.truncated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Reset after a failed truncate so a retry can claim again.
    pub fn reset(&self) {
        self.truncated.store(false, Ordering::SeqCst);
    }

    pub fn is_claimed(&self) -> bool {
        self.truncated.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Sink boundary
// ---------------------------------------------------------------------------

/// Where batches land. The Postgres implementation wraps `taroko-db`; tests
/// substitute an in-memory sink.
#[async_trait]
pub trait HistorySink: Send + Sync {
    async fn truncate(&self) -> Result<()>;

    /// Insert one batch atomically. Returns `(bar_rows, market_data_rows)`.
    async fn insert_batch(&self, batch: &[BarRow]) -> Result<(u64, u64)>;
}

/// The production sink over Postgres.
pub struct PgHistorySink {
    pool: sqlx::PgPool,
}

impl PgHistorySink {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HistorySink for PgHistorySink {
    async fn truncate(&self) -> Result<()> {
        taroko_db::truncate_history(&self.pool).await
    }

    async fn insert_batch(&self, batch: &[BarRow]) -> Result<(u64, u64)> {
        taroko_db::insert_history_batch(&self.pool, batch).await
    }
}

// ---------------------------------------------------------------------------
// Range splitting
// ---------------------------------------------------------------------------

/// Split `[start, end]` (inclusive) into consecutive ranges of at most
/// [`MAX_REQUEST_DAYS`] days.
pub fn split_date_ranges(start: NaiveDate, end: NaiveDate) -> Vec<(NaiveDate, NaiveDate)> {
    let mut out = Vec::new();
    let mut cursor = start;
    while cursor <= end {
        let range_end = (cursor + chrono::Duration::days(MAX_REQUEST_DAYS - 1)).min(end);
        out.push((cursor, range_end));
        cursor = range_end + chrono::Duration::days(1);
    }
    out
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub rows_received: u64,
    pub bar_rows_written: u64,
    pub market_data_rows_written: u64,
    pub batches: u64,
    pub truncated: bool,
    pub producer_errors: u64,
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// The single writer: drains the queue into sorted batches of
/// [`BATCH_SIZE`], flushing the remainder when every sender is gone.
pub async fn run_writer<S: HistorySink>(
    sink: Arc<S>,
    mut rx: mpsc::Receiver<BarRow>,
) -> Result<IngestReport> {
    let mut report = IngestReport::default();
    let mut pending: Vec<BarRow> = Vec::with_capacity(BATCH_SIZE);

    while let Some(row) = rx.recv().await {
        report.rows_received += 1;
        pending.push(row);
        if pending.len() >= BATCH_SIZE {
            flush(&*sink, &mut pending, &mut report).await?;
        }
    }
    // Channel closed: producers signalled completion; drain the remainder.
    if !pending.is_empty() {
        flush(&*sink, &mut pending, &mut report).await?;
    }

    info!(
        rows = report.rows_received,
        batches = report.batches,
        "history writer drained"
    );
    Ok(report)
}

async fn flush<S: HistorySink + ?Sized>(
    sink: &S,
    pending: &mut Vec<BarRow>,
    report: &mut IngestReport,
) -> Result<()> {
    // Out-of-order arrivals are sorted by timestamp before applying.
    pending.sort_by_key(|r| r.ts);
    let (bars, md) = sink
        .insert_batch(pending)
        .await
        .context("history batch insert failed")?;
    report.bar_rows_written += bars;
    report.market_data_rows_written += md;
    report.batches += 1;
    pending.clear();
    Ok(())
}

// ---------------------------------------------------------------------------
// Full pipeline
// ---------------------------------------------------------------------------

/// Download history for `symbols` over `[start, end]` into the sink.
///
/// One producer task per (symbol, ≤365-day range); a fresh
/// [`TruncateGuard`] scopes truncation to this run.
pub async fn download_history<S: HistorySink + 'static>(
    bridge: BridgeClient,
    sink: Arc<S>,
    symbols: Vec<String>,
    timeframe: String,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<IngestReport> {
    if start > end {
        return Err(anyhow!("history range start {start} is after end {end}"));
    }

    let guard = Arc::new(TruncateGuard::new());

    // Truncate exactly once, before any rows flow.
    if guard.try_claim() {
        if let Err(e) = sink.truncate().await {
            guard.reset();
            return Err(e.context("history truncate failed"));
        }
    }

    let (tx, rx) = mpsc::channel::<BarRow>(QUEUE_CAPACITY);
    let writer = tokio::spawn(run_writer(Arc::clone(&sink), rx));

    let mut producers = JoinSet::new();
    for symbol in &symbols {
        for (range_start, range_end) in split_date_ranges(start, end) {
            let bridge = bridge.clone();
            let tx = tx.clone();
            let symbol = symbol.clone();
            let timeframe = timeframe.clone();
            producers.spawn(async move {
                produce_range(&bridge, &tx, &symbol, &timeframe, range_start, range_end).await
            });
        }
    }
    // The writer's recv() returns None only when every sender is dropped.
    drop(tx);

    let mut producer_errors = 0u64;
    while let Some(joined) = producers.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                producer_errors += 1;
                error!("history producer failed: {e:#}");
            }
            Err(e) => {
                producer_errors += 1;
                error!("history producer panicked: {e}");
            }
        }
    }

    // Completion signal delivered (all senders gone); bound the drain.
    let mut report = tokio::time::timeout(WRITER_TIMEOUT, writer)
        .await
        .map_err(|_| anyhow!("history writer timed out {}s after completion", WRITER_TIMEOUT.as_secs()))?
        .context("history writer task failed")??;

    report.truncated = guard.is_claimed();
    report.producer_errors = producer_errors;
    Ok(report)
}

async fn produce_range(
    bridge: &BridgeClient,
    tx: &mpsc::Sender<BarRow>,
    symbol: &str,
    timeframe: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<()> {
    let bars = with_retry("download-batch", 3, || {
        bridge.download_batch(symbol, start, end)
    })
    .await
    .map_err(|e| anyhow!("download {symbol} {start}..{end}: {e}"))?;

    for bar in bars {
        let ts = match parse_bridge_timestamp(&bar.timestamp) {
            Ok(ts) => ts,
            Err(e) => {
                warn!(symbol, "skipping bar with bad timestamp: {e}");
                continue;
            }
        };
        if bar.volume < 0 {
            warn!(symbol, volume = bar.volume, "skipping bar with negative volume");
            continue;
        }
        let row = BarRow {
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            ts,
            open_micros: f64_to_micros(bar.open),
            high_micros: f64_to_micros(bar.high),
            low_micros: f64_to_micros(bar.low),
            close_micros: f64_to_micros(bar.close),
            volume: bar.volume,
            is_complete: true,
        };
        // A closed receiver means the writer died; stop producing.
        if tx.send(row).await.is_err() {
            return Err(anyhow!("history queue closed while producing {symbol}"));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::AtomicU64;
    use std::sync::Mutex;

    struct MemSink {
        truncates: AtomicU64,
        batch_sizes: Mutex<Vec<usize>>,
        rows: Mutex<Vec<BarRow>>,
    }

    impl MemSink {
        fn new() -> Self {
            Self {
                truncates: AtomicU64::new(0),
                batch_sizes: Mutex::new(Vec::new()),
                rows: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl HistorySink for MemSink {
        async fn truncate(&self) -> Result<()> {
            self.truncates.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn insert_batch(&self, batch: &[BarRow]) -> Result<(u64, u64)> {
            self.batch_sizes.lock().unwrap().push(batch.len());
            self.rows.lock().unwrap().extend_from_slice(batch);
            Ok((batch.len() as u64, batch.len() as u64))
        }
    }

    fn row(i: i64) -> BarRow {
        BarRow {
            symbol: "2454.TW".to_string(),
            timeframe: "1day".to_string(),
            ts: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::minutes(i),
            open_micros: 100,
            high_micros: 110,
            low_micros: 90,
            close_micros: 105,
            volume: 10,
            is_complete: true,
        }
    }

    // --- Range splitting ---

    #[test]
    fn short_range_is_one_request() {
        let ranges = split_date_ranges(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(),
        );
        assert_eq!(ranges.len(), 1);
    }

    #[test]
    fn multi_year_range_splits_at_365_days() {
        let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2022, 12, 31).unwrap();
        let ranges = split_date_ranges(start, end);

        assert!(ranges.len() >= 3);
        // Contiguous, inclusive, and each <= 365 days.
        assert_eq!(ranges.first().unwrap().0, start);
        assert_eq!(ranges.last().unwrap().1, end);
        for w in ranges.windows(2) {
            assert_eq!(w[0].1 + chrono::Duration::days(1), w[1].0);
        }
        for (s, e) in &ranges {
            assert!((*e - *s).num_days() < MAX_REQUEST_DAYS);
        }
    }

    // --- Writer batching ---

    #[tokio::test]
    async fn writer_batches_at_1000_and_flushes_remainder() {
        let sink = Arc::new(MemSink::new());
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let writer = tokio::spawn(run_writer(Arc::clone(&sink), rx));

        for i in 0..2_500 {
            tx.send(row(i)).await.unwrap();
        }
        drop(tx);

        let report = writer.await.unwrap().unwrap();
        assert_eq!(report.rows_received, 2_500);
        assert_eq!(report.batches, 3);
        assert_eq!(*sink.batch_sizes.lock().unwrap(), vec![1_000, 1_000, 500]);
    }

    #[tokio::test]
    async fn writer_sorts_each_batch_by_timestamp() {
        let sink = Arc::new(MemSink::new());
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let writer = tokio::spawn(run_writer(Arc::clone(&sink), rx));

        // Deliberately reversed arrival order.
        for i in (0..100).rev() {
            tx.send(row(i)).await.unwrap();
        }
        drop(tx);
        writer.await.unwrap().unwrap();

        let rows = sink.rows.lock().unwrap();
        for w in rows.windows(2) {
            assert!(w[0].ts <= w[1].ts);
        }
    }

    #[tokio::test]
    async fn writer_consumes_from_concurrent_producers() {
        let sink = Arc::new(MemSink::new());
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let writer = tokio::spawn(run_writer(Arc::clone(&sink), rx));

        let mut producers = JoinSet::new();
        for p in 0..8 {
            let tx = tx.clone();
            producers.spawn(async move {
                for i in 0..500 {
                    tx.send(row((p * 500 + i) as i64)).await.unwrap();
                }
            });
        }
        drop(tx);
        while producers.join_next().await.is_some() {}

        let report = writer.await.unwrap().unwrap();
        assert_eq!(report.rows_received, 4_000);
        assert_eq!(
            report.bar_rows_written, 4_000,
            "every received row must be written"
        );
    }

    // --- Truncate-once guard ---

    #[test]
    fn guard_claims_exactly_once() {
        let g = TruncateGuard::new();
        assert!(g.try_claim());
        assert!(!g.try_claim());
        assert!(g.is_claimed());
    }

    #[test]
    fn guard_reset_reopens_claim() {
        let g = TruncateGuard::new();
        assert!(g.try_claim());
        g.reset();
        assert!(g.try_claim());
    }

    #[test]
    fn guard_single_winner_under_racing_threads() {
        // N threads race the claim; exactly one may win.
        for _ in 0..200 {
            let g = Arc::new(TruncateGuard::new());
            let winners = Arc::new(AtomicU64::new(0));
            let mut handles = Vec::new();
            for _ in 0..8 {
                let g = Arc::clone(&g);
                let winners = Arc::clone(&winners);
                handles.push(std::thread::spawn(move || {
                    if g.try_claim() {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                }));
            }
            for h in handles {
                h.join().unwrap();
            }
            assert_eq!(winners.load(Ordering::SeqCst), 1);
        }
    }
}
