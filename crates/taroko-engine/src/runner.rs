//! Serve-mode runner: the IO shell around [`EngineCore`].
//!
//! One loop owns the core (single logical writer). Each iteration either
//! processes a queued command or runs a tick: poll the bridge, build tick
//! bars, evaluate, then persist what the tick reported — signals, vetoes,
//! trades, audit lines, chat notices. Nothing in here mutates the ledger
//! directly; every effect flows through the core.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Datelike, Utc};
use sqlx::PgPool;
use taroko_audit::AuditWriter;
use taroko_bridge::BridgeClient;
use taroko_execution::{AttemptOutcome, AttemptRecord, ExecutionObserver};
use taroko_risk::BlackoutWindow;
use taroko_schemas::{micros_to_f64, session, Bar, Timeframe};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::core::{EngineCore, TickPhase, TickReport};
use crate::handle::EngineCommand;
use crate::Notifier;

/// Engine tick cadence (bar arrival or timer; we poll).
pub const TICK_INTERVAL_SECS: u64 = 10;

/// Hard per-tick deadline before the tick is abandoned and re-scheduled.
const TICK_HARD_DEADLINE_SECS: u64 = 5;

/// Grace for draining work at shutdown before forcing the flatten.
const SHUTDOWN_GRACE_SECS: u64 = 30;

/// Everything the serve loop needs besides the core.
pub struct ServeDeps {
    pub pool: PgPool,
    pub bridge: BridgeClient,
    pub audit: Arc<AuditWriter>,
    pub notifier: Arc<dyn Notifier>,
    pub commands: mpsc::Receiver<EngineCommand>,
    pub shadow_symbols: Vec<String>,
}

/// The shared (non-queue) half of [`ServeDeps`]; the command receiver is
/// kept apart so select arms borrow disjoint state.
struct RunnerCtx {
    pool: PgPool,
    bridge: BridgeClient,
    audit: Arc<AuditWriter>,
    notifier: Arc<dyn Notifier>,
    shadow_symbols: Vec<String>,
}

/// Execution observer that writes every order attempt to the audit log and
/// pushes terminal failures to chat.
pub struct AuditExecutionObserver {
    audit: Arc<AuditWriter>,
    notifier: Arc<dyn Notifier>,
}

impl AuditExecutionObserver {
    pub fn new(audit: Arc<AuditWriter>, notifier: Arc<dyn Notifier>) -> Self {
        Self { audit, notifier }
    }
}

impl ExecutionObserver for AuditExecutionObserver {
    fn on_attempt(&self, record: &AttemptRecord) {
        let payload = serde_json::json!({
            "order_ref": record.order_ref,
            "symbol": record.symbol,
            "side": record.side.as_str(),
            "quantity": record.quantity,
            "price": micros_to_f64(record.price_micros),
            "attempt": record.attempt,
            "outcome": record.outcome.as_str(),
            "detail": record.detail,
        });
        if let Err(e) = self
            .audit
            .append(Utc::now(), "order", record.outcome.as_str(), payload)
        {
            error!("audit append failed: {e:#}");
        }

        if matches!(record.outcome, AttemptOutcome::Abandoned | AttemptOutcome::TimedOut) {
            let notifier = Arc::clone(&self.notifier);
            let text = format!(
                "⚠️ order {} {} x{} {}: {}",
                record.side.as_str(),
                record.symbol,
                record.quantity,
                record.outcome.as_str(),
                record.detail
            );
            tokio::spawn(async move { notifier.send(&text).await });
        }
    }
}

/// Run the engine until a shutdown command arrives.
pub async fn run_serve_loop(mut core: EngineCore<BridgeClient>, deps: ServeDeps) -> Result<()> {
    let ServeDeps {
        pool,
        bridge,
        audit,
        notifier,
        commands: mut command_rx,
        shadow_symbols,
    } = deps;
    let ctx = RunnerCtx {
        pool,
        bridge,
        audit,
        notifier,
        shadow_symbols,
    };

    let mut ticker = tokio::time::interval(Duration::from_secs(TICK_INTERVAL_SECS));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    // Streams must exist before the first tick polls them.
    let active = core.state().active_stock();
    if let Err(e) = ctx.bridge.subscribe(&active).await {
        warn!("initial subscribe for {active} failed: {e}");
    }
    for symbol in &ctx.shadow_symbols {
        if let Err(e) = ctx.bridge.subscribe(symbol).await {
            warn!("shadow subscribe for {symbol} failed: {e}");
        }
    }

    loop {
        tokio::select! {
            maybe_cmd = command_rx.recv() => {
                let Some(cmd) = maybe_cmd else {
                    info!("command queue closed; engine loop exits");
                    return Ok(());
                };
                if apply_command(&mut core, &ctx, cmd).await? {
                    return graceful_shutdown(&mut core, &ctx).await;
                }
            }
            _ = ticker.tick() => {
                run_one_tick(&mut core, &ctx).await;
            }
        }
    }
}

async fn run_one_tick(core: &mut EngineCore<BridgeClient>, ctx: &RunnerCtx) {
    let now = Utc::now();

    refresh_risk_caches(core, ctx, now).await;

    let bars = match gather_bars(core, ctx).await {
        Ok(bars) => bars,
        Err(e) => {
            warn!("tick skipped: bridge unavailable: {e:#}");
            return;
        }
    };

    // Hard tick deadline: an overrun abandons the tick; the next interval
    // re-schedules it.
    let report = match tokio::time::timeout(
        Duration::from_secs(TICK_HARD_DEADLINE_SECS),
        core.tick(now, bars),
    )
    .await
    {
        Ok(report) => report,
        Err(_) => {
            warn!("tick exceeded the {TICK_HARD_DEADLINE_SECS}s hard deadline; abandoned");
            return;
        }
    };

    if let TickPhase::OutsideWindow { eod_due: true } = report.phase {
        if let Err(e) = run_eod(core, ctx).await {
            error!("EOD tasks failed: {e:#}");
        }
        return;
    }

    persist_report(core, ctx, &report).await;
}

/// Returns `true` when the loop should shut down.
async fn apply_command(
    core: &mut EngineCore<BridgeClient>,
    ctx: &RunnerCtx,
    cmd: EngineCommand,
) -> Result<bool> {
    let now = Utc::now();
    match cmd {
        EngineCommand::Status { reply } => {
            let _ = reply.send(core.status());
        }
        EngineCommand::Pause { reply } => {
            core.pause();
            let _ = reply.send(());
        }
        EngineCommand::Resume { reply } => {
            core.resume();
            let _ = reply.send(());
        }
        EngineCommand::Shutdown { reply } => {
            let _ = reply.send(());
            return Ok(true);
        }
        EngineCommand::ChangeStock { symbol, reply } => {
            match core.change_stock(&symbol, now).await {
                Ok((change, report)) => {
                    persist_report(core, ctx, &report).await;
                    taroko_db::config_set(
                        &ctx.pool,
                        taroko_config::ACTIVE_STOCK_KEY,
                        &change.new_symbol,
                    )
                    .await
                    .context("persist active stock")?;
                    if let Err(e) = ctx.bridge.subscribe(&change.new_symbol).await {
                        warn!("subscribe after stock change failed: {e}");
                    }
                    let _ = reply.send(Ok(change));
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            }
        }
        EngineCommand::SetMainStrategy { name, params, reply } => {
            match taroko_strategy::build_strategy(&name, &params) {
                Ok(strategy) => {
                    let label = strategy.name().to_string();
                    core.manager_mut().set_main_strategy(strategy);
                    // The binding stores the FAMILY + parameters so a restart
                    // can rebuild the exact instance.
                    let params_json = serde_json::to_value(&params).unwrap_or_default();
                    if let Err(e) =
                        taroko_db::set_active_strategy(&ctx.pool, "TW", &name, &params_json).await
                    {
                        error!("persist active strategy failed: {e:#}");
                    }
                    let _ = reply.send(Ok(label));
                }
                Err(e) => {
                    let _ = reply.send(Err(e.to_string()));
                }
            }
        }
        EngineCommand::GoLive { reply } => {
            let _ = reply.send(core.golive(now));
        }
        EngineCommand::ConfirmLive { record, reply } => {
            let _ = reply.send(core.confirmlive(now, &record));
        }
        EngineCommand::BackToSim { reply } => {
            let _ = reply.send(core.backtosim());
        }
        EngineCommand::DrawdownCheck => {
            if let Some(swap) = core.drawdown_check(now) {
                let payload = serde_json::json!({
                    "old_main": swap.old_main,
                    "new_main": swap.new_main,
                    "main_drawdown_pct": swap.main_drawdown_pct,
                    "candidate_sharpe": swap.candidate_sharpe,
                });
                let _ = taroko_db::insert_event(
                    &ctx.pool,
                    &taroko_db::NewEvent {
                        event_id: Uuid::new_v4(),
                        event_type: "STRATEGY_SWAP".to_string(),
                        payload: payload.clone(),
                        ts: now,
                    },
                )
                .await;
                let _ = taroko_db::set_active_strategy(
                    &ctx.pool,
                    "TW",
                    &swap.new_main,
                    &serde_json::json!({}),
                )
                .await;
                let _ = ctx.audit.append(now, "strategy", "SWAP", payload);
                ctx.notifier
                    .send(&format!(
                        "🔄 strategy swap: {} → {} (trailing MDD {:.1}%, candidate Sharpe {:.2})",
                        swap.old_main, swap.new_main, swap.main_drawdown_pct, swap.candidate_sharpe
                    ))
                    .await;
            }
        }
        EngineCommand::EodStatistics => {
            if let Err(e) = run_eod(core, ctx).await {
                error!("EOD tasks failed: {e:#}");
            }
        }
        EngineCommand::WeeklyReport => {
            let status = core.status();
            ctx.notifier
                .send(&format!(
                    "📅 weekly report — active {}, strategy {}, live={}",
                    status.active_stock, status.main_strategy, status.live
                ))
                .await;
        }
        EngineCommand::GenerateExpirations => {
            let next_year = session::trade_date(now).year() + 1;
            for date in session::futures_expirations(next_year) {
                let _ = taroko_db::insert_event(
                    &ctx.pool,
                    &taroko_db::NewEvent {
                        event_id: Uuid::new_v4(),
                        event_type: "FUTURES_EXPIRATION".to_string(),
                        payload: serde_json::json!({ "date": date.to_string() }),
                        ts: now,
                    },
                )
                .await;
            }
            info!(year = next_year, "futures expirations generated");
        }
        EngineCommand::MonthlyCleanup => {
            let cutoff = now - chrono::Duration::days(2 * 365);
            match taroko_db::delete_economic_events_older_than(&ctx.pool, cutoff).await {
                Ok(n) => info!(removed = n, "economic events cleaned up"),
                Err(e) => error!("economic event cleanup failed: {e:#}"),
            }
        }
    }
    Ok(false)
}

/// Refresh the gatekeeper's cached inputs: the TTL-gated earnings
/// blackouts, the news-veto flag, and the latest LLM BLOCK insight.
async fn refresh_risk_caches(
    core: &mut EngineCore<BridgeClient>,
    ctx: &RunnerCtx,
    now: chrono::DateTime<Utc>,
) {
    if core.gatekeeper_mut().blackouts_need_refresh(now) {
        match taroko_db::load_blackout_windows(&ctx.pool).await {
            Ok(rows) => {
                let windows = rows
                    .into_iter()
                    .map(|r| BlackoutWindow {
                        symbol: r.symbol,
                        start: r.start_date,
                        end: r.end_date,
                    })
                    .collect();
                core.gatekeeper_mut().set_blackouts(windows, now);
                let _ = taroko_db::touch_blackout_meta(&ctx.pool, now).await;
            }
            Err(e) => warn!("blackout refresh failed: {e:#}"),
        }
    }

    let active = core.state().active_stock();
    match taroko_db::has_recent_negative_news(&ctx.pool, &active, now - chrono::Duration::hours(6))
        .await
    {
        Ok(veto) => core.gatekeeper_mut().set_news_veto(veto),
        Err(e) => warn!("news veto refresh failed: {e:#}"),
    }
    match taroko_db::latest_llm_block(&ctx.pool, &active).await {
        Ok(Some(ts)) => core.gatekeeper_mut().note_llm_block(&active, ts),
        Ok(None) => {}
        Err(e) => warn!("llm block refresh failed: {e:#}"),
    }
}

/// Poll the bridge and shape tick bars for the active + shadow symbols.
async fn gather_bars(
    core: &mut EngineCore<BridgeClient>,
    ctx: &RunnerCtx,
) -> Result<BTreeMap<String, Bar>> {
    let now = Utc::now();
    let active = core.state().active_stock();
    let mut bars = BTreeMap::new();

    let signal = ctx
        .bridge
        .signal()
        .await
        .map_err(|e| anyhow::anyhow!("bridge /signal: {e}"))?;
    bars.insert(active.clone(), tick_bar(&active, signal.current_price, now));

    // Volatility proxy from the recent tick stream.
    if let Ok(quotes) = ctx.bridge.recent_quotes(50).await {
        if quotes.len() >= 2 {
            let prices: Vec<f64> = quotes.iter().map(|q| q.price).collect();
            let mean = prices.iter().sum::<f64>() / prices.len() as f64;
            if mean > 0.0 {
                let var = prices.iter().map(|p| (p - mean) * (p - mean)).sum::<f64>()
                    / prices.len() as f64;
                core.set_volatility(var.sqrt() / mean);
            }
        }
    }

    if let Ok(portfolio) = ctx.bridge.portfolio().await {
        core.set_equity_micros(taroko_schemas::f64_to_micros(portfolio.equity));
    }

    for symbol in &ctx.shadow_symbols {
        match ctx.bridge.orderbook(symbol).await {
            Ok(book) => {
                let bid = book.bids.first().map(|l| l.price);
                let ask = book.asks.first().map(|l| l.price);
                if let (Some(bid), Some(ask)) = (bid, ask) {
                    bars.insert(symbol.clone(), tick_bar(symbol, (bid + ask) / 2.0, now));
                }
            }
            Err(e) => warn!("orderbook for {symbol} unavailable: {e}"),
        }
    }

    Ok(bars)
}

fn tick_bar(symbol: &str, price: f64, now: chrono::DateTime<Utc>) -> Bar {
    let px = taroko_schemas::f64_to_micros(price);
    Bar {
        symbol: symbol.to_string(),
        timeframe: Timeframe::Tick,
        ts: now,
        open_micros: px,
        high_micros: px,
        low_micros: px,
        close_micros: px,
        volume: 0,
        is_complete: true,
    }
}

/// Persist one tick's outcome: signals (main + shadows), veto, trades.
async fn persist_report(
    core: &mut EngineCore<BridgeClient>,
    ctx: &RunnerCtx,
    report: &TickReport,
) {
    let now = Utc::now();
    let active = core.state().active_stock();
    let mode = if core.state().is_live() { "live" } else { "sim" };

    if let Some(signal) = &report.main_signal {
        let row = taroko_db::NewSignal {
            signal_id: Uuid::new_v4(),
            strategy_name: signal.strategy_name.clone(),
            symbol: active.clone(),
            direction: format!("{:?}", signal.direction),
            confidence: signal.confidence,
            reason: signal.reason.clone(),
            acted: report.acted_on_main,
            ts: now,
        };
        if let Err(e) = taroko_db::insert_signal(&ctx.pool, &row).await {
            error!("persist signal failed: {e:#}");
        }
    }
    for (symbol, signal) in &report.shadow_signals {
        let row = taroko_db::NewSignal {
            signal_id: Uuid::new_v4(),
            strategy_name: signal.strategy_name.clone(),
            symbol: symbol.clone(),
            direction: format!("{:?}", signal.direction),
            confidence: signal.confidence,
            reason: signal.reason.clone(),
            acted: false,
            ts: now,
        };
        if let Err(e) = taroko_db::insert_signal(&ctx.pool, &row).await {
            error!("persist shadow signal failed: {e:#}");
        }
    }

    if let Some(veto) = &report.veto {
        if let Some(source) = veto.source {
            let row = taroko_db::NewVetoEvent {
                veto_id: Uuid::new_v4(),
                source: source.as_str().to_string(),
                reason: veto.reason.clone(),
                severity: format!("{:?}", veto.severity),
                affected_symbols: vec![active.clone()],
                ts: now,
            };
            if let Err(e) = taroko_db::insert_veto_event(&ctx.pool, &row).await {
                error!("persist veto failed: {e:#}");
            }
        }
    }

    for exec in &report.executions {
        for fill in &exec.fills {
            let realized = report
                .realized
                .iter()
                .find(|r| r.ts == fill.ts && r.symbol == fill.symbol)
                .map(|r| r.pnl_micros - r.fee_micros - r.tax_micros);
            let row = taroko_db::NewTrade {
                trade_id: Uuid::new_v4(),
                order_ref: fill.order_ref,
                symbol: fill.symbol.clone(),
                side: fill.side.as_str().to_string(),
                quantity: fill.quantity,
                price_micros: fill.price_micros,
                fee_micros: fill.fee_micros,
                tax_micros: fill.tax_micros,
                slippage_bps: fill.slippage_bps,
                realized_pnl_micros: realized,
                reason: None,
                mode: mode.to_string(),
                ts: fill.ts,
            };
            if let Err(e) = taroko_db::insert_trade(&ctx.pool, &row).await {
                error!("persist trade failed: {e:#}");
            }
        }
    }

    for notice in &report.notices {
        ctx.notifier.send(notice).await;
    }
}

/// End-of-day tasks: aggregate statistics, feed the shadow performance
/// store, persist, notify.
async fn run_eod(core: &mut EngineCore<BridgeClient>, ctx: &RunnerCtx) -> Result<()> {
    let now = Utc::now();
    let today = session::trade_date(now);
    let active = core.state().active_stock();

    let realized_today = core.daily_realized_micros();
    let (closed, wins) = core.closed_trades_on(today);
    let win_rate_pct = if closed > 0 {
        wins as f64 / closed as f64 * 100.0
    } else {
        0.0
    };

    let stats = taroko_db::DailyStatisticsRow {
        trade_date: today,
        symbol: active.clone(),
        total_trades: closed,
        winning_trades: wins,
        win_rate_pct,
        realized_pnl_micros: realized_today,
        unrealized_pnl_micros: 0,
        sharpe: None,
        sortino: None,
        calmar: None,
        llm_summary: None,
        consistency: None,
    };
    taroko_db::upsert_daily_statistics(&ctx.pool, &stats)
        .await
        .context("persist daily statistics")?;

    // Shadow performance: today's realized return (percent of the default
    // 1M capital base) feeds the swap monitor.
    let return_pct = micros_to_f64(realized_today) / 10_000.0;
    let main_name = core.status().main_strategy;
    core.manager_mut()
        .perf_store()
        .record_return(&main_name, today, return_pct);
    let _ =
        taroko_db::insert_strategy_performance(&ctx.pool, &main_name, today, return_pct, closed)
            .await;

    core.mark_eod_done(today);
    ctx.notifier
        .send(&format!(
            "📊 EOD {today}: realized {:.0} TWD over {closed} closed trades on {active}",
            micros_to_f64(realized_today)
        ))
        .await;
    Ok(())
}

/// Cooperative shutdown: give in-flight work the grace period, then force
/// the flatten and exit.
async fn graceful_shutdown(core: &mut EngineCore<BridgeClient>, ctx: &RunnerCtx) -> Result<()> {
    info!("shutdown requested; draining with {SHUTDOWN_GRACE_SECS}s grace");
    ctx.notifier.send("⏳ shutting down…").await;

    let mut report = TickReport::shutdown_scratch();
    let flatten = core.flatten_all_for_shutdown(&mut report);
    if tokio::time::timeout(Duration::from_secs(SHUTDOWN_GRACE_SECS), flatten)
        .await
        .is_err()
    {
        warn!("drain exceeded grace; positions may need manual reconciliation");
    }
    persist_report(core, ctx, &report).await;

    let _ = ctx.audit.append(
        Utc::now(),
        "engine",
        "SHUTDOWN",
        serde_json::json!({ "clean": true }),
    );
    ctx.notifier.send("✅ engine stopped").await;
    Ok(())
}
