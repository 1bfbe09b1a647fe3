use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use taroko_audit::AuditWriter;
use taroko_bridge::BridgeClient;
use taroko_config::{AppConfig, ACTIVE_STOCK_KEY, DEFAULT_ACTIVE_STOCK};
use taroko_engine::{
    run_serve_loop, spawn_scheduler, AuditExecutionObserver, EngineConfig, EngineCore,
    EngineHandle, EngineState, Notifier, NullNotifier, ServeDeps,
};
use taroko_execution::ExecutionRouter;
use taroko_strategy::{build_strategy, strategy_names, Strategy, StrategyManager, StrategySlot};
use taroko_telegram::{spawn_chat_loop, CommandContext, CommandDispatcher, PgSimStats, TelegramNotifier};
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::{db_pool, Outcome};

pub async fn run(mut config: AppConfig) -> Result<Outcome> {
    let pool = db_pool(&config).await?;
    apply_risk_overrides(&pool, &mut config.risk).await?;
    let bridge = BridgeClient::new(&config.bridge_url);
    let audit = Arc::new(AuditWriter::new("logs").context("audit log directory")?);

    let notifier: Arc<dyn Notifier> = match &config.telegram {
        Some(tg) => Arc::new(TelegramNotifier::new(&tg.bot_token, tg.chat_id)),
        None => {
            warn!("TELEGRAM_* not set; chat notifications disabled");
            Arc::new(NullNotifier)
        }
    };

    // Active stock: the persisted slot, seeded with the default on first boot.
    let active = taroko_db::config_get(&pool, ACTIVE_STOCK_KEY)
        .await?
        .unwrap_or_else(|| DEFAULT_ACTIVE_STOCK.to_string());
    taroko_db::config_set(&pool, ACTIVE_STOCK_KEY, &active).await?;

    // Main strategy: the authoritative active_strategy binding.
    let main_strategy = load_main_strategy(&pool).await?;
    info!(active, strategy = main_strategy.name(), "engine boot");

    let state = Arc::new(EngineState::new(active.clone()));
    let mut manager = StrategyManager::new(
        StrategySlot::new(active.clone(), main_strategy),
        config.risk.clone(),
    );

    // Shadow slots in rank order.
    let mut shadow_symbols = Vec::new();
    for row in taroko_db::load_shadow_stocks(&pool).await? {
        if !row.enabled {
            continue;
        }
        match build_strategy(family_of(&row.strategy_name), &BTreeMap::new()) {
            Ok(strategy) => {
                shadow_symbols.push(row.symbol.clone());
                manager.add_shadow(StrategySlot::new(row.symbol, strategy));
            }
            Err(e) => warn!("shadow slot {} skipped: {e}", row.symbol),
        }
    }

    let observer = AuditExecutionObserver::new(Arc::clone(&audit), Arc::clone(&notifier));
    let router = ExecutionRouter::new(bridge.clone(), Arc::new(observer));
    let engine_config = EngineConfig {
        trading_mode: config.trading_mode,
        ..EngineConfig::default()
    };
    let core = EngineCore::new(
        Arc::clone(&state),
        config.risk.clone(),
        engine_config,
        manager,
        router,
    );

    let (tx, rx) = mpsc::channel(64);
    let handle = EngineHandle::new(tx.clone());
    spawn_scheduler(tx);

    if let Some(tg) = &config.telegram {
        let dispatcher = Arc::new(CommandDispatcher::new());
        let ctx = CommandContext {
            engine: handle.clone(),
            stats: Arc::new(PgSimStats::new(pool.clone())),
            llm: None,
        };
        spawn_chat_loop(&tg.bot_token, tg.chat_id, dispatcher, ctx);
    }

    notifier.send("🚀 taroko engine started").await;

    let deps = ServeDeps {
        pool,
        bridge,
        audit,
        notifier,
        commands: rx,
        shadow_symbols,
    };
    let mut loop_task = tokio::spawn(run_serve_loop(core, deps));

    tokio::select! {
        joined = &mut loop_task => {
            joined.context("engine loop task failed")??;
            Ok(Outcome::Clean)
        }
        _ = tokio::signal::ctrl_c() => {
            info!("SIGINT received; requesting engine shutdown");
            let _ = handle.shutdown().await;
            loop_task.await.context("engine loop task failed")??;
            Ok(Outcome::Interrupted)
        }
    }
}

/// Build the main strategy from the `active_strategy` binding, defaulting
/// to a stock momentum configuration on first boot.
async fn load_main_strategy(pool: &taroko_db::PgPool) -> Result<Box<dyn Strategy>> {
    let binding = taroko_db::get_active_strategy(pool, "TW").await?;
    let (family, params) = match binding {
        Some(row) => {
            let params: BTreeMap<String, f64> =
                serde_json::from_value(row.parameters).unwrap_or_default();
            (family_of(&row.strategy_name).to_string(), params)
        }
        None => ("momentum".to_string(), BTreeMap::new()),
    };
    build_strategy(&family, &params)
        .with_context(|| format!("active strategy '{family}' failed to build"))
}

/// Fold `risk_settings` rows over the environment defaults. Unknown keys
/// are reported, not fatal.
async fn apply_risk_overrides(
    pool: &taroko_db::PgPool,
    risk: &mut taroko_config::RiskSettings,
) -> Result<()> {
    for (key, value) in taroko_db::load_risk_overrides(pool).await? {
        match key.as_str() {
            "daily_loss_limit" => risk.daily_loss_limit = value,
            "weekly_loss_limit" => risk.weekly_loss_limit = value,
            "risk_pct_per_trade" => risk.risk_pct_per_trade = value,
            "stock_stop_loss_pct" => risk.stock_stop_loss_pct = value,
            "futures_stop_loss_per_contract" => risk.futures_stop_loss_per_contract = value,
            "max_hold_minutes" => risk.max_hold_minutes = value as i64,
            "swap_mdd_threshold_pct" => risk.swap_mdd_threshold_pct = value,
            "golive_min_trades" => risk.golive_min_trades = value as i64,
            "golive_min_win_rate_pct" => risk.golive_min_win_rate_pct = value,
            "golive_max_drawdown_pct" => risk.golive_max_drawdown_pct = value,
            other => warn!("ignoring unknown risk_settings key '{other}'"),
        }
    }
    Ok(())
}

/// Map a stored strategy name (family or instance label) back to its family.
fn family_of(name: &str) -> &str {
    for family in strategy_names() {
        if name == *family || name.starts_with(&format!("{family}_")) {
            return family;
        }
    }
    "momentum"
}
