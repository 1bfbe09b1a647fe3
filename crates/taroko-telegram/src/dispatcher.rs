//! Command dispatcher.
//!
//! Handlers are registered by command name and receive a narrow
//! [`CommandContext`] — an engine handle, the simulated-stats provider, and
//! the optional LLM sink — never the engine itself. Every failure path
//! answers with an explanatory reply; there are no silent failures.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use taroko_engine::EngineHandle;
use taroko_risk::SimRecord;
use taroko_schemas::micros_to_f64;
use tracing::info;

// ---------------------------------------------------------------------------
// Context seams
// ---------------------------------------------------------------------------

/// Source of the simulated track record `/confirmlive` gates on.
#[async_trait]
pub trait SimStatsProvider: Send + Sync {
    async fn sim_record(&self) -> Result<SimRecord>;
}

/// Production provider over the trade/daily-statistics tables.
pub struct PgSimStats {
    pool: PgPool,
}

impl PgSimStats {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SimStatsProvider for PgSimStats {
    async fn sim_record(&self) -> Result<SimRecord> {
        let stats = taroko_db::sim_trade_stats(&self.pool).await?;
        Ok(SimRecord {
            total_trades: stats.total_trades,
            win_rate_pct: stats.win_rate_pct,
            max_drawdown_pct: stats.max_drawdown_pct,
        })
    }
}

/// Optional LLM enrichment sink for `/ask`.
#[async_trait]
pub trait LlmSink: Send + Sync {
    async fn ask(&self, question: &str) -> Result<String>;
}

/// What every handler receives.
#[derive(Clone)]
pub struct CommandContext {
    pub engine: EngineHandle,
    pub stats: Arc<dyn SimStatsProvider>,
    pub llm: Option<Arc<dyn LlmSink>>,
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

type HandlerFuture<'a> = Pin<Box<dyn Future<Output = String> + Send + 'a>>;
type Handler = for<'a> fn(&'a CommandContext, Vec<String>) -> HandlerFuture<'a>;

pub struct CommandDispatcher {
    handlers: HashMap<&'static str, Handler>,
}

impl Default for CommandDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandDispatcher {
    /// Build the dispatcher with the full command set registered.
    pub fn new() -> Self {
        let mut d = Self {
            handlers: HashMap::new(),
        };
        d.register("/status", handle_status);
        d.register("/pause", handle_pause);
        d.register("/resume", handle_resume);
        d.register("/shutdown", handle_shutdown);
        d.register("/change-stock", handle_change_stock);
        d.register("/set-main-strategy", handle_set_main_strategy);
        d.register("/golive", handle_golive);
        d.register("/confirmlive", handle_confirmlive);
        d.register("/backtosim", handle_backtosim);
        d.register("/ask", handle_ask);
        d.register("/help", handle_help);
        d
    }

    pub fn register(&mut self, name: &'static str, handler: Handler) {
        self.handlers.insert(name, handler);
    }

    pub fn command_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.handlers.keys().copied().collect();
        names.sort();
        names
    }

    /// Parse and run one incoming message; the return value is the chat
    /// reply.
    pub async fn dispatch(&self, ctx: &CommandContext, text: &str) -> String {
        let Some((command, args)) = parse_command(text) else {
            return "commands start with '/'; try /help".to_string();
        };

        info!(command = %command, "dispatching chat command");
        match self.handlers.get(command.as_str()) {
            Some(handler) => handler(ctx, args).await,
            None => format!("unknown command {command}; try /help"),
        }
    }
}

/// Split `/cmd arg1 arg2` into the lowercase command and its arguments.
/// A `@botname` suffix on the command is tolerated.
fn parse_command(text: &str) -> Option<(String, Vec<String>)> {
    let trimmed = text.trim();
    if !trimmed.starts_with('/') {
        return None;
    }
    let mut parts = trimmed.split_whitespace();
    let raw = parts.next()?;
    let command = raw
        .split('@')
        .next()
        .unwrap_or(raw)
        .to_ascii_lowercase();
    let args = parts.map(|s| s.to_string()).collect();
    Some((command, args))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn handle_status(ctx: &CommandContext, _args: Vec<String>) -> HandlerFuture<'_> {
    Box::pin(async move {
        match ctx.engine.status().await {
            Ok(s) => {
                let position = match &s.position {
                    Some(p) => format!(
                        "{} @ {:.2} (qty {})",
                        p.symbol,
                        micros_to_f64(p.avg_entry_price_micros),
                        p.quantity
                    ),
                    None => "flat".to_string(),
                };
                format!(
                    "📈 {} | strategy {} | {} | {}{}\nposition: {position}\nrealized today: {:.0} TWD, unrealized: {:.0} TWD",
                    s.active_stock,
                    s.main_strategy,
                    if s.live { "LIVE" } else { "SIM" },
                    if s.paused { "paused" } else { "running" },
                    if s.emergency { " (EMERGENCY)" } else { "" },
                    micros_to_f64(s.daily_realized_micros),
                    micros_to_f64(s.unrealized_micros),
                )
            }
            Err(e) => e.to_string(),
        }
    })
}

fn handle_pause(ctx: &CommandContext, _args: Vec<String>) -> HandlerFuture<'_> {
    Box::pin(async move {
        match ctx.engine.pause().await {
            Ok(()) => "⏸ engine paused — entries vetoed, exits still allowed".to_string(),
            Err(e) => e.to_string(),
        }
    })
}

fn handle_resume(ctx: &CommandContext, _args: Vec<String>) -> HandlerFuture<'_> {
    Box::pin(async move {
        match ctx.engine.resume().await {
            Ok(()) => "▶️ engine resumed".to_string(),
            Err(e) => e.to_string(),
        }
    })
}

fn handle_shutdown(ctx: &CommandContext, _args: Vec<String>) -> HandlerFuture<'_> {
    Box::pin(async move {
        match ctx.engine.shutdown().await {
            Ok(()) => "🛑 shutdown initiated (30s drain, then flatten)".to_string(),
            Err(e) => e.to_string(),
        }
    })
}

fn handle_change_stock(ctx: &CommandContext, args: Vec<String>) -> HandlerFuture<'_> {
    Box::pin(async move {
        let Some(symbol) = args.first() else {
            return "usage: /change-stock <symbol>, e.g. /change-stock 2330.TW".to_string();
        };
        match ctx.engine.change_stock(symbol.clone()).await {
            Ok(Ok(change)) => {
                let flattened = if change.flattened_qty > 0 {
                    format!(" (flattened {} shares first)", change.flattened_qty)
                } else {
                    String::new()
                };
                format!(
                    "✅ active stock changed: {} → {}{flattened}",
                    change.old_symbol, change.new_symbol
                )
            }
            Ok(Err(reason)) => format!("❌ stock change refused: {reason}"),
            Err(e) => e.to_string(),
        }
    })
}

fn handle_set_main_strategy(ctx: &CommandContext, args: Vec<String>) -> HandlerFuture<'_> {
    Box::pin(async move {
        let Some(name) = args.first().cloned() else {
            return "usage: /set-main-strategy <name> [key=value …]".to_string();
        };
        let mut params = BTreeMap::new();
        for pair in &args[1..] {
            let Some((key, value)) = pair.split_once('=') else {
                return format!("bad parameter '{pair}': expected key=value");
            };
            let Ok(value) = value.parse::<f64>() else {
                return format!("bad parameter value in '{pair}': expected a number");
            };
            params.insert(key.to_string(), value);
        }
        match ctx.engine.set_main_strategy(name, params).await {
            Ok(Ok(label)) => format!("✅ main strategy is now {label}"),
            Ok(Err(reason)) => format!("❌ {reason}"),
            Err(e) => e.to_string(),
        }
    })
}

fn handle_golive(ctx: &CommandContext, _args: Vec<String>) -> HandlerFuture<'_> {
    Box::pin(async move {
        match ctx.engine.golive().await {
            Ok(msg) => format!("🟡 {msg}"),
            Err(e) => e.to_string(),
        }
    })
}

fn handle_confirmlive(ctx: &CommandContext, _args: Vec<String>) -> HandlerFuture<'_> {
    Box::pin(async move {
        let record = match ctx.stats.sim_record().await {
            Ok(r) => r,
            Err(e) => return format!("❌ could not load the simulated record: {e}"),
        };
        match ctx.engine.confirmlive(record).await {
            Ok(Ok(msg)) => format!("🟢 {msg}"),
            Ok(Err(reason)) => format!("❌ {reason}"),
            Err(e) => e.to_string(),
        }
    })
}

fn handle_backtosim(ctx: &CommandContext, _args: Vec<String>) -> HandlerFuture<'_> {
    Box::pin(async move {
        match ctx.engine.backtosim().await {
            Ok(msg) => format!("🔵 {msg}"),
            Err(e) => e.to_string(),
        }
    })
}

fn handle_ask(ctx: &CommandContext, args: Vec<String>) -> HandlerFuture<'_> {
    Box::pin(async move {
        if args.is_empty() {
            return "usage: /ask <question>".to_string();
        }
        let question = args.join(" ");
        match &ctx.llm {
            Some(llm) => match llm.ask(&question).await {
                Ok(answer) => answer,
                Err(e) => format!("❌ LLM request failed: {e}"),
            },
            None => "LLM insight is not configured on this deployment".to_string(),
        }
    })
}

fn handle_help(ctx: &CommandContext, _args: Vec<String>) -> HandlerFuture<'_> {
    Box::pin(async move {
        let _ = ctx;
        "commands: /status /pause /resume /shutdown /change-stock <sym> \
         /set-main-strategy <name …> /golive /confirmlive /backtosim /ask /help"
            .to_string()
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use taroko_engine::{EngineCommand, EngineHandle};
    use tokio::sync::mpsc;

    struct StubStats(SimRecord);

    #[async_trait]
    impl SimStatsProvider for StubStats {
        async fn sim_record(&self) -> Result<SimRecord> {
            Ok(self.0.clone())
        }
    }

    /// Spawn a canned engine that answers every command like a healthy
    /// engine would.
    fn stub_engine() -> EngineHandle {
        let (tx, mut rx) = mpsc::channel::<EngineCommand>(16);
        tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                match cmd {
                    EngineCommand::Status { reply } => {
                        let _ = reply.send(taroko_engine::StatusReport {
                            active_stock: "2454.TW".to_string(),
                            main_strategy: "momentum_20_1".to_string(),
                            paused: false,
                            emergency: false,
                            live: false,
                            position: None,
                            daily_realized_micros: 0,
                            unrealized_micros: 0,
                        });
                    }
                    EngineCommand::Pause { reply } => {
                        let _ = reply.send(());
                    }
                    EngineCommand::Resume { reply } => {
                        let _ = reply.send(());
                    }
                    EngineCommand::Shutdown { reply } => {
                        let _ = reply.send(());
                    }
                    EngineCommand::ChangeStock { symbol, reply } => {
                        let _ = reply.send(Ok(taroko_engine::StockChange {
                            old_symbol: "2454.TW".to_string(),
                            new_symbol: symbol,
                            flattened_qty: 70,
                        }));
                    }
                    EngineCommand::SetMainStrategy { name, reply, .. } => {
                        if name == "momentum" {
                            let _ = reply.send(Ok("momentum_20_1".to_string()));
                        } else {
                            let _ = reply.send(Err(format!("unknown strategy '{name}'")));
                        }
                    }
                    EngineCommand::GoLive { reply } => {
                        let _ = reply.send("armed".to_string());
                    }
                    EngineCommand::ConfirmLive { record, reply } => {
                        if record.total_trades >= 20 {
                            let _ = reply.send(Ok("live trading ENABLED".to_string()));
                        } else {
                            let _ = reply.send(Err("go-live rejected".to_string()));
                        }
                    }
                    EngineCommand::BackToSim { reply } => {
                        let _ = reply.send("simulation mode restored".to_string());
                    }
                    _ => {}
                }
            }
        });
        EngineHandle::new(tx)
    }

    fn ctx_with(record: SimRecord) -> CommandContext {
        CommandContext {
            engine: stub_engine(),
            stats: Arc::new(StubStats(record)),
            llm: None,
        }
    }

    fn ctx() -> CommandContext {
        ctx_with(SimRecord {
            total_trades: 30,
            win_rate_pct: 55.0,
            max_drawdown_pct: 8.0,
        })
    }

    #[test]
    fn parses_command_and_args() {
        let (cmd, args) = parse_command("/change-stock 2330.TW").unwrap();
        assert_eq!(cmd, "/change-stock");
        assert_eq!(args, vec!["2330.TW"]);
    }

    #[test]
    fn parses_botname_suffix_and_case() {
        let (cmd, _) = parse_command("/STATUS@taroko_bot").unwrap();
        assert_eq!(cmd, "/status");
    }

    #[test]
    fn non_command_text_is_rejected() {
        assert!(parse_command("hello there").is_none());
    }

    #[tokio::test]
    async fn unknown_command_gets_help_pointer() {
        let d = CommandDispatcher::new();
        let reply = d.dispatch(&ctx(), "/frobnicate").await;
        assert!(reply.contains("unknown command"));
        assert!(reply.contains("/help"));
    }

    #[tokio::test]
    async fn status_renders_engine_shape() {
        let d = CommandDispatcher::new();
        let reply = d.dispatch(&ctx(), "/status").await;
        assert!(reply.contains("2454.TW"));
        assert!(reply.contains("momentum_20_1"));
        assert!(reply.contains("SIM"));
    }

    #[tokio::test]
    async fn change_stock_reports_old_and_new_symbols() {
        let d = CommandDispatcher::new();
        let reply = d.dispatch(&ctx(), "/change-stock 2330.TW").await;
        assert!(reply.contains("2454.TW"));
        assert!(reply.contains("2330.TW"));
        assert!(reply.contains("flattened 70"));
    }

    #[tokio::test]
    async fn change_stock_without_args_prints_usage() {
        let d = CommandDispatcher::new();
        let reply = d.dispatch(&ctx(), "/change-stock").await;
        assert!(reply.contains("usage"));
    }

    #[tokio::test]
    async fn set_main_strategy_parses_key_value_params() {
        let d = CommandDispatcher::new();
        let reply = d
            .dispatch(&ctx(), "/set-main-strategy momentum lookback=20 threshold_pct=1")
            .await;
        assert!(reply.contains("momentum_20_1"));

        let reply = d
            .dispatch(&ctx(), "/set-main-strategy momentum lookback=abc")
            .await;
        assert!(reply.contains("bad parameter"));
    }

    #[tokio::test]
    async fn confirmlive_passes_sim_record_through() {
        let d = CommandDispatcher::new();
        let reply = d.dispatch(&ctx(), "/confirmlive").await;
        assert!(reply.contains("ENABLED"));

        let weak = ctx_with(SimRecord {
            total_trades: 2,
            win_rate_pct: 10.0,
            max_drawdown_pct: 50.0,
        });
        let reply = d.dispatch(&weak, "/confirmlive").await;
        assert!(reply.contains("rejected"));
    }

    #[tokio::test]
    async fn ask_without_llm_says_not_configured() {
        let d = CommandDispatcher::new();
        let reply = d.dispatch(&ctx(), "/ask will it rain").await;
        assert!(reply.contains("not configured"));
    }

    #[tokio::test]
    async fn help_lists_the_command_surface() {
        let d = CommandDispatcher::new();
        let reply = d.dispatch(&ctx(), "/help").await;
        for cmd in ["/status", "/golive", "/confirmlive", "/change-stock"] {
            assert!(reply.contains(cmd), "help is missing {cmd}");
        }
    }

    #[test]
    fn command_names_cover_the_minimum_set() {
        let d = CommandDispatcher::new();
        let names = d.command_names();
        for required in [
            "/status",
            "/pause",
            "/resume",
            "/shutdown",
            "/change-stock",
            "/set-main-strategy",
            "/golive",
            "/confirmlive",
            "/backtosim",
            "/ask",
        ] {
            assert!(names.contains(&required), "missing {required}");
        }
    }
}
