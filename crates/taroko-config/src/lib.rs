//! taroko-config
//!
//! Runtime configuration, resolved **once** at startup.
//!
//! # Contract
//! - [`AppConfig::from_env`] is the single place that reads environment
//!   variables; never scatter `std::env::var` calls across the codebase.
//! - Secrets (`POSTGRES_PASSWORD`, `TELEGRAM_BOT_TOKEN`) are **redacted** in
//!   `Debug` output. Error messages reference the env var NAME, never the
//!   value.
//! - [`RiskSettings`] carries the trading tunables with conservative
//!   defaults; a layered YAML override path exists for desks that keep their
//!   limits in files (later files win via deep-merge, and the merged result
//!   is canonicalized + hashed for run attribution).

mod layered;
mod risk_settings;

pub use layered::{load_layered_yaml, LoadedConfig};
pub use risk_settings::RiskSettings;

use anyhow::{bail, Result};
use taroko_schemas::TradingMode;

/// Default bridge endpoint when `BRIDGE_URL` is absent.
pub const DEFAULT_BRIDGE_URL: &str = "http://localhost:8888";

/// `system_config` key holding the currently traded symbol.
pub const ACTIVE_STOCK_KEY: &str = "CURRENT_ACTIVE_STOCK";

/// Default active symbol when the slot has never been written.
pub const DEFAULT_ACTIVE_STOCK: &str = "2454.TW";

// ---------------------------------------------------------------------------
// Postgres
// ---------------------------------------------------------------------------

/// Database connection settings from `POSTGRES_{HOST,PORT,DB,USER,PASSWORD}`.
#[derive(Clone)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub db: String,
    pub user: String,
    pub password: String,
}

impl PostgresConfig {
    pub fn url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.db
        )
    }
}

impl std::fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("db", &self.db)
            .field("user", &self.user)
            .field("password", &"<REDACTED>")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Telegram
// ---------------------------------------------------------------------------

/// Chat transport credentials. `None` when the operator surface is disabled
/// (backtest / walk-forward / download runs do not require it).
#[derive(Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: i64,
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &"<REDACTED>")
            .field("chat_id", &self.chat_id)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// AppConfig
// ---------------------------------------------------------------------------

/// Everything the binary needs, resolved once from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bridge_url: String,
    pub postgres: PostgresConfig,
    /// Absent in offline runs; `serve` requires it.
    pub telegram: Option<TelegramConfig>,
    pub trading_mode: TradingMode,
    pub risk: RiskSettings,
}

impl AppConfig {
    /// Resolve configuration from the environment.
    ///
    /// Loads `.env` first if present (dev convenience; production injects
    /// env vars directly). Fails with a config error when a required
    /// variable is missing or malformed.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let bridge_url =
            std::env::var("BRIDGE_URL").unwrap_or_else(|_| DEFAULT_BRIDGE_URL.to_string());

        let postgres = PostgresConfig {
            host: env_or("POSTGRES_HOST", "localhost"),
            port: match env_or("POSTGRES_PORT", "5432").parse() {
                Ok(p) => p,
                Err(_) => bail!("POSTGRES_PORT is not a valid port number"),
            },
            db: env_or("POSTGRES_DB", "taroko"),
            user: env_or("POSTGRES_USER", "taroko"),
            password: env_or("POSTGRES_PASSWORD", ""),
        };

        let telegram = match (
            non_empty_env("TELEGRAM_BOT_TOKEN"),
            non_empty_env("TELEGRAM_CHAT_ID"),
        ) {
            (Some(bot_token), Some(chat_id_s)) => {
                let chat_id = match chat_id_s.parse() {
                    Ok(id) => id,
                    Err(_) => bail!("TELEGRAM_CHAT_ID is not a valid integer chat id"),
                };
                Some(TelegramConfig { bot_token, chat_id })
            }
            (None, None) => None,
            _ => bail!("TELEGRAM_BOT_TOKEN and TELEGRAM_CHAT_ID must be set together"),
        };

        let mode_s = env_or("TRADING_MODE", "stock");
        let trading_mode = match TradingMode::parse(&mode_s) {
            Some(m) => m,
            None => bail!(
                "TRADING_MODE must be one of stock | futures | stock_and_futures (env var holds an invalid value)"
            ),
        };

        Ok(Self {
            bridge_url,
            postgres,
            telegram,
            trading_mode,
            risk: RiskSettings::default(),
        })
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty()).unwrap_or_else(|| default.to_string())
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
