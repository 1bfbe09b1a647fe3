//! taroko entry point.
//!
//! One binary, four subcommands: `serve` runs the live engine; `backtest`
//! and `walkforward` replay stored history offline; `download-history`
//! bulk-loads bars through the bridge.
//!
//! Exit codes: 0 clean shutdown, 1 configuration error, 2 fatal runtime
//! error, 130 signal-interrupted.

mod commands;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use taroko_config::AppConfig;
use tracing::error;

const EXIT_OK: u8 = 0;
const EXIT_CONFIG: u8 = 1;
const EXIT_RUNTIME: u8 = 2;
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "taroko")]
#[command(about = "Taiwan-market automated trading desk", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the live trading engine.
    Serve,

    /// Replay a strategy family over the last N years of stored bars.
    Backtest {
        years: i64,

        /// Strategy family (momentum | mean_reversion | breakout).
        #[arg(long, default_value = "momentum")]
        strategy: String,

        /// Symbol; defaults to the persisted active stock.
        #[arg(long)]
        symbol: Option<String>,
    },

    /// Walk-forward optimize a strategy family over the last N years.
    Walkforward {
        years: i64,

        #[arg(long, default_value = "momentum")]
        strategy: String,

        #[arg(long)]
        symbol: Option<String>,
    },

    /// Bulk-download bars through the bridge into the database.
    DownloadHistory {
        years: i64,

        /// Symbol; defaults to the persisted active stock.
        #[arg(long)]
        symbol: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let config = match AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("configuration error: {e:#}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let outcome = match cli.cmd {
        Commands::Serve => commands::serve::run(config).await,
        Commands::Backtest {
            years,
            strategy,
            symbol,
        } => commands::backtest::run(config, years, strategy, symbol).await,
        Commands::Walkforward {
            years,
            strategy,
            symbol,
        } => commands::walkforward::run(config, years, strategy, symbol).await,
        Commands::DownloadHistory { years, symbol } => {
            commands::download::run(config, years, symbol).await
        }
    };

    match outcome {
        Ok(commands::Outcome::Clean) => ExitCode::from(EXIT_OK),
        Ok(commands::Outcome::Interrupted) => ExitCode::from(EXIT_INTERRUPTED),
        Err(e) => {
            error!("fatal: {e:#}");
            ExitCode::from(EXIT_RUNTIME)
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}
