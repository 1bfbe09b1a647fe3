//! The engine command queue.
//!
//! Everything that mutates engine state — operator commands from the chat
//! dispatcher and the scheduler's periodic tasks — funnels through one
//! mpsc queue consumed by the runner between ticks, preserving the
//! single-logical-writer rule for the ledger. Handlers get an
//! [`EngineHandle`], never the engine itself.

use std::collections::BTreeMap;

use taroko_ledger::Position;
use taroko_risk::SimRecord;
use tokio::sync::{mpsc, oneshot};

/// Reply to `/status`.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub active_stock: String,
    pub main_strategy: String,
    pub paused: bool,
    pub emergency: bool,
    pub live: bool,
    pub position: Option<Position>,
    pub daily_realized_micros: i64,
    pub unrealized_micros: i64,
}

/// Reply to `/change-stock`.
#[derive(Debug, Clone, PartialEq)]
pub struct StockChange {
    pub old_symbol: String,
    pub new_symbol: String,
    pub flattened_qty: i64,
}

/// Every request the runner processes between ticks.
#[derive(Debug)]
pub enum EngineCommand {
    // Operator commands (each carries its reply channel).
    Status {
        reply: oneshot::Sender<StatusReport>,
    },
    Pause {
        reply: oneshot::Sender<()>,
    },
    Resume {
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
    ChangeStock {
        symbol: String,
        reply: oneshot::Sender<Result<StockChange, String>>,
    },
    SetMainStrategy {
        name: String,
        params: BTreeMap<String, f64>,
        reply: oneshot::Sender<Result<String, String>>,
    },
    GoLive {
        reply: oneshot::Sender<String>,
    },
    ConfirmLive {
        record: SimRecord,
        reply: oneshot::Sender<Result<String, String>>,
    },
    BackToSim {
        reply: oneshot::Sender<String>,
    },
    // Scheduler tasks (fire-and-forget).
    DrawdownCheck,
    EodStatistics,
    WeeklyReport,
    GenerateExpirations,
    MonthlyCleanup,
}

/// Cloneable sender side of the command queue.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
}

/// The engine stopped consuming commands (shutdown or crash).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineGone;

impl std::fmt::Display for EngineGone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "engine is not running")
    }
}

impl std::error::Error for EngineGone {}

impl EngineHandle {
    pub fn new(tx: mpsc::Sender<EngineCommand>) -> Self {
        Self { tx }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> EngineCommand,
    ) -> Result<T, EngineGone> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(build(reply_tx)).await.map_err(|_| EngineGone)?;
        reply_rx.await.map_err(|_| EngineGone)
    }

    pub async fn status(&self) -> Result<StatusReport, EngineGone> {
        self.request(|reply| EngineCommand::Status { reply }).await
    }

    pub async fn pause(&self) -> Result<(), EngineGone> {
        self.request(|reply| EngineCommand::Pause { reply }).await
    }

    pub async fn resume(&self) -> Result<(), EngineGone> {
        self.request(|reply| EngineCommand::Resume { reply }).await
    }

    pub async fn shutdown(&self) -> Result<(), EngineGone> {
        self.request(|reply| EngineCommand::Shutdown { reply }).await
    }

    pub async fn change_stock(
        &self,
        symbol: impl Into<String>,
    ) -> Result<Result<StockChange, String>, EngineGone> {
        let symbol = symbol.into();
        self.request(|reply| EngineCommand::ChangeStock { symbol, reply })
            .await
    }

    pub async fn set_main_strategy(
        &self,
        name: impl Into<String>,
        params: BTreeMap<String, f64>,
    ) -> Result<Result<String, String>, EngineGone> {
        let name = name.into();
        self.request(|reply| EngineCommand::SetMainStrategy { name, params, reply })
            .await
    }

    pub async fn golive(&self) -> Result<String, EngineGone> {
        self.request(|reply| EngineCommand::GoLive { reply }).await
    }

    pub async fn confirmlive(
        &self,
        record: SimRecord,
    ) -> Result<Result<String, String>, EngineGone> {
        self.request(|reply| EngineCommand::ConfirmLive { record, reply })
            .await
    }

    pub async fn backtosim(&self) -> Result<String, EngineGone> {
        self.request(|reply| EngineCommand::BackToSim { reply }).await
    }
}
