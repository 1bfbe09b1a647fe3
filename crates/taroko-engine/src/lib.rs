//! taroko-engine
//!
//! The live trading engine: the per-tick control loop fusing signals, risk
//! state, positions, and time-based exits ([`EngineCore`]); the process
//! globals ([`EngineState`]); the command queue the operator surface and
//! scheduler feed ([`EngineHandle`]); the periodic task cadences
//! ([`scheduler`]); and the serve-mode runner that wires them to the
//! bridge, the database, the audit log, and chat.

mod core;
mod handle;
mod runner;
mod scheduler;
mod state;

pub use crate::core::{EngineConfig, EngineCore, TickPhase, TickReport};
pub use handle::{EngineCommand, EngineGone, EngineHandle, StatusReport, StockChange};
pub use runner::{run_serve_loop, AuditExecutionObserver, ServeDeps, TICK_INTERVAL_SECS};
pub use scheduler::{
    next_monday_at, next_month_first_at, next_new_year, next_weekday_at, spawn_scheduler,
    DRAWDOWN_CHECK_SECS,
};
pub use state::{EngineState, GOLIVE_PENDING_MINUTES};

use async_trait::async_trait;

/// Outbound chat messages. The Telegram crate implements this; tests and
/// offline runs use [`NullNotifier`].
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str);
}

/// Discards all notifications.
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn send(&self, _text: &str) {}
}
