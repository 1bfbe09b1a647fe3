//! taroko-strategy
//!
//! The strategy family and its manager.
//!
//! A strategy is a deterministic function over `(PortfolioView, Bar)`
//! returning a [`TradeSignal`], plus `reset()` and a stable identity.
//! Strategies may keep private rolling windows; they are isolated — no
//! strategy ever sees another's state.
//!
//! [`StrategyManager`] owns one **main** strategy (bound to the active
//! stock) and any number of **shadow** strategies. Per tick every enabled
//! strategy runs concurrently behind a 200 ms deadline; only the main
//! signal drives live orders. A periodic drawdown check can hot-swap the
//! main strategy for the best-performing shadow candidate.

mod manager;
mod registry;
mod strategies;
mod types;

pub use manager::{ShadowPerfStore, StrategyManager, StrategySlot, SwapEvent, TickSignals};
pub use registry::{build_strategy, param_grid, strategy_names, RegistryError};
pub use strategies::{ChannelBreakoutStrategy, MeanReversionStrategy, MomentumStrategy};
pub use types::{PortfolioView, RollingWindow, Strategy, StrategyKind, STRATEGY_DEADLINE_MS};
