//! taroko-schemas
//!
//! Core domain types shared by every other crate: bars, signals, orders,
//! fills, trading modes, veto sources, the micros fixed-point helpers, and
//! the Taipei trading-session calendar.
//!
//! Everything here is deterministic and IO-free so the backtest and the live
//! engine consume literally the same definitions.

pub mod fixedpoint;
pub mod session;
pub mod types;

pub use fixedpoint::{
    apply_bps, f64_to_micros, micros_to_f64, mul_qty_price_micros, price_to_micros, MICROS_SCALE,
};
pub use types::{
    Bar, BarError, FillRecord, LotType, OrderRequest, Side, SignalDirection, Timeframe,
    TradeSignal, TradingMode, VetoSource, ROUND_LOT_SIZE,
};
