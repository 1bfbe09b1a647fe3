//! taroko-execution
//!
//! Order-side machinery: position sizing, the slippage model, and the smart
//! execution router.
//!
//! The router is the single choke-point between the engine and the broker
//! gateway — every submission attempt (success, retry, abandon) flows
//! through it and is reported to the [`ExecutionObserver`] for audit and
//! chat notification. Method selection, TWAP slicing, retry/backoff, and
//! the balance-rebalancing downgrade all live here; the gateway itself is a
//! narrow trait the bridge adapter implements.

mod lifecycle;
mod router;
mod sizing;
mod slippage;

pub use lifecycle::{OrderLifecycleError, OrderStatus};
pub use router::{
    AttemptOutcome, AttemptRecord, ChunkOutcome, ExecutionMethod, ExecutionObserver,
    ExecutionReport, ExecutionRouter, GatewayError, NullObserver, OrderGateway, SubmitAck,
    MAX_SUBMIT_ATTEMPTS, RETRY_BACKOFF_BASE_MS, TWAP_GRACE_SECS,
};
pub use sizing::{size_position, SizingDecision, SizingInput, SizingMethod};
pub use slippage::{SlippageInput, SlippageModel, FEE_BPS, SELL_TAX_BPS};
