//! The smart execution router.
//!
//! Single choke-point between the engine and the broker gateway. Chooses
//! the execution method, slices TWAP orders, retries transient failures
//! with exponential backoff and balance rebalancing, and reports every
//! attempt to the observer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use taroko_schemas::{
    mul_qty_price_micros, session, FillRecord, LotType, OrderRequest, Side, ROUND_LOT_SIZE,
};
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::lifecycle::OrderStatus;
use crate::slippage::{SlippageInput, SlippageModel, FEE_BPS, SELL_TAX_BPS};

/// Maximum submission attempts for one order/chunk on transient errors.
pub const MAX_SUBMIT_ATTEMPTS: u32 = 3;

/// Exponential backoff base between attempts.
pub const RETRY_BACKOFF_BASE_MS: u64 = 1_000;

/// Grace past the TWAP window before the terminal TIMEOUT.
pub const TWAP_GRACE_SECS: u64 = 60;

// ---------------------------------------------------------------------------
// Gateway boundary
// ---------------------------------------------------------------------------

/// Errors a gateway submission can surface, classified per the retry policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Retryable: timeouts, connection blips, 5xx.
    Transient(String),
    /// Not retryable: malformed order, unknown symbol.
    Validation(String),
    /// The account cannot cover the requested quantity.
    InsufficientFunds(String),
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayError::Transient(m) => write!(f, "transient gateway error: {m}"),
            GatewayError::Validation(m) => write!(f, "validation error: {m}"),
            GatewayError::InsufficientFunds(m) => write!(f, "insufficient funds: {m}"),
        }
    }
}

impl std::error::Error for GatewayError {}

/// Acknowledgement of a filled submission.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitAck {
    pub filled_price_micros: i64,
}

/// The narrow broker surface the router needs. The bridge adapter
/// implements this; tests script it.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn submit(&self, order: &OrderRequest) -> Result<SubmitAck, GatewayError>;

    /// Available cash, re-queried before each retry for the rebalancing
    /// downgrade.
    async fn available_cash_micros(&self) -> Result<i64, GatewayError>;
}

// ---------------------------------------------------------------------------
// Observation
// ---------------------------------------------------------------------------

/// The terminal classification of one submission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Filled,
    RetryScheduled,
    QuantityReduced,
    Abandoned,
    TimedOut,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Filled => "FILLED",
            AttemptOutcome::RetryScheduled => "RETRY_SCHEDULED",
            AttemptOutcome::QuantityReduced => "QUANTITY_REDUCED",
            AttemptOutcome::Abandoned => "ABANDONED",
            AttemptOutcome::TimedOut => "TIMED_OUT",
        }
    }
}

/// One audit record per submission attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRecord {
    pub order_ref: Uuid,
    pub symbol: String,
    pub side: Side,
    pub quantity: i64,
    pub price_micros: i64,
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    pub detail: String,
}

/// Receives every attempt record — the engine wires this to the audit log
/// and chat notifications.
pub trait ExecutionObserver: Send + Sync {
    fn on_attempt(&self, record: &AttemptRecord);
}

/// Discards everything (offline paths and tests that do not care).
pub struct NullObserver;

impl ExecutionObserver for NullObserver {
    fn on_attempt(&self, _record: &AttemptRecord) {}
}

// ---------------------------------------------------------------------------
// Method selection
// ---------------------------------------------------------------------------

/// How the router will work the order.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionMethod {
    Immediate,
    Twap { chunks: u32, window_min: i64 },
    Delayed { until: DateTime<Utc> },
}

/// TWAP chunk table: 100 → 3, 200 → 5, 500 → 7.
fn chunk_count(quantity: i64) -> u32 {
    if quantity >= 500 {
        7
    } else if quantity >= 200 {
        5
    } else {
        3
    }
}

/// Window in minutes: `clamp(10 + 2·⌊qty/100⌋ + (vol > 3% ? 5 : 0), 10, 30)`.
fn twap_window_min(quantity: i64, volatility: f64) -> i64 {
    let vol_bonus = if volatility > 0.03 { 5 } else { 0 };
    (10 + 2 * (quantity / 100) + vol_bonus).clamp(10, 30)
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Outcome of one TWAP chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkOutcome {
    pub index: u32,
    pub quantity: i64,
    pub status: OrderStatus,
}

/// The router's terminal report for one order.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub order_ref: Uuid,
    pub method: ExecutionMethod,
    pub status: OrderStatus,
    pub requested_quantity: i64,
    pub filled_quantity: i64,
    pub attempts: u32,
    pub chunks: Vec<ChunkOutcome>,
    pub fills: Vec<FillRecord>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub struct ExecutionRouter<G: OrderGateway> {
    gateway: G,
    observer: Arc<dyn ExecutionObserver>,
    slippage: SlippageModel,
}

impl<G: OrderGateway> ExecutionRouter<G> {
    pub fn new(gateway: G, observer: Arc<dyn ExecutionObserver>) -> Self {
        Self {
            gateway,
            observer,
            slippage: SlippageModel::new(),
        }
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Method policy. Emergency and exit orders are never optimized.
    pub fn decide_method(
        &self,
        order: &OrderRequest,
        volatility: f64,
        now: DateTime<Utc>,
    ) -> ExecutionMethod {
        if order.emergency || order.is_exit {
            return ExecutionMethod::Immediate;
        }
        if order.quantity >= 100 {
            return ExecutionMethod::Twap {
                chunks: chunk_count(order.quantity),
                window_min: twap_window_min(order.quantity, volatility),
            };
        }
        if session::in_opening_auction(now) {
            return ExecutionMethod::Delayed {
                until: session::opening_auction_end(now),
            };
        }
        ExecutionMethod::Immediate
    }

    /// Execute an order to a terminal status. Every attempt is observed;
    /// the returned fills are applied to the ledger by the caller, in order.
    pub async fn execute(
        &self,
        order: OrderRequest,
        volatility: f64,
        adv: f64,
        now: DateTime<Utc>,
    ) -> ExecutionReport {
        let order_ref = Uuid::new_v4();

        if let Err(reason) = order.validate() {
            // Validation refusals get zero retries.
            self.observe(
                order_ref,
                &order,
                order.quantity,
                1,
                AttemptOutcome::Abandoned,
                &reason,
            );
            return ExecutionReport {
                order_ref,
                method: ExecutionMethod::Immediate,
                status: OrderStatus::Abandoned,
                requested_quantity: order.quantity,
                filled_quantity: 0,
                attempts: 0,
                chunks: Vec::new(),
                fills: Vec::new(),
            };
        }

        let method = self.decide_method(&order, volatility, now);
        match method.clone() {
            ExecutionMethod::Immediate => self.execute_single(order_ref, order, method, adv, now).await,
            ExecutionMethod::Delayed { until } => {
                let wait = (until - now).num_seconds().max(0) as u64;
                info!(order = %order_ref, wait_secs = wait, "deferring order past the opening auction");
                tokio::time::sleep(Duration::from_secs(wait)).await;
                self.execute_single(order_ref, order, method, adv, until).await
            }
            ExecutionMethod::Twap { chunks, window_min } => {
                self.execute_twap(order_ref, order, chunks, window_min, adv, now)
                    .await
            }
        }
    }

    async fn execute_single(
        &self,
        order_ref: Uuid,
        order: OrderRequest,
        method: ExecutionMethod,
        adv: f64,
        now: DateTime<Utc>,
    ) -> ExecutionReport {
        let (status, attempts, fill) = self.submit_with_retry(order_ref, &order, adv, now).await;
        let filled_quantity = fill.as_ref().map(|f| f.quantity).unwrap_or(0);
        ExecutionReport {
            order_ref,
            method,
            status,
            requested_quantity: order.quantity,
            filled_quantity,
            attempts,
            chunks: Vec::new(),
            fills: fill.into_iter().collect(),
        }
    }

    async fn execute_twap(
        &self,
        order_ref: Uuid,
        order: OrderRequest,
        chunks: u32,
        window_min: i64,
        adv: f64,
        now: DateTime<Utc>,
    ) -> ExecutionReport {
        let quantities = split_chunks(order.quantity, chunks, order.lot_type);
        let interval = Duration::from_secs((window_min * 60) as u64 / chunks as u64);
        let deadline =
            Instant::now() + Duration::from_secs((window_min * 60) as u64 + TWAP_GRACE_SECS);

        info!(
            order = %order_ref,
            chunks,
            window_min,
            interval_secs = interval.as_secs(),
            "TWAP execution started"
        );

        let mut outcomes = Vec::with_capacity(quantities.len());
        let mut fills = Vec::new();
        let mut total_attempts = 0u32;
        let mut timed_out = false;

        for (i, qty) in quantities.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(interval).await;
            }

            if Instant::now() > deadline {
                // The window plus grace is exhausted: remaining chunks are
                // terminal TIMEOUT, never carried over.
                timed_out = true;
                for (j, rest) in quantities.iter().enumerate().skip(i) {
                    self.observe(
                        order_ref,
                        &order,
                        *rest,
                        0,
                        AttemptOutcome::TimedOut,
                        &format!("TWAP window exhausted before chunk {}", j + 1),
                    );
                    outcomes.push(ChunkOutcome {
                        index: j as u32,
                        quantity: *rest,
                        status: OrderStatus::TimedOut,
                    });
                }
                break;
            }

            let chunk = OrderRequest {
                quantity: *qty,
                ..order.clone()
            };
            let chunk_now = now + chrono::Duration::seconds((interval.as_secs() * i as u64) as i64);
            let (status, attempts, fill) =
                self.submit_with_retry(order_ref, &chunk, adv, chunk_now).await;
            total_attempts += attempts;
            if let Some(f) = fill {
                fills.push(f);
            } else {
                // Missed chunk: logged, not re-queued.
                warn!(order = %order_ref, chunk = i, "TWAP chunk missed; not retried");
            }
            outcomes.push(ChunkOutcome {
                index: i as u32,
                quantity: *qty,
                status,
            });
        }

        let filled_quantity: i64 = fills.iter().map(|f| f.quantity).sum();
        let status = if timed_out {
            OrderStatus::TimedOut
        } else if filled_quantity == order.quantity {
            OrderStatus::Filled
        } else {
            OrderStatus::Abandoned
        };

        ExecutionReport {
            order_ref,
            method: ExecutionMethod::Twap { chunks, window_min },
            status,
            requested_quantity: order.quantity,
            filled_quantity,
            attempts: total_attempts,
            chunks: outcomes,
            fills,
        }
    }

    /// Submit one order/chunk with up to [`MAX_SUBMIT_ATTEMPTS`] attempts.
    ///
    /// After a retryable failure the available balance is re-queried and the
    /// quantity shrunk to the largest feasible integer (≥ 1 share, lot-
    /// rounded); with no feasible quantity the order is abandoned.
    async fn submit_with_retry(
        &self,
        order_ref: Uuid,
        order: &OrderRequest,
        adv: f64,
        now: DateTime<Utc>,
    ) -> (OrderStatus, u32, Option<FillRecord>) {
        let mut current = order.clone();
        let mut status = OrderStatus::Pending;

        for attempt in 1..=MAX_SUBMIT_ATTEMPTS {
            status = match status.transition(OrderStatus::Submitted) {
                Ok(s) => s,
                Err(e) => {
                    warn!(order = %order_ref, "lifecycle error: {e}");
                    return (OrderStatus::Abandoned, attempt - 1, None);
                }
            };

            match self.gateway.submit(&current).await {
                Ok(ack) => {
                    self.observe(
                        order_ref,
                        &current,
                        current.quantity,
                        attempt,
                        AttemptOutcome::Filled,
                        "order filled",
                    );
                    let fill = self.build_fill(order_ref, &current, ack, adv, now);
                    return (OrderStatus::Filled, attempt, Some(fill));
                }
                Err(GatewayError::Validation(reason)) => {
                    self.observe(
                        order_ref,
                        &current,
                        current.quantity,
                        attempt,
                        AttemptOutcome::Abandoned,
                        &reason,
                    );
                    return (OrderStatus::Abandoned, attempt, None);
                }
                Err(err) => {
                    if attempt == MAX_SUBMIT_ATTEMPTS {
                        self.observe(
                            order_ref,
                            &current,
                            current.quantity,
                            attempt,
                            AttemptOutcome::Abandoned,
                            &format!("retries exhausted: {err}"),
                        );
                        return (OrderStatus::Abandoned, attempt, None);
                    }

                    self.observe(
                        order_ref,
                        &current,
                        current.quantity,
                        attempt,
                        AttemptOutcome::RetryScheduled,
                        &err.to_string(),
                    );
                    status = OrderStatus::Retrying;

                    let backoff = RETRY_BACKOFF_BASE_MS * (1 << (attempt - 1));
                    tokio::time::sleep(Duration::from_millis(backoff)).await;

                    if current.side == Side::Buy {
                        match self.rebalance_quantity(&current).await {
                            Some(new_qty) if new_qty < current.quantity => {
                                self.observe(
                                    order_ref,
                                    &current,
                                    new_qty,
                                    attempt,
                                    AttemptOutcome::QuantityReduced,
                                    &format!(
                                        "quantity reduced {} -> {new_qty} after balance check",
                                        current.quantity
                                    ),
                                );
                                current.quantity = new_qty;
                            }
                            Some(_) => {}
                            None => {
                                self.observe(
                                    order_ref,
                                    &current,
                                    current.quantity,
                                    attempt,
                                    AttemptOutcome::Abandoned,
                                    "no feasible quantity for available balance",
                                );
                                return (OrderStatus::Abandoned, attempt, None);
                            }
                        }
                    }
                }
            }
        }

        (OrderStatus::Abandoned, MAX_SUBMIT_ATTEMPTS, None)
    }

    /// Largest feasible buy quantity for the available balance, lot-rounded.
    /// `None` when not even one share/lot is coverable.
    async fn rebalance_quantity(&self, order: &OrderRequest) -> Option<i64> {
        let cash = match self.gateway.available_cash_micros().await {
            Ok(c) => c,
            // Balance check itself failing is not fatal; keep the quantity.
            Err(_) => return Some(order.quantity),
        };
        if order.price_micros <= 0 {
            return Some(order.quantity);
        }
        let mut feasible = (cash / order.price_micros).min(order.quantity);
        if order.lot_type == LotType::Round {
            feasible = (feasible / ROUND_LOT_SIZE) * ROUND_LOT_SIZE;
        }
        if feasible < 1 {
            None
        } else {
            Some(feasible)
        }
    }

    fn build_fill(
        &self,
        order_ref: Uuid,
        order: &OrderRequest,
        ack: SubmitAck,
        adv: f64,
        now: DateTime<Utc>,
    ) -> FillRecord {
        let price = if ack.filled_price_micros > 0 {
            ack.filled_price_micros
        } else {
            order.price_micros
        };
        let notional = mul_qty_price_micros(order.quantity, price);
        let fee_micros = (notional as f64 * FEE_BPS / 10_000.0).round() as i64;
        let tax_micros = match order.side {
            Side::Sell => (notional as f64 * SELL_TAX_BPS / 10_000.0).round() as i64,
            Side::Buy => 0,
        };
        let rate = self.slippage.rate_bps(&SlippageInput {
            adv,
            order_qty: order.quantity as f64,
            now,
            historical_bps: None,
        });
        FillRecord::new(order_ref, &order.symbol, order.side, order.quantity, price, now)
            .with_costs(fee_micros, tax_micros, rate)
    }

    fn observe(
        &self,
        order_ref: Uuid,
        order: &OrderRequest,
        quantity: i64,
        attempt: u32,
        outcome: AttemptOutcome,
        detail: &str,
    ) {
        self.observer.on_attempt(&AttemptRecord {
            order_ref,
            symbol: order.symbol.clone(),
            side: order.side,
            quantity,
            price_micros: order.price_micros,
            attempt,
            outcome,
            detail: detail.to_string(),
        });
    }
}

/// Split a quantity into `chunks` near-equal parts that sum exactly.
/// Round-lot orders split in whole lots; a remainder rides on the early
/// chunks.
fn split_chunks(quantity: i64, chunks: u32, lot_type: LotType) -> Vec<i64> {
    let n = chunks as i64;
    let unit = match lot_type {
        LotType::Round => ROUND_LOT_SIZE,
        LotType::Odd => 1,
    };
    let units = quantity / unit;
    let base = units / n;
    let rem = units % n;

    let mut out = Vec::with_capacity(chunks as usize);
    for i in 0..n {
        let u = base + if i < rem { 1 } else { 0 };
        if u > 0 {
            out.push(u * unit);
        }
    }
    // Whatever escaped unit division (odd-lot remainder of a round split)
    // rides on the first chunk.
    let assigned: i64 = out.iter().sum();
    if let Some(first) = out.first_mut() {
        *first += quantity - assigned;
    } else if quantity > 0 {
        out.push(quantity);
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
