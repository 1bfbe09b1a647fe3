//! taroko-bridge
//!
//! HTTP adapter for the brokerage bridge. This is the **only** place the
//! bridge's JSON wire format exists; everything inward deals in domain
//! types and micros.
//!
//! Wire rule that must never regress: the `/order` payload serializes
//! `quantity` as a **string integer** (`"2"`, never `2`) — bit-exact
//! compatibility with the bridge's parser.

mod client;
mod ring;
mod wire;

pub use client::{parse_bridge_timestamp, BridgeClient, DEFAULT_HTTP_TIMEOUT_SECS};
pub use ring::TickRing;
pub use wire::{
    BookLevel, BridgeBar, BridgeSignal, BridgeTick, OrderPayload, Orderbook, PortfolioSummary,
};

use std::future::Future;
use std::time::Duration;

use taroko_execution::GatewayError;
use tracing::warn;

/// Transient-retry helper: up to `attempts` tries with exponential backoff
/// (base 1 s). Validation and insufficient-funds errors propagate
/// immediately — only transients are retried.
pub async fn with_retry<T, F, Fut>(label: &str, attempts: u32, mut op: F) -> Result<T, GatewayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    let mut last = None;
    for attempt in 1..=attempts {
        match op().await {
            Ok(v) => return Ok(v),
            Err(GatewayError::Transient(msg)) => {
                warn!(op = label, attempt, "transient failure: {msg}");
                last = Some(GatewayError::Transient(msg));
                if attempt < attempts {
                    let backoff = Duration::from_millis(1_000 * (1 << (attempt - 1)));
                    tokio::time::sleep(backoff).await;
                }
            }
            Err(other) => return Err(other),
        }
    }
    Err(last.unwrap_or_else(|| GatewayError::Transient(format!("{label}: no attempts made"))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let out = with_retry("t", 3, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(GatewayError::Transient("blip".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(out.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn validation_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let out: Result<i32, _> = with_retry("t", 3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(GatewayError::Validation("bad symbol".into())) }
        })
        .await;
        assert!(matches!(out, Err(GatewayError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_transient_exhausts_attempts() {
        let calls = AtomicU32::new(0);
        let out: Result<i32, _> = with_retry("t", 3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(GatewayError::Transient("down".into())) }
        })
        .await;
        assert!(matches!(out, Err(GatewayError::Transient(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
