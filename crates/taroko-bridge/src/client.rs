//! The bridge HTTP client.
//!
//! One `reqwest::Client` with a 10 s per-call deadline; the base URL is
//! injectable so tests can point at a local stub. Errors are classified at
//! this boundary into the router's taxonomy: transport problems and 5xx are
//! transient, 4xx and bridge-reported errors are validation, and the
//! bridge's insufficient-balance reply maps to `InsufficientFunds`.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use taroko_execution::{GatewayError, OrderGateway, SubmitAck};
use taroko_schemas::{f64_to_micros, OrderRequest};
use tracing::debug;

use crate::wire::{BridgeBar, BridgeSignal, BridgeTick, Orderbook, OrderPayload, PortfolioSummary};

/// Per-call HTTP deadline.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct BridgeClient {
    http: reqwest::Client,
    base_url: String,
}

impl BridgeClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS))
            .build()
            .expect("reqwest client construction cannot fail with static options");
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    // -----------------------------------------------------------------------
    // Quotes and signals
    // -----------------------------------------------------------------------

    /// `GET /signal` — the bridge's own signal + current price.
    pub async fn signal(&self) -> Result<BridgeSignal, GatewayError> {
        let resp = self
            .http
            .get(self.url("/signal"))
            .send()
            .await
            .map_err(transport)?;
        decode_json(resp).await
    }

    /// `GET /stream/quotes?limit=N` — last N ticks, newest first.
    pub async fn recent_quotes(&self, limit: usize) -> Result<Vec<BridgeTick>, GatewayError> {
        let resp = self
            .http
            .get(self.url("/stream/quotes"))
            .query(&[("limit", limit.to_string())])
            .send()
            .await
            .map_err(transport)?;
        decode_json(resp).await
    }

    /// `GET /orderbook/{symbol}` — 5 levels each side.
    pub async fn orderbook(&self, symbol: &str) -> Result<Orderbook, GatewayError> {
        let resp = self
            .http
            .get(self.url(&format!("/orderbook/{symbol}")))
            .send()
            .await
            .map_err(transport)?;
        decode_json(resp).await
    }

    /// `POST /stream/subscribe` — start streaming a symbol.
    pub async fn subscribe(&self, symbol: &str) -> Result<(), GatewayError> {
        let resp = self
            .http
            .post(self.url("/stream/subscribe"))
            .json(&serde_json::json!({ "symbol": symbol }))
            .send()
            .await
            .map_err(transport)?;
        check_status(&resp)?;
        debug!(symbol, "bridge subscription acknowledged");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Account
    // -----------------------------------------------------------------------

    /// `GET /portfolio` — equity and available margin.
    pub async fn portfolio(&self) -> Result<PortfolioSummary, GatewayError> {
        let resp = self
            .http
            .get(self.url("/portfolio"))
            .send()
            .await
            .map_err(transport)?;
        decode_json(resp).await
    }

    // -----------------------------------------------------------------------
    // History
    // -----------------------------------------------------------------------

    /// `POST /data/download-batch` — historical bars for one date range.
    pub async fn download_batch(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<BridgeBar>, GatewayError> {
        #[derive(serde::Deserialize)]
        struct Batch {
            #[serde(default)]
            data: Vec<BridgeBar>,
        }

        let body = serde_json::json!({
            "symbol": symbol,
            "start_date": start.format("%Y-%m-%d").to_string(),
            "end_date": end.format("%Y-%m-%d").to_string(),
        });
        let resp = self
            .http
            .post(self.url("/data/download-batch"))
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        let batch: Batch = decode_json(resp).await?;
        Ok(batch.data)
    }

    // -----------------------------------------------------------------------
    // Orders
    // -----------------------------------------------------------------------

    /// `POST /order` — a single submission attempt (retries live in the
    /// router, not here).
    pub async fn submit_order(&self, order: &OrderRequest) -> Result<SubmitAck, GatewayError> {
        let payload = OrderPayload::from_request(order);
        let resp = self
            .http
            .post(self.url("/order"))
            .json(&payload)
            .send()
            .await
            .map_err(transport)?;

        let status = resp.status();
        let body: Value = resp
            .json()
            .await
            .map_err(|e| GatewayError::Transient(format!("order response decode: {e}")))?;

        // Success is the literal string "order_filled".
        if body.as_str() == Some("order_filled") {
            return Ok(SubmitAck {
                filled_price_micros: order.price_micros,
            });
        }

        let message = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unrecognized order response")
            .to_string();
        Err(classify_order_error(status, &message))
    }
}

#[async_trait]
impl OrderGateway for BridgeClient {
    async fn submit(&self, order: &OrderRequest) -> Result<SubmitAck, GatewayError> {
        self.submit_order(order).await
    }

    async fn available_cash_micros(&self) -> Result<i64, GatewayError> {
        let summary = self.portfolio().await?;
        Ok(f64_to_micros(summary.available_margin))
    }
}

// ---------------------------------------------------------------------------
// Error classification
// ---------------------------------------------------------------------------

fn transport(e: reqwest::Error) -> GatewayError {
    GatewayError::Transient(format!("bridge transport: {e}"))
}

fn check_status(resp: &reqwest::Response) -> Result<(), GatewayError> {
    let status = resp.status();
    if status.is_success() {
        Ok(())
    } else if status.is_server_error() {
        Err(GatewayError::Transient(format!("bridge http {status}")))
    } else {
        Err(GatewayError::Validation(format!("bridge http {status}")))
    }
}

async fn decode_json<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<T, GatewayError> {
    check_status(&resp)?;
    resp.json::<T>()
        .await
        .map_err(|e| GatewayError::Transient(format!("bridge response decode: {e}")))
}

/// Map a bridge order error onto the retry taxonomy.
fn classify_order_error(status: reqwest::StatusCode, message: &str) -> GatewayError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("insufficient") || lower.contains("balance") || lower.contains("margin") {
        return GatewayError::InsufficientFunds(message.to_string());
    }
    if status.is_server_error() {
        return GatewayError::Transient(message.to_string());
    }
    GatewayError::Validation(message.to_string())
}

/// Parse the bridge's ISO-ish timestamps (with or without zone) into UTC.
pub fn parse_bridge_timestamp(raw: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        .with_context(|| format!("unparseable bridge timestamp '{raw}'"))?;
    // Zoneless bridge timestamps are Taipei-local by contract.
    taroko_schemas::session::TAIPEI
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("ambiguous bridge timestamp '{raw}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn classify_insufficient_balance() {
        let e = classify_order_error(StatusCode::OK, "Insufficient balance for 10 shares");
        assert!(matches!(e, GatewayError::InsufficientFunds(_)));
    }

    #[test]
    fn classify_server_error_as_transient() {
        let e = classify_order_error(StatusCode::INTERNAL_SERVER_ERROR, "upstream hiccup");
        assert!(matches!(e, GatewayError::Transient(_)));
    }

    #[test]
    fn classify_client_error_as_validation() {
        let e = classify_order_error(StatusCode::BAD_REQUEST, "unknown symbol 9999.TW");
        assert!(matches!(e, GatewayError::Validation(_)));
    }

    #[test]
    fn url_joins_without_double_slash() {
        let c = BridgeClient::new("http://localhost:8888/");
        assert_eq!(c.url("/signal"), "http://localhost:8888/signal");
    }

    #[test]
    fn parses_zoneless_timestamp_as_taipei() {
        let dt = parse_bridge_timestamp("2025-06-03T10:00:00").unwrap();
        // 10:00 Taipei == 02:00 UTC.
        assert_eq!(dt.to_rfc3339(), "2025-06-03T02:00:00+00:00");
    }

    #[test]
    fn parses_rfc3339_timestamp() {
        let dt = parse_bridge_timestamp("2025-06-03T02:00:00Z").unwrap();
        assert_eq!(dt.timestamp(), 1_748_916_000);
    }
}
