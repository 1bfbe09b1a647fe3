//! Bridge wire types, kept verbatim to the bridge's JSON contract.

use serde::{Deserialize, Serialize};
use taroko_schemas::OrderRequest;

/// `GET /signal` response.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeSignal {
    pub direction: String,
    pub confidence: f64,
    pub current_price: f64,
    #[serde(default)]
    pub exit_signal: Option<bool>,
}

/// One streamed tick (`GET /stream/quotes` returns the last N, newest
/// first).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BridgeTick {
    pub price: f64,
    #[serde(default)]
    pub volume: i64,
    #[serde(default)]
    pub ts: Option<String>,
}

/// One price level of the 5-level book.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub volume: i64,
}

/// `GET /orderbook/{symbol}` response.
#[derive(Debug, Clone, Deserialize)]
pub struct Orderbook {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    #[serde(default)]
    pub ts: Option<String>,
}

/// One historical bar from `POST /data/download-batch`.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeBar {
    pub timestamp: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

/// `GET /portfolio` response.
#[derive(Debug, Clone, Deserialize)]
pub struct PortfolioSummary {
    pub equity: f64,
    pub available_margin: f64,
    #[serde(default)]
    pub positions: Vec<serde_json::Value>,
}

/// `POST /order` body.
///
/// `quantity` is a **string integer** on the wire — the bridge's parser is
/// bit-exact about this. [`OrderPayload::from_request`] is the single
/// conversion point.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderPayload {
    pub action: String,
    pub quantity: String,
    pub price: f64,
    pub symbol: String,
    pub is_exit: bool,
}

impl OrderPayload {
    pub fn from_request(order: &OrderRequest) -> Self {
        Self {
            action: order.side.as_str().to_string(),
            quantity: order.quantity.to_string(),
            price: taroko_schemas::micros_to_f64(order.price_micros),
            symbol: order.symbol.clone(),
            is_exit: order.is_exit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use taroko_schemas::{f64_to_micros, LotType, Side};

    #[test]
    fn quantity_serializes_as_string() {
        let order = OrderRequest::new("TXF", Side::Buy, 2, f64_to_micros(22_500.0), LotType::Odd);
        let payload = OrderPayload::from_request(&order);
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["quantity"], serde_json::Value::String("2".to_string()));
        assert_eq!(json["action"], "BUY");
        assert_eq!(json["price"], 22_500.0);
        assert_eq!(json["is_exit"], false);
    }

    #[test]
    fn signal_response_parses_with_and_without_exit() {
        let with: BridgeSignal = serde_json::from_str(
            r#"{"direction":"LONG","confidence":0.75,"current_price":22500.0,"exit_signal":true}"#,
        )
        .unwrap();
        assert_eq!(with.direction, "LONG");
        assert_eq!(with.exit_signal, Some(true));

        let without: BridgeSignal = serde_json::from_str(
            r#"{"direction":"NEUTRAL","confidence":0.1,"current_price":22000.0}"#,
        )
        .unwrap();
        assert_eq!(without.exit_signal, None);
    }

    #[test]
    fn orderbook_parses_five_levels() {
        let book: Orderbook = serde_json::from_str(
            r#"{"bids":[{"price":22499.0,"volume":10},{"price":22498.0,"volume":7}],
                "asks":[{"price":22501.0,"volume":4}],"ts":"2025-06-03T10:00:00"}"#,
        )
        .unwrap();
        assert_eq!(book.bids.len(), 2);
        assert_eq!(book.asks[0].volume, 4);
    }

    #[test]
    fn download_batch_bar_parses() {
        let bar: BridgeBar = serde_json::from_str(
            r#"{"timestamp":"2024-01-02T09:05:00","open":588.0,"high":590.0,
                "low":587.5,"close":589.0,"volume":12345}"#,
        )
        .unwrap();
        assert_eq!(bar.volume, 12_345);
        assert_eq!(bar.high, 590.0);
    }

    proptest! {
        /// For all positive quantities, the wire field is a string matching
        /// ^[1-9][0-9]*$.
        #[test]
        fn quantity_wire_format_property(qty in 1i64..=10_000_000) {
            let order = OrderRequest::new("2454.TW", Side::Sell, qty, 1_000_000, LotType::Odd);
            let payload = OrderPayload::from_request(&order);
            let json = serde_json::to_value(&payload).unwrap();
            let s = json["quantity"].as_str().expect("quantity must be a JSON string");
            prop_assert!(!s.is_empty());
            let mut chars = s.chars();
            let first = chars.next().unwrap();
            prop_assert!(('1'..='9').contains(&first));
            prop_assert!(chars.all(|c| c.is_ascii_digit()));
            prop_assert_eq!(s.parse::<i64>().unwrap(), qty);
        }
    }
}
