use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Taiwan round-lot size: a round-lot order quantity must be a multiple of
/// this; odd-lot orders may carry any positive integer below or above it.
pub const ROUND_LOT_SIZE: i64 = 1_000;

// ---------------------------------------------------------------------------
// Timeframe
// ---------------------------------------------------------------------------

/// The closed set of bar timeframes the system understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    Tick,
    M1,
    M5,
    M15,
    H1,
    D1,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::Tick => "tick",
            Timeframe::M1 => "1min",
            Timeframe::M5 => "5min",
            Timeframe::M15 => "15min",
            Timeframe::H1 => "1hour",
            Timeframe::D1 => "1day",
        }
    }

    pub fn parse(s: &str) -> Result<Self, BarError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tick" => Ok(Timeframe::Tick),
            "1min" | "1m" => Ok(Timeframe::M1),
            "5min" | "5m" => Ok(Timeframe::M5),
            "15min" | "15m" => Ok(Timeframe::M15),
            "1hour" | "1h" => Ok(Timeframe::H1),
            "1day" | "1d" => Ok(Timeframe::D1),
            other => Err(BarError::UnknownTimeframe {
                value: other.to_string(),
            }),
        }
    }

    /// Bar length in seconds (0 for tick data).
    pub fn secs(&self) -> i64 {
        match self {
            Timeframe::Tick => 0,
            Timeframe::M1 => 60,
            Timeframe::M5 => 300,
            Timeframe::M15 => 900,
            Timeframe::H1 => 3_600,
            Timeframe::D1 => 86_400,
        }
    }
}

// ---------------------------------------------------------------------------
// Bar
// ---------------------------------------------------------------------------

/// An immutable OHLCV bar. `(symbol, timeframe, ts)` is the uniqueness key.
///
/// Prices are micros; `validate` enforces the OHLC sanity invariant before a
/// bar is allowed anywhere near a strategy or the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub timeframe: Timeframe,
    /// Bar end timestamp (UTC).
    pub ts: DateTime<Utc>,
    pub open_micros: i64,
    pub high_micros: i64,
    pub low_micros: i64,
    pub close_micros: i64,
    pub volume: i64,
    pub is_complete: bool,
}

/// Bar invariant violations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BarError {
    OhlcOutOfOrder {
        symbol: String,
        ts: i64,
    },
    NegativeVolume {
        symbol: String,
        volume: i64,
    },
    UnknownTimeframe {
        value: String,
    },
}

impl std::fmt::Display for BarError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BarError::OhlcOutOfOrder { symbol, ts } => {
                write!(f, "bar invariant: low <= open,close <= high violated for {symbol} @ ts={ts}")
            }
            BarError::NegativeVolume { symbol, volume } => {
                write!(f, "bar invariant: volume must be >= 0, got {volume} for {symbol}")
            }
            BarError::UnknownTimeframe { value } => {
                write!(f, "unknown timeframe '{value}'")
            }
        }
    }
}

impl std::error::Error for BarError {}

impl Bar {
    /// Enforce `low <= {open, close} <= high` and `volume >= 0`.
    pub fn validate(&self) -> Result<(), BarError> {
        let sane = self.low_micros <= self.open_micros
            && self.low_micros <= self.close_micros
            && self.open_micros <= self.high_micros
            && self.close_micros <= self.high_micros;
        if !sane {
            return Err(BarError::OhlcOutOfOrder {
                symbol: self.symbol.clone(),
                ts: self.ts.timestamp(),
            });
        }
        if self.volume < 0 {
            return Err(BarError::NegativeVolume {
                symbol: self.symbol.clone(),
                volume: self.volume,
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// What a strategy wants to happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalDirection {
    Long,
    Short,
    Exit,
    Neutral,
}

impl SignalDirection {
    /// `true` for directions that would open a new position.
    pub fn is_entry(&self) -> bool {
        matches!(self, SignalDirection::Long | SignalDirection::Short)
    }
}

/// One strategy's verdict for one tick. Discarded signals are still logged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeSignal {
    pub direction: SignalDirection,
    /// Confidence in [0, 1]; clamped at construction.
    pub confidence: f64,
    pub reason: String,
    pub strategy_name: String,
}

impl TradeSignal {
    pub fn new(
        direction: SignalDirection,
        confidence: f64,
        reason: impl Into<String>,
        strategy_name: impl Into<String>,
    ) -> Self {
        Self {
            direction,
            confidence: confidence.clamp(0.0, 1.0),
            reason: reason.into(),
            strategy_name: strategy_name.into(),
        }
    }

    /// The do-nothing signal (also what a deadline overrun degrades to).
    pub fn neutral(strategy_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(SignalDirection::Neutral, 0.0, reason, strategy_name)
    }
}

// ---------------------------------------------------------------------------
// Orders and fills
// ---------------------------------------------------------------------------

/// BUY or SELL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

/// Taiwan lot semantics: round lots are 1 000-share multiples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LotType {
    Odd,
    Round,
}

/// A not-yet-submitted order as produced by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    /// Always positive; round-lot orders must be ROUND_LOT_SIZE multiples.
    pub quantity: i64,
    pub price_micros: i64,
    pub lot_type: LotType,
    pub is_exit: bool,
    pub emergency: bool,
}

impl OrderRequest {
    pub fn new(
        symbol: impl Into<String>,
        side: Side,
        quantity: i64,
        price_micros: i64,
        lot_type: LotType,
    ) -> Self {
        debug_assert!(quantity > 0, "OrderRequest.quantity must be > 0");
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            price_micros,
            lot_type,
            is_exit: false,
            emergency: false,
        }
    }

    pub fn exit(mut self) -> Self {
        self.is_exit = true;
        self
    }

    pub fn emergency(mut self) -> Self {
        self.is_exit = true;
        self.emergency = true;
        self
    }

    /// Round-lot orders must be a whole number of lots.
    pub fn validate(&self) -> Result<(), String> {
        if self.quantity <= 0 {
            return Err(format!("order quantity must be > 0, got {}", self.quantity));
        }
        if self.lot_type == LotType::Round && self.quantity % ROUND_LOT_SIZE != 0 {
            return Err(format!(
                "round-lot quantity {} is not a multiple of {}",
                self.quantity, ROUND_LOT_SIZE
            ));
        }
        Ok(())
    }
}

/// A materialized (filled) order — the accounting atom the ledger consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillRecord {
    pub order_ref: Uuid,
    pub symbol: String,
    pub side: Side,
    pub quantity: i64,
    pub price_micros: i64,
    pub ts: DateTime<Utc>,
    pub fee_micros: i64,
    pub tax_micros: i64,
    pub slippage_bps: f64,
}

impl FillRecord {
    pub fn new(
        order_ref: Uuid,
        symbol: impl Into<String>,
        side: Side,
        quantity: i64,
        price_micros: i64,
        ts: DateTime<Utc>,
    ) -> Self {
        debug_assert!(quantity > 0, "FillRecord.quantity must be > 0");
        debug_assert!(price_micros > 0, "FillRecord.price_micros must be > 0");
        Self {
            order_ref,
            symbol: symbol.into(),
            side,
            quantity,
            price_micros,
            ts,
            fee_micros: 0,
            tax_micros: 0,
            slippage_bps: 0.0,
        }
    }

    pub fn with_costs(mut self, fee_micros: i64, tax_micros: i64, slippage_bps: f64) -> Self {
        self.fee_micros = fee_micros;
        self.tax_micros = tax_micros;
        self.slippage_bps = slippage_bps;
        self
    }

    /// Signed quantity: positive for buys, negative for sells.
    pub fn signed_qty(&self) -> i64 {
        match self.side {
            Side::Buy => self.quantity,
            Side::Sell => -self.quantity,
        }
    }
}

// ---------------------------------------------------------------------------
// Modes and veto sources
// ---------------------------------------------------------------------------

/// Boot-time trading mode (also settable via `system_config`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradingMode {
    Stock,
    Futures,
    StockAndFutures,
}

impl TradingMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stock" => Some(TradingMode::Stock),
            "futures" => Some(TradingMode::Futures),
            "stock_and_futures" => Some(TradingMode::StockAndFutures),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TradingMode::Stock => "stock",
            TradingMode::Futures => "futures",
            TradingMode::StockAndFutures => "stock_and_futures",
        }
    }
}

/// Where a veto came from; persisted with every refusal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VetoSource {
    Blackout,
    DailyLimit,
    WeeklyLimit,
    News,
    Pause,
    Llm,
}

impl VetoSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            VetoSource::Blackout => "blackout",
            VetoSource::DailyLimit => "dailyLimit",
            VetoSource::WeeklyLimit => "weeklyLimit",
            VetoSource::News => "news",
            VetoSource::Pause => "pause",
            VetoSource::Llm => "llm",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bar(open: i64, high: i64, low: i64, close: i64, volume: i64) -> Bar {
        Bar {
            symbol: "2454.TW".to_string(),
            timeframe: Timeframe::M5,
            ts: Utc.with_ymd_and_hms(2025, 6, 2, 1, 5, 0).unwrap(),
            open_micros: open,
            high_micros: high,
            low_micros: low,
            close_micros: close,
            volume,
            is_complete: true,
        }
    }

    #[test]
    fn valid_bar_passes() {
        assert!(bar(100, 110, 95, 105, 1000).validate().is_ok());
    }

    #[test]
    fn open_above_high_rejected() {
        let err = bar(120, 110, 95, 105, 1000).validate().unwrap_err();
        assert!(matches!(err, BarError::OhlcOutOfOrder { .. }));
    }

    #[test]
    fn close_below_low_rejected() {
        let err = bar(100, 110, 95, 90, 1000).validate().unwrap_err();
        assert!(matches!(err, BarError::OhlcOutOfOrder { .. }));
    }

    #[test]
    fn negative_volume_rejected() {
        let err = bar(100, 110, 95, 105, -1).validate().unwrap_err();
        assert!(matches!(err, BarError::NegativeVolume { .. }));
    }

    #[test]
    fn timeframe_roundtrip() {
        for tf in [
            Timeframe::Tick,
            Timeframe::M1,
            Timeframe::M5,
            Timeframe::M15,
            Timeframe::H1,
            Timeframe::D1,
        ] {
            assert_eq!(Timeframe::parse(tf.as_str()).unwrap(), tf);
        }
        assert!(Timeframe::parse("3min").is_err());
    }

    #[test]
    fn confidence_is_clamped() {
        let s = TradeSignal::new(SignalDirection::Long, 1.7, "r", "momentum");
        assert_eq!(s.confidence, 1.0);
        let s = TradeSignal::new(SignalDirection::Short, -0.3, "r", "momentum");
        assert_eq!(s.confidence, 0.0);
    }

    #[test]
    fn round_lot_must_be_multiple() {
        let ok = OrderRequest::new("2330.TW", Side::Buy, 2_000, 590_000_000, LotType::Round);
        assert!(ok.validate().is_ok());
        let bad = OrderRequest::new("2330.TW", Side::Buy, 1_500, 590_000_000, LotType::Round);
        assert!(bad.validate().is_err());
    }

    #[test]
    fn odd_lot_any_positive_integer() {
        let ok = OrderRequest::new("2330.TW", Side::Buy, 70, 590_000_000, LotType::Odd);
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn emergency_implies_exit() {
        let o = OrderRequest::new("2454.TW", Side::Sell, 2, 22_500_000_000, LotType::Odd)
            .emergency();
        assert!(o.is_exit);
        assert!(o.emergency);
    }

    #[test]
    fn trading_mode_parse() {
        assert_eq!(TradingMode::parse("stock"), Some(TradingMode::Stock));
        assert_eq!(
            TradingMode::parse("stock_and_futures"),
            Some(TradingMode::StockAndFutures)
        );
        assert_eq!(TradingMode::parse("crypto"), None);
    }

    #[test]
    fn signed_qty_follows_side() {
        let ts = Utc.with_ymd_and_hms(2025, 6, 2, 1, 5, 0).unwrap();
        let buy = FillRecord::new(Uuid::new_v4(), "2454.TW", Side::Buy, 2, 1, ts);
        let sell = FillRecord::new(Uuid::new_v4(), "2454.TW", Side::Sell, 2, 1, ts);
        assert_eq!(buy.signed_qty(), 2);
        assert_eq!(sell.signed_qty(), -2);
    }
}
