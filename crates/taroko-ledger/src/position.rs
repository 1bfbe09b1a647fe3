use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use taroko_schemas::TradingMode;

/// One symbol's open position.
///
/// `quantity` is signed: long > 0, short < 0, flat == 0.
/// Invariant: `quantity == 0 ⇔ entry_time == None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: i64,
    pub avg_entry_price_micros: i64,
    pub entry_time: Option<DateTime<Utc>>,
    pub trading_mode: TradingMode,
}

impl Position {
    pub fn flat(symbol: impl Into<String>, trading_mode: TradingMode) -> Self {
        Self {
            symbol: symbol.into(),
            quantity: 0,
            avg_entry_price_micros: 0,
            entry_time: None,
            trading_mode,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.quantity == 0
    }

    pub fn is_long(&self) -> bool {
        self.quantity > 0
    }

    pub fn is_short(&self) -> bool {
        self.quantity < 0
    }

    /// Unrealized P&L at `mark_micros`: `qty * (mark - avg)` (signed qty
    /// makes the short case come out right).
    pub fn unrealized_micros(&self, mark_micros: i64) -> i64 {
        let wide = (self.quantity as i128) * ((mark_micros - self.avg_entry_price_micros) as i128);
        if wide > i64::MAX as i128 {
            i64::MAX
        } else if wide < i64::MIN as i128 {
            i64::MIN
        } else {
            wide as i64
        }
    }

    /// Minutes this position has been open as of `now` (None when flat).
    pub fn minutes_held(&self, now: DateTime<Utc>) -> Option<i64> {
        self.entry_time.map(|t| (now - t).num_minutes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn flat_position_has_no_entry_time() {
        let p = Position::flat("2454.TW", TradingMode::Stock);
        assert!(p.is_flat());
        assert_eq!(p.entry_time, None);
        assert_eq!(p.minutes_held(Utc::now()), None);
    }

    #[test]
    fn unrealized_long_and_short() {
        let mut p = Position::flat("TXF", TradingMode::Futures);
        p.quantity = 2;
        p.avg_entry_price_micros = 22_500_000_000;
        assert_eq!(p.unrealized_micros(22_600_000_000), 200_000_000);

        p.quantity = -2;
        assert_eq!(p.unrealized_micros(22_600_000_000), -200_000_000);
    }

    #[test]
    fn minutes_held_counts_from_entry() {
        let mut p = Position::flat("2454.TW", TradingMode::Stock);
        p.quantity = 2;
        p.entry_time = Some(Utc.with_ymd_and_hms(2025, 6, 3, 2, 0, 0).unwrap());
        let now = Utc.with_ymd_and_hms(2025, 6, 3, 2, 46, 0).unwrap();
        assert_eq!(p.minutes_held(now), Some(46));
    }
}
