// =============================================================================
// Trading records — positions, orders, trades
// =============================================================================
//
// Trimmed to the fields the risk manager and the executor port actually
// consume. Stop-loss/take-profit sizing, trailing-stop mechanics, and
// multi-leg exit state belong to the strategy layer this core does not
// implement (see spec §1 non-goals) — only notional exposure and open/closed
// status matter here.
// =============================================================================

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Whether the engine is actively trading, paused, or killed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradingMode {
    Live,
    Paused,
    Killed,
}

impl Default for TradingMode {
    fn default() -> Self {
        Self::Paused
    }
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Live => write!(f, "Live"),
            Self::Paused => write!(f, "Paused"),
            Self::Killed => write!(f, "Killed"),
        }
    }
}

/// Long or short.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    Closed,
}

/// An open or closed position, as tracked by the risk manager for
/// concentration and exposure checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub status: PositionStatus,
    pub opened_at: DateTime<Utc>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub realized_pnl: Decimal,
}

impl Position {
    pub fn new(symbol: impl Into<String>, side: OrderSide, entry_price: Decimal, quantity: Decimal, opened_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            symbol: symbol.into(),
            side,
            entry_price,
            quantity,
            status: PositionStatus::Open,
            opened_at,
            closed_at: None,
            realized_pnl: Decimal::ZERO,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Notional exposure of this position: `quantity * entry_price`.
    pub fn notional_value(&self) -> Decimal {
        self.quantity * self.entry_price
    }
}

/// An order handed to the executor port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub average_fill_price: Option<Decimal>,
}

/// A completed fill, used for P&L bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Decimal,
    pub executed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn notional_value_is_quantity_times_price() {
        let pos = Position::new("BTC_USDT", OrderSide::Buy, dec!(25000), dec!(0.1), Utc::now());
        assert_eq!(pos.notional_value(), dec!(2500.0));
    }

    #[test]
    fn new_position_is_open_by_default() {
        let pos = Position::new("BTC_USDT", OrderSide::Buy, dec!(100), dec!(1), Utc::now());
        assert!(pos.is_open());
        assert!(pos.closed_at.is_none());
    }
}
