// =============================================================================
// Market data value types
// =============================================================================

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Maximum number of price levels kept per side of an order book after any
/// merge. Mirrors the exchange's own `depth20` convention.
pub const ORDERBOOK_DEPTH: usize = 20;

/// Trade aggressor side, as reported by the exchange. `Unknown` covers feeds
/// that don't report a taker side (e.g. some REST snapshots).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
    Unknown,
}

/// A single normalized trade print, produced by the WebSocket pool and
/// consumed by every downstream component through the event bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketTick {
    pub symbol: String,
    pub exchange: String,
    pub price: Decimal,
    pub volume: Decimal,
    pub timestamp: DateTime<Utc>,
    pub side: Side,
    #[serde(default)]
    pub volume_24h: Option<Decimal>,
    #[serde(default)]
    pub liquidity: Option<Decimal>,
}

/// A single order-book price level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderBookLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

/// Per-symbol order-book state, owned exclusively by the WebSocket pool.
///
/// `bids` is kept sorted descending by price, `asks` ascending; both are
/// trimmed to [`ORDERBOOK_DEPTH`] entries after every merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub symbol: String,
    pub bids: Vec<OrderBookLevel>,
    pub asks: Vec<OrderBookLevel>,
    pub version: u64,
    pub last_update_wall_time: DateTime<Utc>,
}

impl OrderBookSnapshot {
    pub fn empty(symbol: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            bids: Vec::new(),
            asks: Vec::new(),
            version: 0,
            last_update_wall_time: now,
        }
    }

    pub fn best_bid(&self) -> Option<OrderBookLevel> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<OrderBookLevel> {
        self.asks.first().copied()
    }

    /// `true` unless both sides are present and crossed (best bid >= best ask).
    pub fn is_sane(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => b.price < a.price,
            _ => true,
        }
    }

    /// Sort both sides into their canonical order and trim to
    /// [`ORDERBOOK_DEPTH`]. Called after every snapshot replace or delta
    /// merge — see `market_data::orderbook`.
    pub fn normalize(&mut self) {
        self.bids
            .sort_by(|a, b| b.price.cmp(&a.price));
        self.asks
            .sort_by(|a, b| a.price.cmp(&b.price));
        self.bids.truncate(ORDERBOOK_DEPTH);
        self.asks.truncate(ORDERBOOK_DEPTH);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(price: i64, qty: i64) -> OrderBookLevel {
        OrderBookLevel {
            price: Decimal::from(price),
            quantity: Decimal::from(qty),
        }
    }

    #[test]
    fn normalize_sorts_and_trims_each_side() {
        let mut book = OrderBookSnapshot::empty("BTC_USDT", Utc::now());
        book.bids = vec![level(99, 1), level(101, 1), level(100, 1)];
        book.asks = vec![level(105, 1), level(102, 1), level(103, 1)];
        for i in 0..25 {
            book.bids.push(level(50 + i, 1));
        }
        book.normalize();

        assert_eq!(book.bids.len(), ORDERBOOK_DEPTH);
        assert_eq!(book.bids[0].price, Decimal::from(101));
        assert!(book.bids.windows(2).all(|w| w[0].price >= w[1].price));
        assert_eq!(book.asks[0].price, Decimal::from(102));
        assert!(book.asks.windows(2).all(|w| w[0].price <= w[1].price));
    }

    #[test]
    fn is_sane_detects_crossed_book() {
        let mut book = OrderBookSnapshot::empty("BTC_USDT", Utc::now());
        book.bids = vec![level(101, 1)];
        book.asks = vec![level(100, 1)];
        assert!(!book.is_sane());

        book.bids = vec![level(99, 1)];
        assert!(book.is_sane());
    }

    #[test]
    fn empty_sides_are_sane() {
        let book = OrderBookSnapshot::empty("BTC_USDT", Utc::now());
        assert!(book.is_sane());
    }
}
