// =============================================================================
// Event payloads — the canonical shape published on every topic
// =============================================================================
//
// The original adapter blended dataclasses and dicts for `market.price_update`
// and left downstream handlers probing with `getattr`. This crate specifies
// one typed shape per topic and enforces it at the producer; see
// SPEC_FULL.md §11, open question 1.
// =============================================================================

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::market::{OrderBookLevel, Side};
use crate::domain::risk::{AlertSeverity, RiskAlertType};
use crate::domain::signals::{FlashPumpSignal, ReversalSignal};

pub const TOPIC_MARKET_PRICE_UPDATE: &str = "market.price_update";
pub const TOPIC_MARKET_ORDERBOOK_UPDATE: &str = "market.orderbook_update";
pub const TOPIC_PUMP_DETECTED: &str = "pump.detected";
pub const TOPIC_REVERSAL_DETECTED: &str = "reversal.detected";
pub const TOPIC_RISK_ALERT: &str = "risk_alert";
pub const TOPIC_MARKET_DATA_CONNECTED: &str = "market_data.connected";
pub const TOPIC_MARKET_DATA_DISCONNECTED: &str = "market_data.disconnected";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketPriceUpdate {
    pub exchange: String,
    pub symbol: String,
    pub price: Decimal,
    pub volume: Decimal,
    pub timestamp: DateTime<Utc>,
    pub side: Side,
    pub quote_volume: Option<Decimal>,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketOrderbookUpdate {
    pub exchange: String,
    pub symbol: String,
    pub bids: Vec<OrderBookLevel>,
    pub asks: Vec<OrderBookLevel>,
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PumpDetectedPayload {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub symbol: String,
    pub signal: FlashPumpSignal,
    pub entry_allowed: bool,
    pub rejection_reasons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReversalDetectedPayload {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub symbol: String,
    pub data: ReversalSignal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAlertPayload {
    pub alert_id: String,
    pub severity: AlertSeverity,
    pub alert_type: RiskAlertType,
    pub message: String,
    pub details: serde_json::Value,
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionEvent {
    pub exchange: String,
    pub connection_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub url: Option<String>,
}

/// Every message that can cross the event bus. One variant per topic
/// contract in §6.5 — no dict/struct duality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "topic")]
pub enum Event {
    #[serde(rename = "market.price_update")]
    MarketPriceUpdate(MarketPriceUpdate),
    #[serde(rename = "market.orderbook_update")]
    MarketOrderbookUpdate(MarketOrderbookUpdate),
    #[serde(rename = "pump.detected")]
    PumpDetected(PumpDetectedPayload),
    #[serde(rename = "reversal.detected")]
    ReversalDetected(ReversalDetectedPayload),
    #[serde(rename = "risk_alert")]
    RiskAlert(RiskAlertPayload),
    #[serde(rename = "market_data.connected")]
    MarketDataConnected(ConnectionEvent),
    #[serde(rename = "market_data.disconnected")]
    MarketDataDisconnected(ConnectionEvent),
}

impl Event {
    pub fn topic(&self) -> &'static str {
        match self {
            Event::MarketPriceUpdate(_) => TOPIC_MARKET_PRICE_UPDATE,
            Event::MarketOrderbookUpdate(_) => TOPIC_MARKET_ORDERBOOK_UPDATE,
            Event::PumpDetected(_) => TOPIC_PUMP_DETECTED,
            Event::ReversalDetected(_) => TOPIC_REVERSAL_DETECTED,
            Event::RiskAlert(_) => TOPIC_RISK_ALERT,
            Event::MarketDataConnected(_) => TOPIC_MARKET_DATA_CONNECTED,
            Event::MarketDataDisconnected(_) => TOPIC_MARKET_DATA_DISCONNECTED,
        }
    }
}

/// Coarse classification driving the backpressure policy of §4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicClass {
    TradingCritical,
    HighFrequency,
    Ordinary,
}

pub fn classify_topic(topic: &str) -> TopicClass {
    const CRITICAL_MARKERS: [&str; 4] = ["deal", "trade", "order", "position"];
    const HIGH_FREQ_MARKERS: [&str; 3] = ["price_update", "orderbook", "depth"];

    if CRITICAL_MARKERS.iter().any(|m| topic.contains(m)) {
        TopicClass::TradingCritical
    } else if HIGH_FREQ_MARKERS.iter().any(|m| topic.contains(m)) {
        TopicClass::HighFrequency
    } else {
        TopicClass::Ordinary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_trading_critical_topics() {
        assert_eq!(classify_topic("order.placed"), TopicClass::TradingCritical);
        assert_eq!(classify_topic("push.deal"), TopicClass::TradingCritical);
        assert_eq!(classify_topic("position.closed"), TopicClass::TradingCritical);
    }

    #[test]
    fn classifies_high_frequency_topics() {
        assert_eq!(classify_topic("market.price_update"), TopicClass::HighFrequency);
        assert_eq!(classify_topic("market.orderbook_update"), TopicClass::HighFrequency);
    }

    #[test]
    fn classifies_everything_else_as_ordinary() {
        assert_eq!(classify_topic("risk_alert"), TopicClass::Ordinary);
        assert_eq!(classify_topic("market_data.connected"), TopicClass::Ordinary);
    }
}
