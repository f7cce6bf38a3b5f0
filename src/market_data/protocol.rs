// =============================================================================
// Exchange wire protocol — MEXC-style contract channel messages (§6.1)
// =============================================================================
//
// Outbound subscribe/unsubscribe/ping frames and inbound push/ack frames.
// Grounded on the original's `mexc_websocket_adapter.py` message shapes;
// the Binance-specific request/response structs in the host's
// `binance/client.rs` are not reused here since the wire format differs.
// =============================================================================

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::market::Side;

/// A data type a symbol can be subscribed to; each maps to one channel pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Prices,
    Orderbook,
}

impl DataType {
    /// Channels that must each be confirmed before this data type is live.
    pub fn channels(self) -> &'static [&'static str] {
        match self {
            DataType::Prices => &["deal"],
            DataType::Orderbook => &["depth.full", "depth"],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscribeParam {
    pub symbol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscribeRequest {
    pub method: String,
    pub param: SubscribeParam,
}

impl SubscribeRequest {
    pub fn new(channel: &str, symbol: &str) -> Self {
        Self {
            method: format!("sub.{channel}"),
            param: SubscribeParam {
                symbol: symbol.to_string(),
                limit: None,
            },
        }
    }

    pub fn unsubscribe(channel: &str, symbol: &str) -> Self {
        Self {
            method: format!("unsub.{channel}"),
            param: SubscribeParam {
                symbol: symbol.to_string(),
                limit: None,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PingRequest {
    pub method: &'static str,
    pub param: serde_json::Value,
}

impl Default for PingRequest {
    fn default() -> Self {
        Self {
            method: "ping",
            param: serde_json::json!({}),
        }
    }
}

/// The envelope every inbound frame shares: a channel name plus a loosely
/// typed payload, dispatched by `classify`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawFrame {
    pub channel: String,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FrameKind {
    Deal,
    DepthIncremental,
    DepthSnapshot,
    Pong,
    SubscriptionAck,
    Unknown,
}

impl RawFrame {
    pub fn classify(&self) -> FrameKind {
        match self.channel.as_str() {
            "push.deal" => FrameKind::Deal,
            "push.depth" => FrameKind::DepthIncremental,
            "push.depth.full" => FrameKind::DepthSnapshot,
            "pong" => FrameKind::Pong,
            c if c.starts_with("rs.sub.") || c.starts_with("rs.unsub.") => FrameKind::SubscriptionAck,
            _ => FrameKind::Unknown,
        }
    }

    /// The channel name a subscription ack refers to, stripped of its
    /// `rs.sub.`/`rs.unsub.` prefix (e.g. `"rs.sub.deal"` → `"deal"`).
    pub fn ack_channel(&self) -> Option<&str> {
        self.channel
            .strip_prefix("rs.sub.")
            .or_else(|| self.channel.strip_prefix("rs.unsub."))
    }

    pub fn ack_success(&self) -> bool {
        self.data.as_str() == Some("success")
    }
}

/// One trade print, as carried inside a `push.deal` frame's data array.
#[derive(Debug, Clone, Deserialize)]
pub struct DealEntry {
    pub p: Decimal,
    pub v: Decimal,
    #[serde(rename = "T")]
    pub trade_type: i32,
    pub t: i64,
}

impl DealEntry {
    pub fn side(&self) -> Side {
        match self.trade_type {
            1 => Side::Buy,
            2 => Side::Sell,
            _ => Side::Unknown,
        }
    }
}

pub fn parse_deal_entries(data: &serde_json::Value) -> Vec<DealEntry> {
    match data {
        serde_json::Value::Array(_) => serde_json::from_value(data.clone()).unwrap_or_default(),
        serde_json::Value::Object(_) => serde_json::from_value::<DealEntry>(data.clone())
            .map(|d| vec![d])
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DepthPush {
    #[serde(default)]
    pub bids: Vec<Vec<Decimal>>,
    #[serde(default)]
    pub asks: Vec<Vec<Decimal>>,
    #[serde(default)]
    pub version: u64,
}

pub fn parse_depth_push(data: &serde_json::Value) -> Option<DepthPush> {
    serde_json::from_value(data.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_channels() {
        let frame = RawFrame {
            channel: "push.deal".into(),
            symbol: Some("BTC_USDT".into()),
            data: serde_json::json!([]),
        };
        assert_eq!(frame.classify(), FrameKind::Deal);

        let ack = RawFrame {
            channel: "rs.sub.depth.full".into(),
            symbol: Some("BTC_USDT".into()),
            data: serde_json::json!("success"),
        };
        assert_eq!(ack.classify(), FrameKind::SubscriptionAck);
        assert_eq!(ack.ack_channel(), Some("depth.full"));
        assert!(ack.ack_success());
    }

    #[test]
    fn parses_deal_array() {
        let data = serde_json::json!([{"p": "100.5", "v": "2.0", "T": 1, "t": 1_700_000_000_000i64}]);
        let deals = parse_deal_entries(&data);
        assert_eq!(deals.len(), 1);
        assert_eq!(deals[0].side(), Side::Buy);
    }

    #[test]
    fn parses_depth_push() {
        let data = serde_json::json!({"bids": [["100", "1"]], "asks": [["101", "2"]], "version": 5});
        let depth = parse_depth_push(&data).unwrap();
        assert_eq!(depth.version, 5);
        assert_eq!(depth.bids.len(), 1);
    }
}
