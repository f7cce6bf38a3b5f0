// =============================================================================
// Subscription Confirmer — per-connection, per-symbol channel ack tracking
// =============================================================================
//
// A symbol is fully confirmed only once every channel it requested
// (`deal`, `depth.full`, `depth`, …) has reported back; any channel
// reporting failure fails the whole symbol. Grounded on the original's
// `_pending_subscriptions` map and `SubscriptionConfirmer` component
// (`mexc_websocket_adapter.py`, `mexc/subscription.py`), §4.2 and the
// invariant in §8.1 ("either fully confirmed on exactly one connection,
// or pending on exactly one connection, never both").
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Pending,
    Confirmed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolConfirmState {
    /// Some channels still pending.
    Pending,
    /// Every requested channel confirmed.
    Confirmed,
    /// At least one channel failed; the symbol's pending entry is removed.
    Failed,
    /// No such connection/symbol/channel was registered.
    Unknown,
}

#[derive(Default)]
pub struct SubscriptionConfirmer {
    // connection_id -> symbol -> channel -> status
    pending: RwLock<HashMap<u64, HashMap<String, HashMap<String, ChannelStatus>>>>,
}

impl SubscriptionConfirmer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the set of channels a symbol expects acks for, all starting
    /// `Pending`.
    pub fn register(&self, connection_id: u64, symbol: &str, channels: &[&str]) {
        let mut map = self.pending.write();
        let symbol_map = map
            .entry(connection_id)
            .or_default()
            .entry(symbol.to_string())
            .or_default();
        for channel in channels {
            symbol_map.insert((*channel).to_string(), ChannelStatus::Pending);
        }
    }

    /// Record an ack for one channel. Returns the symbol's resulting state:
    /// still `Pending` if other channels remain outstanding, `Confirmed`
    /// once every channel has reported success, or `Failed` as soon as any
    /// channel reports failure (the pending entry is cleared either way
    /// once the symbol leaves `Pending`).
    pub fn record_ack(&self, connection_id: u64, symbol: &str, channel: &str, success: bool) -> SymbolConfirmState {
        let mut map = self.pending.write();
        let Some(conn) = map.get_mut(&connection_id) else {
            return SymbolConfirmState::Unknown;
        };
        let Some(channels) = conn.get_mut(symbol) else {
            return SymbolConfirmState::Unknown;
        };
        let Some(status) = channels.get_mut(channel) else {
            return SymbolConfirmState::Unknown;
        };
        *status = if success { ChannelStatus::Confirmed } else { ChannelStatus::Failed };

        let outcome = if channels.values().any(|s| *s == ChannelStatus::Failed) {
            SymbolConfirmState::Failed
        } else if channels.values().all(|s| *s == ChannelStatus::Confirmed) {
            SymbolConfirmState::Confirmed
        } else {
            SymbolConfirmState::Pending
        };

        if outcome != SymbolConfirmState::Pending {
            conn.remove(symbol);
            if conn.is_empty() {
                map.remove(&connection_id);
            }
        }
        outcome
    }

    pub fn remove_symbol(&self, connection_id: u64, symbol: &str) {
        let mut map = self.pending.write();
        if let Some(conn) = map.get_mut(&connection_id) {
            conn.remove(symbol);
            if conn.is_empty() {
                map.remove(&connection_id);
            }
        }
    }

    pub fn remove_connection(&self, connection_id: u64) {
        self.pending.write().remove(&connection_id);
    }

    pub fn is_pending(&self, connection_id: u64, symbol: &str) -> bool {
        self.pending
            .read()
            .get(&connection_id)
            .map(|c| c.contains_key(symbol))
            .unwrap_or(false)
    }

    pub fn pending_symbol_count(&self, connection_id: u64) -> usize {
        self.pending.read().get(&connection_id).map(|c| c.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirms_only_after_every_channel_acks() {
        let confirmer = SubscriptionConfirmer::new();
        confirmer.register(1, "BTC_USDT", &["depth.full", "depth"]);
        assert!(confirmer.is_pending(1, "BTC_USDT"));

        assert_eq!(
            confirmer.record_ack(1, "BTC_USDT", "depth.full", true),
            SymbolConfirmState::Pending
        );
        assert!(confirmer.is_pending(1, "BTC_USDT"));

        assert_eq!(
            confirmer.record_ack(1, "BTC_USDT", "depth", true),
            SymbolConfirmState::Confirmed
        );
        assert!(!confirmer.is_pending(1, "BTC_USDT"));
    }

    #[test]
    fn one_channel_failure_fails_the_whole_symbol() {
        let confirmer = SubscriptionConfirmer::new();
        confirmer.register(1, "BTC_USDT", &["deal", "depth"]);
        assert_eq!(
            confirmer.record_ack(1, "BTC_USDT", "deal", false),
            SymbolConfirmState::Failed
        );
        assert!(!confirmer.is_pending(1, "BTC_USDT"));
    }

    #[test]
    fn unknown_connection_or_channel_is_unknown() {
        let confirmer = SubscriptionConfirmer::new();
        assert_eq!(
            confirmer.record_ack(99, "BTC_USDT", "deal", true),
            SymbolConfirmState::Unknown
        );
        confirmer.register(1, "BTC_USDT", &["deal"]);
        assert_eq!(
            confirmer.record_ack(1, "BTC_USDT", "depth", true),
            SymbolConfirmState::Unknown
        );
    }
}
