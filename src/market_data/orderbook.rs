// =============================================================================
// Order-book store — per-symbol serialized snapshot/delta merge
// =============================================================================
//
// Each symbol's book is guarded by its own lock so updates to unrelated
// symbols never contend. Grounded on the host's original `OrderBookManager`
// (per-symbol `RwLock<HashMap<...>>` shape) and the original's
// `_process_orderbook_snapshot` / `_process_orderbook_delta` merge rules
// (§4.2, §8.2, §8.3 scenario 3).
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};

use crate::domain::market::{OrderBookLevel, OrderBookSnapshot};

pub struct OrderBookStore {
    books: RwLock<HashMap<String, Arc<Mutex<OrderBookSnapshot>>>>,
}

impl Default for OrderBookStore {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderBookStore {
    pub fn new() -> Self {
        Self {
            books: RwLock::new(HashMap::new()),
        }
    }

    fn entry(&self, symbol: &str) -> Arc<Mutex<OrderBookSnapshot>> {
        if let Some(book) = self.books.read().get(symbol) {
            return book.clone();
        }
        self.books
            .write()
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(OrderBookSnapshot::empty(symbol, Utc::now()))))
            .clone()
    }

    /// Replace the whole book atomically (`push.depth.full`).
    pub fn apply_snapshot(
        &self,
        symbol: &str,
        bids: Vec<OrderBookLevel>,
        asks: Vec<OrderBookLevel>,
        version: u64,
    ) -> OrderBookSnapshot {
        let book = self.entry(symbol);
        let mut guard = book.lock();
        guard.bids = bids;
        guard.asks = asks;
        guard.version = version;
        guard.last_update_wall_time = Utc::now();
        guard.normalize();
        guard.clone()
    }

    /// Merge an incremental update (`push.depth`). Returns `None` if the
    /// delta's version is not strictly greater than the cached version —
    /// a stale or duplicate delta is a no-op (§8.2, §8.3).
    pub fn apply_delta(
        &self,
        symbol: &str,
        bid_updates: Vec<OrderBookLevel>,
        ask_updates: Vec<OrderBookLevel>,
        version: u64,
    ) -> Option<OrderBookSnapshot> {
        let book = self.entry(symbol);
        let mut guard = book.lock();
        if version <= guard.version {
            return None;
        }
        merge_side(&mut guard.bids, bid_updates);
        merge_side(&mut guard.asks, ask_updates);
        guard.version = version;
        guard.last_update_wall_time = Utc::now();
        guard.normalize();
        Some(guard.clone())
    }

    pub fn get(&self, symbol: &str) -> Option<OrderBookSnapshot> {
        self.books.read().get(symbol).map(|b| b.lock().clone())
    }

    /// Delete per-symbol state (on unsubscribe or connection close).
    pub fn remove(&self, symbol: &str) {
        self.books.write().remove(symbol);
    }

    pub fn symbol_count(&self) -> usize {
        self.books.read().len()
    }
}

/// Upsert or remove levels in place: zero quantity removes a level,
/// non-zero quantity inserts or replaces it. The caller re-sorts/trims
/// afterwards via `OrderBookSnapshot::normalize`.
fn merge_side(side: &mut Vec<OrderBookLevel>, updates: Vec<OrderBookLevel>) {
    for update in updates {
        if let Some(pos) = side.iter().position(|level| level.price == update.price) {
            if update.quantity.is_zero() {
                side.remove(pos);
            } else {
                side[pos].quantity = update.quantity;
            }
        } else if !update.quantity.is_zero() {
            side.push(update);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn level(price: rust_decimal::Decimal, qty: rust_decimal::Decimal) -> OrderBookLevel {
        OrderBookLevel { price, quantity: qty }
    }

    #[test]
    fn snapshot_then_delta_matches_scenario() {
        let store = OrderBookStore::new();
        store.apply_snapshot(
            "BTC_USDT",
            vec![level(dec!(100), dec!(1)), level(dec!(99), dec!(2))],
            vec![level(dec!(101), dec!(1)), level(dec!(102), dec!(2))],
            1,
        );

        let result = store
            .apply_delta(
                "BTC_USDT",
                vec![level(dec!(99), dec!(0)), level(dec!(98), dec!(5))],
                vec![level(dec!(101), dec!(3))],
                2,
            )
            .expect("delta with higher version must apply");

        assert_eq!(result.version, 2);
        assert_eq!(result.bids, vec![level(dec!(100), dec!(1)), level(dec!(98), dec!(5))]);
        assert_eq!(result.asks, vec![level(dec!(101), dec!(3)), level(dec!(102), dec!(2))]);

        // A stale delta with the same version is a no-op.
        assert!(store
            .apply_delta("BTC_USDT", vec![level(dec!(97), dec!(9))], vec![], 2)
            .is_none());
        assert_eq!(store.get("BTC_USDT").unwrap().version, 2);
    }

    #[test]
    fn snapshot_followed_by_no_deltas_is_unchanged() {
        let store = OrderBookStore::new();
        let snap = store.apply_snapshot(
            "ETH_USDT",
            vec![level(dec!(10), dec!(1))],
            vec![level(dec!(11), dec!(1))],
            1,
        );
        assert_eq!(store.get("ETH_USDT").unwrap(), snap);
    }

    #[test]
    fn remove_deletes_all_state() {
        let store = OrderBookStore::new();
        store.apply_snapshot("BTC_USDT", vec![], vec![], 1);
        assert_eq!(store.symbol_count(), 1);
        store.remove("BTC_USDT");
        assert_eq!(store.symbol_count(), 0);
        assert!(store.get("BTC_USDT").is_none());
    }
}
