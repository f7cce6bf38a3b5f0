// =============================================================================
// Event Bus — topic-keyed pub/sub with per-subscriber bounded queues
// =============================================================================
//
// `publish` never blocks the producer past a topic-class-specific bound:
// high-frequency quote streams drop on a full queue outright, trading-
// critical topics get one short bounded wait before dropping as a last
// resort, everything else tolerates a longer wait. Delivery to a single
// subscriber of a single topic is FIFO; across topics or across subscribers
// no ordering is implied.
//
// Grounded on the original's flat dotted-string topic constants
// (`core/events.py`) and the pack's enum-keyed event dispatch (shrivenQ's
// trading-gateway `TradingEvent`), adapted to the host crate's lock
// discipline: `parking_lot::RwLock` for the subscriber registry,
// `tokio::sync::mpsc` for the per-subscriber queues.
// =============================================================================

pub mod event;

pub use event::{
    classify_topic, ConnectionEvent, Event, MarketOrderbookUpdate, MarketPriceUpdate,
    PumpDetectedPayload, ReversalDetectedPayload, RiskAlertPayload, TopicClass,
    TOPIC_MARKET_DATA_CONNECTED, TOPIC_MARKET_DATA_DISCONNECTED, TOPIC_MARKET_ORDERBOOK_UPDATE,
    TOPIC_MARKET_PRICE_UPDATE, TOPIC_PUMP_DETECTED, TOPIC_REVERSAL_DETECTED, TOPIC_RISK_ALERT,
};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{error, warn};

/// Bounded wait applied to a full trading-critical subscriber queue before
/// the event is dropped as a last resort.
const TRADING_CRITICAL_MAX_WAIT: Duration = Duration::from_millis(50);
/// Bounded wait applied to a full ordinary-topic subscriber queue.
const ORDINARY_MAX_WAIT: Duration = Duration::from_secs(2);

pub type HandlerResult = anyhow::Result<()>;
pub type Handler = Arc<dyn Fn(Arc<Event>) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

#[derive(Clone)]
struct Subscriber {
    id: u64,
    tx: mpsc::Sender<Arc<Event>>,
}

/// Handle returned by `subscribe`, used to later `unsubscribe`.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    topic: String,
    id: u64,
}

pub struct EventBus {
    queue_capacity: usize,
    subscribers: RwLock<HashMap<String, Vec<Subscriber>>>,
    next_id: AtomicU64,
    dropped_high_frequency: RwLock<HashMap<String, u64>>,
    dropped_critical: RwLock<HashMap<String, u64>>,
    dropped_ordinary: RwLock<HashMap<String, u64>>,
}

impl EventBus {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            queue_capacity,
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            dropped_high_frequency: RwLock::new(HashMap::new()),
            dropped_critical: RwLock::new(HashMap::new()),
            dropped_ordinary: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handler for `topic`. The handler runs on its own worker
    /// task, draining a dedicated bounded queue; a handler error is logged
    /// and does not affect other subscribers.
    pub fn subscribe(&self, topic: impl Into<String>, handler: Handler) -> SubscriptionHandle {
        let topic = topic.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, mut rx) = mpsc::channel::<Arc<Event>>(self.queue_capacity);

        self.subscribers
            .write()
            .entry(topic.clone())
            .or_default()
            .push(Subscriber { id, tx });

        let worker_topic = topic.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(e) = handler(event).await {
                    error!(topic = %worker_topic, error = %e, "event bus handler failed");
                }
            }
        });

        SubscriptionHandle { topic, id }
    }

    /// Remove a subscription. Unsubscribing an unknown handle is a silent
    /// no-op (§4.1).
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        let mut map = self.subscribers.write();
        if let Some(subs) = map.get_mut(&handle.topic) {
            subs.retain(|s| s.id != handle.id);
            if subs.is_empty() {
                map.remove(&handle.topic);
            }
        }
    }

    /// Publish `event` to every subscriber of its topic, applying the
    /// backpressure policy appropriate to the topic's class.
    pub async fn publish(&self, event: Event) {
        let topic = event.topic().to_string();
        let class = classify_topic(&topic);
        let payload = Arc::new(event);

        let subs: Vec<Subscriber> = {
            let map = self.subscribers.read();
            map.get(&topic).cloned().unwrap_or_default()
        };

        for sub in subs {
            if let Err(mpsc::error::TrySendError::Full(payload)) = sub.tx.try_send(payload.clone()) {
                match class {
                    TopicClass::HighFrequency => {
                        self.bump(&self.dropped_high_frequency, &topic);
                    }
                    TopicClass::TradingCritical => {
                        error!(topic = %topic, "trading-critical subscriber queue full, applying bounded wait");
                        let sent = tokio::time::timeout(TRADING_CRITICAL_MAX_WAIT, sub.tx.send(payload))
                            .await
                            .is_ok();
                        if !sent {
                            self.bump(&self.dropped_critical, &topic);
                            error!(topic = %topic, "dropped trading-critical event after bounded wait");
                        }
                    }
                    TopicClass::Ordinary => {
                        let sent = tokio::time::timeout(ORDINARY_MAX_WAIT, sub.tx.send(payload))
                            .await
                            .is_ok();
                        if !sent {
                            self.bump(&self.dropped_ordinary, &topic);
                            warn!(topic = %topic, "dropped ordinary event after bounded wait timeout");
                        }
                    }
                }
            }
            // `Closed` sends (subscriber task gone) are ignored — the
            // subscriber entry is pruned on the next `unsubscribe` call.
        }
    }

    fn bump(&self, counters: &RwLock<HashMap<String, u64>>, topic: &str) {
        *counters.write().entry(topic.to_string()).or_insert(0) += 1;
    }

    pub fn dropped_high_frequency_count(&self, topic: &str) -> u64 {
        *self.dropped_high_frequency.read().get(topic).unwrap_or(&0)
    }

    pub fn dropped_critical_count(&self, topic: &str) -> u64 {
        *self.dropped_critical.read().get(topic).unwrap_or(&0)
    }

    pub fn dropped_ordinary_count(&self, topic: &str) -> u64 {
        *self.dropped_ordinary.read().get(topic).unwrap_or(&0)
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.subscribers.read().get(topic).map(|v| v.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::Side;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Mutex as AsyncMutex;

    fn price_update(symbol: &str) -> Event {
        Event::MarketPriceUpdate(MarketPriceUpdate {
            exchange: "mexc".into(),
            symbol: symbol.into(),
            price: dec!(100),
            volume: dec!(10),
            timestamp: Utc::now(),
            side: Side::Buy,
            quote_volume: None,
            source: "test".into(),
        })
    }

    #[tokio::test]
    async fn delivers_in_publish_order_to_one_subscriber() {
        let bus = EventBus::new(1024);
        let received = Arc::new(AsyncMutex::new(Vec::new()));
        let received_clone = received.clone();

        bus.subscribe(
            TOPIC_MARKET_PRICE_UPDATE,
            Arc::new(move |event: Arc<Event>| {
                let received = received_clone.clone();
                Box::pin(async move {
                    if let Event::MarketPriceUpdate(p) = event.as_ref() {
                        received.lock().await.push(p.symbol.clone());
                    }
                    Ok(())
                })
            }),
        );

        for symbol in ["A", "B", "C"] {
            bus.publish(price_update(symbol)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let seen = received.lock().await.clone();
        assert_eq!(seen, vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn unsubscribe_is_silent_noop_for_unknown_handle() {
        let bus = EventBus::new(16);
        let fake = SubscriptionHandle {
            topic: TOPIC_MARKET_PRICE_UPDATE.to_string(),
            id: 999,
        };
        bus.unsubscribe(&fake); // must not panic
        assert_eq!(bus.subscriber_count(TOPIC_MARKET_PRICE_UPDATE), 0);
    }

    #[tokio::test]
    async fn high_frequency_topic_drops_without_blocking_publisher() {
        let bus = EventBus::new(1); // capacity 1, so second publish overflows
        let blocked = Arc::new(AtomicUsize::new(0));
        let blocked_clone = blocked.clone();

        // Handler that never drains, to force the queue to stay full.
        let (gate_tx, gate_rx) = tokio::sync::oneshot::channel::<()>();
        let gate_rx = Arc::new(AsyncMutex::new(Some(gate_rx)));
        bus.subscribe(
            TOPIC_MARKET_PRICE_UPDATE,
            Arc::new(move |_event: Arc<Event>| {
                let gate_rx = gate_rx.clone();
                let blocked_clone = blocked_clone.clone();
                Box::pin(async move {
                    blocked_clone.fetch_add(1, Ordering::Relaxed);
                    if let Some(rx) = gate_rx.lock().await.take() {
                        let _ = rx.await;
                    }
                    Ok(())
                })
            }),
        );

        // Let the handler grab the first event and block on the gate.
        bus.publish(price_update("A")).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Queue capacity is 1 and the handler is mid-flight, so this publish
        // should observe a full queue and drop immediately (no wait).
        let start = std::time::Instant::now();
        bus.publish(price_update("B")).await;
        assert!(start.elapsed() < Duration::from_millis(50));
        assert_eq!(bus.dropped_high_frequency_count(TOPIC_MARKET_PRICE_UPDATE), 1);

        let _ = gate_tx.send(());
    }
}
