// =============================================================================
// WebSocket Pool — connection placement, reconnection, dispatch routing
// =============================================================================
//
// Owns every live `Connection`, the per-symbol `{symbol -> connection}`
// routing table, the subscription rate limiter, the connection-creation
// circuit breaker, and the order-book store. Grounded on the original's
// `_get_available_connection` placement scan and `_reconnect_connection`
// exponential backoff (`mexc_websocket_adapter.py`), §4.2, §4.7, §5, §8.1,
// §8.3 scenario 5.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::circuit_breaker::CircuitBreaker;
use crate::config::ActivityThresholds;
use crate::domain::market::OrderBookLevel;
use crate::event_bus::{ConnectionEvent, Event, EventBus, MarketOrderbookUpdate, MarketPriceUpdate};
use crate::rate_limiter::TokenBucket;

use super::connection::{Connection, ConnectionConfig, DispatchEvent};
use super::orderbook::OrderBookStore;
use super::protocol::{DataType, DepthPush, SubscribeRequest};
use super::subscription::{SubscriptionConfirmer, SymbolConfirmState};

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("connection capacity exceeded")]
    CapacityExceeded,
    #[error("rate limit timeout waiting for subscription token")]
    RateLimitTimeout,
    #[error("circuit breaker open, refusing new connection")]
    CircuitOpen,
    #[error("connection failed: {0}")]
    Connection(#[from] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub exchange: String,
    pub ws_url: String,
    pub max_connections: usize,
    pub max_subs_per_connection: usize,
    pub max_reconnect_attempts: u32,
    pub subscribe_rate_limit_timeout: Duration,
    pub connection: ConnectionConfig,
    pub snapshot_refresh_interval: Duration,
    pub tracking_cleanup_interval: Duration,
    pub tracking_max_age: Duration,
    pub max_reconnection_counters: usize,
    pub max_log_rate_entries: usize,
    pub activity_thresholds: ActivityThresholds,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            exchange: "mexc".to_string(),
            ws_url: "wss://contract.mexc.com/edge".to_string(),
            max_connections: 5,
            max_subs_per_connection: 30,
            max_reconnect_attempts: 10,
            subscribe_rate_limit_timeout: Duration::from_secs(10),
            connection: ConnectionConfig::default(),
            snapshot_refresh_interval: Duration::from_secs(300),
            tracking_cleanup_interval: Duration::from_secs(600),
            tracking_max_age: Duration::from_secs(3600),
            max_reconnection_counters: 20,
            max_log_rate_entries: 1000,
            activity_thresholds: ActivityThresholds::default(),
        }
    }
}

struct ReconnectCounter {
    attempts: u32,
    expiry: Instant,
}

/// Exponential backoff with a 30 s cap and per-connection jitter (§4.7,
/// §8.4 scenario 5): attempt 1 waits ~1s, attempt 2 ~2s, ... attempt 6+
/// clamps at 30s. Jitter is derived from `conn_id` so it's deterministic
/// for a given connection rather than drawn from an RNG.
fn backoff_delay(attempt: u32, conn_id: u64) -> Duration {
    let base = 2u64.saturating_pow(attempt.saturating_sub(1)).min(30);
    let jitter_ms = (conn_id.wrapping_mul(2654435761) % 1000) * base * 100 / 1000;
    Duration::from_secs(base) + Duration::from_millis(jitter_ms)
}

pub struct WebSocketPool {
    config: PoolConfig,
    event_bus: Arc<EventBus>,
    connections: RwLock<HashMap<u64, Arc<Connection>>>,
    next_connection_id: AtomicU64,
    subscription_lock: AsyncMutex<()>,
    symbol_to_connection: RwLock<HashMap<String, u64>>,
    symbol_data_types: RwLock<HashMap<String, Vec<DataType>>>,
    orderbooks: OrderBookStore,
    confirmer: SubscriptionConfirmer,
    rate_limiter: TokenBucket,
    circuit_breaker: CircuitBreaker,
    reconnection_attempts: RwLock<HashMap<u64, ReconnectCounter>>,
    snapshot_tasks: RwLock<HashMap<String, JoinHandle<()>>>,
    log_rate: RwLock<HashMap<String, Instant>>,
    running: std::sync::atomic::AtomicBool,
}

impl WebSocketPool {
    pub fn new(config: PoolConfig, event_bus: Arc<EventBus>) -> Arc<Self> {
        let rate_limiter = TokenBucket::new(30, 5);
        let circuit_breaker = CircuitBreaker::with_defaults("websocket_pool");
        Arc::new(Self {
            config,
            event_bus,
            connections: RwLock::new(HashMap::new()),
            next_connection_id: AtomicU64::new(1),
            subscription_lock: AsyncMutex::new(()),
            symbol_to_connection: RwLock::new(HashMap::new()),
            symbol_data_types: RwLock::new(HashMap::new()),
            orderbooks: OrderBookStore::new(),
            confirmer: SubscriptionConfirmer::new(),
            rate_limiter,
            circuit_breaker,
            reconnection_attempts: RwLock::new(HashMap::new()),
            snapshot_tasks: RwLock::new(HashMap::new()),
            log_rate: RwLock::new(HashMap::new()),
            running: std::sync::atomic::AtomicBool::new(false),
        })
    }

    pub fn connect(self: &Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        tokio::spawn(self.clone().tracking_cleanup_loop());
    }

    pub async fn disconnect(self: &Arc<Self>) {
        self.running.store(false, Ordering::SeqCst);
        let conns: Vec<Arc<Connection>> = self.connections.write().drain().map(|(_, c)| c).collect();
        for conn in conns {
            conn.drain().await;
        }
        for (_, task) in self.snapshot_tasks.write().drain() {
            task.abort();
        }
        info!("websocket pool disconnected");
    }

    /// Acquire a connection with spare capacity, opening a new one (behind
    /// the circuit breaker) if none qualifies. Caller must hold
    /// `subscription_lock`.
    async fn acquire_connection(self: &Arc<Self>) -> Result<Arc<Connection>, PoolError> {
        {
            let conns = self.connections.read();
            for conn in conns.values() {
                let load = conn.subscription_count() + self.confirmer.pending_symbol_count(conn.id);
                if conn.is_connected() && load < self.config.max_subs_per_connection {
                    return Ok(conn.clone());
                }
            }
        }

        if self.connections.read().len() >= self.config.max_connections {
            return Err(PoolError::CapacityExceeded);
        }

        self.circuit_breaker.check().map_err(|_| PoolError::CircuitOpen)?;

        let id = self.next_connection_id.fetch_add(1, Ordering::SeqCst);
        match Connection::connect(id, &self.config.ws_url, self.config.connection.clone()).await {
            Ok((conn, rx)) => {
                self.circuit_breaker.record_success();
                self.connections.write().insert(id, conn.clone());
                tokio::spawn(self.clone().run_connection_events(conn.clone(), rx));
                Ok(conn)
            }
            Err(e) => {
                self.circuit_breaker.record_failure();
                Err(PoolError::Connection(e))
            }
        }
    }

    /// Subscribe `symbol` to the given data types. Idempotent: a second
    /// call while the symbol is already pending or confirmed is a no-op
    /// (§8.2).
    pub async fn subscribe_to_symbol(self: &Arc<Self>, symbol: &str, data_types: &[DataType]) -> Result<(), PoolError> {
        let _guard = self.subscription_lock.lock().await;

        if self.symbol_to_connection.read().contains_key(symbol) {
            return Ok(());
        }

        let conn = self.acquire_connection().await?;

        if !self.rate_limiter.acquire(1, self.config.subscribe_rate_limit_timeout).await {
            return Err(PoolError::RateLimitTimeout);
        }

        let channels: Vec<&str> = data_types.iter().flat_map(|dt| dt.channels().iter().copied()).collect();
        self.confirmer.register(conn.id, symbol, &channels);
        self.symbol_to_connection.write().insert(symbol.to_string(), conn.id);
        self.symbol_data_types.write().insert(symbol.to_string(), data_types.to_vec());

        for channel in &channels {
            if let Err(e) = conn.send_json(&SubscribeRequest::new(channel, symbol)).await {
                warn!(symbol, channel, error = %e, "failed to send subscribe frame");
            }
        }

        Ok(())
    }

    pub fn exchange_name(&self) -> &str {
        &self.config.exchange
    }

    pub fn unsubscribe_from_symbol(&self, symbol: &str) {
        let Some(conn_id) = self.symbol_to_connection.write().remove(symbol) else {
            return;
        };
        self.symbol_data_types.write().remove(symbol);
        self.confirmer.remove_symbol(conn_id, symbol);
        self.orderbooks.remove(symbol);
        if let Some(task) = self.snapshot_tasks.write().remove(symbol) {
            task.abort();
        }
        if let Some(conn) = self.connections.read().get(&conn_id) {
            conn.remove_symbol(symbol);
            self.refresh_staleness_limit(&conn);
        }
    }

    /// Recompute `conn`'s effective data-staleness window as the most
    /// lenient per-volume-category threshold among its currently subscribed
    /// symbols (§4.2, §6.3), so a connection carrying only quiet low-volume
    /// symbols isn't reconnected on the high-volume default.
    fn refresh_staleness_limit(&self, conn: &Arc<Connection>) {
        let limit = conn
            .subscribed_symbols()
            .iter()
            .map(|s| {
                let category = self.config.activity_thresholds.classify(s);
                self.config.activity_thresholds.staleness_limit(category)
            })
            .max()
            .unwrap_or(self.config.connection.data_staleness_limit);
        conn.set_data_staleness_limit(limit);
    }

    async fn run_connection_events(
        self: Arc<Self>,
        conn: Arc<Connection>,
        mut rx: tokio::sync::mpsc::Receiver<DispatchEvent>,
    ) {
        while let Some(event) = rx.recv().await {
            match event {
                DispatchEvent::Deal { symbol, entries } => {
                    for deal in entries {
                        self.event_bus
                            .publish(Event::MarketPriceUpdate(MarketPriceUpdate {
                                exchange: self.config.exchange.clone(),
                                symbol: symbol.clone(),
                                price: deal.p,
                                volume: deal.v,
                                timestamp: Utc::now(),
                                side: deal.side(),
                                quote_volume: None,
                                source: self.config.exchange.clone(),
                            }))
                            .await;
                    }
                }
                DispatchEvent::DepthSnapshot { symbol, depth } => {
                    self.apply_and_publish_depth(&symbol, depth, true).await;
                }
                DispatchEvent::DepthIncremental { symbol, depth } => {
                    self.apply_and_publish_depth(&symbol, depth, false).await;
                }
                DispatchEvent::SubscriptionAck { symbol, channel, success } => {
                    self.handle_ack(&conn, &symbol, &channel, success).await;
                }
                DispatchEvent::DataStale => {
                    self.refresh_stale_connection(&conn).await;
                }
                DispatchEvent::Closed { reason } => {
                    self.handle_connection_closed(conn.id, reason).await;
                    return;
                }
            }
        }
    }

    async fn apply_and_publish_depth(&self, symbol: &str, depth: DepthPush, is_snapshot: bool) {
        let to_levels = |raw: Vec<Vec<rust_decimal::Decimal>>| -> Vec<OrderBookLevel> {
            raw.into_iter()
                .filter(|l| l.len() >= 2)
                .map(|l| OrderBookLevel { price: l[0], quantity: l[1] })
                .collect()
        };
        let bids = to_levels(depth.bids);
        let asks = to_levels(depth.asks);

        let book = if is_snapshot {
            Some(self.orderbooks.apply_snapshot(symbol, bids, asks, depth.version))
        } else {
            self.orderbooks.apply_delta(symbol, bids, asks, depth.version)
        };

        let Some(book) = book else {
            return; // stale delta, no-op
        };

        self.event_bus
            .publish(Event::MarketOrderbookUpdate(MarketOrderbookUpdate {
                exchange: self.config.exchange.clone(),
                symbol: symbol.to_string(),
                best_bid: book.best_bid().map(|l| l.price),
                best_ask: book.best_ask().map(|l| l.price),
                bids: book.bids,
                asks: book.asks,
                timestamp: book.last_update_wall_time,
                version: book.version,
            }))
            .await;
    }

    async fn handle_ack(&self, conn: &Arc<Connection>, symbol: &str, channel: &str, success: bool) {
        match self.confirmer.record_ack(conn.id, symbol, channel, success) {
            SymbolConfirmState::Confirmed => {
                conn.add_symbol(symbol);
                self.refresh_staleness_limit(conn);
                info!(symbol, connection_id = conn.id, "symbol fully confirmed");
                if self.wants_orderbook(symbol) {
                    self.start_snapshot_refresh(symbol.to_string());
                }
            }
            SymbolConfirmState::Failed => {
                warn!(symbol, channel, "subscription channel failed, abandoning symbol");
                self.symbol_to_connection.write().remove(symbol);
                self.symbol_data_types.write().remove(symbol);
            }
            SymbolConfirmState::Pending | SymbolConfirmState::Unknown => {}
        }
    }

    /// §4.2: "before closing on data staleness, send one subscription-
    /// refresh request" — re-issue a real `sub.<channel>` frame for every
    /// channel of every symbol currently carried on `conn`, rather than a
    /// bare ping, since a stale connection's problem is its subscriptions
    /// going silent, not liveness of the socket itself.
    async fn refresh_stale_connection(&self, conn: &Arc<Connection>) {
        let symbols = conn.subscribed_symbols();
        for symbol in &symbols {
            let data_types = self.symbol_data_types.read().get(symbol).cloned().unwrap_or_default();
            for data_type in data_types {
                for channel in data_type.channels() {
                    if let Err(e) = conn.send_json(&SubscribeRequest::new(channel, symbol)).await {
                        warn!(symbol, channel, error = %e, "failed to send subscription-refresh frame");
                    }
                }
            }
        }
        info!(connection_id = conn.id, symbols = symbols.len(), "sent subscription refresh for stale connection");
    }

    fn wants_orderbook(&self, symbol: &str) -> bool {
        self.symbol_data_types
            .read()
            .get(symbol)
            .map(|dts| dts.iter().any(|d| matches!(d, DataType::Orderbook)))
            .unwrap_or(false)
    }

    fn start_snapshot_refresh(self: &Arc<Self>, symbol: String) {
        let pool = self.clone();
        let interval = self.config.snapshot_refresh_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if !pool.symbol_to_connection.read().contains_key(&symbol) {
                    return;
                }
                let conn_id = pool.symbol_to_connection.read().get(&symbol).copied();
                let Some(conn_id) = conn_id else { return };
                let Some(conn) = pool.connections.read().get(&conn_id).cloned() else { return };
                if conn
                    .send_json(&SubscribeRequest::new("depth.full", &symbol))
                    .await
                    .is_err()
                {
                    warn!(symbol, "websocket snapshot refresh request failed, falling back to REST");
                    // REST fallback is wired in by the orchestrator through
                    // `market_data::rest_fallback::RestFallbackClient`.
                }
            }
        });
        self.snapshot_tasks.write().insert(symbol, handle);
    }

    async fn handle_connection_closed(self: &Arc<Self>, conn_id: u64, reason: String) {
        let conn = self.connections.write().remove(&conn_id);
        let Some(conn) = conn else { return };
        let symbols = conn.subscribed_symbols();

        self.event_bus
            .publish(Event::MarketDataDisconnected(ConnectionEvent {
                exchange: self.config.exchange.clone(),
                connection_id: Some(conn_id.to_string()),
                timestamp: Utc::now(),
                url: Some(self.config.ws_url.clone()),
            }))
            .await;
        warn!(connection_id = conn_id, reason, symbols = symbols.len(), "connection closed");

        self.confirmer.remove_connection(conn_id);
        for symbol in &symbols {
            self.symbol_to_connection.write().remove(symbol);
            if let Some(task) = self.snapshot_tasks.write().remove(symbol) {
                task.abort();
            }
        }

        if !symbols.is_empty() && self.running.load(Ordering::SeqCst) {
            tokio::spawn(self.clone().reconnect(conn_id, symbols));
        }
    }

    async fn reconnect(self: Arc<Self>, old_conn_id: u64, symbols: Vec<String>) {
        loop {
            let attempt = {
                let mut counters = self.reconnection_attempts.write();
                let entry = counters.entry(old_conn_id).or_insert(ReconnectCounter {
                    attempts: 0,
                    expiry: Instant::now() + self.config.tracking_max_age,
                });
                entry.attempts += 1;
                entry.expiry = Instant::now() + self.config.tracking_max_age;
                entry.attempts
            };

            if attempt > self.config.max_reconnect_attempts {
                error!(old_conn_id, "reconnect attempts exhausted, abandoning");
                self.reconnection_attempts.write().remove(&old_conn_id);
                return;
            }

            tokio::time::sleep(backoff_delay(attempt, old_conn_id)).await;

            match Connection::connect(
                self.next_connection_id.fetch_add(1, Ordering::SeqCst),
                &self.config.ws_url,
                self.config.connection.clone(),
            )
            .await
            {
                Ok((conn, rx)) => {
                    self.circuit_breaker.record_success();
                    let new_id = conn.id;
                    self.connections.write().insert(new_id, conn.clone());
                    tokio::spawn(self.clone().run_connection_events(conn, rx));
                    self.reconnection_attempts.write().remove(&old_conn_id);
                    info!(old_conn_id, new_id, attempt, "reconnected successfully");

                    self.event_bus
                        .publish(Event::MarketDataConnected(ConnectionEvent {
                            exchange: self.config.exchange.clone(),
                            connection_id: Some(new_id.to_string()),
                            timestamp: Utc::now(),
                            url: Some(self.config.ws_url.clone()),
                        }))
                        .await;

                    for symbol in symbols {
                        let pool = self.clone();
                        let data_types = self
                            .symbol_data_types
                            .read()
                            .get(&symbol)
                            .cloned()
                            .unwrap_or_else(|| vec![DataType::Prices, DataType::Orderbook]);
                        tokio::spawn(async move {
                            tokio::time::sleep(Duration::from_millis(100)).await;
                            if let Err(e) = pool.subscribe_to_symbol(&symbol, &data_types).await {
                                error!(symbol, error = %e, "resubscription after reconnect failed");
                            }
                        });
                    }
                    return;
                }
                Err(e) => {
                    self.circuit_breaker.record_failure();
                    warn!(old_conn_id, attempt, error = %e, "reconnect attempt failed");
                }
            }
        }
    }

    async fn tracking_cleanup_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.tracking_cleanup_interval);
        loop {
            ticker.tick().await;
            let now = Instant::now();
            let mut counters = self.reconnection_attempts.write();
            counters.retain(|_, c| c.expiry > now);
            if counters.len() > self.config.max_reconnection_counters {
                let excess = counters.len() - self.config.max_reconnection_counters;
                let oldest: Vec<u64> = {
                    let mut entries: Vec<(u64, Instant)> = counters.iter().map(|(k, v)| (*k, v.expiry)).collect();
                    entries.sort_by_key(|(_, expiry)| *expiry);
                    entries.into_iter().take(excess).map(|(k, _)| k).collect()
                };
                for key in oldest {
                    counters.remove(&key);
                }
            }
            drop(counters);

            let mut log_rate = self.log_rate.write();
            if log_rate.len() > self.config.max_log_rate_entries {
                let excess = log_rate.len() - self.config.max_log_rate_entries;
                let oldest: Vec<String> = {
                    let mut entries: Vec<(String, Instant)> = log_rate.iter().map(|(k, v)| (k.clone(), *v)).collect();
                    entries.sort_by_key(|(_, t)| *t);
                    entries.into_iter().take(excess).map(|(k, _)| k).collect()
                };
                for key in oldest {
                    log_rate.remove(&key);
                }
            }
        }
    }

    pub fn subscribed_symbol_count(&self) -> usize {
        self.symbol_to_connection.read().len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    pub fn reconnection_counter_count(&self) -> usize {
        self.reconnection_attempts.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_pool_starts_with_no_connections_or_symbols() {
        let bus = Arc::new(EventBus::new(1024));
        let pool = WebSocketPool::new(PoolConfig::default(), bus);
        assert_eq!(pool.connection_count(), 0);
        assert_eq!(pool.subscribed_symbol_count(), 0);
        assert_eq!(pool.reconnection_counter_count(), 0);
    }

    #[test]
    fn backoff_follows_the_doubling_schedule_capped_at_30s() {
        let conn_id = 0; // zero jitter term, isolates the base schedule
        assert_eq!(backoff_delay(1, conn_id), Duration::from_secs(1));
        assert_eq!(backoff_delay(2, conn_id), Duration::from_secs(2));
        assert_eq!(backoff_delay(3, conn_id), Duration::from_secs(4));
        assert_eq!(backoff_delay(4, conn_id), Duration::from_secs(8));
        assert_eq!(backoff_delay(5, conn_id), Duration::from_secs(16));
        assert_eq!(backoff_delay(6, conn_id), Duration::from_secs(30));
        assert_eq!(backoff_delay(10, conn_id), Duration::from_secs(30));
    }
}
