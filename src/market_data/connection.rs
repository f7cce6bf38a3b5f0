// =============================================================================
// Connection — one WebSocket socket's heartbeat and message-dispatch state
// =============================================================================
//
// Each connection owns its own send half, `connected`/subscription-set state
// behind a `state_lock`, an in-flight-message gauge, and an independent
// heartbeat task. Parsed frames are handed to the pool as `DispatchEvent`s;
// business logic (orderbook merge, subscription confirmation, event bus
// publication) lives in `market_data::pool`, keeping this module focused on
// transport and the reader state machine (§4.2, §5, §8.3).
//
// Grounded on the host's `market_data/trade_stream.rs` connect/read loop
// idiom and the original's `_message_loop` / `_heartbeat_monitor`
// (`mexc_websocket_adapter.py`).
// =============================================================================

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{error, info, warn};

use super::protocol::{parse_deal_entries, parse_depth_push, FrameKind, PingRequest, RawFrame};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = futures_util::stream::SplitSink<WsStream, WsMessage>;

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub ping_interval: Duration,
    pub pong_warn_threshold: Duration,
    pub pong_reconnect_threshold: Duration,
    pub data_staleness_limit: Duration,
    pub pre_close_health_check_timeout: Duration,
    pub json_error_threshold: u32,
    pub transient_error_threshold: u32,
    pub drain_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(20),
            pong_warn_threshold: Duration::from_secs(60),
            pong_reconnect_threshold: Duration::from_secs(120),
            data_staleness_limit: Duration::from_secs(120),
            pre_close_health_check_timeout: Duration::from_secs(10),
            json_error_threshold: 5,
            transient_error_threshold: 10,
            drain_timeout: Duration::from_secs(5),
        }
    }
}

/// Events the reader/heartbeat tasks hand back to the owning pool.
#[derive(Debug, Clone)]
pub enum DispatchEvent {
    Deal {
        symbol: String,
        entries: Vec<super::protocol::DealEntry>,
    },
    DepthSnapshot {
        symbol: String,
        depth: super::protocol::DepthPush,
    },
    DepthIncremental {
        symbol: String,
        depth: super::protocol::DepthPush,
    },
    SubscriptionAck {
        symbol: String,
        channel: String,
        success: bool,
    },
    /// Inbound traffic on this connection has gone quiet past
    /// `data_staleness_limit` (§4.2). The connection cannot build a real
    /// subscribe-refresh frame itself — it has no notion of per-symbol
    /// channels, only the pool's `symbol_data_types`/`SubscriptionConfirmer`
    /// does — so it reports the condition and keeps the close decision,
    /// while the pool is the one that sends the actual refresh frames.
    DataStale,
    Closed { reason: String },
}

/// Pure, independently testable classifier for the reader's transient-error
/// threshold (§4.2, §8.3): accumulates JSON vs. other transient errors and
/// reports when the connection must be closed.
#[derive(Default)]
pub struct ErrorTracker {
    json_errors: AtomicU32,
    transient_errors: AtomicU32,
    json_threshold: u32,
    transient_threshold: u32,
}

impl ErrorTracker {
    pub fn new(json_threshold: u32, transient_threshold: u32) -> Self {
        Self {
            json_errors: AtomicU32::new(0),
            transient_errors: AtomicU32::new(0),
            json_threshold,
            transient_threshold,
        }
    }

    /// Record a JSON-parse failure; returns `true` once the threshold is
    /// reached (the connection must close).
    pub fn record_json_error(&self) -> bool {
        self.json_errors.fetch_add(1, Ordering::SeqCst) + 1 >= self.json_threshold
    }

    /// Record a transient (validation/business) error; returns `true` once
    /// the threshold is reached.
    pub fn record_transient_error(&self) -> bool {
        self.transient_errors.fetch_add(1, Ordering::SeqCst) + 1 >= self.transient_threshold
    }

    pub fn reset(&self) {
        self.json_errors.store(0, Ordering::SeqCst);
        self.transient_errors.store(0, Ordering::SeqCst);
    }
}

struct ConnState {
    connected: bool,
    subscribed: HashSet<String>,
}

/// One WebSocket socket, carrying up to `max_subs_per_conn` symbols.
pub struct Connection {
    pub id: u64,
    config: ConnectionConfig,
    write: Mutex<Option<WsSink>>,
    state: RwLock<ConnState>,
    in_flight_messages: AtomicU32,
    errors: ErrorTracker,
    last_pong_received: Mutex<Instant>,
    last_data_received: Mutex<Instant>,
    health_check_pending: std::sync::atomic::AtomicBool,
    data_staleness_limit: Mutex<Duration>,
}

impl Connection {
    /// Open a socket and spawn its reader and heartbeat tasks. Returns the
    /// connection handle plus the channel the pool drains for dispatch
    /// events, including the terminal `Closed` event.
    pub async fn connect(
        id: u64,
        url: &str,
        config: ConnectionConfig,
    ) -> anyhow::Result<(Arc<Connection>, mpsc::Receiver<DispatchEvent>)> {
        let (stream, _response) = connect_async(url).await?;
        let (write, read) = stream.split();
        let now = Instant::now();

        let json_threshold = config.json_error_threshold;
        let transient_threshold = config.transient_error_threshold;
        let initial_staleness_limit = config.data_staleness_limit;
        let conn = Arc::new(Connection {
            id,
            config,
            write: Mutex::new(Some(write)),
            state: RwLock::new(ConnState {
                connected: true,
                subscribed: HashSet::new(),
            }),
            in_flight_messages: AtomicU32::new(0),
            errors: ErrorTracker::new(json_threshold, transient_threshold),
            last_pong_received: Mutex::new(now),
            last_data_received: Mutex::new(now),
            health_check_pending: std::sync::atomic::AtomicBool::new(false),
            data_staleness_limit: Mutex::new(initial_staleness_limit),
        });

        let (tx, rx) = mpsc::channel(1024);
        tokio::spawn(reader_loop(conn.clone(), read, tx.clone()));
        tokio::spawn(heartbeat_loop(conn.clone(), tx));

        Ok((conn, rx))
    }

    pub fn is_connected(&self) -> bool {
        self.state.read().connected
    }

    pub fn add_symbol(&self, symbol: &str) {
        self.state.write().subscribed.insert(symbol.to_string());
    }

    pub fn remove_symbol(&self, symbol: &str) {
        self.state.write().subscribed.remove(symbol);
    }

    pub fn subscribed_symbols(&self) -> Vec<String> {
        self.state.read().subscribed.iter().cloned().collect()
    }

    pub fn subscription_count(&self) -> usize {
        self.state.read().subscribed.len()
    }

    pub fn data_age(&self) -> Duration {
        self.last_data_received.lock().elapsed()
    }

    /// Widen or narrow the data-staleness window as the connection's symbol
    /// mix changes (§4.2, §6.3: per-volume-category thresholds). Callers
    /// pass the most lenient threshold among the connection's current
    /// symbols so a quiet low-volume symbol sharing a connection with an
    /// active one never trips a false reconnect.
    pub fn set_data_staleness_limit(&self, limit: Duration) {
        *self.data_staleness_limit.lock() = limit;
    }

    pub async fn send_json<T: serde::Serialize>(&self, value: &T) -> anyhow::Result<()> {
        let text = serde_json::to_string(value)?;
        let mut guard = self.write.lock();
        if let Some(sink) = guard.as_mut() {
            sink.send(WsMessage::Text(text)).await?;
        }
        Ok(())
    }

    /// Wait (up to `drain_timeout`) for in-flight handlers to finish before
    /// the caller tears down per-symbol state for this connection.
    pub async fn drain(&self) {
        let deadline = Instant::now() + self.config.drain_timeout;
        while self.in_flight_messages.load(Ordering::SeqCst) > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    fn mark_closed(&self) {
        self.state.write().connected = false;
    }

    fn mark_data_received(&self) {
        *self.last_data_received.lock() = Instant::now();
    }

    fn mark_pong_received(&self) {
        let now = Instant::now();
        *self.last_pong_received.lock() = now;
        *self.last_data_received.lock() = now;
        self.health_check_pending.store(false, Ordering::SeqCst);
    }
}

async fn reader_loop(
    conn: Arc<Connection>,
    mut read: futures_util::stream::SplitStream<WsStream>,
    tx: mpsc::Sender<DispatchEvent>,
) {
    loop {
        let msg = match read.next().await {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                error!(connection_id = conn.id, error = %e, "connection read error, closing");
                conn.mark_closed();
                let _ = tx.send(DispatchEvent::Closed { reason: e.to_string() }).await;
                return;
            }
            None => {
                info!(connection_id = conn.id, "connection stream ended");
                conn.mark_closed();
                let _ = tx.send(DispatchEvent::Closed { reason: "stream ended".into() }).await;
                return;
            }
        };

        let text = match msg {
            WsMessage::Text(t) => t,
            WsMessage::Close(_) => {
                conn.mark_closed();
                let _ = tx.send(DispatchEvent::Closed { reason: "peer closed".into() }).await;
                return;
            }
            _ => continue,
        };

        conn.in_flight_messages.fetch_add(1, Ordering::SeqCst);
        conn.mark_data_received();

        let frame: RawFrame = match serde_json::from_str(&text) {
            Ok(f) => f,
            Err(e) => {
                warn!(connection_id = conn.id, error = %e, "malformed JSON frame");
                conn.in_flight_messages.fetch_sub(1, Ordering::SeqCst);
                if conn.errors.record_json_error() {
                    error!(connection_id = conn.id, "JSON error threshold exceeded, closing");
                    conn.mark_closed();
                    let _ = tx
                        .send(DispatchEvent::Closed { reason: "json error threshold".into() })
                        .await;
                    return;
                }
                continue;
            }
        };

        let dispatched = match frame.classify() {
            FrameKind::Pong => {
                conn.mark_pong_received();
                true
            }
            FrameKind::Deal => match frame.symbol.clone() {
                Some(symbol) => {
                    let entries = parse_deal_entries(&frame.data);
                    tx.send(DispatchEvent::Deal { symbol, entries }).await.is_ok()
                }
                None => false,
            },
            FrameKind::DepthSnapshot => match (frame.symbol.clone(), parse_depth_push(&frame.data)) {
                (Some(symbol), Some(depth)) => tx
                    .send(DispatchEvent::DepthSnapshot { symbol, depth })
                    .await
                    .is_ok(),
                _ => false,
            },
            FrameKind::DepthIncremental => match (frame.symbol.clone(), parse_depth_push(&frame.data)) {
                (Some(symbol), Some(depth)) => tx
                    .send(DispatchEvent::DepthIncremental { symbol, depth })
                    .await
                    .is_ok(),
                _ => false,
            },
            FrameKind::SubscriptionAck => match (frame.symbol.clone(), frame.ack_channel()) {
                (Some(symbol), Some(channel)) => tx
                    .send(DispatchEvent::SubscriptionAck {
                        symbol,
                        channel: channel.to_string(),
                        success: frame.ack_success(),
                    })
                    .await
                    .is_ok(),
                _ => false,
            },
            FrameKind::Unknown => true,
        };

        conn.in_flight_messages.fetch_sub(1, Ordering::SeqCst);

        if !dispatched && conn.errors.record_transient_error() {
            error!(connection_id = conn.id, "transient error threshold exceeded, closing");
            conn.mark_closed();
            let _ = tx
                .send(DispatchEvent::Closed { reason: "transient error threshold".into() })
                .await;
            return;
        }
    }
}

async fn heartbeat_loop(conn: Arc<Connection>, tx: mpsc::Sender<DispatchEvent>) {
    let mut ticker = tokio::time::interval(conn.config.ping_interval);
    loop {
        ticker.tick().await;
        if !conn.is_connected() {
            return;
        }

        if conn.send_json(&PingRequest::default()).await.is_err() {
            conn.mark_closed();
            let _ = tx.send(DispatchEvent::Closed { reason: "ping send failed".into() }).await;
            return;
        }

        let pong_age = conn.last_pong_received.lock().elapsed();
        let data_age = conn.last_data_received.lock().elapsed();

        if pong_age > conn.config.pong_reconnect_threshold {
            error!(connection_id = conn.id, ?pong_age, "pong age exceeded reconnect threshold");
            conn.mark_closed();
            let _ = tx.send(DispatchEvent::Closed { reason: "pong reconnect threshold".into() }).await;
            return;
        }

        if pong_age > conn.config.pong_warn_threshold && !conn.health_check_pending.swap(true, Ordering::SeqCst) {
            warn!(connection_id = conn.id, ?pong_age, "pong age exceeded warn threshold, issuing health-check ping");
            let _ = conn.send_json(&PingRequest::default()).await;
        }

        let staleness_limit = *conn.data_staleness_limit.lock();
        if data_age > staleness_limit {
            warn!(connection_id = conn.id, ?data_age, ?staleness_limit, "data staleness limit exceeded, requesting subscription refresh before close");
            // The pool owns per-symbol channel state and is the one that can
            // build real `SubscribeRequest` refresh frames; this task only
            // reports the condition and, if the pool's refresh doesn't bring
            // fresh data within the window, closes the connection.
            if tx.send(DispatchEvent::DataStale).await.is_err() {
                return;
            }
            tokio::time::sleep(conn.config.pre_close_health_check_timeout).await;
            if conn.data_age() > staleness_limit {
                error!(connection_id = conn.id, "no data after subscription refresh, closing");
                conn.mark_closed();
                let _ = tx.send(DispatchEvent::Closed { reason: "data staleness".into() }).await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn n_minus_one_json_errors_does_not_close() {
        let tracker = ErrorTracker::new(5, 10);
        for _ in 0..4 {
            assert!(!tracker.record_json_error());
        }
    }

    #[test]
    fn nth_json_error_closes() {
        let tracker = ErrorTracker::new(5, 10);
        for _ in 0..4 {
            assert!(!tracker.record_json_error());
        }
        assert!(tracker.record_json_error());
    }

    #[test]
    fn transient_errors_tracked_independently_of_json_errors() {
        let tracker = ErrorTracker::new(5, 10);
        for _ in 0..9 {
            assert!(!tracker.record_transient_error());
        }
        assert!(!tracker.record_json_error());
        assert!(tracker.record_transient_error());
    }
}
