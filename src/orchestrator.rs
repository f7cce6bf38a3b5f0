// =============================================================================
// Orchestrator — owns and wires every component's lifecycle
// =============================================================================
//
// The Event Bus is the one component shared by reference; every other piece
// is uniquely owned here (SPEC_FULL §9, "cyclic graphs" ruling). Startup
// order follows §4.9: bus, then risk manager, then pump detector (subscribed
// before any market data can arrive), then the WebSocket pool, connected and
// subscribed to every configured symbol last. Shutdown reverses that order,
// logging and continuing past any single step's failure rather than
// aborting the sequence. Grounded on the host's `main.rs` startup sequence
// (build components, spawn supervisory tasks, wait on a shutdown signal,
// abort tasks in reverse order).
// =============================================================================

use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::EngineConfig;
use crate::domain::trading::{OrderSide, Position};
use crate::event_bus::{Event, EventBus, PumpDetectedPayload, TOPIC_PUMP_DETECTED};
use crate::execution::{IOrderExecutor, INotificationService};
use crate::market_data::connection::ConnectionConfig;
use crate::market_data::protocol::DataType;
use crate::market_data::pool::{PoolConfig, WebSocketPool};
use crate::pump_detector::state_machine::{PumpThresholds, ReversalThresholds};
use crate::pump_detector::{PumpDetector, PumpDetectorConfig};
use crate::risk_manager::RiskManager;

/// Everything the orchestrator needs beyond what it builds from
/// `EngineConfig` itself — the two external ports (§6.4).
pub struct OrchestratorDeps {
    pub executor: Arc<dyn IOrderExecutor>,
    pub notifier: Arc<dyn INotificationService>,
}

pub struct Orchestrator {
    config: EngineConfig,
    deps: OrchestratorDeps,
    event_bus: Arc<EventBus>,
    risk_manager: Arc<RiskManager>,
    pump_detector: Arc<PumpDetector>,
    pool: Arc<WebSocketPool>,
    positions: RwLock<Vec<Position>>,
    tasks: RwLock<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(config: EngineConfig, deps: OrchestratorDeps) -> Arc<Self> {
        let event_bus = Arc::new(EventBus::new(config.event_bus_queue_capacity));

        let risk_manager = Arc::new(RiskManager::new(event_bus.clone(), config.risk.clone(), config.initial_capital));

        let pump_config = PumpDetectorConfig {
            baseline_window: config.baseline_window(),
            velocity_window: config.velocity_window(),
            peak_confirmation_window: config.peak_confirmation_window(),
            ring_buffer_capacity: config.ring_buffer_capacity,
            min_confidence_threshold: config.min_confidence_threshold,
            thresholds: PumpThresholds {
                min_pump_magnitude_pct: config.min_pump_magnitude_pct,
                volume_surge_multiplier: config.volume_surge_multiplier,
                velocity_threshold: config.velocity_threshold,
                min_volume_24h: config.min_volume_24h_usdt,
            },
            reversal_thresholds: ReversalThresholds { min_retracement_pct: config.min_retracement_pct },
        };
        let pump_detector = PumpDetector::new(event_bus.clone(), pump_config);

        let pool_config = PoolConfig {
            exchange: config.exchange_name.clone(),
            ws_url: config.ws_url.clone(),
            max_connections: config.max_connections,
            max_subs_per_connection: config.max_subs_per_connection,
            max_reconnect_attempts: config.max_reconnect_attempts,
            subscribe_rate_limit_timeout: std::time::Duration::from_secs(10),
            connection: ConnectionConfig {
                pong_warn_threshold: std::time::Duration::from_secs(config.pong_warn_threshold_secs),
                pong_reconnect_threshold: std::time::Duration::from_secs(config.pong_reconnect_threshold_secs),
                pre_close_health_check_timeout: std::time::Duration::from_secs(config.pre_close_health_check_timeout_secs),
                ..ConnectionConfig::default()
            },
            snapshot_refresh_interval: std::time::Duration::from_secs(config.snapshot_refresh_interval_secs),
            activity_thresholds: config.activity_thresholds.clone(),
            ..PoolConfig::default()
        };
        let pool = WebSocketPool::new(pool_config, event_bus.clone());

        Arc::new(Self {
            config,
            deps,
            event_bus,
            risk_manager,
            pump_detector,
            pool,
            positions: RwLock::new(Vec::new()),
            tasks: RwLock::new(Vec::new()),
        })
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.event_bus.clone()
    }

    /// Bring every component up in dependency order and start driving the
    /// signal-to-order pipeline. Returns once every configured symbol has
    /// been submitted for subscription — connection and confirmation
    /// continue asynchronously.
    pub async fn start(self: &Arc<Self>) {
        info!(exchange = %self.config.exchange_name, symbols = ?self.config.symbols, "starting orchestrator");

        self.pump_detector.subscribe();
        self.subscribe_trade_pipeline();

        self.pool.connect();

        for symbol in &self.config.symbols {
            let pool = self.pool.clone();
            let symbol = symbol.clone();
            match pool.subscribe_to_symbol(&symbol, &[DataType::Prices, DataType::Orderbook]).await {
                Ok(()) => info!(%symbol, "subscribed"),
                Err(e) => error!(%symbol, error = %e, "failed to subscribe symbol at startup"),
            }
        }
    }

    /// Subscribe to `pump.detected` and drive risk-gated order placement.
    /// This is the one leg of the data flow with no natural home inside any
    /// single component: it needs the risk manager, the executor port, and
    /// the notifier all at once, which only the orchestrator holds together.
    fn subscribe_trade_pipeline(self: &Arc<Self>) {
        let orchestrator = self.clone();
        self.event_bus.subscribe(
            TOPIC_PUMP_DETECTED,
            Arc::new(move |event: Arc<Event>| {
                let orchestrator = orchestrator.clone();
                Box::pin(async move {
                    if let Event::PumpDetected(payload) = event.as_ref() {
                        orchestrator.on_pump_detected(payload).await;
                    }
                    Ok(())
                })
            }),
        );
    }

    async fn on_pump_detected(&self, payload: &PumpDetectedPayload) {
        if !payload.entry_allowed {
            return;
        }

        let signal = &payload.signal;
        let price = signal.peak_price;
        let notional = self.config.initial_capital * (self.config.risk.max_position_size_pct / Decimal::from(100));
        if price <= Decimal::ZERO {
            return;
        }
        let quantity = notional / price;

        let positions_snapshot = self.positions.read().clone();
        let verdict = self
            .risk_manager
            .can_open_position(&payload.symbol, OrderSide::Buy, quantity, price, &positions_snapshot, None, None)
            .await;

        if !verdict.can_proceed {
            self.deps
                .notifier
                .send_risk_alert(&payload.symbol, &format!("entry rejected: {}", verdict.reason.unwrap_or_default()))
                .await;
            return;
        }

        match self.deps.executor.place_market_order(&payload.symbol, OrderSide::Buy, quantity).await {
            Ok(order) => {
                self.deps
                    .notifier
                    .send_signal_alert(&payload.symbol, &format!("entered position, confidence {:.1}", signal.confidence))
                    .await;
                let entry_price = order.average_fill_price.or(order.price).unwrap_or(price);
                self.positions.write().push(Position::new(&payload.symbol, OrderSide::Buy, entry_price, quantity, Utc::now()));
            }
            Err(e) => {
                warn!(symbol = %payload.symbol, error = %e, "order placement failed after risk approval");
            }
        }
    }

    /// Tear everything down, best-effort: abort supervisory tasks, then ask
    /// the pool to disconnect within a bounded window. A step's failure is
    /// logged and does not stop the remaining steps (§4.9).
    pub async fn stop(&self) {
        info!("stopping orchestrator");

        for handle in self.tasks.write().drain(..) {
            handle.abort();
        }

        let disconnect = tokio::time::timeout(std::time::Duration::from_secs(10), self.pool.disconnect()).await;
        if disconnect.is_err() {
            warn!("pool disconnect did not complete within the shutdown window");
        }

        info!("orchestrator stopped");
    }
}
