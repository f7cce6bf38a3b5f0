// =============================================================================
// Execution port — the narrow interface the core hands approved orders to
// =============================================================================
//
// `IOrderExecutor` is the only way trade intents leave the core (§6.4). Two
// implementations: `DemoExecutor` (paper fills, always available, grounded
// on the host's `ExecutionEngine` demo branch in the now-removed
// `execution.rs`) and `RestOrderExecutor` (thin REST skeleton grounded on
// `binance/client.rs`'s request-building style, generalized to a generic
// exchange and narrowed to exactly the four order-affecting calls the port
// needs — no exchange-specific signing or account logic, per the explicit
// non-goal in spec §1).
// =============================================================================

mod demo;
mod rest;

pub use demo::DemoExecutor;
pub use rest::RestOrderExecutor;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::trading::{Order, OrderSide};

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("order rejected by exchange: {0}")]
    Rejected(String),
    #[error("order not found: {0}")]
    NotFound(String),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("exchange unavailable")]
    Unavailable,
}

#[derive(Debug, Clone, Default)]
pub struct AccountInfo {
    pub balances: Vec<(String, Decimal)>,
}

/// The four order-affecting calls plus the two read-only ones named in
/// §6.4. Every approved trade intent the orchestrator forwards goes through
/// exactly this trait — the core never talks to an exchange order-placement
/// endpoint any other way.
#[async_trait]
pub trait IOrderExecutor: Send + Sync {
    async fn place_market_order(&self, symbol: &str, side: OrderSide, quantity: Decimal) -> Result<Order, ExecutorError>;
    async fn place_limit_order(&self, symbol: &str, side: OrderSide, quantity: Decimal, price: Decimal) -> Result<Order, ExecutorError>;
    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), ExecutorError>;
    async fn get_account_info(&self) -> Result<AccountInfo, ExecutorError>;
    async fn health_check(&self) -> bool;
    fn get_exchange_name(&self) -> &str;
}

/// Optional port for surfacing signals/alerts to an external channel
/// (§6.4). A no-op/logging default is always available so the core never
/// depends on one being configured.
#[async_trait]
pub trait INotificationService: Send + Sync {
    async fn send_signal_alert(&self, symbol: &str, message: &str);
    async fn send_risk_alert(&self, symbol: &str, message: &str);
}

pub struct LoggingNotificationService;

#[async_trait]
impl INotificationService for LoggingNotificationService {
    async fn send_signal_alert(&self, symbol: &str, message: &str) {
        tracing::info!(symbol, "{}", message);
    }

    async fn send_risk_alert(&self, symbol: &str, message: &str) {
        tracing::warn!(symbol, "{}", message);
    }
}
