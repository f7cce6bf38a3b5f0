pub mod connection;
pub mod orderbook;
pub mod pool;
pub mod protocol;
pub mod rest_fallback;
pub mod subscription;

pub use connection::{Connection, ConnectionConfig, DispatchEvent};
pub use orderbook::OrderBookStore;
pub use pool::{PoolConfig, PoolError, WebSocketPool};
pub use protocol::DataType;
pub use rest_fallback::{RestFallbackClient, RestFallbackError};
pub use subscription::{SubscriptionConfirmer, SymbolConfirmState};

use std::sync::Arc;

use async_trait::async_trait;

/// Market-data ingestion port (§6). The orchestrator wires against this
/// trait rather than `WebSocketPool` directly, mirroring the
/// `IOrderExecutor`/`INotificationService` pattern in `execution/mod.rs`.
/// `connect`/`disconnect`/`subscribe_to_symbol` keep `WebSocketPool`'s own
/// `self: &Arc<Self>` receiver (it needs an owned clone of itself to spawn
/// its per-connection tasks), so the trait mirrors that exactly instead of
/// forcing a `&self` shape the implementation couldn't satisfy.
#[async_trait]
pub trait IMarketDataProvider: Send + Sync {
    async fn connect(self: &Arc<Self>);
    async fn disconnect(self: &Arc<Self>);
    async fn subscribe_to_symbol(self: &Arc<Self>, symbol: &str, data_types: &[DataType]) -> Result<(), PoolError>;
    fn unsubscribe_from_symbol(&self, symbol: &str);
    fn get_exchange_name(&self) -> &str;
}

#[async_trait]
impl IMarketDataProvider for WebSocketPool {
    async fn connect(self: &Arc<Self>) {
        WebSocketPool::connect(self)
    }

    async fn disconnect(self: &Arc<Self>) {
        WebSocketPool::disconnect(self).await
    }

    async fn subscribe_to_symbol(self: &Arc<Self>, symbol: &str, data_types: &[DataType]) -> Result<(), PoolError> {
        WebSocketPool::subscribe_to_symbol(self, symbol, data_types).await
    }

    fn unsubscribe_from_symbol(&self, symbol: &str) {
        WebSocketPool::unsubscribe_from_symbol(self, symbol)
    }

    fn get_exchange_name(&self) -> &str {
        WebSocketPool::exchange_name(self)
    }
}
