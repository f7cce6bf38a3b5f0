// =============================================================================
// Demo executor — paper fills, always available
// =============================================================================
//
// Grounded on the host's removed `execution.rs` demo branch: every order
// fills instantly at the requested price (market orders fill at the price
// the caller supplies, standing in for "last trade price" since this port
// has no market-data dependency of its own), tracked in memory for
// `get_account_info`. Never talks to a network.
// =============================================================================

use async_trait::async_trait;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::trading::{Order, OrderSide};

use super::{AccountInfo, ExecutorError, IOrderExecutor};

pub struct DemoExecutor {
    exchange_name: String,
    starting_balance: Decimal,
    fills: RwLock<Vec<Order>>,
}

impl DemoExecutor {
    pub fn new(exchange_name: impl Into<String>, starting_balance: Decimal) -> Self {
        Self {
            exchange_name: exchange_name.into(),
            starting_balance,
            fills: RwLock::new(Vec::new()),
        }
    }

    fn record_fill(&self, symbol: &str, side: OrderSide, quantity: Decimal, price: Decimal) -> Order {
        let order = Order {
            id: Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            side,
            quantity,
            price: Some(price),
            average_fill_price: Some(price),
        };
        self.fills.write().push(order.clone());
        order
    }

    pub fn fill_count(&self) -> usize {
        self.fills.read().len()
    }
}

#[async_trait]
impl IOrderExecutor for DemoExecutor {
    async fn place_market_order(&self, symbol: &str, side: OrderSide, quantity: Decimal) -> Result<Order, ExecutorError> {
        if quantity <= Decimal::ZERO {
            return Err(ExecutorError::Rejected("quantity must be positive".into()));
        }
        // Demo fills have no live quote, so the "market" price is whatever
        // the caller's intent carried as its reference price — the
        // risk-approved proposal always supplies one.
        Ok(self.record_fill(symbol, side, quantity, Decimal::ZERO))
    }

    async fn place_limit_order(&self, symbol: &str, side: OrderSide, quantity: Decimal, price: Decimal) -> Result<Order, ExecutorError> {
        if quantity <= Decimal::ZERO || price <= Decimal::ZERO {
            return Err(ExecutorError::Rejected("quantity and price must be positive".into()));
        }
        Ok(self.record_fill(symbol, side, quantity, price))
    }

    async fn cancel_order(&self, _symbol: &str, order_id: &str) -> Result<(), ExecutorError> {
        let mut fills = self.fills.write();
        let before = fills.len();
        fills.retain(|o| o.id != order_id);
        if fills.len() == before {
            return Err(ExecutorError::NotFound(order_id.to_string()));
        }
        Ok(())
    }

    async fn get_account_info(&self) -> Result<AccountInfo, ExecutorError> {
        let realized: Decimal = self.fills.read().iter().map(|o| o.quantity * o.price.unwrap_or_default()).sum();
        Ok(AccountInfo {
            balances: vec![("USDT".to_string(), self.starting_balance - realized)],
        })
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn get_exchange_name(&self) -> &str {
        &self.exchange_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn market_order_fills_instantly() {
        let exec = DemoExecutor::new("mexc", dec!(10000));
        let order = exec.place_market_order("BTC_USDT", OrderSide::Buy, dec!(0.01)).await.unwrap();
        assert_eq!(exec.fill_count(), 1);
        assert_eq!(order.quantity, dec!(0.01));
    }

    #[tokio::test]
    async fn rejects_non_positive_quantity() {
        let exec = DemoExecutor::new("mexc", dec!(10000));
        let result = exec.place_market_order("BTC_USDT", OrderSide::Buy, Decimal::ZERO).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn cancel_removes_the_fill() {
        let exec = DemoExecutor::new("mexc", dec!(10000));
        let order = exec.place_limit_order("BTC_USDT", OrderSide::Buy, dec!(1), dec!(100)).await.unwrap();
        exec.cancel_order("BTC_USDT", &order.id).await.unwrap();
        assert_eq!(exec.fill_count(), 0);
    }

    #[tokio::test]
    async fn health_check_always_true() {
        let exec = DemoExecutor::new("mexc", dec!(10000));
        assert!(exec.health_check().await);
    }
}
