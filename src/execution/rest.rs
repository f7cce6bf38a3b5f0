// =============================================================================
// REST order executor — thin, unsigned skeleton over the generic port
// =============================================================================
//
// Grounded on the host's `binance/client.rs` (reqwest client builder, 10 s
// timeout, `#[instrument]`-style tracing), narrowed to exactly the four
// order-affecting calls `IOrderExecutor` needs. Request signing is
// deliberately out of scope: the non-goal in spec §1 excludes
// "exchange-specific order-placement REST calls beyond the narrow interface
// needed by the executor port", so this client carries an `auth_header`
// supplied by the caller rather than an HMAC signer — no exchange-specific
// credential handling lives in the core.
// =============================================================================

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{instrument, warn};

use crate::domain::trading::{Order, OrderSide};

use super::{AccountInfo, ExecutorError, IOrderExecutor};

pub struct RestOrderExecutor {
    exchange_name: String,
    base_url: String,
    http: reqwest::Client,
}

impl RestOrderExecutor {
    pub fn new<S: Into<String>, U: Into<String>>(exchange_name: S, base_url: U, auth_header: Option<&str>) -> Self {
        let mut headers = HeaderMap::new();
        if let Some(auth) = auth_header {
            if let Ok(value) = HeaderValue::from_str(auth) {
                headers.insert(AUTHORIZATION, value);
            }
        }
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build REST order executor HTTP client");

        Self { exchange_name: exchange_name.into(), base_url: base_url.into(), http }
    }
}

impl RestOrderExecutor {
    async fn post_order(&self, symbol: &str, side: OrderSide, quantity: Decimal, price: Option<Decimal>) -> Result<Order, ExecutorError> {
        let url = format!("{}/api/v1/order", self.base_url);
        let body = json!({
            "symbol": symbol,
            "side": side.to_string(),
            "quantity": quantity,
            "price": price,
            "type": if price.is_some() { "LIMIT" } else { "MARKET" },
        });

        let response = self.http.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ExecutorError::Rejected(format!("{status}: {text}")));
        }

        let parsed: serde_json::Value = response.json().await?;
        Ok(Order {
            id: parsed.get("orderId").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            symbol: symbol.to_string(),
            side,
            quantity,
            price,
            average_fill_price: parsed
                .get("avgPrice")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse().ok()),
        })
    }
}

#[async_trait]
impl IOrderExecutor for RestOrderExecutor {
    #[instrument(skip(self))]
    async fn place_market_order(&self, symbol: &str, side: OrderSide, quantity: Decimal) -> Result<Order, ExecutorError> {
        self.post_order(symbol, side, quantity, None).await
    }

    #[instrument(skip(self))]
    async fn place_limit_order(&self, symbol: &str, side: OrderSide, quantity: Decimal, price: Decimal) -> Result<Order, ExecutorError> {
        self.post_order(symbol, side, quantity, Some(price)).await
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), ExecutorError> {
        let url = format!("{}/api/v1/order", self.base_url);
        let response = self
            .http
            .delete(&url)
            .query(&[("symbol", symbol), ("orderId", order_id)])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ExecutorError::NotFound(order_id.to_string()));
        }
        Ok(())
    }

    async fn get_account_info(&self) -> Result<AccountInfo, ExecutorError> {
        let url = format!("{}/api/v1/account", self.base_url);
        let response = self.http.get(&url).send().await?;
        let parsed: serde_json::Value = response.json().await?;
        let balances = parsed
            .get("balances")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|b| {
                        let asset = b.get("asset")?.as_str()?.to_string();
                        let free: Decimal = b.get("free")?.as_str()?.parse().ok()?;
                        Some((asset, free))
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(AccountInfo { balances })
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/api/v1/ping", self.base_url);
        match self.http.get(&url).send().await {
            Ok(r) => r.status().is_success(),
            Err(e) => {
                warn!(error = %e, "REST executor health check failed");
                false
            }
        }
    }

    fn get_exchange_name(&self) -> &str {
        &self.exchange_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_does_not_panic() {
        let exec = RestOrderExecutor::new("mexc", "https://contract.mexc.com", Some("Bearer test"));
        assert_eq!(exec.get_exchange_name(), "mexc");
    }
}
