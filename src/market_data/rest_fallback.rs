// =============================================================================
// REST fallback — orderbook snapshot retrieval when the WebSocket refresh fails
// =============================================================================
//
// A narrow `reqwest` client dedicated to depth-snapshot refresh, with its
// own 5 s timeout, rate limiter (≥100 ms between requests), and circuit
// breaker — entirely separate from the WebSocket pool's, per §6.2.
// Grounded on the host's `binance/client.rs` REST-call pattern.
// =============================================================================

use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::circuit_breaker::CircuitBreaker;
use crate::domain::market::OrderBookLevel;
use crate::rate_limiter::TokenBucket;

#[derive(Debug, thiserror::Error)]
pub enum RestFallbackError {
    #[error("circuit breaker open")]
    CircuitOpen,
    #[error("rate limit timeout")]
    RateLimitTimeout,
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("exchange returned failure: {0}")]
    ExchangeError(String),
}

#[derive(Debug, Deserialize)]
struct DepthResponse {
    success: bool,
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    data: Option<DepthData>,
}

#[derive(Debug, Deserialize)]
struct DepthData {
    #[serde(default)]
    bids: Vec<Vec<Decimal>>,
    #[serde(default)]
    asks: Vec<Vec<Decimal>>,
}

pub struct RestFallbackClient {
    base_url: String,
    http: reqwest::Client,
    rate_limiter: TokenBucket,
    circuit_breaker: CircuitBreaker,
    min_interval: Duration,
}

impl RestFallbackClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("failed to build REST fallback HTTP client");
        Self {
            base_url: base_url.into(),
            http,
            // 1 request burst, refilled at ~10/s so the >=100ms spacing holds.
            rate_limiter: TokenBucket::new(1, 10),
            circuit_breaker: CircuitBreaker::with_defaults("rest_fallback"),
            min_interval: Duration::from_millis(100),
        }
    }

    /// Fetch a fresh depth snapshot for `symbol`, used exclusively to
    /// refresh orderbook state that has drifted from its WebSocket deltas.
    pub async fn fetch_depth_snapshot(
        &self,
        symbol: &str,
    ) -> Result<(Vec<OrderBookLevel>, Vec<OrderBookLevel>), RestFallbackError> {
        self.circuit_breaker.check().map_err(|_| RestFallbackError::CircuitOpen)?;

        if !self.rate_limiter.acquire(1, self.min_interval * 10).await {
            return Err(RestFallbackError::RateLimitTimeout);
        }

        let url = format!("{}/api/v1/contract/depth/{symbol}", self.base_url);
        let result = self.http.get(&url).send().await;

        let response = match result {
            Ok(r) => r,
            Err(e) => {
                self.circuit_breaker.record_failure();
                return Err(e.into());
            }
        };

        let parsed: DepthResponse = match response.json().await {
            Ok(p) => p,
            Err(e) => {
                self.circuit_breaker.record_failure();
                return Err(e.into());
            }
        };

        if !parsed.success {
            self.circuit_breaker.record_failure();
            return Err(RestFallbackError::ExchangeError(format!("code={:?}", parsed.code)));
        }

        self.circuit_breaker.record_success();
        let data = parsed.data.unwrap_or(DepthData { bids: vec![], asks: vec![] });
        let to_levels = |raw: Vec<Vec<Decimal>>| -> Vec<OrderBookLevel> {
            raw.into_iter()
                .filter(|l| l.len() >= 2)
                .map(|l| OrderBookLevel { price: l[0], quantity: l[1] })
                .collect()
        };
        Ok((to_levels(data.bids), to_levels(data.asks)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_construction_does_not_panic() {
        let _client = RestFallbackClient::new("https://contract.mexc.com");
    }
}
