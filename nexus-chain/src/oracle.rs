use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use nexus_common::{Chain, NexusError, Result};

const PRICE_TTL: Duration = Duration::from_secs(60);
const ORACLE_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// USD price of the chain's native token.
    async fn price_usd(&self, chain: Chain) -> Result<f64>;
}

/// HTTP oracle with a short TTL cache. A stale cached price backs up a
/// failing upstream before the error surfaces.
pub struct HttpPriceOracle {
    base_url: String,
    api_key: Option<String>,
    http: reqwest::Client,
    cache: Mutex<HashMap<Chain, (f64, Instant)>>,
}

impl HttpPriceOracle {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self { base_url, api_key, http: reqwest::Client::new(), cache: Mutex::new(HashMap::new()) }
    }

    fn symbol(chain: Chain) -> &'static str {
        match chain {
            Chain::Ethereum | Chain::Arbitrum => "ETH",
            Chain::Solana => "SOL",
        }
    }

    async fn fetch(&self, chain: Chain) -> Result<f64> {
        let url = format!("{}/v1/prices/{}", self.base_url, Self::symbol(chain));
        let mut request = self.http.get(&url).timeout(ORACLE_TIMEOUT);
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| NexusError::Upstream(format!("price oracle: {}", e)))?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| NexusError::Upstream(format!("price oracle decode: {}", e)))?;
        body["usd"]
            .as_f64()
            .ok_or_else(|| NexusError::Upstream("price oracle returned no usd field".into()))
    }
}

#[async_trait]
impl PriceOracle for HttpPriceOracle {
    async fn price_usd(&self, chain: Chain) -> Result<f64> {
        {
            let cache = self.cache.lock().await;
            if let Some((price, at)) = cache.get(&chain) {
                if at.elapsed() < PRICE_TTL {
                    return Ok(*price);
                }
            }
        }

        match self.fetch(chain).await {
            Ok(price) => {
                self.cache.lock().await.insert(chain, (price, Instant::now()));
                Ok(price)
            }
            Err(e) => {
                // serve stale over nothing
                if let Some((price, _)) = self.cache.lock().await.get(&chain) {
                    tracing::warn!(target: "oracle", "serving stale {} price: {}", chain, e);
                    return Ok(*price);
                }
                Err(e)
            }
        }
    }
}

/// Fixed prices for tests and local dev.
pub struct StaticPriceOracle {
    prices: HashMap<Chain, f64>,
}

impl StaticPriceOracle {
    pub fn new(eth_usd: f64, sol_usd: f64) -> Self {
        let mut prices = HashMap::new();
        prices.insert(Chain::Ethereum, eth_usd);
        prices.insert(Chain::Arbitrum, eth_usd);
        prices.insert(Chain::Solana, sol_usd);
        Self { prices }
    }
}

impl Default for StaticPriceOracle {
    fn default() -> Self {
        Self::new(2_500.0, 150.0)
    }
}

#[async_trait]
impl PriceOracle for StaticPriceOracle {
    async fn price_usd(&self, chain: Chain) -> Result<f64> {
        self.prices
            .get(&chain)
            .copied()
            .ok_or_else(|| NexusError::Upstream(format!("no price for {}", chain)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_oracle_serves_all_chains() {
        let oracle = StaticPriceOracle::default();
        assert_eq!(oracle.price_usd(Chain::Ethereum).await.unwrap(), 2_500.0);
        assert_eq!(oracle.price_usd(Chain::Arbitrum).await.unwrap(), 2_500.0);
        assert_eq!(oracle.price_usd(Chain::Solana).await.unwrap(), 150.0);
    }
}
