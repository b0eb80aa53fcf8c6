use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;

use crate::cache::TtlCache;
use crate::errors::{WalletError, WalletResult};
use crate::token::Token;

pub const DEFAULT_PRICE_TTL: Duration = Duration::from_secs(30);

/// USD spot prices keyed by token.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceTable {
    usd: HashMap<Token, f64>,
}

impl PriceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(mut self, token: Token, usd: f64) -> Self {
        self.insert(token, usd);
        self
    }

    pub fn insert(&mut self, token: Token, usd: f64) {
        self.usd.insert(token, usd);
    }

    /// Price in USD, only if it is a usable positive number.
    pub fn usd(&self, token: Token) -> Option<f64> {
        self.usd
            .get(&token)
            .copied()
            .filter(|price| price.is_finite() && *price > 0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.usd.is_empty()
    }

    /// Parse a `{ "<price id>": { "usd": N } }` body. Unknown ids are skipped.
    pub fn from_simple_price(body: &serde_json::Value) -> WalletResult<Self> {
        let entries = body.as_object().ok_or_else(|| {
            WalletError::InvalidResponse("Price response is not an object".to_string())
        })?;

        let mut table = PriceTable::new();
        for (id, quote) in entries {
            let Some(token) = Token::from_price_id(id) else {
                continue;
            };
            if let Some(usd) = quote.get("usd").and_then(|v| v.as_f64()) {
                table.insert(token, usd);
            }
        }
        Ok(table)
    }
}

#[async_trait]
pub trait PriceService: Send + Sync {
    async fn get_prices(&self, tokens: &[Token]) -> WalletResult<PriceTable>;
}

/// Price feed speaking the CoinGecko `simple/price` dialect.
pub struct HttpPriceClient {
    client: Client,
    base_url: String,
}

impl HttpPriceClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> WalletResult<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            WalletError::NetworkError(format!("Failed to create HTTP client: {}", e))
        })?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl PriceService for HttpPriceClient {
    async fn get_prices(&self, tokens: &[Token]) -> WalletResult<PriceTable> {
        let ids = tokens
            .iter()
            .map(Token::price_id)
            .collect::<Vec<_>>()
            .join(",");

        let response = self
            .client
            .get(format!("{}/simple/price", self.base_url))
            .query(&[("ids", ids.as_str()), ("vs_currencies", "usd")])
            .header("Accept", "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(WalletError::NetworkError(format!(
                "Price fetch failed: {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response.json().await?;
        PriceTable::from_simple_price(&body)
    }
}

/// Cached view over a [`PriceService`].
///
/// A fresh cached table is served without a request. When a refresh fails the
/// last table is served regardless of age.
pub struct PriceOracle {
    service: Arc<dyn PriceService>,
    cache: Mutex<TtlCache<PriceTable>>,
}

impl PriceOracle {
    pub fn new(service: Arc<dyn PriceService>, ttl: Duration) -> Self {
        Self {
            service,
            cache: Mutex::new(TtlCache::new(ttl)),
        }
    }

    pub async fn prices(&self) -> Option<PriceTable> {
        let cached = self.cache.lock().fresh().cloned();
        if cached.is_some() {
            return cached;
        }

        match self.service.get_prices(&Token::ALL).await {
            Ok(table) => {
                self.cache.lock().put(table.clone());
                Some(table)
            }
            Err(err) => {
                let stale = self.cache.lock().stale().cloned();
                if stale.is_some() {
                    log::warn!("Price refresh failed, serving stale prices: {}", err);
                } else {
                    log::warn!("Price refresh failed with no cached prices: {}", err);
                }
                stale
            }
        }
    }

    pub fn invalidate(&self) {
        self.cache.lock().invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct MockFeed {
        calls: AtomicUsize,
        fail: AtomicBool,
    }

    impl MockFeed {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl PriceService for MockFeed {
        async fn get_prices(&self, _tokens: &[Token]) -> WalletResult<PriceTable> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail.load(Ordering::SeqCst) {
                return Err(WalletError::NetworkError("rate limited".into()));
            }
            Ok(PriceTable::new().with_price(Token::Sol, 100.0 + call as f64))
        }
    }

    #[test]
    fn parses_simple_price_body() {
        let body = serde_json::json!({
            "solana": { "usd": 150.25 },
            "usd-coin": { "usd": 1.0 },
            "unknown-coin": { "usd": 3.0 },
            "zcash": {}
        });
        let table = PriceTable::from_simple_price(&body).unwrap();
        assert_eq!(table.usd(Token::Sol), Some(150.25));
        assert_eq!(table.usd(Token::Usdc), Some(1.0));
        assert_eq!(table.usd(Token::Zec), None);
        assert!(PriceTable::from_simple_price(&serde_json::json!([])).is_err());
    }

    #[test]
    fn non_positive_prices_are_unusable() {
        let table = PriceTable::new()
            .with_price(Token::Ore, 0.0)
            .with_price(Token::Store, f64::NAN);
        assert_eq!(table.usd(Token::Ore), None);
        assert_eq!(table.usd(Token::Store), None);
    }

    #[tokio::test]
    async fn fresh_cache_avoids_refetch() {
        let feed = MockFeed::new();
        let oracle = PriceOracle::new(feed.clone(), Duration::from_secs(30));

        let first = oracle.prices().await.unwrap();
        let second = oracle.prices().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(feed.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failure_serves_stale_table() {
        let feed = MockFeed::new();
        let oracle = PriceOracle::new(feed.clone(), Duration::ZERO);

        let first = oracle.prices().await.unwrap();
        feed.fail.store(true, Ordering::SeqCst);
        let fallback = oracle.prices().await.unwrap();
        assert_eq!(first, fallback);
        assert_eq!(feed.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failure_without_cache_is_none() {
        let feed = MockFeed::new();
        feed.fail.store(true, Ordering::SeqCst);
        let oracle = PriceOracle::new(feed, DEFAULT_PRICE_TTL);
        assert!(oracle.prices().await.is_none());
    }
}
