// src/service.rs
use crate::cache::{cache_key, CacheService, DataCategory};
use crate::error::ApiError;
use crate::models::{Exchange, HistoricalFilter, Period};
use crate::normalize::{as_list, is_empty_payload, movers, unwrap_payload, MoverSide};
use crate::upstream::StockApiClient;
use futures::future::join_all;
use log::{debug, error, info};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};

const MIN_SEARCH_LEN: usize = 2;
const MAX_SYMBOL_LEN: usize = 64;

/// Stock-market operations behind the REST surface. Every upstream call goes
/// through [`StockService::fetch_with_cache`].
pub struct StockService {
    client: StockApiClient,
    cache: Arc<CacheService>,
    watchlist: Vec<String>,
    inflight: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl StockService {
    pub fn new(client: StockApiClient, cache: Arc<CacheService>, watchlist: Vec<String>) -> Self {
        StockService {
            client,
            cache,
            watchlist,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache(&self) -> &CacheService {
        &self.cache
    }

    /// Cache-aside fetch. Concurrent misses on one key share a single
    /// upstream call: the first caller fetches while the rest wait on the
    /// key's gate and then read what it stored.
    pub async fn fetch_with_cache(
        &self,
        category: DataCategory,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<Value, ApiError> {
        let key = cache_key(endpoint, params);
        if let Some(hit) = self.cache.read_through(&key).await {
            debug!("Cache hit for {}", key);
            return Ok(hit);
        }

        // Declared before the permit so the permit is released first, also
        // when this future is dropped mid-fetch.
        let gate = self.gate_for(&key);
        let _permit = gate.lock().await;
        match self.cache.peek(&key) {
            Some(hit) => {
                debug!("Cache filled while waiting for {}", key);
                Ok(hit)
            }
            None => self.fetch_and_store(category, endpoint, params, &key).await,
        }
    }

    async fn fetch_and_store(
        &self,
        category: DataCategory,
        endpoint: &str,
        params: &[(&str, &str)],
        key: &str,
    ) -> Result<Value, ApiError> {
        info!("Cache miss for {}. Fetching from provider.", key);
        let value = self.client.get_json(endpoint, params).await?;
        self.cache
            .write_through(key, value.clone(), category.default_ttl())
            .await;
        Ok(value)
    }

    fn gate_for<'a>(&'a self, key: &'a str) -> InflightGate<'a> {
        let gate = self
            .inflight
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        InflightGate {
            inflight: &self.inflight,
            key,
            gate,
        }
    }

    /// Quotes for the configured watchlist. Failed symbols are logged and
    /// skipped; the call only fails when every symbol does.
    pub async fn list_stocks(&self) -> Result<Value, ApiError> {
        let results = join_all(self.watchlist.iter().map(|symbol| self.stock(symbol))).await;

        let mut quotes = Vec::with_capacity(results.len());
        let mut first_error = None;
        for (symbol, result) in self.watchlist.iter().zip(results) {
            match result {
                Ok(quote) => quotes.push(quote),
                Err(e) => {
                    error!("Failed to fetch watchlist symbol {}: {}", symbol, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) if quotes.is_empty() => Err(e),
            _ => Ok(Value::Array(quotes)),
        }
    }

    pub async fn stock(&self, symbol: &str) -> Result<Value, ApiError> {
        let symbol = validate_symbol(symbol)?;
        let value = self
            .fetch_with_cache(DataCategory::StockData, "/stock", &[("name", symbol.as_str())])
            .await?;

        let payload = unwrap_payload(value);
        if is_empty_payload(&payload) {
            return Err(ApiError::NotFound(format!("Stock {} not found", symbol)));
        }
        Ok(payload)
    }

    pub async fn historical(
        &self,
        symbol: &str,
        period: Period,
        filter: HistoricalFilter,
    ) -> Result<Value, ApiError> {
        let symbol = validate_symbol(symbol)?;
        let value = self
            .fetch_with_cache(
                DataCategory::HistoricalData,
                "/historical_data",
                &[
                    ("stock_name", symbol.as_str()),
                    ("period", period.as_str()),
                    ("filter", filter.as_str()),
                ],
            )
            .await?;
        Ok(unwrap_payload(value))
    }

    /// Queries shorter than two characters return an empty list without
    /// touching the cache or the upstream.
    pub async fn search(&self, query: &str) -> Result<Value, ApiError> {
        let query = query.trim();
        if query.chars().count() < MIN_SEARCH_LEN {
            return Ok(Value::Array(Vec::new()));
        }
        let value = self
            .fetch_with_cache(
                DataCategory::StockData,
                "/industry_search",
                &[("query", query)],
            )
            .await?;
        Ok(as_list(unwrap_payload(value), &["results", "stocks", "data"]))
    }

    pub async fn top_gainers(&self) -> Result<Value, ApiError> {
        let trending = self.trending().await?;
        Ok(movers(&trending, MoverSide::Gainers))
    }

    pub async fn top_losers(&self) -> Result<Value, ApiError> {
        let trending = self.trending().await?;
        Ok(movers(&trending, MoverSide::Losers))
    }

    async fn trending(&self) -> Result<Value, ApiError> {
        self.fetch_with_cache(DataCategory::MarketData, "/trending", &[])
            .await
    }

    pub async fn market_indices(&self) -> Result<Value, ApiError> {
        self.market("/indices").await
    }

    pub async fn week_52(&self) -> Result<Value, ApiError> {
        self.market("/fetch_52_week_high_low_data").await
    }

    pub async fn most_active(&self, exchange: Exchange) -> Result<Value, ApiError> {
        self.market(exchange.most_active_endpoint()).await
    }

    pub async fn price_shockers(&self) -> Result<Value, ApiError> {
        self.market("/price_shockers").await
    }

    async fn market(&self, endpoint: &str) -> Result<Value, ApiError> {
        let value = self
            .fetch_with_cache(DataCategory::MarketData, endpoint, &[])
            .await?;
        Ok(unwrap_payload(value))
    }

    pub async fn ipo(&self) -> Result<Value, ApiError> {
        let value = self
            .fetch_with_cache(DataCategory::Ipo, "/ipo", &[])
            .await?;
        Ok(unwrap_payload(value))
    }

    pub async fn news(&self) -> Result<Value, ApiError> {
        let value = self
            .fetch_with_cache(DataCategory::News, "/news", &[])
            .await?;
        Ok(as_list(unwrap_payload(value), &["news", "articles"]))
    }

    /// Prefetches what the dashboard's landing page asks for first.
    pub async fn warm_up(&self) -> Result<(), ApiError> {
        self.trending().await?;
        let quotes = self.list_stocks().await?;
        info!(
            "Cache warmed: trending plus {} watchlist quotes.",
            quotes.as_array().map_or(0, Vec::len)
        );
        Ok(())
    }
}

/// Handle on a key's miss gate. Dropping the last handle removes the gate
/// from the in-flight map.
struct InflightGate<'a> {
    inflight: &'a Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    key: &'a str,
    gate: Arc<AsyncMutex<()>>,
}

impl InflightGate<'_> {
    async fn lock(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().await
    }
}

impl Drop for InflightGate<'_> {
    fn drop(&mut self) {
        let mut inflight = self.inflight.lock();
        // The map and this handle are the only holders, so nobody is waiting.
        let last = inflight.get(self.key).map_or(false, |gate| {
            Arc::ptr_eq(gate, &self.gate) && Arc::strong_count(gate) == 2
        });
        if last {
            inflight.remove(self.key);
        }
    }
}

/// Trims and uppercases a ticker so `tcs` and `TCS` share one cache entry.
fn validate_symbol(raw: &str) -> Result<String, ApiError> {
    let symbol = raw.trim();
    if symbol.is_empty() {
        return Err(ApiError::Validation("Stock symbol is required".to_string()));
    }
    if symbol.len() > MAX_SYMBOL_LEN {
        return Err(ApiError::Validation(format!(
            "Stock symbol must be at most {} characters",
            MAX_SYMBOL_LEN
        )));
    }
    if !symbol
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '&' | '.' | '-' | ' '))
    {
        return Err(ApiError::Validation(format!(
            "Invalid stock symbol '{}'",
            symbol
        )));
    }
    Ok(symbol.to_ascii_uppercase())
}
