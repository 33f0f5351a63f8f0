//! Per-token price cache over the OpenRouter model catalog.
//!
//! The catalog is fetched lazily on first lookup and then served from memory
//! until the TTL expires. Lookups are infallible: when a refresh fails, a
//! stale table keeps being served, and with no table at all a conservative
//! default price applies. Concurrent lookups during a refresh are serialized
//! through a mutex so the catalog endpoint sees at most one in-flight fetch;
//! the losers of the race re-check freshness and reuse the winner's table.

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::{collections::HashMap, str::FromStr, sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

use crate::providers::TokenPrice;

/// Fallback per-token price (USD) when a model is absent from the catalog or
/// the catalog has never been fetched. 0.0000002 per token, both directions.
const DEFAULT_PRICE: Decimal = Decimal::from_parts(2, 0, 0, false, 7);

#[derive(Debug, Default)]
struct PricingTable {
    fetched_at: Option<DateTime<Utc>>,
    prices: HashMap<String, TokenPrice>,
}

impl PricingTable {
    fn is_fresh(&self, ttl: Duration) -> bool {
        match self.fetched_at {
            Some(at) => Utc::now()
                .signed_duration_since(at)
                .to_std()
                .map(|age| age < ttl)
                .unwrap_or(false),
            None => false,
        }
    }
}

/// Catalog response shape: a `data` array of models with string-typed prices
#[derive(Debug, Deserialize)]
struct CatalogResponse {
    #[serde(default)]
    data: Vec<CatalogModel>,
}

#[derive(Debug, Deserialize)]
struct CatalogModel {
    id: String,
    #[serde(default)]
    pricing: CatalogPricing,
}

#[derive(Debug, Default, Deserialize)]
struct CatalogPricing {
    #[serde(default)]
    prompt: String,
    #[serde(default)]
    completion: String,
}

/// Build the catalog URL next to a chat-completions API base
pub fn catalog_url(api_base: &Url) -> Result<Url, url::ParseError> {
    Url::parse(&format!("{}/models", api_base.as_str().trim_end_matches('/')))
}

/// TTL-based cache of per-token model prices
pub struct PricingCache {
    http: reqwest::Client,
    catalog_url: Url,
    ttl: Duration,
    table: ArcSwap<PricingTable>,
    refresh_lock: Mutex<()>,
}

impl PricingCache {
    pub fn new(http: reqwest::Client, catalog_url: Url, ttl: Duration) -> Self {
        Self {
            http,
            catalog_url,
            ttl,
            table: ArcSwap::from_pointee(PricingTable::default()),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Current price for `model`. Never fails: serves a fresh table, a stale
    /// table when refresh fails, or the default price when nothing has ever
    /// been fetched.
    pub async fn price_for(&self, model: &str) -> TokenPrice {
        let table = self.table.load();
        if table.is_fresh(self.ttl) {
            return self.lookup(&table, model);
        }
        drop(table);

        // Single refresher; everyone else waits and reuses the result
        let _guard = self.refresh_lock.lock().await;
        let table = self.table.load();
        if table.is_fresh(self.ttl) {
            return self.lookup(&table, model);
        }
        drop(table);

        match self.fetch_catalog().await {
            Ok(prices) => {
                debug!(models = prices.len(), "Refreshed pricing catalog");
                self.table.store(Arc::new(PricingTable {
                    fetched_at: Some(Utc::now()),
                    prices,
                }));
            }
            Err(e) => {
                warn!("Pricing catalog refresh failed, serving previous prices: {e}");
            }
        }

        self.lookup(&self.table.load(), model)
    }

    fn lookup(&self, table: &PricingTable, model: &str) -> TokenPrice {
        match table.prices.get(model) {
            Some(price) => *price,
            None => {
                debug!(model, "Model not in pricing catalog, using default price");
                TokenPrice {
                    prompt: DEFAULT_PRICE,
                    completion: DEFAULT_PRICE,
                }
            }
        }
    }

    async fn fetch_catalog(&self) -> anyhow::Result<HashMap<String, TokenPrice>> {
        let response = self.http.get(self.catalog_url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("catalog endpoint returned {status}");
        }
        let catalog: CatalogResponse = response.json().await?;

        let mut prices = HashMap::with_capacity(catalog.data.len());
        for model in catalog.data {
            // Catalog prices are strings; unparseable entries are skipped
            let prompt = Decimal::from_str(model.pricing.prompt.trim());
            let completion = Decimal::from_str(model.pricing.completion.trim());
            match (prompt, completion) {
                (Ok(prompt), Ok(completion)) => {
                    prices.insert(model.id, TokenPrice { prompt, completion });
                }
                _ => {
                    debug!(model = %model.id, "Skipping catalog entry with unparseable pricing");
                }
            }
        }
        Ok(prices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn catalog_body() -> serde_json::Value {
        serde_json::json!({
            "data": [
                {"id": "some/vision-model", "pricing": {"prompt": "0.0000002", "completion": "0.0000004"}},
                {"id": "other/model", "pricing": {"prompt": "0.000001", "completion": "0.000002"}},
                {"id": "broken/model", "pricing": {"prompt": "free", "completion": ""}}
            ]
        })
    }

    fn cache_for(server_uri: &str, ttl: Duration) -> PricingCache {
        PricingCache::new(
            reqwest::Client::new(),
            Url::parse(&format!("{server_uri}/api/v1/models")).unwrap(),
            ttl,
        )
    }

    #[tokio::test]
    async fn looks_up_catalog_prices_and_caches_them() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(catalog_body()))
            .expect(1)
            .mount(&server)
            .await;

        let cache = cache_for(&server.uri(), Duration::from_secs(3600));

        let price = cache.price_for("some/vision-model").await;
        assert_eq!(price.prompt, Decimal::from_str("0.0000002").unwrap());
        assert_eq!(price.completion, Decimal::from_str("0.0000004").unwrap());

        // Second lookup within the TTL must not re-fetch (expect(1) above)
        let again = cache.price_for("other/model").await;
        assert_eq!(again.prompt, Decimal::from_str("0.000001").unwrap());
    }

    #[tokio::test]
    async fn unknown_model_gets_default_price() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(catalog_body()))
            .mount(&server)
            .await;

        let cache = cache_for(&server.uri(), Duration::from_secs(3600));
        let price = cache.price_for("not/in-catalog").await;
        assert_eq!(price.prompt, Decimal::from_str("0.0000002").unwrap());
        assert_eq!(price.completion, Decimal::from_str("0.0000002").unwrap());
    }

    #[tokio::test]
    async fn unparseable_catalog_entries_fall_back_to_default() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(catalog_body()))
            .mount(&server)
            .await;

        let cache = cache_for(&server.uri(), Duration::from_secs(3600));
        let price = cache.price_for("broken/model").await;
        assert_eq!(price.prompt, DEFAULT_PRICE);
    }

    #[tokio::test]
    async fn fetch_failure_with_no_table_serves_default() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let cache = cache_for(&server.uri(), Duration::from_secs(3600));
        let price = cache.price_for("some/vision-model").await;
        assert_eq!(price.prompt, DEFAULT_PRICE);
        assert_eq!(price.completion, DEFAULT_PRICE);
    }

    #[tokio::test]
    async fn expired_table_is_served_stale_when_refresh_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(catalog_body()))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        // Zero TTL: every lookup attempts a refresh
        let cache = cache_for(&server.uri(), Duration::ZERO);

        let first = cache.price_for("some/vision-model").await;
        assert_eq!(first.prompt, Decimal::from_str("0.0000002").unwrap());

        // Refresh now fails; the stale table still answers
        let second = cache.price_for("some/vision-model").await;
        assert_eq!(second.prompt, Decimal::from_str("0.0000002").unwrap());
        assert_eq!(second.completion, Decimal::from_str("0.0000004").unwrap());
    }
}
