//! Finnhub market data client with TTL snapshot cache and bounded concurrency.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

use comps_core::{
    ComputedValue, MarketError, MarketSnapshot, MarketValue, Settings, SourceValue,
};

const BASE_URL: &str = "https://finnhub.io/api/v1";

/// Response from the `quote` endpoint. `c` is kept as raw JSON so that
/// malformed vendor payloads degrade to a warning instead of a decode error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuoteResponse {
    #[serde(default)]
    pub c: Option<serde_json::Value>,
    #[serde(default)]
    pub t: Option<i64>,
}

/// Response from the `profile2` endpoint. Share count and market cap are
/// reported in millions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyProfile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub share_outstanding: Option<f64>,
    #[serde(default)]
    pub market_capitalization: Option<f64>,
}

/// Raw access to the two vendor endpoints the snapshot needs.
#[async_trait]
pub trait VendorTransport: Send + Sync {
    async fn quote(&self, symbol: &str) -> Result<QuoteResponse, MarketError>;
    async fn profile(&self, symbol: &str) -> Result<CompanyProfile, MarketError>;
}

/// Reqwest-backed Finnhub transport.
pub struct FinnhubTransport {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl FinnhubTransport {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: BASE_URL.to_string(),
        }
    }

    fn url(&self, endpoint: &str, symbol: &str) -> String {
        format!(
            "{}/{endpoint}?symbol={symbol}&token={}",
            self.base_url, self.api_key
        )
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, MarketError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| MarketError::Request(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(MarketError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MarketError::Api {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| MarketError::Decode(e.to_string()))
    }
}

#[async_trait]
impl VendorTransport for FinnhubTransport {
    async fn quote(&self, symbol: &str) -> Result<QuoteResponse, MarketError> {
        self.get(&self.url("quote", symbol)).await
    }

    async fn profile(&self, symbol: &str) -> Result<CompanyProfile, MarketError> {
        self.get(&self.url("stock/profile2", symbol)).await
    }
}

struct CacheEntry {
    snapshot: MarketSnapshot,
    cached_at: DateTime<Utc>,
}

/// Market data client: assembles `MarketSnapshot`s from the vendor with a
/// per-symbol TTL cache and a semaphore bounding in-flight vendor calls.
pub struct MarketClient {
    transport: Arc<dyn VendorTransport>,
    cache: DashMap<String, CacheEntry>,
    ttl_seconds: i64,
    permits: Arc<Semaphore>,
    store_raw: bool,
}

impl MarketClient {
    pub fn new(transport: Arc<dyn VendorTransport>, ttl_seconds: i64, concurrency: usize) -> Self {
        Self {
            transport,
            cache: DashMap::new(),
            ttl_seconds,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            store_raw: false,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let mut client = Self::new(
            Arc::new(FinnhubTransport::new(settings.finnhub_api_key.clone())),
            settings.market_ttl_seconds,
            settings.market_concurrency,
        );
        client.store_raw = settings.store_raw_market_payload;
        client
    }

    pub fn with_raw_payloads(mut self, store_raw: bool) -> Self {
        self.store_raw = store_raw;
        self
    }

    async fn limited<T>(
        &self,
        fut: impl Future<Output = Result<T, MarketError>>,
    ) -> Result<T, MarketError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| MarketError::Closed)?;
        fut.await
    }

    /// Fetch current price, shares outstanding, and market cap for a ticker.
    ///
    /// Within the TTL, repeated calls for the same symbol return the cached
    /// snapshot without touching the vendor, so all three market fields stay
    /// consistent with one `fetched_at`.
    pub async fn fetch_snapshot(&self, symbol: &str) -> Result<MarketSnapshot, MarketError> {
        let key = symbol.to_uppercase();

        if let Some(entry) = self.cache.get(&key) {
            let age = (Utc::now() - entry.cached_at).num_seconds();
            if age < self.ttl_seconds {
                tracing::debug!(symbol = %key, age, "market snapshot cache hit");
                return Ok(entry.snapshot.clone());
            }
        }

        let now = Utc::now();
        let (quote, profile) = tokio::join!(
            self.limited(self.transport.quote(&key)),
            self.limited(self.transport.profile(&key)),
        );
        let quote = quote?;
        let profile = profile?;

        let snapshot = self.build_snapshot(&key, now, quote, profile);

        self.cache.insert(
            key,
            CacheEntry {
                snapshot: snapshot.clone(),
                cached_at: now,
            },
        );

        Ok(snapshot)
    }

    fn build_snapshot(
        &self,
        symbol: &str,
        now: DateTime<Utc>,
        quote: QuoteResponse,
        profile: CompanyProfile,
    ) -> MarketSnapshot {
        let (price_value, price_warnings) = parse_quote_price(quote.c.as_ref());

        let price = Arc::new(MarketValue {
            metric: "price".to_string(),
            value: price_value,
            unit: "USD".to_string(),
            vendor: "finnhub".to_string(),
            symbol: symbol.to_string(),
            endpoint: "quote".to_string(),
            as_of: quote
                .t
                .filter(|&t| t > 0)
                .and_then(|t| Utc.timestamp_opt(t, 0).single()),
            fetched_at: now,
            raw: self
                .store_raw
                .then(|| serde_json::to_value(&quote).ok())
                .flatten(),
            warnings: price_warnings,
            notes: vec![],
        });

        let mut shares_warnings = Vec::new();
        let mut shares_notes = Vec::new();
        let shares_value = match profile.share_outstanding {
            Some(raw) if raw.is_finite() && raw > 0.0 => {
                shares_notes.push(format!(
                    "raw value {raw}M from profile endpoint, multiplied by 1e6"
                ));
                Some(raw * 1_000_000.0)
            }
            Some(raw) => {
                shares_warnings.push(format!(
                    "non-positive shares outstanding from profile ({raw}); treated as missing"
                ));
                None
            }
            None => {
                shares_warnings
                    .push("shares outstanding not reported by profile endpoint".to_string());
                None
            }
        };

        let shares = Arc::new(MarketValue {
            metric: "shares_outstanding".to_string(),
            value: shares_value,
            unit: "shares".to_string(),
            vendor: "finnhub".to_string(),
            symbol: symbol.to_string(),
            endpoint: "profile".to_string(),
            as_of: None,
            fetched_at: now,
            raw: self
                .store_raw
                .then(|| serde_json::to_value(&profile).ok())
                .flatten(),
            warnings: shares_warnings,
            notes: shares_notes,
        });

        // Prefer the vendor-reported capitalization. For ADRs the profile
        // share count covers underlying ordinary shares while the quote is
        // per-ADR, so price * shares can be off by the depositary ratio.
        let vendor_mcap = profile
            .market_capitalization
            .filter(|m| m.is_finite() && *m > 0.0);

        let market_cap = match vendor_mcap {
            Some(millions) => SourceValue::Market(Arc::new(MarketValue {
                metric: "market_cap".to_string(),
                value: Some(millions * 1_000_000.0),
                unit: "USD".to_string(),
                vendor: "finnhub".to_string(),
                symbol: symbol.to_string(),
                endpoint: "profile".to_string(),
                as_of: None,
                fetched_at: now,
                raw: None,
                notes: vec![format!(
                    "vendor-reported marketCapitalization={millions}M from profile endpoint"
                )],
                warnings: vec![],
            })),
            None => {
                let value = match (price.value, shares.value) {
                    (Some(p), Some(s)) => Some(p * s),
                    _ => None,
                };
                SourceValue::Computed(ComputedValue::assemble(
                    "market_cap",
                    value,
                    "USD",
                    "price * shares_outstanding",
                    vec![
                        ("price".to_string(), SourceValue::Market(price.clone())),
                        (
                            "shares_outstanding".to_string(),
                            SourceValue::Market(shares.clone()),
                        ),
                    ],
                    vec![],
                ))
            }
        };

        if price.value.is_none() {
            tracing::warn!(symbol, "quote price failed sanitation");
        }

        MarketSnapshot {
            symbol: symbol.to_string(),
            company_name: profile.name,
            price,
            shares_outstanding: shares,
            market_cap,
            fetched_at: now,
        }
    }
}

/// Sanitize the quote price: only a finite, strictly positive number is
/// usable. Everything else becomes a null value with a warning.
fn parse_quote_price(raw: Option<&serde_json::Value>) -> (Option<f64>, Vec<String>) {
    let invalid = || (None, vec!["invalid quote price".to_string()]);

    let parsed = match raw {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.parse::<f64>().ok(),
        _ => None,
    };

    match parsed {
        Some(p) if p.is_finite() && p > 0.0 => (Some(p), vec![]),
        _ => invalid(),
    }
}
