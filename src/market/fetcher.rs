use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::retry::retry_transient;
use super::{DatasetSpec, FetchError, FetchResult, MarketFetch, MarketSnapshot, PaceGate, Provider};
use crate::config::MarketConfig;

/// How many entries each ranking (gainers, losers, most active) keeps.
const TOP_N: usize = 5;

/// 24h ticker statistics reduced from the exchange tickers feed.
#[derive(Debug, Clone, Serialize)]
struct TickerStats {
    symbol: String,
    last_price: f64,
    price_change_percent: f64,
    high_24h: f64,
    low_24h: f64,
    volume_24h: f64,
    turnover_24h: f64,
}

/// Rate-limited client for the external market data providers.
pub struct MarketFetcher {
    client: reqwest::Client,
    bybit_base_url: String,
    coingecko_base_url: String,
    timeout_seconds: u64,
    max_retries: usize,
    gates: HashMap<Provider, Arc<PaceGate>>,
}

impl MarketFetcher {
    pub fn new(config: &MarketConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_seconds))
            .user_agent(concat!("marketmind/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        let spacing = Duration::from_millis(config.provider_min_spacing_ms);
        let mut gates = HashMap::new();
        for provider in [Provider::Bybit, Provider::Coingecko] {
            gates.insert(provider, Arc::new(PaceGate::new(spacing)));
        }

        Ok(Self {
            client,
            bybit_base_url: config.bybit_base_url.clone(),
            coingecko_base_url: config.coingecko_base_url.clone(),
            timeout_seconds: config.fetch_timeout_seconds,
            max_retries: config.fetch_max_retries,
            gates,
        })
    }

    fn request_error(&self, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout {
                timeout_seconds: self.timeout_seconds,
            }
        } else {
            FetchError::Network(e)
        }
    }

    async fn fetch_once(&self, spec: &DatasetSpec) -> FetchResult<MarketSnapshot> {
        if let Some(gate) = self.gates.get(&spec.provider) {
            gate.acquire().await;
        }

        let payload = match spec.provider {
            Provider::Bybit => self.fetch_bybit_overview().await?,
            Provider::Coingecko => self.fetch_coingecko_fully_diluted().await?,
        };

        Ok(MarketSnapshot {
            dataset: spec.id.clone(),
            payload,
            source: spec.provider.as_str().to_string(),
            fetched_at: Utc::now(),
        })
    }

    async fn fetch_bybit_overview(&self) -> FetchResult<Value> {
        let url = format!("{}/v5/market/tickers?category=linear", self.bybit_base_url);
        debug!("Bybit request: GET {}", url);

        let response = self.client.get(&url).send().await.map_err(|e| self.request_error(e))?;
        let status = response.status();

        if status.as_u16() == 429 {
            return Err(FetchError::RateLimited {
                retry_after: retry_after_seconds(&response),
            });
        }
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(FetchError::api_error(status.as_u16(), message));
        }

        let body: Value = response.json().await.map_err(|e| self.request_error(e))?;

        let ret_code = body["retCode"].as_i64().unwrap_or(-1);
        if ret_code != 0 {
            let message = body["retMsg"].as_str().unwrap_or("unknown API error").to_string();
            if message.to_lowercase().contains("rate limit") {
                return Err(FetchError::RateLimited { retry_after: None });
            }
            return Err(FetchError::api_error(status.as_u16(), message));
        }

        let list = body["result"]["list"]
            .as_array()
            .ok_or_else(|| FetchError::parse_error("missing result.list in tickers response"))?;

        let payload = reduce_tickers(list)?;
        info!(pairs = list.len(), "Reduced Bybit tickers into market overview");
        Ok(payload)
    }

    async fn fetch_coingecko_fully_diluted(&self) -> FetchResult<Value> {
        let url = format!(
            "{}/api/v3/coins/markets?vs_currency=usd&order=market_cap_desc&per_page=250&page=1&sparkline=false&price_change_percentage=24h",
            self.coingecko_base_url
        );
        debug!("CoinGecko request: GET {}", url);

        let response = self.client.get(&url).send().await.map_err(|e| self.request_error(e))?;
        let status = response.status();

        if status.as_u16() == 429 {
            return Err(FetchError::RateLimited {
                retry_after: retry_after_seconds(&response),
            });
        }
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(FetchError::api_error(status.as_u16(), message));
        }

        let coins: Value = response.json().await.map_err(|e| self.request_error(e))?;
        let coins = coins
            .as_array()
            .ok_or_else(|| FetchError::parse_error("expected a JSON array of coins"))?;

        let payload = reduce_coins(coins);
        info!(coins = coins.len(), "Reduced CoinGecko markets into fully-diluted payload");
        Ok(payload)
    }
}

#[async_trait]
impl MarketFetch for MarketFetcher {
    async fn fetch(&self, spec: &DatasetSpec) -> FetchResult<MarketSnapshot> {
        retry_transient(|| self.fetch_once(spec), self.max_retries).await
    }
}

fn retry_after_seconds(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

/// Bybit returns numeric fields as strings; accept either form.
fn field_f64(row: &Value, key: &str) -> Option<f64> {
    let v = &row[key];
    v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}

/// Reduces raw exchange tickers to the market overview payload: top gainers,
/// top losers, and most active pairs over the last 24 hours. Rows that do
/// not parse are skipped rather than failing the whole snapshot.
fn reduce_tickers(list: &[Value]) -> FetchResult<Value> {
    let mut stats: Vec<TickerStats> = list
        .iter()
        .filter_map(|row| {
            Some(TickerStats {
                symbol: row["symbol"].as_str()?.to_string(),
                last_price: field_f64(row, "lastPrice")?,
                price_change_percent: field_f64(row, "price24hPcnt")? * 100.0,
                high_24h: field_f64(row, "highPrice24h")?,
                low_24h: field_f64(row, "lowPrice24h")?,
                volume_24h: field_f64(row, "volume24h")?,
                turnover_24h: field_f64(row, "turnover24h")?,
            })
        })
        .collect();

    if stats.is_empty() {
        return Err(FetchError::parse_error("no parsable ticker rows"));
    }

    stats.sort_by(|a, b| {
        b.price_change_percent
            .partial_cmp(&a.price_change_percent)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let top_gainers: Vec<&TickerStats> = stats.iter().take(TOP_N).collect();
    let top_losers: Vec<&TickerStats> = stats.iter().rev().take(TOP_N).collect();

    let mut by_turnover: Vec<&TickerStats> = stats.iter().collect();
    by_turnover.sort_by(|a, b| {
        b.turnover_24h
            .partial_cmp(&a.turnover_24h)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let most_active: Vec<&TickerStats> = by_turnover.into_iter().take(TOP_N).collect();

    Ok(json!({
        "top_gainers": top_gainers,
        "top_losers": top_losers,
        "most_active": most_active,
    }))
}

/// Reduces CoinGecko market rows to coins with a known fully-diluted
/// percentage. Coins without supply figures are skipped.
fn reduce_coins(coins: &[Value]) -> Value {
    let rows: Vec<Value> = coins
        .iter()
        .filter_map(|coin| {
            let circulating = coin["circulating_supply"].as_f64()?;
            let max_supply = coin["max_supply"].as_f64()?;
            if max_supply <= 0.0 {
                return None;
            }
            Some(json!({
                "symbol": coin["symbol"].as_str()?.to_uppercase(),
                "name": coin["name"].as_str()?,
                "current_price": coin["current_price"],
                "market_cap": coin["market_cap"],
                "fully_diluted_valuation": coin["fully_diluted_valuation"],
                "circulating_supply": circulating,
                "max_supply": max_supply,
                "fully_diluted_percentage": (circulating / max_supply) * 100.0,
                "price_change_24h": coin["price_change_percentage_24h"].as_f64().unwrap_or(0.0),
            }))
        })
        .collect();

    json!({ "coins": rows })
}
