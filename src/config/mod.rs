use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::market::{DatasetSpec, Provider};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub ai: AiConfig,
    pub market: MarketConfig,
    pub chat: ChatConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    pub gemini_api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    pub bybit_base_url: String,
    pub coingecko_base_url: String,
    /// Minimum spacing between calls to the same provider, shared across
    /// all datasets of that provider.
    pub provider_min_spacing_ms: u64,
    pub fetch_timeout_seconds: u64,
    pub fetch_max_retries: usize,
    pub jitter_fraction: f64,
    pub failure_threshold: u32,
    pub backoff_factor: f64,
    pub max_backoff_mult: f64,
    pub datasets: Vec<DatasetSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// How many recent messages of a session are included in the assembled
    /// context.
    pub history_limit: i64,
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load .env - sets env vars that aren't already set
        dotenv::dotenv().ok();

        let market_interval: u64 = env::var("MARKET_ANALYSIS_UPDATE_INTERVAL")
            .unwrap_or_else(|_| "2700".to_string())
            .parse()
            .context("Invalid MARKET_ANALYSIS_UPDATE_INTERVAL value")?;
        let fully_diluted_interval: u64 = env::var("FULLY_DILUTED_UPDATE_INTERVAL")
            .unwrap_or_else(|_| "1800".to_string())
            .parse()
            .context("Invalid FULLY_DILUTED_UPDATE_INTERVAL value")?;

        let config = Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("SERVER_PORT")
                    .unwrap_or_else(|_| "8000".to_string())
                    .parse()
                    .context("Invalid SERVER_PORT value")?,
            },
            database: DatabaseConfig {
                path: env::var("DATABASE_PATH")
                    .unwrap_or_else(|_| "./data/marketmind.db".to_string()),
                max_connections: env::var("DB_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .context("Invalid DB_MAX_CONNECTIONS value")?,
            },
            ai: AiConfig {
                gemini_api_key: env::var("GEMINI_API_KEY").ok().filter(|k| !k.is_empty()),
                base_url: env::var("GEMINI_BASE_URL")
                    .unwrap_or_else(|_| "https://generativelanguage.googleapis.com".to_string()),
                model: env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-2.5-pro".to_string()),
                timeout_seconds: env::var("AI_TIMEOUT_SECONDS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .context("Invalid AI_TIMEOUT_SECONDS value")?,
                max_retries: env::var("AI_MAX_RETRIES")
                    .unwrap_or_else(|_| "2".to_string())
                    .parse()
                    .context("Invalid AI_MAX_RETRIES value")?,
            },
            market: MarketConfig {
                bybit_base_url: env::var("BYBIT_BASE_URL")
                    .unwrap_or_else(|_| "https://api.bybit.com".to_string()),
                coingecko_base_url: env::var("COINGECKO_BASE_URL")
                    .unwrap_or_else(|_| "https://api.coingecko.com".to_string()),
                provider_min_spacing_ms: env::var("PROVIDER_MIN_SPACING_MS")
                    .unwrap_or_else(|_| "2000".to_string())
                    .parse()
                    .context("Invalid PROVIDER_MIN_SPACING_MS value")?,
                fetch_timeout_seconds: env::var("FETCH_TIMEOUT_SECONDS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .context("Invalid FETCH_TIMEOUT_SECONDS value")?,
                fetch_max_retries: env::var("FETCH_MAX_RETRIES")
                    .unwrap_or_else(|_| "2".to_string())
                    .parse()
                    .context("Invalid FETCH_MAX_RETRIES value")?,
                jitter_fraction: env::var("REFRESH_JITTER_FRACTION")
                    .unwrap_or_else(|_| "0.1".to_string())
                    .parse()
                    .context("Invalid REFRESH_JITTER_FRACTION value")?,
                failure_threshold: env::var("REFRESH_FAILURE_THRESHOLD")
                    .unwrap_or_else(|_| "0".to_string())
                    .parse()
                    .context("Invalid REFRESH_FAILURE_THRESHOLD value")?,
                backoff_factor: env::var("REFRESH_BACKOFF_FACTOR")
                    .unwrap_or_else(|_| "2.0".to_string())
                    .parse()
                    .context("Invalid REFRESH_BACKOFF_FACTOR value")?,
                max_backoff_mult: env::var("REFRESH_MAX_BACKOFF_MULT")
                    .unwrap_or_else(|_| "8.0".to_string())
                    .parse()
                    .context("Invalid REFRESH_MAX_BACKOFF_MULT value")?,
                datasets: vec![
                    DatasetSpec {
                        id: "market_overview".to_string(),
                        provider: Provider::Bybit,
                        interval: Duration::from_secs(market_interval),
                        ttl: Duration::from_secs(market_interval),
                    },
                    DatasetSpec {
                        id: "fully_diluted".to_string(),
                        provider: Provider::Coingecko,
                        interval: Duration::from_secs(fully_diluted_interval),
                        ttl: Duration::from_secs(fully_diluted_interval),
                    },
                ],
            },
            chat: ChatConfig {
                history_limit: env::var("CHAT_HISTORY_LIMIT")
                    .unwrap_or_else(|_| "20".to_string())
                    .parse()
                    .context("Invalid CHAT_HISTORY_LIMIT value")?,
            },
        };

        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
            },
            database: DatabaseConfig {
                path: "./data/marketmind.db".to_string(),
                max_connections: 5,
            },
            ai: AiConfig {
                gemini_api_key: None,
                base_url: "https://generativelanguage.googleapis.com".to_string(),
                model: "gemini-2.5-pro".to_string(),
                timeout_seconds: 30,
                max_retries: 2,
            },
            market: MarketConfig {
                bybit_base_url: "https://api.bybit.com".to_string(),
                coingecko_base_url: "https://api.coingecko.com".to_string(),
                provider_min_spacing_ms: 2000,
                fetch_timeout_seconds: 30,
                fetch_max_retries: 2,
                jitter_fraction: 0.1,
                failure_threshold: 0,
                backoff_factor: 2.0,
                max_backoff_mult: 8.0,
                datasets: vec![
                    DatasetSpec {
                        id: "market_overview".to_string(),
                        provider: Provider::Bybit,
                        interval: Duration::from_secs(2700),
                        ttl: Duration::from_secs(2700),
                    },
                    DatasetSpec {
                        id: "fully_diluted".to_string(),
                        provider: Provider::Coingecko,
                        interval: Duration::from_secs(1800),
                        ttl: Duration::from_secs(1800),
                    },
                ],
            },
            chat: ChatConfig { history_limit: 20 },
        }
    }
}
