use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::aptos::client::ChainClient;
use crate::error::{RelayError, Result};
use crate::market_data::models::{MarketAsset, MarketSnapshot, SnapshotSource};
use crate::market_data::parser::parse_market_resource;
use crate::trading::payload::MarketModules;
use crate::trading::units::{decimal_from_f64, parse_amount_str};
use crate::utils::config::MarketConfig;

/// Produces a fresh market snapshot on demand.
#[async_trait]
pub trait PriceSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch_snapshot(&self) -> Result<MarketSnapshot>;
}

/// Reads prices straight from the `Market` resources of the coin and stock modules.
pub struct OnChainMarket {
    client: Arc<dyn ChainClient>,
    modules: MarketModules,
}

impl OnChainMarket {
    pub fn new(client: Arc<dyn ChainClient>, modules: MarketModules) -> Self {
        Self { client, modules }
    }

    async fn read_market(&self, module: &str) -> Result<Vec<MarketAsset>> {
        let owner = self.modules.address.to_hex();
        let resource_type = self.modules.resource_type(module, "Market");
        let data = self.client.account_resource(&owner, &resource_type).await?;
        parse_market_resource(&data)
    }
}

#[async_trait]
impl PriceSource for OnChainMarket {
    fn name(&self) -> &'static str {
        "on_chain"
    }

    async fn fetch_snapshot(&self) -> Result<MarketSnapshot> {
        let (cryptos, stocks) = tokio::join!(
            self.read_market(&self.modules.coin_module),
            self.read_market(&self.modules.stock_module)
        );

        // Both markets are required; a partial snapshot would overwrite good stock prices.
        let stocks = stocks.map_err(|e| {
            warn!("Stock market unavailable: {}", e);
            e
        })?;

        Ok(MarketSnapshot {
            cryptos: cryptos?,
            stocks,
            source: SnapshotSource::OnChain,
            refreshed_at: Some(chrono::Utc::now()),
            is_cached: false,
        })
    }
}

const COINGECKO_IDS: [(&str, &str); 3] = [("bitcoin", "BTC"), ("ethereum", "ETH"), ("cardano", "ADA")];

fn mock_cryptos() -> Vec<(String, Decimal)> {
    vec![
        ("BTC".to_string(), Decimal::new(5_215_075, 2)),
        ("ETH".to_string(), Decimal::new(327_550, 2)),
        ("ADA".to_string(), Decimal::new(65, 2)),
    ]
}

fn mock_stock_price(symbol: &str) -> Decimal {
    match symbol {
        "AAPL" => Decimal::new(17_525, 2),
        "GOOGL" => Decimal::new(14_265, 2),
        "AMZN" => Decimal::new(17_835, 2),
        _ => Decimal::ONE,
    }
}

/// Retries `op` a fixed number of times with a fixed delay between attempts.
async fn with_retry<T, F, Fut>(what: &str, attempts: u32, delay: Duration, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                warn!("Attempt {} to fetch {} failed: {}", attempt, what, e);
                attempt += 1;
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                error!("Fetching {} failed after {} attempts: {}", what, attempts, e);
                return Err(e);
            }
        }
    }
}

/// Third-party quotes: CoinGecko for crypto, Alpha Vantage for stocks. Falls
/// back to static quotes once retries run out.
pub struct PriceFeed {
    config: MarketConfig,
    http_client: Client,
}

impl PriceFeed {
    pub fn new(config: MarketConfig, request_timeout: Duration) -> Result<Self> {
        let http_client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self { config, http_client })
    }

    fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.config.retry_delay_ms)
    }

    async fn fetch_cryptos_once(&self) -> Result<Vec<(String, Decimal)>> {
        let ids = COINGECKO_IDS.iter().map(|(id, _)| *id).collect::<Vec<_>>().join(",");
        let data: Value = self
            .http_client
            .get(&self.config.coingecko_url)
            .query(&[("ids", ids.as_str()), ("vs_currencies", "usd")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        parse_coingecko(&data)
    }

    async fn fetch_stock_once(&self, symbol: &str, api_key: &str) -> Result<Decimal> {
        let data: Value = self
            .http_client
            .get(&self.config.alpha_vantage_url)
            .query(&[("function", "GLOBAL_QUOTE"), ("symbol", symbol), ("apikey", api_key)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        parse_global_quote(&data, symbol)
    }

    async fn fetch_stocks_once(&self, api_key: &str) -> Result<Vec<(String, Decimal)>> {
        let requests = self.config.stock_symbols.iter().map(|symbol| async move {
            let price = self.fetch_stock_once(symbol, api_key).await?;
            Ok::<_, RelayError>((symbol.clone(), price))
        });
        futures_util::future::try_join_all(requests).await
    }

    /// Returns the quotes and whether they are the static fallback.
    async fn cryptos(&self) -> (Vec<(String, Decimal)>, bool) {
        match with_retry("crypto prices", self.config.retry_attempts, self.retry_delay(), || {
            self.fetch_cryptos_once()
        })
        .await
        {
            Ok(quotes) => (quotes, false),
            Err(_) => {
                info!("Using mock crypto data after all retries failed");
                (mock_cryptos(), true)
            }
        }
    }

    async fn stocks(&self) -> (Vec<(String, Decimal)>, bool) {
        let mock = || {
            self.config
                .stock_symbols
                .iter()
                .map(|s| (s.clone(), mock_stock_price(s)))
                .collect::<Vec<_>>()
        };

        let Some(api_key) = self.config.alpha_vantage_api_key.as_deref() else {
            warn!("ALPHA_VANTAGE_API_KEY is not set, serving mock stock data");
            return (mock(), true);
        };

        match with_retry("stock prices", self.config.retry_attempts, self.retry_delay(), || {
            self.fetch_stocks_once(api_key)
        })
        .await
        {
            Ok(quotes) => (quotes, false),
            Err(_) => {
                info!("Using mock stock data after all retries failed");
                (mock(), true)
            }
        }
    }
}

fn to_assets(quotes: Vec<(String, Decimal)>) -> Result<Vec<MarketAsset>> {
    quotes
        .into_iter()
        .map(|(symbol, price)| MarketAsset::from_human(symbol, price))
        .collect()
}

#[async_trait]
impl PriceSource for PriceFeed {
    fn name(&self) -> &'static str {
        "price_feed"
    }

    async fn fetch_snapshot(&self) -> Result<MarketSnapshot> {
        let ((cryptos, cryptos_mocked), (stocks, stocks_mocked)) = tokio::join!(self.cryptos(), self.stocks());

        Ok(MarketSnapshot {
            cryptos: to_assets(cryptos)?,
            stocks: to_assets(stocks)?,
            source: SnapshotSource::PriceFeed,
            refreshed_at: Some(chrono::Utc::now()),
            is_cached: cryptos_mocked || stocks_mocked,
        })
    }
}

/// `{"bitcoin": {"usd": 52150.75}, ...}`
pub fn parse_coingecko(data: &Value) -> Result<Vec<(String, Decimal)>> {
    COINGECKO_IDS
        .iter()
        .map(|(id, symbol)| {
            let usd = data[*id]["usd"].as_f64().ok_or_else(|| {
                RelayError::UpstreamUnavailable(format!("CoinGecko response has no {} price", id))
            })?;
            Ok((symbol.to_string(), decimal_from_f64(usd)?))
        })
        .collect()
}

/// `{"Global Quote": {"05. price": "175.2500"}}`. Rate-limited responses
/// carry a `Note` instead.
pub fn parse_global_quote(data: &Value, symbol: &str) -> Result<Decimal> {
    let price = data["Global Quote"]["05. price"].as_str().ok_or_else(|| {
        RelayError::UpstreamUnavailable(format!("Alpha Vantage returned no price for {}", symbol))
    })?;
    parse_amount_str(price)
}
