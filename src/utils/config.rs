use serde::{Deserialize, Serialize};
use std::fs;

use crate::error::{RelayError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub aptos: AptosConfig,
    pub server: ServerConfig,
    pub market: MarketConfig,
    pub cli: CliConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AptosConfig {
    pub node_url: String,
    /// Account that publishes the `mock_coins`, `mock_stocks` and `user_portfolio` modules.
    pub module_address: String,
    pub coin_module: String,
    pub stock_module: String,
    pub portfolio_module: String,
    pub max_gas_amount: u64,
    pub gas_unit_price: u64,
    pub txn_expiration_secs: u64,
    pub request_timeout_secs: u64,
    /// Serve from an in-memory chain instead of `node_url`.
    #[serde(default)]
    pub mock_mode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PriceSourceKind {
    OnChain,
    PriceFeed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    pub source: PriceSourceKind,
    pub refresh_interval_secs: u64,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub coingecko_url: String,
    pub alpha_vantage_url: String,
    pub alpha_vantage_api_key: Option<String>,
    pub stock_symbols: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    /// Use `aptos move view` for portfolio reads instead of the node's view endpoint.
    pub enabled: bool,
    pub binary: String,
    pub profile: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| RelayError::Config(format!("{} has an invalid value: {}", key, raw))),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        // Try to load from config file first
        let config: Config = match fs::read_to_string("config.toml") {
            Ok(config_str) => toml::from_str(&config_str)?,
            Err(_) => Self::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.market.refresh_interval_secs == 0 {
            return Err(RelayError::Config("market.refresh_interval_secs must be at least 1".to_string()));
        }
        if self.aptos.request_timeout_secs == 0 || self.cli.timeout_secs == 0 {
            return Err(RelayError::Config("timeouts must be at least 1 second".to_string()));
        }
        Ok(())
    }

    pub fn from_env() -> Result<Self> {
        let source = match env_or("MARKET_SOURCE", "on_chain").as_str() {
            "on_chain" => PriceSourceKind::OnChain,
            "price_feed" => PriceSourceKind::PriceFeed,
            other => {
                return Err(RelayError::Config(format!("unknown MARKET_SOURCE: {}", other)));
            }
        };

        Ok(Config {
            aptos: AptosConfig {
                node_url: env_or("APTOS_NODE_URL", "https://fullnode.devnet.aptoslabs.com/v1"),
                module_address: env_or(
                    "APTOS_MODULE_ADDRESS",
                    "0x8ed1668c895c1228c1cee850f4ce8d1efb462550772be3e7ed1c2896ec4ff56d",
                ),
                coin_module: env_or("APTOS_COIN_MODULE", "mock_coins"),
                stock_module: env_or("APTOS_STOCK_MODULE", "mock_stocks"),
                portfolio_module: env_or("APTOS_PORTFOLIO_MODULE", "user_portfolio"),
                max_gas_amount: env_parse("APTOS_MAX_GAS_AMOUNT", 10_000)?,
                gas_unit_price: env_parse("APTOS_GAS_UNIT_PRICE", 100)?,
                txn_expiration_secs: env_parse("APTOS_TXN_EXPIRATION_SECS", 600)?,
                request_timeout_secs: env_parse("APTOS_REQUEST_TIMEOUT_SECS", 10)?,
                mock_mode: env_parse("APTOS_MOCK_MODE", false)?,
            },
            server: ServerConfig {
                bind_address: env_or("SERVER_BIND_ADDRESS", "127.0.0.1:4002"),
            },
            market: MarketConfig {
                source,
                refresh_interval_secs: env_parse("MARKET_REFRESH_INTERVAL_SECS", 20)?,
                retry_attempts: env_parse("MARKET_RETRY_ATTEMPTS", 3)?,
                retry_delay_ms: env_parse("MARKET_RETRY_DELAY_MS", 2_000)?,
                coingecko_url: env_or(
                    "COINGECKO_URL",
                    "https://api.coingecko.com/api/v3/simple/price",
                ),
                alpha_vantage_url: env_or("ALPHA_VANTAGE_URL", "https://www.alphavantage.co/query"),
                alpha_vantage_api_key: std::env::var("ALPHA_VANTAGE_API_KEY").ok(),
                stock_symbols: env_or("STOCK_SYMBOLS", "AAPL,GOOGL,AMZN")
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
            cli: CliConfig {
                enabled: env_parse("APTOS_CLI_ENABLED", false)?,
                binary: env_or("APTOS_CLI_BINARY", "aptos"),
                profile: env_or("APTOS_CLI_PROFILE", "default"),
                timeout_secs: env_parse("APTOS_CLI_TIMEOUT_SECS", 30)?,
            },
            logging: LoggingConfig {
                level: env_or("LOG_LEVEL", "info"),
            },
        })
    }
}
