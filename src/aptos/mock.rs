use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

use crate::aptos::client::{AccountResource, ChainClient, TransactionStatus};
use crate::aptos::types::{AccountAddress, GasOptions, PendingTransaction, TransactionPayload};
use crate::error::{RelayError, Result};

/// In-memory stand-in for a full node, used in mock mode and in tests.
#[derive(Debug, Clone)]
pub struct MockChainClient {
    chain_id: u8,
    reachable: bool,
    latency: Option<Duration>,
    resources: HashMap<String, Vec<AccountResource>>,
    view_results: HashMap<String, Vec<serde_json::Value>>,
    sequence_numbers: HashMap<AccountAddress, u64>,
    transactions: HashMap<String, TransactionStatus>,
}

/// Lookups accept short and long address forms alike.
fn normalize(address: &str) -> String {
    address
        .parse::<AccountAddress>()
        .map(|a| a.to_hex())
        .unwrap_or_else(|_| address.to_string())
}

fn symbol_hex(symbol: &str) -> String {
    format!("0x{}", hex::encode(symbol.as_bytes()))
}

impl MockChainClient {
    pub fn new(chain_id: u8) -> Self {
        Self {
            chain_id,
            reachable: true,
            latency: None,
            resources: HashMap::new(),
            view_results: HashMap::new(),
            sequence_numbers: HashMap::new(),
            transactions: HashMap::new(),
        }
    }

    /// Every call fails as if the node were down.
    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            ..Self::new(0)
        }
    }

    /// Seeds crypto and stock market resources under `module_address`, prices
    /// given as raw 6-decimal integers.
    pub fn seeded(module_address: &AccountAddress, coin_module: &str, stock_module: &str) -> Self {
        let market = |prices: &[(&str, u128)]| {
            let coins: Vec<_> = prices
                .iter()
                .map(|(symbol, value)| {
                    json!({
                        "symbol": symbol_hex(symbol),
                        "current_value": value.to_string(),
                        "last_update": "0",
                    })
                })
                .collect();
            json!({ "coins": coins })
        };

        let owner = module_address.to_hex();
        Self::new(4)
            .with_resource(
                &owner,
                &format!("{}::{}::Market", owner, coin_module),
                market(&[("BTC", 52_150_750_000), ("ETH", 3_275_500_000), ("ADA", 650_000)]),
            )
            .with_resource(
                &owner,
                &format!("{}::{}::Market", owner, stock_module),
                market(&[("AAPL", 175_250_000), ("GOOGL", 142_650_000), ("AMZN", 178_350_000)]),
            )
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn with_resource(mut self, address: &str, resource_type: &str, data: serde_json::Value) -> Self {
        self.resources
            .entry(normalize(address))
            .or_default()
            .push(AccountResource {
                resource_type: resource_type.to_string(),
                data,
            });
        self
    }

    pub fn with_view_result(mut self, function: &str, result: Vec<serde_json::Value>) -> Self {
        self.view_results.insert(function.to_string(), result);
        self
    }

    pub fn with_sequence_number(mut self, address: AccountAddress, sequence_number: u64) -> Self {
        self.sequence_numbers.insert(address, sequence_number);
        self
    }

    pub fn with_transaction(mut self, status: TransactionStatus) -> Self {
        self.transactions.insert(status.hash.clone(), status);
        self
    }

    async fn round_trip(&self) -> Result<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if !self.reachable {
            return Err(RelayError::UpstreamUnavailable("mock node is unreachable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn account_resource(&self, address: &str, resource_type: &str) -> Result<serde_json::Value> {
        self.round_trip().await?;
        self.resources
            .get(&normalize(address))
            .and_then(|resources| resources.iter().find(|r| r.resource_type == resource_type))
            .map(|r| r.data.clone())
            .ok_or_else(|| {
                RelayError::UpstreamUnavailable(format!("resource {} not found at {}", resource_type, address))
            })
    }

    async fn account_resources(&self, address: &str) -> Result<Vec<AccountResource>> {
        self.round_trip().await?;
        Ok(self.resources.get(&normalize(address)).cloned().unwrap_or_default())
    }

    async fn view(
        &self,
        function: &str,
        _type_arguments: &[String],
        _arguments: &[serde_json::Value],
    ) -> Result<Vec<serde_json::Value>> {
        self.round_trip().await?;
        self.view_results
            .get(function)
            .cloned()
            .ok_or_else(|| RelayError::UpstreamUnavailable(format!("function {} not found", function)))
    }

    async fn generate_transaction(
        &self,
        sender: &AccountAddress,
        payload: &TransactionPayload,
    ) -> Result<PendingTransaction> {
        self.round_trip().await?;
        let sequence_number = self.sequence_numbers.get(sender).copied().unwrap_or(0);
        let gas = GasOptions {
            max_gas_amount: 10_000,
            gas_unit_price: 100,
            expiration_timestamp_secs: chrono::Utc::now().timestamp().max(0) as u64 + 600,
        };

        info!("🧪 MOCK transaction {} for {}", payload.function_id(), sender);

        PendingTransaction::new(sender, sequence_number, self.chain_id, payload, gas)
            .map_err(|e| RelayError::TransactionGenerationFailed(e.to_string()))
    }

    async fn transaction_by_hash(&self, hash: &str) -> Result<Option<TransactionStatus>> {
        self.round_trip().await?;
        Ok(self.transactions.get(hash).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seeded_markets_are_readable_by_short_address() {
        let owner: AccountAddress = "0x42".parse().unwrap();
        let client = MockChainClient::seeded(&owner, "mock_coins", "mock_stocks");

        let market = client
            .account_resource("0x42", &format!("{}::mock_coins::Market", owner))
            .await
            .unwrap();
        assert_eq!(market["coins"][0]["symbol"], "0x425443");
        assert_eq!(market["coins"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn unreachable_client_fails_every_call() {
        let client = MockChainClient::unreachable();
        assert!(client.account_resources("0x1").await.is_err());
        assert!(client.transaction_by_hash("0xabc").await.is_err());
    }
}
