use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::aptos::types::{AccountAddress, GasOptions, PendingTransaction, TransactionPayload};
use crate::error::{RelayError, Result};
use crate::utils::config::AptosConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountInfo {
    pub sequence_number: String,
    pub authentication_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountResource {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LedgerInfo {
    chain_id: u8,
}

#[derive(Debug, Clone, Serialize)]
struct ViewRequest<'a> {
    function: &'a str,
    type_arguments: &'a [String],
    arguments: &'a [serde_json::Value],
}

/// Committed or pending transaction as reported by `/transactions/by_hash`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransactionStatus {
    #[serde(rename = "type")]
    pub kind: String,
    pub hash: String,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub vm_status: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

impl TransactionStatus {
    pub fn is_committed(&self) -> bool {
        self.kind != "pending_transaction"
    }
}

/// Read and transaction-preparation surface of a full node.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn account_resource(&self, address: &str, resource_type: &str) -> Result<serde_json::Value>;

    async fn account_resources(&self, address: &str) -> Result<Vec<AccountResource>>;

    async fn view(
        &self,
        function: &str,
        type_arguments: &[String],
        arguments: &[serde_json::Value],
    ) -> Result<Vec<serde_json::Value>>;

    /// Builds an unsigned transaction for `sender` carrying `payload`.
    async fn generate_transaction(
        &self,
        sender: &AccountAddress,
        payload: &TransactionPayload,
    ) -> Result<PendingTransaction>;

    /// `None` while the node has never seen the hash.
    async fn transaction_by_hash(&self, hash: &str) -> Result<Option<TransactionStatus>>;
}

pub struct AptosClient {
    http_client: reqwest::Client,
    base_url: String,
    config: AptosConfig,
}

impl AptosClient {
    pub fn new(config: AptosConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        let node_url = url::Url::parse(&config.node_url)
            .map_err(|e| RelayError::Config(format!("invalid node_url {}: {}", config.node_url, e)))?;

        Ok(Self {
            http_client,
            base_url: node_url.as_str().trim_end_matches('/').to_string(),
            config,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        debug!("GET {}", url);
        let response = self.http_client.get(url).send().await?;
        Self::read_json(response).await
    }

    async fn read_json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::UpstreamUnavailable(format!(
                "node responded {}: {}",
                status,
                node_error_message(&body)
            )));
        }
        Ok(response.json().await?)
    }

    pub async fn get_sequence_number(&self, address: &AccountAddress) -> Result<u64> {
        let url = format!("{}/accounts/{}", self.base_url, address);
        let account_info: AccountInfo = self.get_json(&url).await?;
        account_info.sequence_number.parse::<u64>().map_err(|e| {
            RelayError::UpstreamUnavailable(format!("invalid sequence number from node: {}", e))
        })
    }

    pub async fn get_chain_id(&self) -> Result<u8> {
        let url = format!("{}/", self.base_url);
        let ledger: LedgerInfo = self.get_json(&url).await?;
        Ok(ledger.chain_id)
    }
}

/// Pulls `message` out of a node error body, falling back to the raw text.
fn node_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

#[async_trait]
impl ChainClient for AptosClient {
    async fn account_resource(&self, address: &str, resource_type: &str) -> Result<serde_json::Value> {
        let url = format!("{}/accounts/{}/resource/{}", self.base_url, address, resource_type);
        let resource: AccountResource = self.get_json(&url).await?;
        Ok(resource.data)
    }

    async fn account_resources(&self, address: &str) -> Result<Vec<AccountResource>> {
        let url = format!("{}/accounts/{}/resources", self.base_url, address);
        self.get_json(&url).await
    }

    async fn view(
        &self,
        function: &str,
        type_arguments: &[String],
        arguments: &[serde_json::Value],
    ) -> Result<Vec<serde_json::Value>> {
        let url = format!("{}/view", self.base_url);
        debug!("POST {} {}", url, function);
        let response = self
            .http_client
            .post(&url)
            .json(&ViewRequest {
                function,
                type_arguments,
                arguments,
            })
            .send()
            .await?;
        Self::read_json(response).await
    }

    async fn generate_transaction(
        &self,
        sender: &AccountAddress,
        payload: &TransactionPayload,
    ) -> Result<PendingTransaction> {
        let (sequence_number, chain_id) =
            tokio::try_join!(self.get_sequence_number(sender), self.get_chain_id())?;

        let gas = GasOptions {
            max_gas_amount: self.config.max_gas_amount,
            gas_unit_price: self.config.gas_unit_price,
            expiration_timestamp_secs: chrono::Utc::now().timestamp().max(0) as u64
                + self.config.txn_expiration_secs,
        };

        info!(
            "Prepared {} for {} (seq {}, chain {})",
            payload.function_id(),
            sender,
            sequence_number,
            chain_id
        );

        PendingTransaction::new(sender, sequence_number, chain_id, payload, gas)
            .map_err(|e| RelayError::TransactionGenerationFailed(format!("argument encoding failed: {}", e)))
    }

    async fn transaction_by_hash(&self, hash: &str) -> Result<Option<TransactionStatus>> {
        let url = format!("{}/transactions/by_hash/{}", self.base_url, hash);
        let response = self.http_client.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::read_json(response).await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_error_message_prefers_message_field() {
        let body = r#"{"message":"Account not found by Address(0x1)","error_code":"account_not_found"}"#;
        assert_eq!(node_error_message(body), "Account not found by Address(0x1)");
        assert_eq!(node_error_message("gateway timeout"), "gateway timeout");
    }

    #[test]
    fn view_request_borrows_its_arguments() {
        let type_arguments: Vec<String> = Vec::new();
        let arguments = vec![serde_json::json!("0xabc")];
        let body = serde_json::to_value(ViewRequest {
            function: "0x42::user_portfolio::get_portfolio",
            type_arguments: &type_arguments,
            arguments: &arguments,
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "function": "0x42::user_portfolio::get_portfolio",
                "type_arguments": [],
                "arguments": ["0xabc"]
            })
        );
    }

    #[test]
    fn pending_status_is_not_committed() {
        let status: TransactionStatus = serde_json::from_value(serde_json::json!({
            "type": "pending_transaction",
            "hash": "0xabc"
        }))
        .unwrap();
        assert!(!status.is_committed());
    }
}
