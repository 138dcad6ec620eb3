use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::aptos::client::ChainClient;
use crate::aptos::types::{AccountAddress, PendingTransaction, TransactionPayload};
use crate::error::{RelayError, Result};

/// Obtains unsigned transactions from the node for the wallet to sign.
/// There is no server-held key anywhere on this path.
#[derive(Clone)]
pub struct TransactionRequester {
    client: Arc<dyn ChainClient>,
    timeout: Duration,
}

impl TransactionRequester {
    pub fn new(client: Arc<dyn ChainClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Single attempt, bounded by the configured timeout.
    pub async fn request_unsigned_transaction(
        &self,
        sender: &AccountAddress,
        payload: &TransactionPayload,
    ) -> Result<PendingTransaction> {
        info!("Requesting unsigned {} for {}", payload.function_id(), sender);

        let outcome = tokio::time::timeout(self.timeout, self.client.generate_transaction(sender, payload)).await;

        match outcome {
            Ok(Ok(pending)) => Ok(pending),
            Ok(Err(RelayError::TransactionGenerationFailed(message))) => {
                error!("Transaction generation failed: {}", message);
                Err(RelayError::TransactionGenerationFailed(message))
            }
            Ok(Err(upstream)) => {
                error!("Transaction generation failed: {}", upstream);
                Err(RelayError::TransactionGenerationFailed(upstream.to_string()))
            }
            Err(_) => {
                error!("Node did not answer within {:?}", self.timeout);
                Err(RelayError::TransactionGenerationFailed(format!(
                    "node did not respond within {}s",
                    self.timeout.as_secs()
                )))
            }
        }
    }
}
