use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::aptos::client::{ChainClient, TransactionStatus};
use crate::aptos::types::{AccountAddress, MoveValue, PendingTransaction, WalletPayload};
use crate::error::{RelayError, Result};
use crate::market_data::store::MarketStore;
use crate::trading::decoder::{decode_with_signature, DecodedTransaction};
use crate::trading::payload::{MarketModules, TradeAction};
use crate::trading::requester::TransactionRequester;
use crate::trading::units::{quote_buy, to_on_chain_units};

/// Lifecycle of a single buy/sell request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStage {
    Idle,
    PayloadBuilt,
    TransactionRequested,
    TransactionDecoded,
    Failed,
    Submitted,
    Abandoned,
}

impl TradeStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TradeStage::Failed | TradeStage::Submitted | TradeStage::Abandoned)
    }

    pub fn can_transition_to(&self, next: TradeStage) -> bool {
        use TradeStage::*;
        matches!(
            (self, next),
            (Idle, PayloadBuilt)
                | (PayloadBuilt, TransactionRequested)
                | (TransactionRequested, TransactionDecoded)
                | (TransactionRequested, Failed)
                | (TransactionDecoded, Submitted)
                | (TransactionDecoded, Abandoned)
        )
    }
}

#[derive(Debug, Clone)]
pub struct TradeFlow {
    pub id: Uuid,
    pub action: TradeAction,
    stage: TradeStage,
}

impl TradeFlow {
    pub fn new(action: TradeAction) -> Self {
        Self {
            id: Uuid::new_v4(),
            action,
            stage: TradeStage::Idle,
        }
    }

    pub fn stage(&self) -> TradeStage {
        self.stage
    }

    pub fn advance(&mut self, next: TradeStage) -> Result<()> {
        if !self.stage.can_transition_to(next) {
            return Err(RelayError::InvalidInput(format!(
                "trade {} cannot move from {:?} to {:?}",
                self.id, self.stage, next
            )));
        }
        info!("Trade {} ({:?}): {:?} -> {:?}", self.id, self.action, self.stage, next);
        self.stage = next;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct BuyOrder {
    pub index: usize,
    pub amount_usd: Decimal,
    pub wallet: AccountAddress,
}

#[derive(Debug, Clone)]
pub struct SellOrder {
    pub symbol: String,
    pub amount: Decimal,
    pub recipient: AccountAddress,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeMetadata {
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub amount_usd: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float")]
    pub asset_amount: Decimal,
    pub scaled_amount: u64,
}

/// Everything the dashboard needs to hand the trade to the wallet.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedTrade {
    pub trade_id: Uuid,
    pub action: TradeAction,
    pub stage: TradeStage,
    pub payload: WalletPayload,
    pub raw_transaction: PendingTransaction,
    pub decoded: DecodedTransaction,
    pub metadata: TradeMetadata,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionStatus {
    pub hash: String,
    pub stage: TradeStage,
    pub committed: bool,
    pub transaction: Option<TransactionStatus>,
}

pub struct TradeService {
    modules: MarketModules,
    requester: TransactionRequester,
    store: MarketStore,
    client: Arc<dyn ChainClient>,
}

impl TradeService {
    pub fn new(
        modules: MarketModules,
        requester: TransactionRequester,
        store: MarketStore,
        client: Arc<dyn ChainClient>,
    ) -> Self {
        Self {
            modules,
            requester,
            store,
            client,
        }
    }

    pub async fn prepare_buy(&self, order: BuyOrder, stock: bool) -> Result<PreparedTrade> {
        let action = if stock { TradeAction::BuyStock } else { TradeAction::BuyCoin };
        let snapshot = self.store.current_or_refresh().await?;
        let asset = snapshot.assets(stock).get(order.index).ok_or_else(|| {
            RelayError::InvalidInput(if stock { "Invalid stock index" } else { "Invalid coin index" }.to_string())
        })?;

        let quote = quote_buy(order.amount_usd, asset.human_price)?;
        info!(
            "Buy {} {} for ${} at ${} ({} units)",
            quote.coins_to_receive, asset.symbol, order.amount_usd, asset.human_price, quote.scaled_coins
        );

        let args = vec![MoveValue::U64(order.index as u64), MoveValue::U64(quote.scaled_coins)];
        let metadata = TradeMetadata {
            symbol: asset.symbol.clone(),
            price: asset.human_price,
            amount_usd: Some(order.amount_usd),
            asset_amount: quote.coins_to_receive,
            scaled_amount: quote.scaled_coins,
        };

        self.prepare(action, &order.wallet, args, metadata).await
    }

    pub async fn prepare_sell(&self, order: SellOrder, stock: bool) -> Result<PreparedTrade> {
        let action = if stock { TradeAction::SellStock } else { TradeAction::SellCoin };
        let snapshot = self.store.current_or_refresh().await?;
        let (_, asset) = snapshot.find(&order.symbol, stock).ok_or_else(|| {
            RelayError::InvalidInput(format!("Unknown {} symbol: {}", if stock { "stock" } else { "coin" }, order.symbol))
        })?;

        let scaled = to_on_chain_units(order.amount)?;
        if scaled == 0 {
            return Err(RelayError::InvalidInput("Invalid amount".to_string()));
        }

        let args = vec![MoveValue::Bytes(asset.symbol.as_bytes().to_vec()), MoveValue::U64(scaled)];
        let metadata = TradeMetadata {
            symbol: asset.symbol.clone(),
            price: asset.human_price,
            amount_usd: None,
            asset_amount: order.amount,
            scaled_amount: scaled,
        };

        self.prepare(action, &order.recipient, args, metadata).await
    }

    async fn prepare(
        &self,
        action: TradeAction,
        sender: &AccountAddress,
        args: Vec<MoveValue>,
        metadata: TradeMetadata,
    ) -> Result<PreparedTrade> {
        let mut flow = TradeFlow::new(action);

        let payload = self.modules.payload(action, args);
        flow.advance(TradeStage::PayloadBuilt)?;

        flow.advance(TradeStage::TransactionRequested)?;
        let decoded = match self.requester.request_unsigned_transaction(sender, &payload).await {
            Ok(pending) => decode_with_signature(&pending, action.signature()).map(|d| (pending, d)),
            Err(e) => Err(e),
        };

        let (pending, decoded) = match decoded {
            Ok(result) => result,
            Err(e) => {
                flow.advance(TradeStage::Failed)?;
                return Err(e);
            }
        };
        flow.advance(TradeStage::TransactionDecoded)?;

        Ok(PreparedTrade {
            trade_id: flow.id,
            action,
            stage: flow.stage(),
            payload: decoded.to_wallet_payload(),
            raw_transaction: pending,
            decoded,
            metadata,
        })
    }

    /// Where a wallet-submitted trade stands. A committed hash is `Submitted`;
    /// a hash that is unknown or still pending once `expires_at` has passed
    /// can never commit and is `Abandoned`.
    pub async fn submission_status(&self, hash: &str, expires_at: Option<u64>) -> Result<SubmissionStatus> {
        let transaction = self.client.transaction_by_hash(hash).await?;
        let committed = transaction.as_ref().map_or(false, TransactionStatus::is_committed);
        let expired = expires_at.map_or(false, |at| chrono::Utc::now().timestamp() > at as i64);

        let stage = if committed {
            TradeStage::Submitted
        } else if expired {
            warn!("Transaction {} expired at {} without committing", hash, expires_at.unwrap_or_default());
            TradeStage::Abandoned
        } else {
            if transaction.is_none() {
                warn!("Transaction {} not found on chain", hash);
            }
            TradeStage::TransactionDecoded
        };

        Ok(SubmissionStatus {
            hash: hash.to_string(),
            stage,
            committed,
            transaction,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aptos::mock::MockChainClient;
    use crate::market_data::feed::OnChainMarket;
    use crate::trading::decoder::DecodedArg;
    use std::time::Duration;

    fn modules() -> MarketModules {
        MarketModules {
            address: "0x42".parse().unwrap(),
            coin_module: "mock_coins".to_string(),
            stock_module: "mock_stocks".to_string(),
            portfolio_module: "user_portfolio".to_string(),
        }
    }

    fn service(client: MockChainClient) -> TradeService {
        let client: Arc<dyn ChainClient> = Arc::new(client);
        let store = MarketStore::new(Arc::new(OnChainMarket::new(client.clone(), modules())));
        let requester = TransactionRequester::new(client.clone(), Duration::from_secs(1));
        TradeService::new(modules(), requester, store, client)
    }

    fn seeded() -> MockChainClient {
        MockChainClient::seeded(&modules().address, "mock_coins", "mock_stocks")
    }

    #[test]
    fn only_forward_transitions_are_allowed() {
        let mut flow = TradeFlow::new(TradeAction::BuyCoin);
        assert!(flow.advance(TradeStage::TransactionDecoded).is_err());
        flow.advance(TradeStage::PayloadBuilt).unwrap();
        flow.advance(TradeStage::TransactionRequested).unwrap();
        flow.advance(TradeStage::Failed).unwrap();
        assert!(flow.stage().is_terminal());
        assert!(flow.advance(TradeStage::Submitted).is_err());
    }

    #[tokio::test]
    async fn buy_quotes_and_encodes_scaled_amount() {
        let service = service(seeded());
        let prepared = service
            .prepare_buy(
                BuyOrder {
                    index: 2,
                    amount_usd: Decimal::new(13, 1),
                    wallet: "0xabc".parse().unwrap(),
                },
                false,
            )
            .await
            .unwrap();

        // 1.3 USD at 0.65 per ADA
        assert_eq!(prepared.metadata.symbol, "ADA");
        assert_eq!(prepared.metadata.scaled_amount, 2_000_000);
        assert_eq!(prepared.stage, TradeStage::TransactionDecoded);
        assert_eq!(
            prepared.decoded.arguments,
            vec![DecodedArg::Integer(2), DecodedArg::Integer(2_000_000)]
        );
        assert!(prepared.payload.function.ends_with("::mock_coins::buy_coin"));
    }

    #[tokio::test]
    async fn buy_rejects_out_of_range_index() {
        let service = service(seeded());
        let err = service
            .prepare_buy(
                BuyOrder {
                    index: 3,
                    amount_usd: Decimal::from(20),
                    wallet: "0xabc".parse().unwrap(),
                },
                true,
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid stock index");
    }

    #[tokio::test]
    async fn sell_encodes_symbol_bytes() {
        let service = service(seeded());
        let prepared = service
            .prepare_sell(
                SellOrder {
                    symbol: "aapl".to_string(),
                    amount: Decimal::new(15, 1),
                    recipient: "0xabc".parse().unwrap(),
                },
                true,
            )
            .await
            .unwrap();

        assert!(prepared.payload.function.ends_with("::mock_stocks::sell_stock"));
        assert_eq!(
            prepared.decoded.arguments,
            vec![DecodedArg::Bytes("0x4141504c".to_string()), DecodedArg::Integer(1_500_000)]
        );
    }

    #[tokio::test]
    async fn sell_rejects_dust_amounts() {
        let service = service(seeded());
        let err = service
            .prepare_sell(
                SellOrder {
                    symbol: "BTC".to_string(),
                    amount: Decimal::new(1, 9),
                    recipient: "0xabc".parse().unwrap(),
                },
                false,
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid amount");
    }

    fn status(hash: &str, kind: &str) -> TransactionStatus {
        TransactionStatus {
            kind: kind.to_string(),
            hash: hash.to_string(),
            success: Some(true),
            vm_status: Some("Executed successfully".to_string()),
            version: Some("1".to_string()),
        }
    }

    fn in_secs(offset: i64) -> Option<u64> {
        Some((chrono::Utc::now().timestamp() + offset) as u64)
    }

    #[tokio::test]
    async fn committed_hash_is_submitted() {
        let service = service(seeded().with_transaction(status("0xfeed", "user_transaction")));
        let result = service.submission_status("0xfeed", None).await.unwrap();
        assert_eq!(result.stage, TradeStage::Submitted);
        assert!(result.committed);
    }

    #[tokio::test]
    async fn pending_hash_is_not_yet_submitted() {
        let service = service(seeded().with_transaction(status("0xfeed", "pending_transaction")));
        let result = service.submission_status("0xfeed", in_secs(600)).await.unwrap();
        assert_eq!(result.stage, TradeStage::TransactionDecoded);
        assert!(!result.committed);
    }

    #[tokio::test]
    async fn unknown_hash_waits_until_expiry() {
        let service = service(seeded());
        assert_eq!(
            service.submission_status("0xbeef", None).await.unwrap().stage,
            TradeStage::TransactionDecoded
        );
        assert_eq!(
            service.submission_status("0xbeef", in_secs(600)).await.unwrap().stage,
            TradeStage::TransactionDecoded
        );
    }

    #[tokio::test]
    async fn expired_hash_is_abandoned() {
        let service = service(seeded().with_transaction(status("0xfeed", "pending_transaction")));
        for hash in ["0xbeef", "0xfeed"] {
            let result = service.submission_status(hash, in_secs(-60)).await.unwrap();
            assert_eq!(result.stage, TradeStage::Abandoned);
        }
        assert!(TradeStage::Abandoned.is_terminal());
    }
}
