use serde::Serialize;

use crate::aptos::types::{AccountAddress, EntryFunctionField, MoveType, MoveValue, TransactionPayload};
use crate::error::{RelayError, Result};
use crate::utils::config::AptosConfig;

/// Assembles an entry-function call. Arguments must already be in on-chain
/// units and in the order the target function declares; nothing here checks
/// them, the chain rejects mismatches.
pub fn build_entry_function_payload(
    module_address: AccountAddress,
    module_name: &str,
    function_name: &str,
    args: Vec<MoveValue>,
) -> TransactionPayload {
    TransactionPayload {
        module_address,
        module_name: module_name.to_string(),
        function_name: function_name.to_string(),
        type_arguments: Vec::new(),
        arguments: args,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeAction {
    BuyCoin,
    SellCoin,
    BuyStock,
    SellStock,
}

impl TradeAction {
    pub fn function_name(&self) -> &'static str {
        match self {
            TradeAction::BuyCoin => "buy_coin",
            TradeAction::SellCoin => "sell_coin",
            TradeAction::BuyStock => "buy_stock",
            TradeAction::SellStock => "sell_stock",
        }
    }

    pub fn from_function_name(name: &str) -> Option<Self> {
        [
            TradeAction::BuyCoin,
            TradeAction::SellCoin,
            TradeAction::BuyStock,
            TradeAction::SellStock,
        ]
        .into_iter()
        .find(|action| action.function_name() == name)
    }

    /// Parameter types of the entry function, signer excluded.
    pub fn signature(&self) -> &'static [MoveType] {
        match self {
            TradeAction::BuyCoin | TradeAction::BuyStock => &[MoveType::U64, MoveType::U64],
            TradeAction::SellCoin | TradeAction::SellStock => &[MoveType::Bytes, MoveType::U64],
        }
    }

    pub fn is_stock(&self) -> bool {
        matches!(self, TradeAction::BuyStock | TradeAction::SellStock)
    }
}

/// Where the market contracts live.
#[derive(Debug, Clone)]
pub struct MarketModules {
    pub address: AccountAddress,
    pub coin_module: String,
    pub stock_module: String,
    pub portfolio_module: String,
}

impl MarketModules {
    pub fn from_config(config: &AptosConfig) -> Result<Self> {
        let address = config
            .module_address
            .parse()
            .map_err(|_| RelayError::Config(format!("invalid module address {}", config.module_address)))?;

        Ok(Self {
            address,
            coin_module: config.coin_module.clone(),
            stock_module: config.stock_module.clone(),
            portfolio_module: config.portfolio_module.clone(),
        })
    }

    pub fn module_for(&self, action: TradeAction) -> &str {
        if action.is_stock() {
            &self.stock_module
        } else {
            &self.coin_module
        }
    }

    pub fn payload(&self, action: TradeAction, args: Vec<MoveValue>) -> TransactionPayload {
        build_entry_function_payload(self.address, self.module_for(action), action.function_name(), args)
    }

    /// Fully qualified resource type, e.g. `0x..::mock_coins::Market`.
    pub fn resource_type(&self, module: &str, name: &str) -> String {
        format!("{}::{}::{}", self.address, module, name)
    }

    pub fn function_id(&self, module: &str, function: &str) -> String {
        format!("{}::{}::{}", self.address, module, function)
    }

    /// The market action an entry function calls, if it targets one of our
    /// modules at our address.
    pub fn action_for(&self, entry: &EntryFunctionField) -> Option<TradeAction> {
        let address = AccountAddress::from_bytes(entry.module_name.address.address.as_slice()).ok()?;
        if address != self.address {
            return None;
        }
        TradeAction::from_function_name(&entry.function_name.value)
            .filter(|action| self.module_for(*action) == entry.module_name.name.value)
    }
}
