use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use crate::aptos::types::display_string;
use crate::error::{RelayError, Result};
use crate::trading::units::{from_on_chain_units, ON_CHAIN_DECIMALS};

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MarketAsset {
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub human_price: Decimal,
    #[serde(with = "display_string")]
    pub on_chain_price: u128,
    pub last_update: Option<DateTime<Utc>>,
}

impl MarketAsset {
    /// From the contract's raw 6-decimal price.
    pub fn from_on_chain(symbol: String, on_chain_price: u128, last_update: Option<DateTime<Utc>>) -> Result<Self> {
        let human_price = i128::try_from(on_chain_price)
            .ok()
            .and_then(|raw| Decimal::try_from_i128_with_scale(raw, ON_CHAIN_DECIMALS).ok())
            .ok_or_else(|| RelayError::InvalidAmount(format!("on-chain price {} is out of range", on_chain_price)))?;

        Ok(Self {
            symbol,
            human_price,
            on_chain_price,
            last_update,
        })
    }

    /// From a feed quote; the on-chain price is rounded half away from zero.
    pub fn from_human(symbol: String, human_price: Decimal) -> Result<Self> {
        if human_price.is_sign_negative() {
            return Err(RelayError::InvalidAmount(format!("{} price {} is negative", symbol, human_price)));
        }
        let on_chain_price = human_price
            .checked_mul(Decimal::from(1_000_000u32))
            .map(|scaled| scaled.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
            .and_then(|scaled| scaled.to_u128())
            .ok_or_else(|| RelayError::InvalidAmount(format!("{} price {} is out of range", symbol, human_price)))?;

        Ok(Self {
            symbol,
            human_price,
            on_chain_price,
            last_update: None,
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotSource {
    None,
    OnChain,
    PriceFeed,
}

/// One refresh cycle's view of both markets. Replaced wholesale, never edited.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MarketSnapshot {
    pub cryptos: Vec<MarketAsset>,
    pub stocks: Vec<MarketAsset>,
    pub source: SnapshotSource,
    pub refreshed_at: Option<DateTime<Utc>>,
    /// Set when the data did not come from a successful live fetch.
    pub is_cached: bool,
}

fn normalize_symbol(symbol: &str) -> String {
    let upper = symbol.trim().to_uppercase();
    upper.strip_suffix("-USD").map(str::to_string).unwrap_or(upper)
}

impl MarketSnapshot {
    pub fn empty() -> Self {
        Self {
            cryptos: Vec::new(),
            stocks: Vec::new(),
            source: SnapshotSource::None,
            refreshed_at: None,
            is_cached: false,
        }
    }

    pub fn is_populated(&self) -> bool {
        self.refreshed_at.is_some()
    }

    pub fn assets(&self, stocks: bool) -> &[MarketAsset] {
        if stocks {
            &self.stocks
        } else {
            &self.cryptos
        }
    }

    /// Case-insensitive; `BTC` and `BTC-USD` name the same asset.
    pub fn find(&self, symbol: &str, stocks: bool) -> Option<(usize, &MarketAsset)> {
        let wanted = normalize_symbol(symbol);
        self.assets(stocks)
            .iter()
            .enumerate()
            .find(|(_, asset)| normalize_symbol(&asset.symbol) == wanted)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioEntry {
    pub symbol: String,
    #[serde(with = "display_string")]
    pub raw_amount: u64,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub display_amount: String,
}

impl PortfolioEntry {
    pub fn from_raw(symbol: String, raw_amount: u64) -> Self {
        let amount = from_on_chain_units(raw_amount);
        Self {
            symbol,
            raw_amount,
            display_amount: amount.to_string(),
            amount,
        }
    }
}
