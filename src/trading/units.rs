//! Conversions between human amounts and the 6-decimal fixed-point integers
//! the market contracts store.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::Serialize;
use std::str::FromStr;

use crate::error::{RelayError, Result};

pub const ON_CHAIN_DECIMALS: u32 = 6;

fn units_per_whole() -> Decimal {
    Decimal::from(1_000_000u32)
}

/// Scales by 10^6 and truncates toward zero. Sub-unit remainders are dropped,
/// never rounded up.
pub fn to_on_chain_units(amount: Decimal) -> Result<u64> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(RelayError::InvalidAmount(format!("{} is negative", amount)));
    }
    amount
        .checked_mul(units_per_whole())
        .map(|scaled| scaled.trunc())
        .and_then(|scaled| scaled.to_u64())
        .ok_or_else(|| RelayError::InvalidAmount(format!("{} is out of range", amount)))
}

pub fn from_on_chain_units(raw: u64) -> Decimal {
    Decimal::from_i128_with_scale(raw as i128, ON_CHAIN_DECIMALS)
}

/// Rejects NaN and infinities, which have no decimal representation.
pub fn decimal_from_f64(value: f64) -> Result<Decimal> {
    if !value.is_finite() {
        return Err(RelayError::InvalidAmount(format!("{} is not finite", value)));
    }
    Decimal::from_f64(value)
        .ok_or_else(|| RelayError::InvalidAmount(format!("{} is out of range", value)))
}

pub fn parse_amount_str(raw: &str) -> Result<Decimal> {
    let trimmed = raw.trim();
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map_err(|_| RelayError::InvalidAmount(format!("`{}` is not a number", raw)))
}

/// Request amounts arrive as JSON strings (`"20"`) or numbers (`20`).
pub fn parse_amount(value: &serde_json::Value) -> Result<Decimal> {
    match value {
        serde_json::Value::String(s) => parse_amount_str(s),
        serde_json::Value::Number(n) => parse_amount_str(&n.to_string()),
        other => Err(RelayError::InvalidAmount(format!("{} is not a number", other))),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuyQuote {
    pub coins_to_receive: Decimal,
    pub scaled_coins: u64,
}

pub fn quote_buy(amount_usd: Decimal, price: Decimal) -> Result<BuyQuote> {
    if price <= Decimal::ZERO {
        return Err(RelayError::InvalidAmount(format!("price {} is not positive", price)));
    }
    let coins_to_receive = amount_usd
        .checked_div(price)
        .ok_or_else(|| RelayError::InvalidAmount(format!("{} / {} overflows", amount_usd, price)))?;
    Ok(BuyQuote {
        scaled_coins: to_on_chain_units(coins_to_receive)?,
        coins_to_receive,
    })
}
