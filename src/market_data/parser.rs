use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::aptos::types::ByteSeq;
use crate::error::{RelayError, Result};
use crate::market_data::models::{MarketAsset, PortfolioEntry};

const UNKNOWN_SYMBOL: &str = "Unknown";

fn unexpected(message: String) -> RelayError {
    RelayError::UpstreamUnavailable(message)
}

/// Symbols are stored as `vector<u8>`; the node renders those as `0x` hex,
/// older payloads as byte arrays, some views as plain text.
pub fn decode_symbol(raw: &Value) -> String {
    let bytes = match raw {
        Value::String(s) if !s.starts_with("0x") => return s.clone(),
        Value::String(_) | Value::Array(_) | Value::Object(_) => {
            match serde_json::from_value::<ByteSeq>(raw.clone()) {
                Ok(bytes) => bytes,
                Err(_) => return UNKNOWN_SYMBOL.to_string(),
            }
        }
        _ => return UNKNOWN_SYMBOL.to_string(),
    };

    String::from_utf8(bytes.0).unwrap_or_else(|_| UNKNOWN_SYMBOL.to_string())
}

fn parse_u128(raw: &Value, field: &str) -> Result<u128> {
    match raw {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_u64().map(u128::from),
        _ => None,
    }
    .ok_or_else(|| unexpected(format!("{} is not an unsigned integer: {}", field, raw)))
}

/// `last_update` is microseconds since the epoch.
fn parse_timestamp(raw: &Value) -> Option<DateTime<Utc>> {
    let micros = parse_u128(raw, "last_update").ok()?;
    if micros == 0 {
        return None;
    }
    i64::try_from(micros).ok().and_then(DateTime::<Utc>::from_timestamp_micros)
}

/// Reads the `coins` vector of a `Market` resource.
pub fn parse_market_resource(data: &Value) -> Result<Vec<MarketAsset>> {
    let coins = data["coins"]
        .as_array()
        .ok_or_else(|| unexpected("market resource has no coins vector".to_string()))?;

    coins
        .iter()
        .map(|coin| {
            MarketAsset::from_on_chain(
                decode_symbol(&coin["symbol"]),
                parse_u128(&coin["current_value"], "current_value")?,
                parse_timestamp(&coin["last_update"]),
            )
        })
        .collect()
}

/// Reads `[{symbol, amount}, ...]` as returned by the portfolio view function
/// or stored in the `Portfolio` resource.
pub fn parse_portfolio_entries(entries: &Value) -> Result<Vec<PortfolioEntry>> {
    let entries = entries
        .as_array()
        .ok_or_else(|| unexpected(format!("portfolio is not a list: {}", entries)))?;

    entries
        .iter()
        .map(|entry| {
            let raw = parse_u128(&entry["amount"], "amount")?;
            let raw = u64::try_from(raw).map_err(|_| unexpected(format!("amount {} exceeds u64", raw)))?;
            Ok(PortfolioEntry::from_raw(decode_symbol(&entry["symbol"]), raw))
        })
        .collect()
}

/// View functions return one value per declared return; the portfolio is the first.
pub fn parse_view_portfolio(values: &[Value]) -> Result<Vec<PortfolioEntry>> {
    let first = values
        .first()
        .ok_or_else(|| unexpected("get_portfolio returned nothing".to_string()))?;
    parse_portfolio_entries(first)
}
