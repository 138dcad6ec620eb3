use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{RelayError, Result};

/// Serializes numbers as decimal strings and accepts either form back, the way
/// the node and the wallet exchange u64/u128 values.
pub mod display_string {
    use serde::de::{self, Deserialize, Deserializer};
    use serde::Serializer;
    use std::fmt::Display;
    use std::str::FromStr;

    pub fn serialize<T: Display, S: Serializer>(value: &T, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        T: FromStr,
        T::Err: Display,
        D: Deserializer<'de>,
    {
        #[derive(serde::Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(text) => text.parse().map_err(de::Error::custom),
            Raw::Number(n) => n.to_string().parse().map_err(de::Error::custom),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccountAddress([u8; 32]);

impl AccountAddress {
    pub const LENGTH: usize = 32;

    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::LENGTH {
            return Err(RelayError::InvalidInput(format!(
                "Address must be {} bytes, got {}",
                Self::LENGTH,
                bytes.len()
            )));
        }
        let mut addr = [0u8; 32];
        addr.copy_from_slice(bytes);
        Ok(Self(addr))
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl FromStr for AccountAddress {
    type Err = RelayError;

    /// Short forms such as `0x1` are left-padded with zeros.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || RelayError::InvalidInput("Invalid wallet address format".to_string());

        let hex_clean = s.strip_prefix("0x").ok_or_else(invalid)?;
        if hex_clean.is_empty() || hex_clean.len() > 64 {
            return Err(invalid());
        }
        let hex_padded = format!("{:0>64}", hex_clean);
        let bytes = hex::decode(hex_padded).map_err(|_| invalid())?;
        Self::from_bytes(&bytes)
    }
}

impl fmt::Display for AccountAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for AccountAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for AccountAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// Byte buffer indexed `0..N-1`.
///
/// Deserializes from a JSON array, from the index-keyed object form produced
/// by JavaScript `Uint8Array` serialization (`{"0": 1, "1": 0}`), or from a
/// `0x`-prefixed hex string. Always serializes as an array.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ByteSeq(pub Vec<u8>);

impl ByteSeq {
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.0))
    }
}

impl From<Vec<u8>> for ByteSeq {
    fn from(bytes: Vec<u8>) -> Self {
        ByteSeq(bytes)
    }
}

impl Serialize for ByteSeq {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter())
    }
}

impl<'de> Deserialize<'de> for ByteSeq {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct ByteSeqVisitor;

        impl<'de> Visitor<'de> for ByteSeqVisitor {
            type Value = ByteSeq;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a byte array, an index-keyed byte map, or a 0x-prefixed hex string")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<ByteSeq, A::Error> {
                let mut bytes = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(byte) = seq.next_element::<u8>()? {
                    bytes.push(byte);
                }
                Ok(ByteSeq(bytes))
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<ByteSeq, A::Error> {
                let mut indexed = BTreeMap::new();
                while let Some((key, byte)) = map.next_entry::<String, u8>()? {
                    let index: usize = key.parse().map_err(|_| {
                        de::Error::custom(format!("byte index `{}` is not a number", key))
                    })?;
                    if indexed.insert(index, byte).is_some() {
                        return Err(de::Error::custom(format!("duplicate byte index {}", index)));
                    }
                }
                for (expected, index) in indexed.keys().enumerate() {
                    if *index != expected {
                        return Err(de::Error::custom(format!("missing byte index {}", expected)));
                    }
                }
                Ok(ByteSeq(indexed.into_values().collect()))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<ByteSeq, E> {
                let digits = v
                    .strip_prefix("0x")
                    .ok_or_else(|| E::custom("hex byte string must start with 0x"))?;
                hex::decode(digits).map(ByteSeq).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(ByteSeqVisitor)
    }
}

/// Declared type of an entry-function parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveType {
    U8,
    U16,
    U32,
    U64,
    U128,
    Bool,
    Address,
    /// `vector<u8>`
    Bytes,
    /// `0x1::string::String`
    String,
}

impl MoveType {
    /// Encoded width for fixed-size types.
    pub fn fixed_width(&self) -> Option<usize> {
        match self {
            MoveType::U8 | MoveType::Bool => Some(1),
            MoveType::U16 => Some(2),
            MoveType::U32 => Some(4),
            MoveType::U64 => Some(8),
            MoveType::U128 => Some(16),
            MoveType::Address => Some(AccountAddress::LENGTH),
            MoveType::Bytes | MoveType::String => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveValue {
    U8(u8),
    U64(u64),
    U128(u128),
    Bool(bool),
    Address(AccountAddress),
    Bytes(Vec<u8>),
    String(String),
}

impl MoveValue {
    /// BCS encoding as carried in an entry-function argument slot.
    pub fn to_bcs(&self) -> std::result::Result<Vec<u8>, bcs::Error> {
        match self {
            MoveValue::U8(v) => bcs::to_bytes(v),
            MoveValue::U64(v) => bcs::to_bytes(v),
            MoveValue::U128(v) => bcs::to_bytes(v),
            MoveValue::Bool(v) => bcs::to_bytes(v),
            MoveValue::Address(addr) => bcs::to_bytes(addr.as_bytes()),
            MoveValue::Bytes(bytes) => bcs::to_bytes(bytes),
            MoveValue::String(text) => bcs::to_bytes(text),
        }
    }

    /// JSON form accepted by browser wallets in an `entry_function_payload`.
    pub fn to_wallet_arg(&self) -> serde_json::Value {
        match self {
            MoveValue::U8(v) => serde_json::Value::String(v.to_string()),
            MoveValue::U64(v) => serde_json::Value::String(v.to_string()),
            MoveValue::U128(v) => serde_json::Value::String(v.to_string()),
            MoveValue::Bool(v) => serde_json::Value::Bool(*v),
            MoveValue::Address(addr) => serde_json::Value::String(addr.to_hex()),
            MoveValue::Bytes(bytes) => serde_json::Value::String(format!("0x{}", hex::encode(bytes))),
            MoveValue::String(text) => serde_json::Value::String(text.clone()),
        }
    }
}

/// Entry-function call descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionPayload {
    pub module_address: AccountAddress,
    pub module_name: String,
    pub function_name: String,
    pub type_arguments: Vec<String>,
    pub arguments: Vec<MoveValue>,
}

impl TransactionPayload {
    pub fn function_id(&self) -> String {
        format!("{}::{}::{}", self.module_address, self.module_name, self.function_name)
    }

    pub fn to_wallet_payload(&self) -> WalletPayload {
        WalletPayload {
            kind: WalletPayload::ENTRY_FUNCTION.to_string(),
            function: self.function_id(),
            type_arguments: self.type_arguments.clone(),
            arguments: self.arguments.iter().map(MoveValue::to_wallet_arg).collect(),
        }
    }
}

/// Payload handed to `signAndSubmitTransaction` in the browser wallet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WalletPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: String,
    pub type_arguments: Vec<String>,
    pub arguments: Vec<serde_json::Value>,
}

impl WalletPayload {
    pub const ENTRY_FUNCTION: &'static str = "entry_function_payload";
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AddressField {
    pub address: ByteSeq,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Identifier {
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModuleIdField {
    pub address: AddressField,
    pub name: Identifier,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntryFunctionField {
    pub module_name: ModuleIdField,
    pub function_name: Identifier,
    #[serde(default)]
    pub ty_args: Vec<serde_json::Value>,
    pub args: Vec<ByteSeq>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PayloadField {
    pub value: EntryFunctionField,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChainIdField {
    pub value: u8,
}

#[derive(Debug, Clone, Copy)]
pub struct GasOptions {
    pub max_gas_amount: u64,
    pub gas_unit_price: u64,
    pub expiration_timestamp_secs: u64,
}

/// Unsigned raw transaction, shaped like the TypeScript SDK's `RawTransaction`
/// once serialized to JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingTransaction {
    pub sender: AddressField,
    #[serde(with = "display_string")]
    pub sequence_number: u64,
    pub payload: PayloadField,
    #[serde(with = "display_string")]
    pub max_gas_amount: u64,
    #[serde(with = "display_string")]
    pub gas_unit_price: u64,
    #[serde(with = "display_string")]
    pub expiration_timestamp_secs: u64,
    pub chain_id: ChainIdField,
}

impl PendingTransaction {
    pub fn new(
        sender: &AccountAddress,
        sequence_number: u64,
        chain_id: u8,
        payload: &TransactionPayload,
        gas: GasOptions,
    ) -> std::result::Result<Self, bcs::Error> {
        let args = payload
            .arguments
            .iter()
            .map(|arg| arg.to_bcs().map(ByteSeq))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self {
            sender: AddressField {
                address: ByteSeq(sender.as_bytes().to_vec()),
            },
            sequence_number,
            payload: PayloadField {
                value: EntryFunctionField {
                    module_name: ModuleIdField {
                        address: AddressField {
                            address: ByteSeq(payload.module_address.as_bytes().to_vec()),
                        },
                        name: Identifier {
                            value: payload.module_name.clone(),
                        },
                    },
                    function_name: Identifier {
                        value: payload.function_name.clone(),
                    },
                    ty_args: Vec::new(),
                    args,
                },
            },
            max_gas_amount: gas.max_gas_amount,
            gas_unit_price: gas.gas_unit_price,
            expiration_timestamp_secs: gas.expiration_timestamp_secs,
            chain_id: ChainIdField { value: chain_id },
        })
    }

    /// Parses a pending transaction relayed as loose JSON.
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| RelayError::MalformedPendingTransaction(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn short_address_is_left_padded() {
        let addr: AccountAddress = "0x1".parse().unwrap();
        assert_eq!(addr.as_bytes()[31], 1);
        assert!(addr.as_bytes()[..31].iter().all(|b| *b == 0));
    }

    #[test]
    fn address_without_prefix_is_rejected() {
        let err = "123".parse::<AccountAddress>().unwrap_err();
        assert_eq!(err.to_string(), "Invalid wallet address format");
        assert!("0x".parse::<AccountAddress>().is_err());
        assert!("0xzz".parse::<AccountAddress>().is_err());
    }

    #[test]
    fn byte_seq_accepts_index_keyed_objects() {
        let bytes: ByteSeq = serde_json::from_value(json!({"1": 0, "0": 1})).unwrap();
        assert_eq!(bytes.as_slice(), &[1, 0]);
    }

    #[test]
    fn byte_seq_rejects_gaps_and_out_of_range_values() {
        assert!(serde_json::from_value::<ByteSeq>(json!({"0": 1, "2": 0})).is_err());
        assert!(serde_json::from_value::<ByteSeq>(json!([1, 256])).is_err());
        assert!(serde_json::from_value::<ByteSeq>(json!("425443")).is_err());
    }

    #[test]
    fn byte_seq_accepts_hex_strings() {
        let bytes: ByteSeq = serde_json::from_value(json!("0x425443")).unwrap();
        assert_eq!(bytes.as_slice(), b"BTC");
    }

    #[test]
    fn integer_arguments_are_little_endian() {
        assert_eq!(MoveValue::U64(256).to_bcs().unwrap(), vec![0, 1, 0, 0, 0, 0, 0, 0]);
        assert_eq!(MoveValue::Bytes(b"BTC".to_vec()).to_bcs().unwrap(), vec![3, b'B', b'T', b'C']);
    }

    #[test]
    fn wallet_payload_renders_u64_as_strings() {
        let payload = TransactionPayload {
            module_address: "0x1".parse().unwrap(),
            module_name: "mock_coins".to_string(),
            function_name: "buy_coin".to_string(),
            type_arguments: vec![],
            arguments: vec![MoveValue::U64(0), MoveValue::U64(2_000_000)],
        };
        let wallet = serde_json::to_value(payload.to_wallet_payload()).unwrap();
        assert_eq!(wallet["type"], "entry_function_payload");
        assert_eq!(wallet["arguments"], json!(["0", "2000000"]));
    }

    #[test]
    fn pending_transaction_requires_nested_fields() {
        let err = PendingTransaction::from_json(json!({"sender": {"address": []}})).unwrap_err();
        assert!(matches!(err, RelayError::MalformedPendingTransaction(_)));
    }
}
