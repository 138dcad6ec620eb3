//! Turns the byte-encoded arguments of an unsigned transaction back into the
//! values the user asked for.

use serde::Serialize;

use crate::aptos::types::{
    display_string, ByteSeq, MoveType, PendingTransaction, WalletPayload,
};
use crate::error::{RelayError, Result};

/// Widest integer a Move entry function takes that fits the decoder.
const MAX_INTEGER_WIDTH: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum DecodedArg {
    Integer(#[serde(with = "display_string")] u128),
    Bool(bool),
    Address(String),
    Text(String),
    Bytes(String),
}

impl DecodedArg {
    fn to_wallet_arg(&self) -> serde_json::Value {
        match self {
            DecodedArg::Integer(v) => serde_json::Value::String(v.to_string()),
            DecodedArg::Bool(v) => serde_json::Value::Bool(*v),
            DecodedArg::Address(s) | DecodedArg::Text(s) | DecodedArg::Bytes(s) => {
                serde_json::Value::String(s.clone())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedTransaction {
    pub function_id: String,
    pub sender: String,
    pub arguments: Vec<DecodedArg>,
}

impl DecodedTransaction {
    pub fn to_wallet_payload(&self) -> WalletPayload {
        WalletPayload {
            kind: WalletPayload::ENTRY_FUNCTION.to_string(),
            function: self.function_id.clone(),
            type_arguments: Vec::new(),
            arguments: self.arguments.iter().map(DecodedArg::to_wallet_arg).collect(),
        }
    }
}

fn malformed(message: impl Into<String>) -> RelayError {
    RelayError::MalformedPendingTransaction(message.into())
}

/// Sums `byte[i] * 256^i`. Arithmetic, not shifts, so the meaning does not
/// depend on the width of the host's native integers.
pub fn decode_le_uint(bytes: &[u8]) -> Result<u128> {
    if bytes.is_empty() {
        return Err(malformed("empty integer argument"));
    }
    if bytes.len() > MAX_INTEGER_WIDTH {
        return Err(malformed(format!("{}-byte integer is wider than 128 bits", bytes.len())));
    }

    let mut value: u128 = 0;
    let mut place: u128 = 1;
    for (i, byte) in bytes.iter().enumerate() {
        value += u128::from(*byte) * place;
        if i + 1 < bytes.len() {
            place *= 256;
        }
    }
    Ok(value)
}

/// Concatenates bytes `0..N-1` as lowercase hex behind `0x`.
pub fn hex_address(bytes: &ByteSeq, field: &str) -> Result<String> {
    if bytes.is_empty() {
        return Err(malformed(format!("{} is empty", field)));
    }
    Ok(bytes.to_hex())
}

fn read_uleb128(bytes: &[u8]) -> Result<(usize, usize)> {
    let mut value: u64 = 0;
    for (i, byte) in bytes.iter().enumerate().take(5) {
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value as usize, i + 1));
        }
    }
    Err(malformed("invalid ULEB128 length prefix"))
}

fn length_prefixed(bytes: &[u8]) -> Result<&[u8]> {
    let (len, consumed) = read_uleb128(bytes)?;
    let body = &bytes[consumed..];
    if body.len() != len {
        return Err(malformed(format!(
            "vector declares {} bytes but carries {}",
            len,
            body.len()
        )));
    }
    Ok(body)
}

fn function_id(pending: &PendingTransaction) -> Result<String> {
    let entry = &pending.payload.value;
    let address = hex_address(&entry.module_name.address.address, "module address")?;
    if entry.module_name.name.value.is_empty() {
        return Err(malformed("module name is empty"));
    }
    if entry.function_name.value.is_empty() {
        return Err(malformed("function name is empty"));
    }
    Ok(format!(
        "{}::{}::{}",
        address, entry.module_name.name.value, entry.function_name.value
    ))
}

/// Decodes without knowing the target signature: arguments up to 16 bytes
/// are read as little-endian unsigned integers, 32-byte arguments as
/// addresses, anything else is returned as raw hex.
pub fn decode_pending_transaction(pending: &PendingTransaction) -> Result<DecodedTransaction> {
    let arguments = pending
        .payload
        .value
        .args
        .iter()
        .map(|arg| match arg.len() {
            0..=MAX_INTEGER_WIDTH => decode_le_uint(arg.as_slice()).map(DecodedArg::Integer),
            32 => Ok(DecodedArg::Address(arg.to_hex())),
            _ => Ok(DecodedArg::Bytes(arg.to_hex())),
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(DecodedTransaction {
        function_id: function_id(pending)?,
        sender: hex_address(&pending.sender.address, "sender")?,
        arguments,
    })
}

fn decode_typed(arg: &ByteSeq, ty: MoveType, position: usize) -> Result<DecodedArg> {
    let bytes = arg.as_slice();
    if let Some(width) = ty.fixed_width() {
        if bytes.len() != width {
            return Err(malformed(format!(
                "argument {} is {} bytes, {:?} needs {}",
                position,
                bytes.len(),
                ty,
                width
            )));
        }
    }

    match ty {
        MoveType::U8 | MoveType::U16 | MoveType::U32 | MoveType::U64 | MoveType::U128 => {
            decode_le_uint(bytes).map(DecodedArg::Integer)
        }
        MoveType::Bool => match bytes[0] {
            0 => Ok(DecodedArg::Bool(false)),
            1 => Ok(DecodedArg::Bool(true)),
            other => Err(malformed(format!("argument {} is not a bool: {}", position, other))),
        },
        MoveType::Address => Ok(DecodedArg::Address(arg.to_hex())),
        MoveType::Bytes => {
            let body = length_prefixed(bytes)?;
            Ok(DecodedArg::Bytes(format!("0x{}", hex::encode(body))))
        }
        MoveType::String => {
            let body = length_prefixed(bytes)?;
            String::from_utf8(body.to_vec())
                .map(DecodedArg::Text)
                .map_err(|_| malformed(format!("argument {} is not UTF-8", position)))
        }
    }
}

/// Decodes each argument against the declared parameter types.
pub fn decode_with_signature(pending: &PendingTransaction, signature: &[MoveType]) -> Result<DecodedTransaction> {
    let args = &pending.payload.value.args;
    if args.len() != signature.len() {
        return Err(malformed(format!(
            "expected {} arguments, found {}",
            signature.len(),
            args.len()
        )));
    }

    let arguments = args
        .iter()
        .zip(signature)
        .enumerate()
        .map(|(position, (arg, ty))| decode_typed(arg, *ty, position))
        .collect::<Result<Vec<_>>>()?;

    Ok(DecodedTransaction {
        function_id: function_id(pending)?,
        sender: hex_address(&pending.sender.address, "sender")?,
        arguments,
    })
}
