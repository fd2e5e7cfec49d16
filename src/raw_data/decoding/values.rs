//! Canonical, serialization-safe representation of decoded ABI values.
//!
//! Integers of any width are carried as strings so that quantities above
//! 2^53 survive JSON round-trips without precision loss.

use alloy::dyn_abi::DynSolValue;
use alloy::primitives::{I256, U256};
use serde::{Deserialize, Serialize};

/// How integer quantities are rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuantityEncoding {
    /// Base-10 string, e.g. `"12345678901234567890"`
    #[default]
    Decimal,
    /// `0x`-prefixed lowercase hex string, e.g. `"0xab54a98ceb1f0ad2"`
    Hex,
}

/// Serialization settings handed explicitly to the normalizer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializationConfig {
    #[serde(default)]
    pub quantities: QuantityEncoding,
}

impl SerializationConfig {
    pub fn encode_uint(&self, value: U256) -> String {
        match self.quantities {
            QuantityEncoding::Decimal => value.to_string(),
            QuantityEncoding::Hex => format!("0x{:x}", value),
        }
    }

    pub fn encode_int(&self, value: I256) -> String {
        match self.quantities {
            QuantityEncoding::Decimal => value.to_string(),
            QuantityEncoding::Hex if value.is_negative() => {
                format!("-0x{:x}", value.unsigned_abs())
            }
            QuantityEncoding::Hex => format!("0x{:x}", value.unsigned_abs()),
        }
    }
}

/// A decoded value in its canonical JSON shape: booleans stay booleans,
/// sequences and tuples become arrays, everything else is a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CanonicalValue {
    Bool(bool),
    Text(String),
    List(Vec<CanonicalValue>),
}

impl CanonicalValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[CanonicalValue]> {
        match self {
            Self::List(values) => Some(values),
            _ => None,
        }
    }

    /// Interpret the value as an unsigned quantity, accepting both decimal
    /// and `0x`-prefixed hex strings.
    pub fn as_quantity(&self) -> Option<U256> {
        let text = self.as_text()?.trim();
        match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            Some(hex_digits) => U256::from_str_radix(hex_digits, 16).ok(),
            None => U256::from_str_radix(text, 10).ok(),
        }
    }

    pub fn is_nonzero_quantity(&self) -> bool {
        self.as_quantity().is_some_and(|q| !q.is_zero())
    }
}

impl From<&str> for CanonicalValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// Anything that exposes an ordered sequence of decoded fields.
pub trait DecodedFields {
    fn fields(&self) -> &[CanonicalValue];
}

impl DecodedFields for CanonicalValue {
    fn fields(&self) -> &[CanonicalValue] {
        self.as_list().unwrap_or(&[])
    }
}

impl DecodedFields for [CanonicalValue] {
    fn fields(&self) -> &[CanonicalValue] {
        self
    }
}

/// Selects one positional field out of a decoded argument list or tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldSelector(usize);

impl FieldSelector {
    #[cfg(test)]
    pub const fn at(position: usize) -> Self {
        Self(position)
    }

    /// The wallet argument of a staking event (first argument).
    pub const fn wallet() -> Self {
        Self(0)
    }

    /// The staked amount inside a staking position tuple (third slot).
    pub const fn staked_amount() -> Self {
        Self(2)
    }

    pub fn position(&self) -> usize {
        self.0
    }

    pub fn select<'a, D: DecodedFields + ?Sized>(
        &self,
        source: &'a D,
    ) -> Option<&'a CanonicalValue> {
        source.fields().get(self.0)
    }
}

/// Convert a decoded ABI value into its canonical form.
pub fn normalize_value(value: &DynSolValue, serialization: &SerializationConfig) -> CanonicalValue {
    match value {
        DynSolValue::Bool(b) => CanonicalValue::Bool(*b),
        DynSolValue::Uint(v, _) => CanonicalValue::Text(serialization.encode_uint(*v)),
        DynSolValue::Int(v, _) => CanonicalValue::Text(serialization.encode_int(*v)),
        DynSolValue::Address(addr) => CanonicalValue::Text(addr.to_checksum(None)),
        DynSolValue::FixedBytes(word, size) => {
            CanonicalValue::Text(format!("0x{}", hex::encode(&word[..*size])))
        }
        DynSolValue::Function(f) => {
            CanonicalValue::Text(format!("0x{}", hex::encode(f.as_slice())))
        }
        DynSolValue::Bytes(bytes) => CanonicalValue::Text(format!("0x{}", hex::encode(bytes))),
        DynSolValue::String(s) => CanonicalValue::Text(s.clone()),
        DynSolValue::Array(values)
        | DynSolValue::FixedArray(values)
        | DynSolValue::Tuple(values) => CanonicalValue::List(
            values
                .iter()
                .map(|v| normalize_value(v, serialization))
                .collect(),
        ),
        #[allow(unreachable_patterns)]
        other => CanonicalValue::Text(format!("0x{}", hex::encode(other.abi_encode()))),
    }
}
