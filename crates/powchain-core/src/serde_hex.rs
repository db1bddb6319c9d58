//! Serde helpers that render digests and payloads as `0x`-prefixed lowercase hex.
//!
//! - `hex_vec`: `Vec<u8>` of any length (block payloads).
//! - `hex32`: a [`Hash`] with exact length enforcement.
//! - `opt_hex32`: an optional [`Hash`]; `None` (the genesis parent) is `null`.

use serde::{Deserialize, Deserializer, Serializer};
use thiserror::Error;

use crate::constants::HASH_SIZE;
use crate::Hash;

#[derive(Debug, Error)]
pub enum HexSerdeError {
    #[error("missing 0x prefix")]
    MissingPrefix,

    #[error("invalid hex encoding: {0}")]
    InvalidHex(String),

    #[error("length mismatch: expected {expected} bytes, got {actual} bytes")]
    LengthMismatch { expected: usize, actual: usize },
}

fn encode_prefixed(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("0x");
    out.push_str(&hex::encode(bytes));
    out
}

fn decode_prefixed(s: &str) -> Result<Vec<u8>, HexSerdeError> {
    let digits = s.strip_prefix("0x").ok_or(HexSerdeError::MissingPrefix)?;
    hex::decode(digits).map_err(|e| HexSerdeError::InvalidHex(e.to_string()))
}

fn decode_hash(s: &str) -> Result<Hash, HexSerdeError> {
    let bytes = decode_prefixed(s)?;
    if bytes.len() != HASH_SIZE {
        return Err(HexSerdeError::LengthMismatch {
            expected: HASH_SIZE,
            actual: bytes.len(),
        });
    }
    let mut out = [0u8; HASH_SIZE];
    out.copy_from_slice(&bytes);
    Ok(out)
}

pub mod hex_vec {
    use super::*;

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&encode_prefixed(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        decode_prefixed(&s).map_err(serde::de::Error::custom)
    }
}

pub mod hex32 {
    use super::*;

    pub fn serialize<S>(bytes: &Hash, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&encode_prefixed(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Hash, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        decode_hash(&s).map_err(serde::de::Error::custom)
    }
}

pub mod opt_hex32 {
    use super::*;

    pub fn serialize<S>(bytes: &Option<Hash>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match bytes {
            Some(b) => serializer.serialize_str(&encode_prefixed(b)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Hash>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: Option<String> = Option::deserialize(deserializer)?;
        s.map(|s| decode_hash(&s))
            .transpose()
            .map_err(serde::de::Error::custom)
    }
}
