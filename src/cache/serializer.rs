//! Value Serializer Module
//!
//! Encodes cache values for backends that store opaque blobs.
//!
//! # Formats
//! - `json` - serde_json text (default)
//! - `binary` - bincode over a tagged value representation
//! - `msgpack` - MessagePack, the compact binary form

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::error::{CacheError, Result};

// == Serializer ==
/// Value encoding selected when a driver is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Serializer {
    #[default]
    Json,
    Binary,
    MsgPack,
}

impl Serializer {
    /// Resolves a serializer from its configuration name.
    ///
    /// Accepts `json`, `binary` (aliases `bincode`, `gob`) and `msgpack`
    /// (alias `compact`). Matching is case-insensitive; an empty name selects JSON.
    pub fn from_name(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "json" => Ok(Serializer::Json),
            "binary" | "bincode" | "gob" => Ok(Serializer::Binary),
            "msgpack" | "compact" => Ok(Serializer::MsgPack),
            other => Err(CacheError::Config(format!(
                "unknown serializer {:?}, expected one of json, binary, msgpack",
                other
            ))),
        }
    }

    /// Canonical name of the format.
    pub fn name(&self) -> &'static str {
        match self {
            Serializer::Json => "json",
            Serializer::Binary => "binary",
            Serializer::MsgPack => "msgpack",
        }
    }

    // == Encode ==
    pub fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        match self {
            Serializer::Json => serde_json::to_vec(value).map_err(encode_error),
            Serializer::Binary => bincode::serialize(&Tagged::from(value)).map_err(encode_error),
            Serializer::MsgPack => rmp_serde::to_vec_named(value).map_err(encode_error),
        }
    }

    // == Decode ==
    pub fn decode(&self, bytes: &[u8]) -> Result<Value> {
        match self {
            Serializer::Json => serde_json::from_slice(bytes).map_err(decode_error),
            Serializer::Binary => bincode::deserialize::<Tagged>(bytes)
                .map(Value::from)
                .map_err(decode_error),
            Serializer::MsgPack => rmp_serde::from_slice(bytes).map_err(decode_error),
        }
    }
}

impl FromStr for Serializer {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s)
    }
}

impl fmt::Display for Serializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn encode_error(e: impl fmt::Display) -> CacheError {
    CacheError::Serialization(format!("encode failed: {}", e))
}

fn decode_error(e: impl fmt::Display) -> CacheError {
    CacheError::Serialization(format!("decode failed: {}", e))
}

// == Tagged Value ==
/// Self-describing mirror of `serde_json::Value`.
///
/// bincode cannot drive `deserialize_any`, so values go through this enum.
#[derive(Debug, Serialize, Deserialize)]
enum Tagged {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    Array(Vec<Tagged>),
    Object(Vec<(String, Tagged)>),
}

impl From<&Value> for Tagged {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Tagged::Null,
            Value::Bool(b) => Tagged::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Tagged::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Tagged::UInt(u)
                } else {
                    Tagged::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => Tagged::String(s.clone()),
            Value::Array(items) => Tagged::Array(items.iter().map(Tagged::from).collect()),
            Value::Object(map) => Tagged::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Tagged::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<Tagged> for Value {
    fn from(tagged: Tagged) -> Self {
        match tagged {
            Tagged::Null => Value::Null,
            Tagged::Bool(b) => Value::Bool(b),
            Tagged::Int(i) => Value::from(i),
            Tagged::UInt(u) => Value::from(u),
            Tagged::Float(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
            Tagged::String(s) => Value::String(s),
            Tagged::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            Tagged::Object(pairs) => Value::Object(
                pairs
                    .into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect::<Map<String, Value>>(),
            ),
        }
    }
}
