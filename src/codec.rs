//! Value encoding for the cache-aside layer
//!
//! The cache backend stores opaque bytes. The codec is picked once, from
//! configuration, and every typed `get`/`set` goes through it.

use crate::error::{Result, StreamError};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Serialization strategy for cached values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueCodec {
    /// Human-readable, easy to inspect in the backend
    #[default]
    Json,
    /// Compact binary encoding
    Bincode,
}

impl ValueCodec {
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Bytes> {
        let encoded = match self {
            ValueCodec::Json => serde_json::to_vec(value)
                .map_err(|e| StreamError::SerializationError(format!("json encode: {}", e)))?,
            ValueCodec::Bincode => bincode::serialize(value)
                .map_err(|e| StreamError::SerializationError(format!("bincode encode: {}", e)))?,
        };
        Ok(Bytes::from(encoded))
    }

    pub fn decode<T: DeserializeOwned>(&self, raw: &[u8]) -> Result<T> {
        match self {
            ValueCodec::Json => serde_json::from_slice(raw)
                .map_err(|e| StreamError::SerializationError(format!("json decode: {}", e))),
            ValueCodec::Bincode => bincode::deserialize(raw)
                .map_err(|e| StreamError::SerializationError(format!("bincode decode: {}", e))),
        }
    }
}
