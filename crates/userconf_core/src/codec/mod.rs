//! Value codecs used by the cache layer.
//!
//! # Responsibility
//! - Convert domain values to bytes before they reach the cache store.
//! - Convert stored bytes back to typed values on read.
//!
//! # Invariants
//! - `decode(encode(v)) == v` for every value the codec accepts.
//! - Codec failures are returned as `CodecError`, never panics.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type CodecResult<T> = Result<T, CodecError>;

#[derive(Debug)]
pub enum CodecError {
    Encode { codec: &'static str, message: String },
    Decode { codec: &'static str, message: String },
}

impl Display for CodecError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Encode { codec, message } => write!(f, "{codec} encode failed: {message}"),
            Self::Decode { codec, message } => write!(f, "{codec} decode failed: {message}"),
        }
    }
}

impl Error for CodecError {}

/// Byte codec for cached values.
pub trait Serializer {
    /// Short codec name used in logs and errors.
    fn name(&self) -> &'static str;
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> CodecResult<Vec<u8>>;
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> CodecResult<T>;
}

/// Compact binary codec (MessagePack with named struct fields).
///
/// Named fields keep encoded records self-describing, so a value written as
/// a struct can be read back as a map and vice versa.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessagePackSerializer;

impl Serializer for MessagePackSerializer {
    fn name(&self) -> &'static str {
        "msgpack"
    }

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> CodecResult<Vec<u8>> {
        rmp_serde::to_vec_named(value).map_err(|err| CodecError::Encode {
            codec: self.name(),
            message: err.to_string(),
        })
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> CodecResult<T> {
        rmp_serde::from_slice(bytes).map_err(|err| CodecError::Decode {
            codec: self.name(),
            message: err.to_string(),
        })
    }
}

/// Compact JSON codec, for caches shared with non-Rust readers.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> CodecResult<Vec<u8>> {
        serde_json::to_vec(value).map_err(|err| CodecError::Encode {
            codec: self.name(),
            message: err.to_string(),
        })
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> CodecResult<T> {
        serde_json::from_slice(bytes).map_err(|err| CodecError::Decode {
            codec: self.name(),
            message: err.to_string(),
        })
    }
}
