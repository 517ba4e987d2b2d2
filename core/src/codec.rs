//! The boundary between raw bodies and structured values.
//!
//! The transport only ever sees JSON text; turning domain types into
//! `serde_json::Value` and back happens here. Single objects and batches go
//! through separate rules so a caller cannot send an array where the
//! appliance expects an object by accident.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Result, SdkError};

/// Converts between JSON text and values.
pub trait Codec: Send + Sync {
    /// Encode a single value. Arrays are rejected; use `to_json_array`.
    fn to_json(&self, value: &Value) -> Result<String>;

    /// Encode a batch as a JSON array.
    fn to_json_array(&self, values: &[Value]) -> Result<String>;

    fn from_json(&self, body: &str) -> Result<Value>;
}

/// serde_json-backed codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn to_json(&self, value: &Value) -> Result<String> {
        if value.is_array() {
            return Err(SdkError::codec(
                "array passed to the single-object rule",
            ));
        }
        serde_json::to_string(value).map_err(|e| SdkError::codec(e.to_string()))
    }

    fn to_json_array(&self, values: &[Value]) -> Result<String> {
        serde_json::to_string(values).map_err(|e| SdkError::codec(e.to_string()))
    }

    fn from_json(&self, body: &str) -> Result<Value> {
        serde_json::from_str(body).map_err(|e| SdkError::codec(e.to_string()))
    }
}

/// Turn a domain value into JSON for an `Arg`.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| SdkError::codec(e.to_string()))
}

/// Shape a JSON value into a domain type.
pub fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| SdkError::codec(e.to_string()))
}

/// Parse a body with `codec` and shape it into `T`.
pub fn decode_body<T: DeserializeOwned>(codec: &dyn Codec, body: &str) -> Result<T> {
    if body.trim().is_empty() {
        return Err(SdkError::no_response());
    }
    decode(codec.from_json(body)?)
}
