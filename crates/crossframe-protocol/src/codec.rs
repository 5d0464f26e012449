//! Text codec for envelopes and values.
//!
//! Everything that leaves a context as text (URL fields, durable store
//! entries, form fields) goes through here so byte buffers keep their tagged
//! encoding.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::value::Value;

/// Codec failures
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode a value as JSON text.
pub fn stringify<T: Serialize + ?Sized>(value: &T) -> Result<String, CodecError> {
    Ok(serde_json::to_string(value)?)
}

/// Decode JSON text.
pub fn parse<T: DeserializeOwned>(text: &str) -> Result<T, CodecError> {
    Ok(serde_json::from_str(text)?)
}

/// Convert a typed envelope into a [`Value`] for a structured channel.
pub fn to_value<T: Serialize + ?Sized>(value: &T) -> Result<Value, CodecError> {
    Ok(Value::from_json(serde_json::to_value(value)?))
}

/// Read a typed envelope back out of a [`Value`].
pub fn from_value<T: DeserializeOwned>(value: &Value) -> Result<T, CodecError> {
    Ok(serde_json::from_value(value.to_json())?)
}
