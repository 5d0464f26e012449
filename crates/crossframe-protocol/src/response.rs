//! Response envelope.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::codec::{self, CodecError};
use crate::error::ErrorInfo;
use crate::request::{EnvelopeError, RequestId};
use crate::value::Value;

/// Outcome of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Ok,
    Error,
}

impl ResponseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStatus::Ok => "ok",
            ResponseStatus::Error => "error",
        }
    }

    /// Anything other than `ok` is an error.
    pub fn parse(s: &str) -> Self {
        if s == "ok" {
            ResponseStatus::Ok
        } else {
            ResponseStatus::Error
        }
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response envelope.
///
/// On `error`, `result` holds the normalized `{ message, stack?, name? }`
/// shape produced by [`ErrorInfo::to_value`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Request id echoed back
    pub id: RequestId,
    /// Outcome
    pub status: ResponseStatus,
    /// Result or normalized error
    #[serde(default)]
    pub result: Value,
}

impl ResponseEnvelope {
    pub fn ok(id: RequestId, result: Value) -> Self {
        Self {
            id,
            status: ResponseStatus::Ok,
            result,
        }
    }

    pub fn error(id: RequestId, error: &ErrorInfo) -> Self {
        Self {
            id,
            status: ResponseStatus::Error,
            result: error.to_value(),
        }
    }

    /// The handshake reply.
    pub fn pong() -> Self {
        Self::ok(RequestId::handshake(), Value::from(crate::PONG_RESULT))
    }

    pub fn is_pong(&self) -> bool {
        self.id.is_handshake()
            && self.status == ResponseStatus::Ok
            && self.result.as_str() == Some(crate::PONG_RESULT)
    }

    pub fn to_value(&self) -> Result<Value, CodecError> {
        codec::to_value(self)
    }

    /// Read a response out of a structured message.
    ///
    /// A message without a status is not a reply at all; one without an id
    /// cannot be correlated.
    pub fn from_value(value: &Value) -> Result<Self, EnvelopeError> {
        let id = value
            .get("id")
            .and_then(Value::as_u64)
            .and_then(RequestId::new)
            .ok_or(EnvelopeError::MissingId)?;
        let status = value
            .get("status")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(ResponseStatus::parse)
            .ok_or(EnvelopeError::MissingStatus(id))?;
        let result = value.get("result").cloned().unwrap_or_default();

        Ok(Self { id, status, result })
    }
}

/// A response together with the origin it arrived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub origin: String,
    pub data: ResponseEnvelope,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: u64) -> RequestId {
        RequestId::new(raw).unwrap()
    }

    #[test]
    fn test_response_from_value() {
        let value = Value::from(serde_json::json!({"status": "ok", "result": "x", "id": 7}));
        let response = ResponseEnvelope::from_value(&value).unwrap();
        assert_eq!(response, ResponseEnvelope::ok(id(7), Value::from("x")));
    }

    #[test]
    fn test_response_requires_status_and_id() {
        let no_status = Value::from(serde_json::json!({"result": "x", "id": 7}));
        assert_eq!(
            ResponseEnvelope::from_value(&no_status),
            Err(EnvelopeError::MissingStatus(id(7)))
        );

        let no_id = Value::from(serde_json::json!({"status": "ok", "result": "x"}));
        assert_eq!(ResponseEnvelope::from_value(&no_id), Err(EnvelopeError::MissingId));
    }

    #[test]
    fn test_unknown_status_is_error() {
        let value = Value::from(serde_json::json!({"status": "weird", "id": 4}));
        assert_eq!(
            ResponseEnvelope::from_value(&value).unwrap().status,
            ResponseStatus::Error
        );
    }

    #[test]
    fn test_pong() {
        assert!(ResponseEnvelope::pong().is_pong());
        assert!(!ResponseEnvelope::ok(id(2), Value::from("pong")).is_pong());
    }

    #[test]
    fn test_error_response_shape() {
        let response = ResponseEnvelope::error(id(3), &ErrorInfo::new("Unauthorized"));
        let value = response.to_value().unwrap();
        assert_eq!(value.get("status"), Some(&Value::from("error")));
        assert_eq!(
            value.get("result").and_then(|r| r.get("message")),
            Some(&Value::from("Unauthorized"))
        );
    }
}
