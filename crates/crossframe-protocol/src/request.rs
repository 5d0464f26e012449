//! Request envelope and request identity.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::codec::{self, CodecError};
use crate::value::Value;
use crate::HANDSHAKE_ID;

/// Exclusive upper bound for generated ids (2^53, the JavaScript safe integer limit).
const ID_SPACE_END: u64 = 1 << 53;

/// Correlation key of one request/response exchange.
///
/// Ids are never zero: a zero id is indistinguishable from a missing one for
/// peers that treat ids as truthy values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct RequestId(u64);

impl RequestId {
    /// Create an id from a raw integer. Returns `None` for zero.
    pub fn new(raw: u64) -> Option<Self> {
        (raw != 0).then_some(Self(raw))
    }

    /// Draw a fresh id from a large random space, avoiding the handshake id.
    pub fn random() -> Self {
        let raw = rand::thread_rng().gen_range(HANDSHAKE_ID + 1..ID_SPACE_END);
        Self(raw)
    }

    /// The reserved handshake id.
    pub const fn handshake() -> Self {
        Self(HANDSHAKE_ID)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn is_handshake(self) -> bool {
        self.0 == HANDSHAKE_ID
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<RequestId> for u64 {
    fn from(id: RequestId) -> Self {
        id.0
    }
}

impl TryFrom<u64> for RequestId {
    type Error = InvalidRequestId;

    fn try_from(raw: u64) -> Result<Self, Self::Error> {
        RequestId::new(raw).ok_or(InvalidRequestId)
    }
}

impl FromStr for RequestId {
    type Err = InvalidRequestId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .ok()
            .and_then(RequestId::new)
            .ok_or(InvalidRequestId)
    }
}

/// Text or integer that is not a usable request id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("request id must be a positive integer")]
pub struct InvalidRequestId;

/// How the responder should deliver its reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMethod {
    /// Cross-context message to a live reference.
    #[serde(rename = "message")]
    InProcess,
    /// Full navigation to the return URL carrying the reply.
    #[default]
    #[serde(rename = "url")]
    RedirectGet,
    /// Form submission to the return URL.
    #[serde(rename = "post")]
    HttpPost,
}

impl DeliveryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryMethod::InProcess => "message",
            DeliveryMethod::RedirectGet => "url",
            DeliveryMethod::HttpPost => "post",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "message" => Some(DeliveryMethod::InProcess),
            "url" => Some(DeliveryMethod::RedirectGet),
            "post" => Some(DeliveryMethod::HttpPost),
            _ => None,
        }
    }
}

impl fmt::Display for DeliveryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request envelope.
///
/// In-process shape: `{ command, args, id }`, plus `persistInUrl` when the
/// caller asks the responder to survive its own reload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Correlation id
    pub id: RequestId,
    /// Command name
    pub command: String,
    /// Ordered arguments
    #[serde(default)]
    pub args: Vec<Value>,
    /// Ask the responder to persist the request and mark its URL with the id
    #[serde(default, rename = "persistInUrl", skip_serializing_if = "std::ops::Not::not")]
    pub persist_in_url: bool,
}

impl RequestEnvelope {
    pub fn new(id: RequestId, command: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            id,
            command: command.into(),
            args,
            persist_in_url: false,
        }
    }

    /// The handshake ping.
    pub fn ping() -> Self {
        Self::new(RequestId::handshake(), crate::PING_COMMAND, Vec::new())
    }

    pub fn to_value(&self) -> Result<Value, CodecError> {
        codec::to_value(self)
    }

    /// Read a request out of a structured message.
    ///
    /// Parsing is tolerant: only a usable id and a command are required,
    /// anything that is not an argument list counts as no arguments.
    pub fn from_value(value: &Value) -> Result<Self, EnvelopeError> {
        let id = value
            .get("id")
            .and_then(Value::as_u64)
            .and_then(RequestId::new)
            .ok_or(EnvelopeError::MissingId)?;
        let command = value
            .get("command")
            .and_then(Value::as_str)
            .ok_or(EnvelopeError::MissingCommand(id))?
            .to_string();
        let args = value
            .get("args")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let persist_in_url = matches!(value.get("persistInUrl"), Some(Value::Bool(true)));

        Ok(Self {
            id,
            command,
            args,
            persist_in_url,
        })
    }
}

/// Why a structured message is not a usable envelope.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("Missing id")]
    MissingId,

    #[error("Missing command for request {0}")]
    MissingCommand(RequestId),

    #[error("Missing status for response {0}")]
    MissingStatus(RequestId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_ids_avoid_reserved_values() {
        for _ in 0..1000 {
            let id = RequestId::random();
            assert!(id.get() > HANDSHAKE_ID);
            assert!(id.get() < ID_SPACE_END);
        }
    }

    #[test]
    fn test_id_parsing() {
        assert_eq!("42".parse::<RequestId>(), Ok(RequestId(42)));
        assert!("0".parse::<RequestId>().is_err());
        assert!("-3".parse::<RequestId>().is_err());
        assert!("abc".parse::<RequestId>().is_err());
    }

    #[test]
    fn test_request_from_value() {
        let value = Value::from(serde_json::json!({"command": "echo", "args": ["x"], "id": 7}));
        let request = RequestEnvelope::from_value(&value).unwrap();
        assert_eq!(request.id, RequestId(7));
        assert_eq!(request.command, "echo");
        assert_eq!(request.args, vec![Value::from("x")]);
        assert!(!request.persist_in_url);
    }

    #[test]
    fn test_request_without_id_or_command() {
        let no_id = Value::from(serde_json::json!({"command": "echo"}));
        assert_eq!(RequestEnvelope::from_value(&no_id), Err(EnvelopeError::MissingId));

        let zero_id = Value::from(serde_json::json!({"command": "echo", "id": 0}));
        assert_eq!(RequestEnvelope::from_value(&zero_id), Err(EnvelopeError::MissingId));

        let no_command = Value::from(serde_json::json!({"id": 9, "status": "ok"}));
        assert_eq!(
            RequestEnvelope::from_value(&no_command),
            Err(EnvelopeError::MissingCommand(RequestId(9)))
        );
    }

    #[test]
    fn test_non_array_args_become_empty() {
        let value = Value::from(serde_json::json!({"command": "echo", "args": "x", "id": 3}));
        assert!(RequestEnvelope::from_value(&value).unwrap().args.is_empty());
    }

    #[test]
    fn test_request_value_shape() {
        let mut request = RequestEnvelope::new(RequestId(5), "sign", vec![Value::bytes(vec![1, 2])]);
        let value = request.to_value().unwrap();
        assert!(value.get("persistInUrl").is_none());
        assert_eq!(RequestEnvelope::from_value(&value).unwrap(), request);

        request.persist_in_url = true;
        let value = request.to_value().unwrap();
        assert_eq!(value.get("persistInUrl"), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_delivery_method_names() {
        assert_eq!(DeliveryMethod::parse("post"), Some(DeliveryMethod::HttpPost));
        assert_eq!(DeliveryMethod::RedirectGet.as_str(), "url");
        assert_eq!(
            serde_json::to_string(&DeliveryMethod::InProcess).unwrap(),
            "\"message\""
        );
    }
}
