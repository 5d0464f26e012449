//! Error types for the RPC protocol.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Normalized error shape carried in an `error` response.
///
/// Thrown values cannot cross a value-only channel, so failures are reduced
/// to message, stack and name and rebuilt into an error on the far side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct ErrorInfo {
    /// Human-readable message.
    pub message: String,
    /// Stack trace or backtrace text, when the failing side had one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    /// Error class name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ErrorInfo {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Normalize any error, keeping its source chain as the stack.
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut info = Self::new(err.to_string());
        let mut chain = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            chain.push(format!("caused by: {}", cause));
            source = cause.source();
        }
        if !chain.is_empty() {
            info.stack = Some(chain.join("\n"));
        }
        info
    }

    pub fn to_value(&self) -> Value {
        let mut map = BTreeMap::new();
        map.insert("message".to_string(), Value::from(self.message.as_str()));
        if let Some(stack) = &self.stack {
            map.insert("stack".to_string(), Value::from(stack.as_str()));
        }
        if let Some(name) = &self.name {
            map.insert("name".to_string(), Value::from(name.as_str()));
        }
        Value::Object(map)
    }

    /// Rebuild an error from an `error` response result.
    ///
    /// Peers that reply with a bare value instead of the normalized shape get
    /// that value as the message.
    pub fn from_value(value: &Value) -> Self {
        let text = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);
        match text("message") {
            Some(message) => Self {
                message,
                stack: text("stack"),
                name: text("name"),
            },
            None => match value.as_str() {
                Some(s) => Self::new(s),
                None => Self::new(value.to_string()),
            },
        }
    }
}

impl From<&str> for ErrorInfo {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for ErrorInfo {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// Stable codes for protocol violations detected by a responder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Request origin is not allowed.
    Unauthorized,
    /// No handler is registered for the command.
    UnknownCommand,
    /// More arguments than the handler declares.
    TooManyArguments,
    /// Envelope fields are missing or malformed.
    InvalidRequest,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::UnknownCommand => "UNKNOWN_COMMAND",
            ErrorCode::TooManyArguments => "TOO_MANY_ARGUMENTS",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol violations a responder reports back as `error` responses.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Unauthorized")]
    Unauthorized { origin: String },

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Too many arguments passed")]
    TooManyArguments { command: String, declared: usize, supplied: usize },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ProtocolError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ProtocolError::Unauthorized { .. } => ErrorCode::Unauthorized,
            ProtocolError::UnknownCommand(_) => ErrorCode::UnknownCommand,
            ProtocolError::TooManyArguments { .. } => ErrorCode::TooManyArguments,
            ProtocolError::InvalidRequest(_) => ErrorCode::InvalidRequest,
        }
    }

    /// Convert to the normalized error carried in the reply.
    pub fn to_error_info(&self) -> ErrorInfo {
        ErrorInfo::new(self.to_string()).with_name(self.code().as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_messages() {
        let unauthorized = ProtocolError::Unauthorized {
            origin: "https://evil.example".to_string(),
        };
        assert_eq!(unauthorized.to_error_info().message, "Unauthorized");

        let unknown = ProtocolError::UnknownCommand("frobnicate".to_string());
        assert_eq!(unknown.to_error_info().message, "Unknown command: frobnicate");
        assert_eq!(unknown.to_error_info().name.as_deref(), Some("UNKNOWN_COMMAND"));

        let arity = ProtocolError::TooManyArguments {
            command: "echo".to_string(),
            declared: 1,
            supplied: 2,
        };
        assert_eq!(arity.code(), ErrorCode::TooManyArguments);
        assert_eq!(arity.to_string(), "Too many arguments passed");
    }

    #[test]
    fn test_error_info_value_round_trip() {
        let info = ErrorInfo::new("boom").with_name("TypeError").with_stack("at x:1");
        assert_eq!(ErrorInfo::from_value(&info.to_value()), info);

        let bare = ErrorInfo::new("only message");
        let value = bare.to_value();
        assert!(value.get("stack").is_none());
        assert_eq!(ErrorInfo::from_value(&value), bare);
    }

    #[test]
    fn test_error_info_from_bare_value() {
        assert_eq!(ErrorInfo::from_value(&Value::from("nope")).message, "nope");
        assert_eq!(ErrorInfo::from_value(&Value::from(3i64)).message, "3");
    }

    #[test]
    fn test_from_error_keeps_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let info = ErrorInfo::from_error(&io);
        assert_eq!(info.message, "disk gone");
        assert!(info.stack.is_none());
    }
}
