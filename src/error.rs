//! Caller-facing errors
//!
//! Every rejection a caller can observe is an [`RpcError`]. They fall into
//! three kinds:
//! - Connection: handshake timeout, target closed, channel closed
//! - Protocol: unknown command, arity mismatch, unauthorized origin, bad envelopes
//! - Application: the remote handler failed
//!
//! None of them are retried by the protocol.

use crossframe_protocol::{CodecError, ErrorCode, ErrorInfo, UrlCodecError};

use crate::context::HostError;

/// Error kind, for callers that branch on the class of failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connection,
    Protocol,
    Application,
}

/// RPC errors surfaced to callers
#[derive(Debug, Clone, thiserror::Error)]
pub enum RpcError {
    #[error("Connection was closed")]
    ConnectionClosed,

    #[error("Connection timeout")]
    ConnectionTimeout,

    #[error("Client is not connected, call init first")]
    NotConnected,

    #[error("Request aborted")]
    Aborted,

    /// Error reply from the responder.
    #[error("{0}")]
    Remote(ErrorInfo),

    #[error("Encoding failed: {0}")]
    Codec(String),

    #[error("Invalid URL: {0}")]
    Url(String),

    #[error(transparent)]
    Host(#[from] HostError),
}

impl RpcError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RpcError::ConnectionClosed
            | RpcError::ConnectionTimeout
            | RpcError::NotConnected
            | RpcError::Aborted
            | RpcError::Host(_) => ErrorKind::Connection,
            RpcError::Codec(_) | RpcError::Url(_) => ErrorKind::Protocol,
            RpcError::Remote(info) => {
                if is_protocol_name(info.name.as_deref()) {
                    ErrorKind::Protocol
                } else {
                    ErrorKind::Application
                }
            }
        }
    }

    /// The remote error, when this is an error reply.
    pub fn remote(&self) -> Option<&ErrorInfo> {
        match self {
            RpcError::Remote(info) => Some(info),
            _ => None,
        }
    }
}

fn is_protocol_name(name: Option<&str>) -> bool {
    let codes = [
        ErrorCode::Unauthorized,
        ErrorCode::UnknownCommand,
        ErrorCode::TooManyArguments,
        ErrorCode::InvalidRequest,
    ];
    name.is_some_and(|name| codes.iter().any(|code| code.as_str() == name))
}

impl From<CodecError> for RpcError {
    fn from(e: CodecError) -> Self {
        RpcError::Codec(e.to_string())
    }
}

impl From<UrlCodecError> for RpcError {
    fn from(e: UrlCodecError) -> Self {
        match e {
            UrlCodecError::InvalidUrl(e) => RpcError::Url(e.to_string()),
            UrlCodecError::Codec(e) => e.into(),
        }
    }
}

impl From<ErrorInfo> for RpcError {
    fn from(info: ErrorInfo) -> Self {
        RpcError::Remote(info)
    }
}

/// Errors crossing back over the wire keep their original shape.
impl From<RpcError> for ErrorInfo {
    fn from(error: RpcError) -> Self {
        match error {
            RpcError::Remote(info) => info,
            other => ErrorInfo::from_error(&other),
        }
    }
}

/// Result type for RPC operations
pub type RpcResult<T> = Result<T, RpcError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crossframe_protocol::ProtocolError;

    #[test]
    fn test_error_kinds() {
        assert_eq!(RpcError::ConnectionClosed.kind(), ErrorKind::Connection);
        assert_eq!(RpcError::ConnectionTimeout.kind(), ErrorKind::Connection);

        let protocol = RpcError::Remote(ProtocolError::UnknownCommand("x".to_string()).to_error_info());
        assert_eq!(protocol.kind(), ErrorKind::Protocol);

        let app = RpcError::Remote(ErrorInfo::new("boom").with_name("TypeError"));
        assert_eq!(app.kind(), ErrorKind::Application);
    }

    #[test]
    fn test_remote_message_is_display() {
        let err = RpcError::Remote(ErrorInfo::new("Unauthorized"));
        assert_eq!(err.to_string(), "Unauthorized");
        assert_eq!(err.remote().map(|i| i.message.as_str()), Some("Unauthorized"));
    }
}
