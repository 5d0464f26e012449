//! Handshake for the in-process channel
//!
//! ```text
//! DISCONNECTED ──init──▶ CONNECTING ──pong──▶ CONNECTED
//!       ▲                    │
//!       └──────timeout───────┘
//! ```
//!
//! Closed is terminal and reachable from every state, either through an
//! explicit close or when the liveness check finds the target gone.

use std::fmt;

use crossframe_protocol::ResponseEnvelope;

use crate::context::{ContextId, MessageEvent};
use crate::origin::OriginPolicy;

/// Connection state of an in-process channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closed => "closed",
        }
    }

    /// States in which the target is watched for closure.
    pub fn is_live(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether `event` is the pong that completes a handshake with `target`.
///
/// Requires the expected source, an allowed origin, the reserved id, status
/// `ok` and the `pong` result.
pub fn is_pong_from(event: &MessageEvent, target: ContextId, policy: &OriginPolicy) -> bool {
    let from_target = event.source.as_ref().is_some_and(|s| s.id() == target);
    if !from_target || !policy.allows(&event.origin) {
        return false;
    }
    ResponseEnvelope::from_value(&event.data).is_ok_and(|response| response.is_pong())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockContext;
    use crossframe_protocol::{RequestId, Value};

    fn event_from(origin: &str, data: Value) -> (MessageEvent, ContextId) {
        let popup = MockContext::new(origin);
        let opener = MockContext::new("https://a");
        let source = opener.handle_to(&popup);
        let id = popup.id();
        (
            MessageEvent {
                origin: origin.to_string(),
                source: Some(source),
                data,
            },
            id,
        )
    }

    #[test]
    fn test_pong_accepted() {
        let (event, target) = event_from("https://b", ResponseEnvelope::pong().to_value().unwrap());
        assert!(is_pong_from(&event, target, &OriginPolicy::exact("https://b")));
    }

    #[test]
    fn test_pong_from_wrong_origin_or_source() {
        let (event, target) = event_from("https://b", ResponseEnvelope::pong().to_value().unwrap());
        assert!(!is_pong_from(&event, target, &OriginPolicy::exact("https://c")));
        assert!(!is_pong_from(&event, ContextId(u64::MAX), &OriginPolicy::unsafe_any()));
    }

    #[test]
    fn test_pong_needs_reserved_id() {
        let reply = ResponseEnvelope::ok(RequestId::new(2).unwrap(), Value::from("pong"));
        let (event, target) = event_from("https://b", reply.to_value().unwrap());
        assert!(!is_pong_from(&event, target, &OriginPolicy::unsafe_any()));
    }

    #[test]
    fn test_live_states() {
        assert!(ConnectionState::Connecting.is_live());
        assert!(!ConnectionState::Closed.is_live());
    }
}
