//! Browsing context abstraction
//!
//! The protocol never touches a browser directly. Everything it needs from
//! its surroundings is expressed here:
//! - ContextRef: a handle to another live context that can be messaged
//! - Window: the local context (location, history, navigation, opener/parent)
//! - FormSubmitter: out-of-band form submission for HTTP_POST replies
//!
//! Real embeddings implement these over the host platform; the `mock`
//! module implements them in memory for tests.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crossframe_protocol::{RequestId, Value};
use url::Url;

/// History-state key marking an entry that issued a redirect request.
pub const BACK_REJECTION_KEY: &str = "rpcBackRejectionId";

/// Identity of a context, used to match message sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(pub u64);

/// Errors raised by the surrounding platform
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    #[error("Target context is closed")]
    Closed,

    #[error("postMessage failed: {0}")]
    PostFailed(String),

    #[error("Form submission failed: {0}")]
    SubmitFailed(String),
}

/// Handle to another context.
pub trait ContextRef: Send + Sync {
    /// Stable identity of the referenced context.
    fn id(&self) -> ContextId;

    /// Whether the referenced context has gone away.
    fn is_closed(&self) -> bool;

    /// Post a structured message. Delivery is dropped silently by the platform
    /// when `target_origin` is not `*` and does not match the receiver.
    fn post_message(&self, data: Value, target_origin: &str) -> Result<(), HostError>;
}

impl fmt::Debug for dyn ContextRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextRef")
            .field("id", &self.id())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A message delivered from another context.
#[derive(Clone)]
pub struct MessageEvent {
    /// Origin of the sending context
    pub origin: String,
    /// Handle to reply to the sender, when the platform provides one
    pub source: Option<Arc<dyn ContextRef>>,
    pub data: Value,
}

impl fmt::Debug for MessageEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageEvent")
            .field("origin", &self.origin)
            .field("source", &self.source.as_ref().map(|s| s.id()))
            .field("data", &self.data)
            .finish()
    }
}

/// State object attached to the current history entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryState(pub BTreeMap<String, Value>);

impl HistoryState {
    /// Id of a redirect request issued from this entry, if it is still armed.
    pub fn back_rejection_id(&self) -> Option<RequestId> {
        self.0
            .get(BACK_REJECTION_KEY)
            .and_then(Value::as_u64)
            .and_then(RequestId::new)
    }

    /// Copy of this state with the back-rejection marker set or cleared.
    pub fn with_back_rejection_id(&self, id: Option<RequestId>) -> Self {
        let mut state = self.clone();
        state
            .0
            .insert(BACK_REJECTION_KEY.to_string(), id.map(RequestId::get).into());
        state
    }
}

/// The local browsing context.
pub trait Window: Send + Sync {
    fn location(&self) -> Url;

    /// The referring document's URL, empty or absent when there is none.
    fn referrer(&self) -> Option<String>;

    fn history_state(&self) -> HistoryState;

    /// Replace the current history entry in place. `url` of `None` keeps the
    /// current location.
    fn replace_state(&self, state: HistoryState, url: Option<&Url>);

    /// Start a full navigation. The current context does not survive it.
    fn navigate(&self, href: &str);

    fn opener(&self) -> Option<Arc<dyn ContextRef>>;

    fn parent(&self) -> Option<Arc<dyn ContextRef>>;
}

/// Submits a form to a network address out-of-band.
pub trait FormSubmitter: Send + Sync {
    fn submit(&self, action: &str, fields: &[(&str, String)]) -> Result<(), HostError>;
}
