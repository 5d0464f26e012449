//! In-memory contexts
//!
//! Each [`MockContext`] has an origin and an inbox. A handle obtained with
//! [`MockContext::handle_to`] posts into the other context's inbox, with a
//! handle back to the poster as the message source, the way a real platform
//! fills in `event.source`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crossframe_protocol::Value;
use parking_lot::Mutex;

use crate::context::{ContextId, ContextRef, HostError, MessageEvent};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// How posts into a context misbehave.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PostFailure {
    #[default]
    None,
    /// Posting returns an error.
    Error,
    /// Posting succeeds but nothing arrives.
    Drop,
}

/// A context living in memory.
#[derive(Debug)]
pub struct MockContext {
    id: ContextId,
    origin: String,
    closed: AtomicBool,
    inbox: Mutex<VecDeque<MessageEvent>>,
    failure: Mutex<PostFailure>,
    posts: AtomicU64,
}

impl MockContext {
    pub fn new(origin: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: ContextId(NEXT_ID.fetch_add(1, Ordering::Relaxed)),
            origin: origin.into(),
            closed: AtomicBool::new(false),
            inbox: Mutex::new(VecDeque::new()),
            failure: Mutex::new(PostFailure::None),
            posts: AtomicU64::new(0),
        })
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Handle held by `self` that posts into `other`.
    pub fn handle_to(self: &Arc<Self>, other: &Arc<MockContext>) -> Arc<dyn ContextRef> {
        Arc::new(MockHandle {
            from: self.clone(),
            to: other.clone(),
        })
    }

    /// Simulate the user closing this context.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn set_post_failure(&self, failure: PostFailure) {
        *self.failure.lock() = failure;
    }

    /// Number of posts attempted into this context, delivered or not.
    pub fn post_count(&self) -> u64 {
        self.posts.load(Ordering::SeqCst)
    }

    /// Drain the inbox.
    pub fn take_messages(&self) -> Vec<MessageEvent> {
        self.inbox.lock().drain(..).collect()
    }

    pub fn next_message(&self) -> Option<MessageEvent> {
        self.inbox.lock().pop_front()
    }
}

struct MockHandle {
    from: Arc<MockContext>,
    to: Arc<MockContext>,
}

impl ContextRef for MockHandle {
    fn id(&self) -> ContextId {
        self.to.id
    }

    fn is_closed(&self) -> bool {
        self.to.is_closed()
    }

    fn post_message(&self, data: Value, target_origin: &str) -> Result<(), HostError> {
        self.to.posts.fetch_add(1, Ordering::SeqCst);
        if self.to.is_closed() {
            return Err(HostError::Closed);
        }
        match *self.to.failure.lock() {
            PostFailure::None => {}
            PostFailure::Error => return Err(HostError::PostFailed("injected failure".to_string())),
            PostFailure::Drop => return Ok(()),
        }
        // the platform drops mismatched deliveries without telling the sender
        if target_origin != "*" && target_origin != self.to.origin {
            return Ok(());
        }

        let source: Arc<dyn ContextRef> = Arc::new(MockHandle {
            from: self.to.clone(),
            to: self.from.clone(),
        });
        self.to.inbox.lock().push_back(MessageEvent {
            origin: self.from.origin.clone(),
            source: Some(source),
            data,
        });
        Ok(())
    }
}
