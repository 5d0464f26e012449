//! Durable request bookkeeping
//!
//! Pending requests must survive a full navigation of the caller, and
//! in-flight requests must survive one of the responder. Both go through a
//! session-scoped key/value store:
//! - `<ns>rpcRequests`: registry blob of pending id → (command, state)
//! - `<ns>response-<id>`: consumed response kept for deliberate replay
//! - `<ns>request-<id>`: accepted request kept for responder recovery
//!
//! Two protocol instances sharing one namespace share one registry blob and
//! overwrite each other's entries. Give each logical client its own
//! namespace.

mod registry;
mod store;

pub use registry::{PendingRequest, RequestRegistry};
pub use store::{MemoryStore, SessionStore, StoreKeys};
