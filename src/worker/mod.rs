//! Responder side
//!
//! Accepts requests from callers in other contexts, runs the registered
//! command handlers and sends the answers back along the route each request
//! chose.

pub mod rpc;
pub mod state;

pub use rpc::{Discard, Dispatch, Inbound, Reply, RpcServer, DEFAULT_CLIENT_TIMEOUT};
pub use state::{ReplyHost, ReplyRoute, RequestState, StoredRequest, StoredSource};
