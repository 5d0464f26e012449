//! crossframe-rpc
//!
//! Request/response RPC between isolated browsing contexts: a page calling
//! into an iframe, a popup, or a page it can only reach by navigating away.
//!
//! - `host`: caller side (in-process client, redirect client, response router)
//! - `worker`: responder side (command dispatcher, request state, reply routes)
//! - `state`: session store and the durable request registry
//! - `context`: the platform seen through traits
//!
//! Wire types and the URL codec live in the `crossframe-protocol` crate and
//! are re-exported as [`protocol`].

pub mod config;
pub mod context;
pub mod error;
pub mod host;
pub mod logging;
pub mod mock;
pub mod origin;
pub mod state;
pub mod timeout;
pub mod worker;

pub use crossframe_protocol as protocol;

pub use config::{ConfigError, RpcConfig};
pub use context::{ContextId, ContextRef, FormSubmitter, HistoryState, HostError, MessageEvent, Window};
pub use error::{ErrorKind, RpcError, RpcResult};
pub use host::{
    ConnectionState, InitOutcome, PendingCall, PostMessageClient, RedirectCall, RedirectClient,
    ResponseRouter,
};
pub use origin::OriginPolicy;
pub use state::{MemoryStore, RequestRegistry, SessionStore, StoreKeys};
pub use timeout::TimeoutConfig;
pub use worker::{Dispatch, Inbound, Reply, RequestState, RpcServer};
