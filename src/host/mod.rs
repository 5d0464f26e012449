//! Caller side
//!
//! Two clients share one response router:
//! - PostMessageClient: live iframe or popup, with handshake and liveness
//! - RedirectClient: target reached by navigation, replies carried in the URL

pub mod handshake;
pub mod post_message;
pub mod redirect;
pub mod router;

pub use handshake::ConnectionState;
pub use post_message::{PendingCall, PostMessageClient};
pub use redirect::{InitOutcome, RedirectCall, RedirectClient};
pub use router::{Delivery, HandlerKey, ResponseHandler, ResponseRouter};
