//! crossframe protocol types
//!
//! Defines the request/response envelopes exchanged between isolated
//! browsing contexts, the value codec that lets binary payloads cross text
//! channels, and the URL codec used when the only channel is a navigation.

pub mod codec;
pub mod error;
pub mod request;
pub mod response;
pub mod url_codec;
pub mod value;

pub use codec::CodecError;
pub use error::{ErrorCode, ErrorInfo, ProtocolError};
pub use request::{DeliveryMethod, EnvelopeError, InvalidRequestId, RequestEnvelope, RequestId};
pub use response::{ResponseEnvelope, ResponseMessage, ResponseStatus};
pub use url_codec::{Decoded, RedirectRequest, ReturnAddress, UrlCodecError};
pub use value::Value;

/// Id reserved for the handshake exchange.
pub const HANDSHAKE_ID: u64 = 1;

/// Command of the handshake request.
pub const PING_COMMAND: &str = "ping";

/// Result of the handshake reply.
pub const PONG_RESULT: &str = "pong";

/// Return address meaning "reply by message to the opener or parent".
pub const RETURN_URL_SENTINEL: &str = "<postMessage>";
