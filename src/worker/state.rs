//! Request state and reply routes
//!
//! A [`RequestState`] is what a command handler gets besides its arguments:
//! who asked, what they asked, and how to answer. The answer path is fixed
//! when the request arrives and carried as a [`ReplyRoute`].

use std::fmt;
use std::sync::Arc;

use crossframe_protocol::url_codec::{self, RedirectRequest, ReturnAddress};
use crossframe_protocol::{
    codec, DeliveryMethod, ErrorInfo, RequestEnvelope, RequestId, ResponseEnvelope, ResponseStatus,
    Value,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::{ContextRef, FormSubmitter, HostError, MessageEvent, Window};
use crate::error::RpcResult;

/// Form field names of an HTTP_POST reply.
pub mod form_fields {
    pub const STATUS: &str = "status";
    pub const RESULT: &str = "result";
    pub const ID: &str = "rpcId";
}

/// Host services a reply may need.
#[derive(Clone)]
pub struct ReplyHost {
    pub window: Arc<dyn Window>,
    pub forms: Option<Arc<dyn FormSubmitter>>,
}

/// How a reply reaches the requester.
#[derive(Clone)]
pub enum ReplyRoute {
    /// Message to a live context. Without a known target the opener, then
    /// the parent, is used.
    Message {
        target: Option<Arc<dyn ContextRef>>,
        origin: String,
    },
    /// Navigate to the return URL with the reply in it.
    Redirect { return_url: String },
    /// Submit the reply as a form to the return URL.
    Post { return_url: String },
}

impl ReplyRoute {
    pub fn method(&self) -> DeliveryMethod {
        match self {
            ReplyRoute::Message { .. } => DeliveryMethod::InProcess,
            ReplyRoute::Redirect { .. } => DeliveryMethod::RedirectGet,
            ReplyRoute::Post { .. } => DeliveryMethod::HttpPost,
        }
    }

    pub fn deliver(&self, host: &ReplyHost, response: &ResponseEnvelope) -> RpcResult<()> {
        match self {
            ReplyRoute::Message { target, origin } => {
                let target = target
                    .clone()
                    .or_else(|| host.window.opener())
                    .or_else(|| host.window.parent())
                    .ok_or(HostError::Closed)?;
                target.post_message(response.to_value()?, origin)?;
            }
            ReplyRoute::Redirect { return_url } => {
                let href = url_codec::prepare_redirect_reply(
                    return_url,
                    response.id,
                    response.status,
                    &response.result,
                )?;
                host.window.navigate(&href);
            }
            ReplyRoute::Post { return_url } => {
                let forms = host.forms.as_ref().ok_or_else(|| {
                    HostError::SubmitFailed("no form submitter configured".to_string())
                })?;
                let fields = [
                    (form_fields::STATUS, response.status.as_str().to_string()),
                    (form_fields::RESULT, codec::stringify(&response.result)?),
                    (form_fields::ID, response.id.to_string()),
                ];
                forms.submit(return_url, &fields)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ReplyRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplyRoute::Message { target, origin } => f
                .debug_struct("Message")
                .field("target", &target.as_ref().map(|t| t.id()))
                .field("origin", origin)
                .finish(),
            ReplyRoute::Redirect { return_url } => {
                f.debug_struct("Redirect").field("return_url", return_url).finish()
            }
            ReplyRoute::Post { return_url } => {
                f.debug_struct("Post").field("return_url", return_url).finish()
            }
        }
    }
}

/// Which live context a stored message-route request answers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoredSource {
    Opener,
    Parent,
}

/// Accepted request as kept in the session store under `request-<id>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRequest {
    pub origin: String,
    pub data: RequestEnvelope,
    pub response_method: DeliveryMethod,
    #[serde(default, rename = "returnURL", skip_serializing_if = "Option::is_none")]
    pub return_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<StoredSource>,
}

/// A request as seen by its command handler.
#[derive(Clone)]
pub struct RequestState {
    origin: String,
    data: RequestEnvelope,
    route: ReplyRoute,
    host: ReplyHost,
}

impl RequestState {
    pub(crate) fn new(origin: String, data: RequestEnvelope, route: ReplyRoute, host: ReplyHost) -> Self {
        Self {
            origin,
            data,
            route,
            host,
        }
    }

    /// State for a request that arrived by message. `None` without a source,
    /// since there would be nobody to answer.
    pub(crate) fn from_message(
        event: &MessageEvent,
        data: RequestEnvelope,
        host: ReplyHost,
    ) -> Option<Self> {
        let source = event.source.clone()?;
        let route = ReplyRoute::Message {
            target: Some(source),
            origin: event.origin.clone(),
        };
        Some(Self::new(event.origin.clone(), data, route, host))
    }

    pub(crate) fn from_redirect(request: RedirectRequest, host: ReplyHost) -> Self {
        let route = match (request.return_address, request.response_method) {
            (ReturnAddress::PostMessage, _) => ReplyRoute::Message {
                target: None,
                origin: request.origin.clone(),
            },
            (ReturnAddress::Url(return_url), DeliveryMethod::HttpPost) => ReplyRoute::Post { return_url },
            (ReturnAddress::Url(return_url), _) => ReplyRoute::Redirect { return_url },
        };
        Self::new(request.origin, request.data, route, host)
    }

    /// Rebuild a state from its stored form. `None` if a URL route lost its
    /// return URL.
    pub(crate) fn from_stored(stored: StoredRequest, host: ReplyHost) -> Option<Self> {
        let route = match stored.response_method {
            DeliveryMethod::InProcess => ReplyRoute::Message {
                target: match stored.source {
                    Some(StoredSource::Opener) => host.window.opener(),
                    Some(StoredSource::Parent) => host.window.parent(),
                    None => None,
                },
                origin: stored.origin.clone(),
            },
            DeliveryMethod::RedirectGet => ReplyRoute::Redirect {
                return_url: stored.return_url?,
            },
            DeliveryMethod::HttpPost => ReplyRoute::Post {
                return_url: stored.return_url?,
            },
        };
        Some(Self::new(stored.origin, stored.data, route, host))
    }

    /// Stored form, for recovery after this context reloads.
    pub fn to_stored(&self) -> StoredRequest {
        let (return_url, source) = match &self.route {
            ReplyRoute::Message { target, .. } => (None, self.stored_source(target.as_ref())),
            ReplyRoute::Redirect { return_url } | ReplyRoute::Post { return_url } => {
                (Some(return_url.clone()), None)
            }
        };
        StoredRequest {
            origin: self.origin.clone(),
            data: self.data.clone(),
            response_method: self.route.method(),
            return_url,
            source,
        }
    }

    fn stored_source(&self, target: Option<&Arc<dyn ContextRef>>) -> Option<StoredSource> {
        let target = target?.id();
        if self.host.window.opener().is_some_and(|o| o.id() == target) {
            Some(StoredSource::Opener)
        } else if self.host.window.parent().is_some_and(|p| p.id() == target) {
            Some(StoredSource::Parent)
        } else {
            None
        }
    }

    pub fn id(&self) -> RequestId {
        self.data.id
    }

    /// Origin of the requester.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn command(&self) -> &str {
        &self.data.command
    }

    pub fn args(&self) -> &[Value] {
        &self.data.args
    }

    pub fn data(&self) -> &RequestEnvelope {
        &self.data
    }

    pub fn route(&self) -> &ReplyRoute {
        &self.route
    }

    /// Send the reply. On `error`, `result` should be the normalized error
    /// shape; see [`RequestState::reply_error`].
    pub fn reply(&self, status: ResponseStatus, result: Value) -> RpcResult<()> {
        debug!(id = %self.id(), %status, "REPLY");
        let response = ResponseEnvelope {
            id: self.id(),
            status,
            result,
        };
        self.route.deliver(&self.host, &response)
    }

    pub fn reply_ok(&self, result: impl Into<Value>) -> RpcResult<()> {
        self.reply(ResponseStatus::Ok, result.into())
    }

    pub fn reply_error(&self, error: &ErrorInfo) -> RpcResult<()> {
        self.reply(ResponseStatus::Error, error.to_value())
    }
}

impl fmt::Debug for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestState")
            .field("origin", &self.origin)
            .field("data", &self.data)
            .field("route", &self.route)
            .finish()
    }
}
