//! Command dispatcher
//!
//! The responder side. Every inbound request goes through the same checks,
//! in order, before its handler runs:
//!
//! 1. no id: discarded, there is no way to answer it
//! 2. no reply path (no message source, no return URL): discarded
//! 3. no command: discarded, it is not a request
//! 4. origin not allowed: `error` "Unauthorized"
//! 5. unknown command: `error` "Unknown command: <name>"
//! 6. more arguments than the handler declares: `error` "Too many arguments passed"
//!
//! Handlers return a [`Reply`]. Values and errors are answered right away,
//! futures are awaited and answered when they settle, and `Deferred` (or a
//! future settling with `Ok(None)`) means the handler answers through its
//! [`RequestState`] itself.
//!
//! [`RpcServer::receive`] resolves only once the handler's reply has been
//! sent, so an `Async` handler holds up whoever awaits it. A host that wants
//! a slow command not to delay the next message drives each `receive` as
//! its own future (joined, or spawned on an `Arc<RpcServer>`).

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossframe_protocol::url_codec::{self, RedirectRequest};
use crossframe_protocol::{
    codec, EnvelopeError, ErrorInfo, ProtocolError, RequestEnvelope, RequestId, ResponseStatus,
    Value, PING_COMMAND, PONG_RESULT,
};
use futures::future::{BoxFuture, FutureExt};
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::state::{ReplyHost, ReplyRoute, RequestState, StoredRequest};
use crate::config::{ConfigError, RpcConfig};
use crate::context::{FormSubmitter, MessageEvent, Window};
use crate::error::RpcError;
use crate::origin::OriginPolicy;
use crate::state::{SessionStore, StoreKeys};

/// Time a freshly opened responder waits for its first request by default.
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(1);

/// What a command handler returns.
pub enum Reply {
    /// Answer `ok` with this value.
    Ok(Value),
    /// Answer `error` with this error.
    Err(ErrorInfo),
    /// Answer when the future settles. `Ok(None)` sends nothing: the handler
    /// has answered, or will answer, through its state.
    Async(BoxFuture<'static, Result<Option<Value>, ErrorInfo>>),
    /// Send nothing now. The handler answers through its state.
    Deferred,
}

impl Reply {
    pub fn ok(value: impl Into<Value>) -> Self {
        Reply::Ok(value.into())
    }

    pub fn err(error: impl Into<ErrorInfo>) -> Self {
        Reply::Err(error.into())
    }

    pub fn future<F>(future: F) -> Self
    where
        F: Future<Output = Result<Option<Value>, ErrorInfo>> + Send + 'static,
    {
        Reply::Async(future.boxed())
    }
}

impl<T: Into<Value>, E: Into<ErrorInfo>> From<Result<T, E>> for Reply {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Reply::Ok(value.into()),
            Err(error) => Reply::Err(error.into()),
        }
    }
}

type CommandFn = dyn Fn(RequestState, Vec<Value>) -> Reply + Send + Sync;

/// A registered command: the handler and how many arguments it takes.
#[derive(Clone)]
struct CommandDescriptor {
    arity: usize,
    invoke: Arc<CommandFn>,
}

/// An inbound request, as the host received it.
#[derive(Debug)]
pub enum Inbound {
    /// Message event from another context.
    Message(MessageEvent),
    /// Request decoded from the current URL.
    Redirect(RedirectRequest),
    /// Request recovered from the session store after a reload.
    Stored(StoredRequest),
}

/// Why an inbound message was dropped without an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discard {
    Closed,
    MissingId,
    NoReplyPath,
    NotARequest,
}

/// What happened to an inbound message.
#[derive(Debug)]
pub enum Dispatch {
    Discarded(Discard),
    Replied { id: RequestId, status: ResponseStatus },
    /// The handler took over answering.
    NoReply { id: RequestId },
    /// An answer was produced but could not be delivered.
    ReplyFailed { id: RequestId, error: RpcError },
}

impl Dispatch {
    pub fn status(&self) -> Option<ResponseStatus> {
        match self {
            Dispatch::Replied { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Responder for requests from other contexts.
pub struct RpcServer {
    policy: OriginPolicy,
    host: ReplyHost,
    store: Arc<dyn SessionStore>,
    keys: StoreKeys,
    handlers: RwLock<HashMap<String, CommandDescriptor>>,
    client_timeout: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl RpcServer {
    /// Responder for `config`, failing when the configuration is invalid.
    pub fn new(
        config: &RpcConfig,
        window: Arc<dyn Window>,
        store: Arc<dyn SessionStore>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let server = Self {
            policy: config.origin_policy(),
            host: ReplyHost { window, forms: None },
            store,
            keys: config.store_keys(),
            handlers: RwLock::new(HashMap::new()),
            client_timeout: Mutex::new(None),
            closed: AtomicBool::new(false),
        };
        server.on_request(PING_COMMAND, 0, |_, _| Reply::ok(PONG_RESULT));
        Ok(server)
    }

    /// Deliver `post` replies through `forms`.
    pub fn with_form_submitter(mut self, forms: Arc<dyn FormSubmitter>) -> Self {
        self.host.forms = Some(forms);
        self
    }

    /// Register `handler` for `command`, accepting up to `arity` arguments.
    /// Replaces any earlier handler for the same command.
    pub fn on_request<F>(&self, command: &str, arity: usize, handler: F)
    where
        F: Fn(RequestState, Vec<Value>) -> Reply + Send + Sync + 'static,
    {
        self.handlers.write().insert(
            command.to_string(),
            CommandDescriptor {
                arity,
                invoke: Arc::new(handler),
            },
        );
    }

    /// Handle a request carried by the current page, if any.
    ///
    /// Looks for a request in the URL first, then for a stored request
    /// referenced by the URL's `id`. Does nothing on a page holding an armed
    /// back-rejection marker: that page belongs to a caller going back.
    pub async fn init(&self) -> Option<Dispatch> {
        let window = &self.host.window;
        if window.history_state().back_rejection_id().is_some() {
            debug!("back-rejection marker present, not processing URL");
            return None;
        }

        let location = window.location();
        let referrer = window.referrer();
        let has_peer = window.opener().is_some() || window.parent().is_some();

        if let Some(decoded) =
            url_codec::receive_redirect_command(&location, referrer.as_deref(), has_peer)
        {
            window.replace_state(window.history_state(), Some(&decoded.cleaned));
            return Some(self.receive(Inbound::Redirect(decoded.message)).await);
        }

        let id = url_codec::query_id(&location)?;
        let text = self.store.get(&self.keys.request(id))?;
        match codec::parse::<StoredRequest>(&text) {
            Ok(stored) => Some(self.receive(Inbound::Stored(stored)).await),
            Err(e) => {
                warn!(%id, error = %e, "discarding unreadable stored request");
                None
            }
        }
    }

    /// [`RpcServer::init`], also calling `on_timeout` if no request at all
    /// arrives within `timeout`.
    pub async fn init_with_client_timeout<F>(&self, timeout: Duration, on_timeout: F) -> Option<Dispatch>
    where
        F: FnOnce() + Send + 'static,
    {
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            on_timeout();
        });
        if let Some(previous) = self.client_timeout.lock().replace(timer) {
            previous.abort();
        }
        self.init().await
    }

    /// Stop accepting requests.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.disarm_client_timeout();
    }

    /// Validate and run one inbound request, answering it when possible.
    ///
    /// Resolves after the handler's reply is sent; asynchronous handlers are
    /// awaited here. Requests do not wait on each other, so concurrent calls
    /// to `receive` proceed independently.
    pub async fn receive(&self, inbound: Inbound) -> Dispatch {
        self.disarm_client_timeout();
        if self.closed.load(Ordering::SeqCst) {
            return Dispatch::Discarded(Discard::Closed);
        }

        let (state, recoverable) = match inbound {
            Inbound::Message(event) => {
                let data = match RequestEnvelope::from_value(&event.data) {
                    Ok(data) => data,
                    Err(EnvelopeError::MissingId) => return Dispatch::Discarded(Discard::MissingId),
                    Err(_) if event.source.is_none() => {
                        return Dispatch::Discarded(Discard::NoReplyPath)
                    }
                    Err(_) => return Dispatch::Discarded(Discard::NotARequest),
                };
                match RequestState::from_message(&event, data, self.host.clone()) {
                    Some(state) => (state, true),
                    None => return Dispatch::Discarded(Discard::NoReplyPath),
                }
            }
            Inbound::Redirect(request) => (RequestState::from_redirect(request, self.host.clone()), true),
            Inbound::Stored(stored) => match RequestState::from_stored(stored, self.host.clone()) {
                Some(state) => (state, false),
                None => return Dispatch::Discarded(Discard::NoReplyPath),
            },
        };

        self.dispatch(state, recoverable).await
    }

    async fn dispatch(&self, state: RequestState, recoverable: bool) -> Dispatch {
        if !self.policy.allows(state.origin()) {
            warn!(origin = %state.origin(), command = %state.command(), "Unauthorized request");
            let error = ProtocolError::Unauthorized {
                origin: state.origin().to_string(),
            };
            return self.answer(&state, ResponseStatus::Error, error.to_error_info().to_value());
        }

        let descriptor = self.handlers.read().get(state.command()).cloned();
        let Some(descriptor) = descriptor else {
            let error = ProtocolError::UnknownCommand(state.command().to_string());
            return self.answer(&state, ResponseStatus::Error, error.to_error_info().to_value());
        };

        if state.args().len() > descriptor.arity {
            let error = ProtocolError::TooManyArguments {
                command: state.command().to_string(),
                declared: descriptor.arity,
                supplied: state.args().len(),
            };
            return self.answer(&state, ResponseStatus::Error, error.to_error_info().to_value());
        }

        debug!(id = %state.id(), command = %state.command(), "ACCEPT");

        if recoverable && self.survives_reload(&state) {
            self.persist(&state);
            self.mark_location(state.id());
        }

        let args = state.args().to_vec();
        match (descriptor.invoke)(state.clone(), args) {
            Reply::Ok(value) => self.answer(&state, ResponseStatus::Ok, value),
            Reply::Err(error) => self.answer(&state, ResponseStatus::Error, error.to_value()),
            Reply::Async(future) => match future.await {
                Ok(Some(value)) => self.answer(&state, ResponseStatus::Ok, value),
                Ok(None) => Dispatch::NoReply { id: state.id() },
                Err(error) => self.answer(&state, ResponseStatus::Error, error.to_value()),
            },
            Reply::Deferred => Dispatch::NoReply { id: state.id() },
        }
    }

    /// Requests that arrived by URL, or asked to be persisted, must be
    /// answerable after this context reloads.
    fn survives_reload(&self, state: &RequestState) -> bool {
        !matches!(state.route(), ReplyRoute::Message { .. }) || state.data().persist_in_url
    }

    fn persist(&self, state: &RequestState) {
        match codec::stringify(&state.to_stored()) {
            Ok(text) => self.store.set(&self.keys.request(state.id()), text),
            Err(e) => warn!(id = %state.id(), error = %e, "failed to persist request"),
        }
    }

    /// Put the request id into the current URL so a reload finds the stored request.
    fn mark_location(&self, id: RequestId) {
        let window = &self.host.window;
        let marked = url_codec::with_query_id(&window.location(), id);
        window.replace_state(window.history_state(), Some(&marked));
    }

    fn answer(&self, state: &RequestState, status: ResponseStatus, result: Value) -> Dispatch {
        match state.reply(status, result) {
            Ok(()) => Dispatch::Replied {
                id: state.id(),
                status,
            },
            Err(error) => {
                error!(id = %state.id(), error = %error, "reply could not be delivered");
                Dispatch::ReplyFailed {
                    id: state.id(),
                    error,
                }
            }
        }
    }

    fn disarm_client_timeout(&self) {
        if let Some(timer) = self.client_timeout.lock().take() {
            timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockContext, MockWindow};
    use crate::state::MemoryStore;
    use crossframe_protocol::{ResponseEnvelope, HANDSHAKE_ID};
    use std::sync::atomic::AtomicUsize;

    struct Fixture {
        server: RpcServer,
        caller: Arc<MockContext>,
        popup: Arc<MockContext>,
        store: MemoryStore,
        window: Arc<MockWindow>,
    }

    fn fixture(config: RpcConfig) -> Fixture {
        let caller = MockContext::new("https://a");
        let popup = MockContext::new("https://b");
        let window = MockWindow::new("https://b/");
        let store = MemoryStore::new();
        let server = RpcServer::new(&config, window.clone(), Arc::new(store.clone())).unwrap();
        Fixture {
            server,
            caller,
            popup,
            store,
            window,
        }
    }

    impl Fixture {
        fn message(&self, data: serde_json::Value) -> Inbound {
            Inbound::Message(MessageEvent {
                origin: self.caller.origin().to_string(),
                source: Some(self.popup.handle_to(&self.caller)),
                data: Value::from(data),
            })
        }

        fn replies(&self) -> Vec<ResponseEnvelope> {
            self.caller
                .take_messages()
                .iter()
                .map(|event| ResponseEnvelope::from_value(&event.data).unwrap())
                .collect()
        }
    }

    #[tokio::test]
    async fn test_ping_answers_pong() {
        let f = fixture(RpcConfig::for_origin("https://a"));
        let dispatch = f
            .server
            .receive(f.message(serde_json::json!({"command": "ping", "id": HANDSHAKE_ID})))
            .await;
        assert_eq!(dispatch.status(), Some(ResponseStatus::Ok));
        assert!(f.replies()[0].is_pong());
        // handshakes are never persisted
        assert!(f.store.is_empty());
    }

    #[tokio::test]
    async fn test_unauthorized_never_invokes_handler() {
        let f = fixture(RpcConfig::for_origin("https://trusted"));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        f.server.on_request("echo", 1, move |_, args| {
            counter.fetch_add(1, Ordering::SeqCst);
            Reply::Ok(args.into_iter().next().unwrap_or_default())
        });

        f.server
            .receive(f.message(serde_json::json!({"command": "echo", "args": ["x"], "id": 7})))
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let reply = &f.replies()[0];
        assert_eq!(reply.status, ResponseStatus::Error);
        assert_eq!(ErrorInfo::from_value(&reply.result).message, "Unauthorized");
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let f = fixture(RpcConfig::for_origin("https://a"));
        f.server
            .receive(f.message(serde_json::json!({"command": "frob", "id": 7})))
            .await;
        let reply = &f.replies()[0];
        assert_eq!(ErrorInfo::from_value(&reply.result).message, "Unknown command: frob");
    }

    #[tokio::test]
    async fn test_discards() {
        let f = fixture(RpcConfig::for_origin("https://a"));

        let no_id = f.server.receive(f.message(serde_json::json!({"command": "ping"}))).await;
        assert!(matches!(no_id, Dispatch::Discarded(Discard::MissingId)));

        let no_command = f.server.receive(f.message(serde_json::json!({"id": 7}))).await;
        assert!(matches!(no_command, Dispatch::Discarded(Discard::NotARequest)));

        let no_source = f
            .server
            .receive(Inbound::Message(MessageEvent {
                origin: "https://a".to_string(),
                source: None,
                data: Value::from(serde_json::json!({"command": "ping", "id": 7})),
            }))
            .await;
        assert!(matches!(no_source, Dispatch::Discarded(Discard::NoReplyPath)));

        assert!(f.replies().is_empty());
    }

    #[tokio::test]
    async fn test_async_handler_outcomes() {
        let f = fixture(RpcConfig::for_origin("https://a"));
        f.server.on_request("later", 0, |_, _| {
            Reply::future(async { Ok(Some(Value::from("done"))) })
        });
        f.server.on_request("self", 0, |state, _| {
            Reply::future(async move {
                state.reply_ok("by hand").map_err(ErrorInfo::from)?;
                Ok(None)
            })
        });
        f.server.on_request("fail", 0, |_, _| {
            Reply::future(async { Err(ErrorInfo::new("nope").with_name("RangeError")) })
        });

        let later = f.server.receive(f.message(serde_json::json!({"command": "later", "id": 2}))).await;
        assert_eq!(later.status(), Some(ResponseStatus::Ok));

        let by_hand = f.server.receive(f.message(serde_json::json!({"command": "self", "id": 3}))).await;
        assert!(matches!(by_hand, Dispatch::NoReply { .. }));

        let fail = f.server.receive(f.message(serde_json::json!({"command": "fail", "id": 4}))).await;
        assert_eq!(fail.status(), Some(ResponseStatus::Error));

        let replies = f.replies();
        assert_eq!(replies.len(), 3);
        assert_eq!(replies[1].result, Value::from("by hand"));
        let error = ErrorInfo::from_value(&replies[2].result);
        assert_eq!(error.name.as_deref(), Some("RangeError"));
    }

    #[tokio::test]
    async fn test_deferred_sends_nothing() {
        let f = fixture(RpcConfig::for_origin("https://a"));
        f.server.on_request("wait", 0, |_, _| Reply::Deferred);
        let dispatch = f.server.receive(f.message(serde_json::json!({"command": "wait", "id": 5}))).await;
        assert!(matches!(dispatch, Dispatch::NoReply { .. }));
        assert!(f.replies().is_empty());
    }

    #[tokio::test]
    async fn test_persist_in_url_marks_location() {
        let f = fixture(RpcConfig::for_origin("https://a"));
        f.server.on_request("sign", 1, |_, _| Reply::Deferred);
        f.server
            .receive(f.message(serde_json::json!({
                "command": "sign", "args": [1], "id": 77, "persistInUrl": true
            })))
            .await;

        assert_eq!(f.window.location().as_str(), "https://b/?id=77");
        let stored: StoredRequest = codec::parse(&f.store.get("request-77").unwrap()).unwrap();
        assert_eq!(stored.data.command, "sign");
    }

    #[tokio::test]
    async fn test_closed_server_discards() {
        let f = fixture(RpcConfig::for_origin("https://a"));
        f.server.close();
        let dispatch = f.server.receive(f.message(serde_json::json!({"command": "ping", "id": 1}))).await;
        assert!(matches!(dispatch, Dispatch::Discarded(Discard::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_timeout_fires_without_requests() {
        let f = fixture(RpcConfig::for_origin("https://a"));
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        assert!(f
            .server
            .init_with_client_timeout(DEFAULT_CLIENT_TIMEOUT, move || flag.store(true, Ordering::SeqCst))
            .await
            .is_none());

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_timeout_disarmed_by_request() {
        let f = fixture(RpcConfig::for_origin("https://a"));
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        f.server
            .init_with_client_timeout(DEFAULT_CLIENT_TIMEOUT, move || flag.store(true, Ordering::SeqCst))
            .await;

        f.server.receive(f.message(serde_json::json!({"command": "ping", "id": 1}))).await;
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = RpcConfig::for_origin("https://a");
        config.handshake.liveness_interval_ms = 0;
        let result = RpcServer::new(&config, MockWindow::new("https://b/"), Arc::new(MemoryStore::new()));
        assert!(matches!(result, Err(ConfigError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_slow_handler_does_not_hold_other_requests() {
        let f = fixture(RpcConfig::for_origin("https://a"));
        let release = Arc::new(tokio::sync::Notify::new());
        f.server.on_request("slow", 0, {
            let release = release.clone();
            move |_, _| {
                let release = release.clone();
                Reply::future(async move {
                    release.notified().await;
                    Ok(Some(Value::from("late")))
                })
            }
        });

        let slow = f.server.receive(f.message(serde_json::json!({"command": "slow", "id": 2})));
        let fast = async {
            let dispatch = f
                .server
                .receive(f.message(serde_json::json!({"command": "ping", "id": 3})))
                .await;
            let answered = f.replies();
            release.notify_one();
            (dispatch, answered)
        };
        let (slow, (fast, answered)) = tokio::join!(slow, fast);

        assert_eq!(fast.status(), Some(ResponseStatus::Ok));
        assert_eq!(answered.len(), 1);
        assert_eq!(answered[0].id, RequestId::new(3).unwrap());

        assert_eq!(slow.status(), Some(ResponseStatus::Ok));
        assert_eq!(f.replies()[0].result, Value::from("late"));
    }
}
