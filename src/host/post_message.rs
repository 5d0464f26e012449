//! In-process client
//!
//! Talks to a live context (iframe or popup) by message. `init` runs the
//! ping/pong handshake and starts watching the target; after that `call`
//! posts requests and hands back a [`PendingCall`] that settles exactly once:
//! with the response, or with `ConnectionClosed` when the channel goes away.
//!
//! The host feeds every message event it receives into
//! [`PostMessageClient::handle_message`].

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use crossframe_protocol::{
    RequestEnvelope, RequestId, ResponseEnvelope, ResponseMessage, Value,
};
use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error, info};

use super::handshake::{is_pong_from, ConnectionState};
use super::router::{Delivery, HandlerKey, ResponseHandler, ResponseRouter};
use crate::config::{ConfigError, RpcConfig};
use crate::context::{ContextRef, MessageEvent};
use crate::error::{RpcError, RpcResult};
use crate::origin::OriginPolicy;
use crate::state::{RequestRegistry, SessionStore};
use crate::timeout::TimeoutConfig;

/// Client for a live target context.
#[derive(Clone)]
pub struct PostMessageClient {
    inner: Arc<Inner>,
}

struct Inner {
    target: Arc<dyn ContextRef>,
    target_origin: String,
    policy: OriginPolicy,
    timeouts: TimeoutConfig,
    shared: Mutex<Shared>,
    state_changed: Notify,
}

struct Shared {
    state: ConnectionState,
    router: ResponseRouter,
    liveness: Option<JoinHandle<()>>,
}

impl PostMessageClient {
    /// Client for `target`. Fails when `config` is invalid or does not name
    /// a single origin to post to.
    pub fn new(config: &RpcConfig, target: Arc<dyn ContextRef>) -> Result<Self, ConfigError> {
        config.validate()?;
        let policy = config.origin_policy();
        let router = ResponseRouter::new(policy.clone(), RequestRegistry::in_memory())
            .with_preserve_requests(config.preserve_requests);
        Self::with_router(config, target, policy, router)
    }

    /// Like [`PostMessageClient::new`], also keeping consumed responses in
    /// `store` so a reloaded caller can replay them.
    pub fn with_store(
        config: &RpcConfig,
        target: Arc<dyn ContextRef>,
        store: Arc<dyn SessionStore>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let policy = config.origin_policy();
        let router = ResponseRouter::new(policy.clone(), RequestRegistry::in_memory())
            .with_preserve_requests(config.preserve_requests)
            .with_response_store(store, config.store_keys());
        Self::with_router(config, target, policy, router)
    }

    fn with_router(
        config: &RpcConfig,
        target: Arc<dyn ContextRef>,
        policy: OriginPolicy,
        router: ResponseRouter,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            inner: Arc::new(Inner {
                target,
                target_origin: config.post_target_origin()?,
                policy,
                timeouts: config.handshake,
                shared: Mutex::new(Shared {
                    state: ConnectionState::Disconnected,
                    router,
                    liveness: None,
                }),
                state_changed: Notify::new(),
            }),
        })
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.shared.lock().state
    }

    /// Number of requests still waiting for a response.
    pub fn pending(&self) -> usize {
        self.inner.shared.lock().router.registry().len()
    }

    /// Connect to the target.
    ///
    /// Pings every `ping_interval_ms` until the target answers with a pong or
    /// `connect_timeout_ms` elapses. Returns immediately when already
    /// connected. Fails with `ConnectionClosed` once the client is closed.
    pub async fn init(&self) -> RpcResult<()> {
        {
            let mut shared = self.inner.shared.lock();
            match shared.state {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Closed => return Err(RpcError::ConnectionClosed),
                ConnectionState::Disconnected | ConnectionState::Connecting => {}
            }
            shared.state = ConnectionState::Connecting;
            if shared.liveness.is_none() {
                shared.liveness = Some(spawn_liveness(&self.inner));
            }
        }

        let deadline = Instant::now() + self.inner.timeouts.connect_timeout();
        let ping = RequestEnvelope::ping().to_value()?;

        loop {
            match self.connection_state() {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Closed => return Err(RpcError::ConnectionClosed),
                ConnectionState::Disconnected | ConnectionState::Connecting => {}
            }
            if self.inner.close_if_target_gone() {
                return Err(RpcError::ConnectionClosed);
            }
            if Instant::now() >= deadline {
                self.inner.give_up_connecting();
                return Err(RpcError::ConnectionTimeout);
            }

            if let Err(e) = self
                .inner
                .target
                .post_message(ping.clone(), &self.inner.target_origin)
            {
                error!(error = %e, "postMessage failed");
            }

            let wake_at = (Instant::now() + self.inner.timeouts.ping_interval()).min(deadline);
            tokio::select! {
                _ = self.inner.state_changed.notified() => {}
                _ = time::sleep_until(wake_at) => {}
            }
        }
    }

    /// Invoke `command` on the target.
    pub fn call(&self, command: &str, args: Vec<Value>) -> RpcResult<PendingCall> {
        self.send(RequestEnvelope::new(RequestId::random(), command, args))
    }

    /// Invoke `command`, asking the target to persist the request so it can
    /// still answer after reloading itself.
    pub fn call_and_persist(&self, command: &str, args: Vec<Value>) -> RpcResult<PendingCall> {
        let mut request = RequestEnvelope::new(RequestId::random(), command, args);
        request.persist_in_url = true;
        self.send(request)
    }

    fn send(&self, request: RequestEnvelope) -> RpcResult<PendingCall> {
        if self.inner.target.is_closed() {
            return Err(RpcError::ConnectionClosed);
        }

        let id = request.id;
        let data = request.to_value()?;
        let (tx, rx) = oneshot::channel();

        {
            let mut shared = self.inner.shared.lock();
            match shared.state {
                ConnectionState::Connected => {}
                ConnectionState::Closed => return Err(RpcError::ConnectionClosed),
                ConnectionState::Disconnected | ConnectionState::Connecting => {
                    return Err(RpcError::NotConnected)
                }
            }
            shared.router.register(HandlerKey::Id(id), settle_once(tx));
            shared.router.registry_mut().add(id, request.command.as_str(), None);
        }

        debug!(%id, command = %request.command, args = request.args.len(), "REQUEST");

        if let Err(e) = self
            .inner
            .target
            .post_message(data, &self.inner.target_origin)
        {
            let mut shared = self.inner.shared.lock();
            shared.router.unregister(&HandlerKey::Id(id));
            shared.router.registry_mut().remove(id);
            return Err(e.into());
        }

        Ok(PendingCall { id, rx })
    }

    /// Register a handler for every response to `command`.
    pub fn on_response<R, E>(&self, command: &str, resolve: R, reject: E)
    where
        R: Fn(Value, RequestId, Option<Value>) + Send + Sync + 'static,
        E: Fn(RpcError, RequestId, Option<Value>) + Send + Sync + 'static,
    {
        self.inner.shared.lock().router.register(
            HandlerKey::Command(command.to_string()),
            ResponseHandler::new(resolve, reject),
        );
    }

    /// Process a message event from the host.
    ///
    /// Events whose source is not the target are ignored outright. Returns
    /// whether the event completed the handshake or settled a request.
    pub fn handle_message(&self, event: &MessageEvent) -> bool {
        let from_target = event
            .source
            .as_ref()
            .is_some_and(|source| source.id() == self.inner.target.id());
        if !from_target {
            return false;
        }

        let delivery = {
            let mut shared = self.inner.shared.lock();

            if is_pong_from(event, self.inner.target.id(), &self.inner.policy) {
                if shared.state != ConnectionState::Connecting {
                    return false;
                }
                shared.state = ConnectionState::Connected;
                drop(shared);
                info!(origin = %event.origin, "connection established");
                self.inner.state_changed.notify_one();
                return true;
            }

            let Ok(data) = ResponseEnvelope::from_value(&event.data) else {
                return false;
            };
            shared.router.route(
                &ResponseMessage {
                    origin: event.origin.clone(),
                    data,
                },
                true,
            )
        };

        match delivery {
            Some(delivery) => {
                delivery.fire();
                true
            }
            None => false,
        }
    }

    /// Tear the channel down, rejecting every pending request once.
    ///
    /// Safe to call any number of times.
    pub fn close(&self) {
        self.inner.close();
    }
}

impl Inner {
    fn close(&self) {
        let deliveries: Vec<Delivery> = {
            let mut shared = self.shared.lock();
            if shared.state == ConnectionState::Closed {
                return;
            }
            shared.state = ConnectionState::Closed;
            if let Some(liveness) = shared.liveness.take() {
                liveness.abort();
            }
            shared.router.reject_all(RpcError::ConnectionClosed)
        };

        debug!(rejected = deliveries.len(), "connection closed");
        deliveries.into_iter().for_each(Delivery::fire);
        self.state_changed.notify_one();
    }

    fn close_if_target_gone(&self) -> bool {
        if !self.target.is_closed() {
            return false;
        }
        self.close();
        true
    }

    fn give_up_connecting(&self) {
        let mut shared = self.shared.lock();
        if shared.state == ConnectionState::Connecting {
            shared.state = ConnectionState::Disconnected;
            if let Some(liveness) = shared.liveness.take() {
                liveness.abort();
            }
        }
    }
}

fn spawn_liveness(inner: &Arc<Inner>) -> JoinHandle<()> {
    let weak: Weak<Inner> = Arc::downgrade(inner);
    let period = inner.timeouts.liveness_interval();
    tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + period, period);
        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else { break };
            if !inner.shared.lock().state.is_live() {
                continue;
            }
            if inner.close_if_target_gone() {
                break;
            }
        }
    })
}

type Settled = Result<Value, RpcError>;

fn settle_once(tx: oneshot::Sender<Settled>) -> ResponseHandler {
    let tx = Arc::new(Mutex::new(Some(tx)));
    let on_err = tx.clone();
    ResponseHandler::new(
        move |result, _, _| {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(Ok(result));
            }
        },
        move |error, _, _| {
            if let Some(tx) = on_err.lock().take() {
                let _ = tx.send(Err(error));
            }
        },
    )
}

/// A request in flight. Resolves with the result or the rejection.
#[derive(Debug)]
pub struct PendingCall {
    id: RequestId,
    rx: oneshot::Receiver<Settled>,
}

impl PendingCall {
    pub fn id(&self) -> RequestId {
        self.id
    }
}

impl Future for PendingCall {
    type Output = RpcResult<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(settled)) => Poll::Ready(settled),
            // handler dropped without settling: the channel is gone
            Poll::Ready(Err(_)) => Poll::Ready(Err(RpcError::ConnectionClosed)),
            Poll::Pending => Poll::Pending,
        }
    }
}
