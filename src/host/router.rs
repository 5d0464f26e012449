//! Response router
//!
//! Matches an incoming response to the handler waiting for it. Handlers are
//! registered either for one request id (one-shot, highest priority) or for a
//! command name (shared by every request for that command).
//!
//! Routing never runs user code. It returns a [`Delivery`] that the caller
//! fires after releasing whatever lock guards the router, so a handler may
//! call back into its client.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crossframe_protocol::{
    codec, ErrorInfo, RequestId, ResponseEnvelope, ResponseMessage, ResponseStatus, Value,
};
use tracing::{debug, warn};

use crate::error::RpcError;
use crate::origin::OriginPolicy;
use crate::state::{RequestRegistry, SessionStore, StoreKeys};

type ResolveFn = dyn Fn(Value, RequestId, Option<Value>) + Send + Sync;
type RejectFn = dyn Fn(RpcError, RequestId, Option<Value>) + Send + Sync;

/// Resolve/reject pair invoked with `(outcome, id, caller state)`.
#[derive(Clone)]
pub struct ResponseHandler {
    resolve: Arc<ResolveFn>,
    reject: Arc<RejectFn>,
}

impl ResponseHandler {
    pub fn new<R, E>(resolve: R, reject: E) -> Self
    where
        R: Fn(Value, RequestId, Option<Value>) + Send + Sync + 'static,
        E: Fn(RpcError, RequestId, Option<Value>) + Send + Sync + 'static,
    {
        Self {
            resolve: Arc::new(resolve),
            reject: Arc::new(reject),
        }
    }

    pub fn resolve(&self, result: Value, id: RequestId, state: Option<Value>) {
        (self.resolve)(result, id, state)
    }

    pub fn reject(&self, error: RpcError, id: RequestId, state: Option<Value>) {
        (self.reject)(error, id, state)
    }
}

impl fmt::Debug for ResponseHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ResponseHandler")
    }
}

/// What a handler is registered under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HandlerKey {
    Id(RequestId),
    Command(String),
}

/// A matched response, ready to hand to its handler.
#[derive(Debug)]
pub struct Delivery {
    pub id: RequestId,
    pub state: Option<Value>,
    pub outcome: Result<Value, RpcError>,
    handler: ResponseHandler,
}

impl Delivery {
    pub fn fire(self) {
        match self.outcome {
            Ok(result) => self.handler.resolve(result, self.id, self.state),
            Err(error) => self.handler.reject(error, self.id, self.state),
        }
    }
}

/// Caller-side correlation of responses with pending requests.
pub struct ResponseRouter {
    policy: OriginPolicy,
    registry: RequestRegistry,
    handlers: HashMap<HandlerKey, ResponseHandler>,
    preserve_requests: bool,
    response_store: Option<(Arc<dyn SessionStore>, StoreKeys)>,
}

impl ResponseRouter {
    pub fn new(policy: OriginPolicy, registry: RequestRegistry) -> Self {
        Self {
            policy,
            registry,
            handlers: HashMap::new(),
            preserve_requests: false,
            response_store: None,
        }
    }

    /// Keep registry entries and handlers after a response is consumed.
    pub fn with_preserve_requests(mut self, preserve: bool) -> Self {
        self.preserve_requests = preserve;
        self
    }

    /// Persist every consumed response under `response-<id>` for later replay.
    pub fn with_response_store(mut self, store: Arc<dyn SessionStore>, keys: StoreKeys) -> Self {
        self.response_store = Some((store, keys));
        self
    }

    pub fn policy(&self) -> &OriginPolicy {
        &self.policy
    }

    pub fn registry(&self) -> &RequestRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut RequestRegistry {
        &mut self.registry
    }

    pub fn register(&mut self, key: HandlerKey, handler: ResponseHandler) {
        self.handlers.insert(key, handler);
    }

    pub fn unregister(&mut self, key: &HandlerKey) -> Option<ResponseHandler> {
        self.handlers.remove(key)
    }

    pub fn has_handler(&self, key: &HandlerKey) -> bool {
        self.handlers.contains_key(key)
    }

    /// Handler for `id`: the id-specific one if present, else the one for
    /// the command the registry recorded for `id`.
    pub fn lookup(&self, id: RequestId) -> Option<&ResponseHandler> {
        self.handlers.get(&HandlerKey::Id(id)).or_else(|| {
            let command = self.registry.command(id)?;
            self.handlers.get(&HandlerKey::Command(command.to_string()))
        })
    }

    /// Match a response to its handler.
    ///
    /// Returns `None` for responses from a disallowed origin and for responses
    /// nobody is waiting for. The matched entry is released unless requests
    /// are preserved, so a second delivery of the same response finds nothing.
    pub fn route(&mut self, message: &ResponseMessage, persist: bool) -> Option<Delivery> {
        if !self.policy.allows(&message.origin) {
            debug!(origin = %message.origin, id = %message.data.id, "dropping response from disallowed origin");
            return None;
        }

        let data = &message.data;
        let Some(handler) = self.lookup(data.id).cloned() else {
            warn!(id = %data.id, status = %data.status, "Unknown RPC response");
            return None;
        };
        let state = self.registry.state(data.id);
        self.release(data.id);

        debug!(id = %data.id, status = %data.status, "RECEIVE");
        if persist {
            self.persist_response(message);
        }

        let outcome = match data.status {
            ResponseStatus::Ok => Ok(data.result.clone()),
            ResponseStatus::Error => Err(RpcError::Remote(ErrorInfo::from_value(&data.result))),
        };

        Some(Delivery {
            id: data.id,
            state,
            outcome,
            handler,
        })
    }

    /// Route and fire in one step, for routers not shared behind a lock.
    pub fn receive(&mut self, message: &ResponseMessage) -> bool {
        match self.route(message, true) {
            Some(delivery) => {
                delivery.fire();
                true
            }
            None => false,
        }
    }

    /// Reject one pending request locally, releasing it like a response would.
    pub fn reject(&mut self, id: RequestId, error: RpcError) -> Option<Delivery> {
        let handler = self.lookup(id).cloned()?;
        let state = self.registry.state(id);
        self.release(id);
        Some(Delivery {
            id,
            state,
            outcome: Err(error),
            handler,
        })
    }

    /// Reject every pending request once, then forget all requests and handlers.
    pub fn reject_all(&mut self, error: RpcError) -> Vec<Delivery> {
        let deliveries = self
            .registry
            .ids()
            .into_iter()
            .filter_map(|id| {
                let handler = self.lookup(id).cloned()?;
                Some(Delivery {
                    id,
                    state: self.registry.state(id),
                    outcome: Err(error.clone()),
                    handler,
                })
            })
            .collect();

        self.registry.clear();
        self.handlers.clear();
        deliveries
    }

    fn release(&mut self, id: RequestId) {
        if self.preserve_requests {
            return;
        }
        self.registry.remove(id);
        self.handlers.remove(&HandlerKey::Id(id));
    }

    fn persist_response(&self, message: &ResponseMessage) {
        let Some((store, keys)) = &self.response_store else { return };
        match codec::stringify(message) {
            Ok(text) => store.set(&keys.response(message.data.id), text),
            Err(e) => warn!(id = %message.data.id, error = %e, "failed to persist response"),
        }
    }
}

/// Stored response for `id`, if one was persisted.
pub fn stored_response(
    store: &dyn SessionStore,
    keys: &StoreKeys,
    id: RequestId,
) -> Option<ResponseMessage> {
    let text = store.get(&keys.response(id))?;
    match codec::parse::<ResponseMessage>(&text) {
        Ok(message) => Some(message),
        Err(e) => {
            warn!(%id, error = %e, "discarding unreadable stored response");
            None
        }
    }
}

/// Convenience for building a response message in tests and tooling.
pub fn response_message(origin: impl Into<String>, data: ResponseEnvelope) -> ResponseMessage {
    ResponseMessage {
        origin: origin.into(),
        data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MemoryStore;
    use parking_lot::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    fn id(raw: u64) -> RequestId {
        RequestId::new(raw).unwrap()
    }

    fn recording(log: &Log, tag: &'static str) -> ResponseHandler {
        let ok = log.clone();
        let err = log.clone();
        ResponseHandler::new(
            move |result, id, _| ok.lock().push(format!("{tag} ok {id} {result}")),
            move |error, id, _| err.lock().push(format!("{tag} err {id} {error}")),
        )
    }

    fn router() -> ResponseRouter {
        ResponseRouter::new(OriginPolicy::exact("https://b"), RequestRegistry::in_memory())
    }

    #[test]
    fn test_id_handler_beats_command_handler() {
        let log = Log::default();
        let mut router = router();
        router.register(HandlerKey::Command("sign".into()), recording(&log, "command"));
        router.register(HandlerKey::Id(id(9)), recording(&log, "id"));
        router.registry_mut().add(id(9), "sign", None);

        assert!(router.receive(&response_message("https://b", ResponseEnvelope::ok(id(9), Value::from(1i64)))));
        assert_eq!(*log.lock(), vec!["id ok 9 1".to_string()]);
    }

    #[test]
    fn test_second_delivery_is_dropped() {
        let log = Log::default();
        let mut router = router();
        router.register(HandlerKey::Command("sign".into()), recording(&log, "command"));
        router.registry_mut().add(id(9), "sign", Some(Value::from("s")));

        let message = response_message("https://b", ResponseEnvelope::ok(id(9), Value::from("x")));
        assert!(router.receive(&message));
        assert!(!router.receive(&message));
        assert_eq!(log.lock().len(), 1);
    }

    #[test]
    fn test_preserved_requests_replay() {
        let log = Log::default();
        let mut router = router().with_preserve_requests(true);
        router.register(HandlerKey::Command("sign".into()), recording(&log, "command"));
        router.registry_mut().add(id(9), "sign", None);

        let message = response_message("https://b", ResponseEnvelope::ok(id(9), Value::from("x")));
        assert!(router.receive(&message));
        assert!(router.receive(&message));
        assert_eq!(log.lock().len(), 2);
    }

    #[test]
    fn test_disallowed_origin_dropped() {
        let log = Log::default();
        let mut router = router();
        router.register(HandlerKey::Id(id(9)), recording(&log, "id"));

        assert!(!router.receive(&response_message("https://evil", ResponseEnvelope::ok(id(9), Value::Null))));
        assert!(log.lock().is_empty());
        assert!(router.has_handler(&HandlerKey::Id(id(9))));
    }

    #[test]
    fn test_error_reply_rebuilds_error() {
        let rejected = Arc::new(Mutex::new(None));
        let slot = rejected.clone();
        let mut router = router();
        router.register(
            HandlerKey::Id(id(4)),
            ResponseHandler::new(|_, _, _| {}, move |e, _, _| *slot.lock() = Some(e)),
        );

        let info = ErrorInfo::new("boom").with_name("TypeError").with_stack("at x");
        router.receive(&response_message("https://b", ResponseEnvelope::error(id(4), &info)));

        let error = rejected.lock().clone().unwrap();
        assert_eq!(error.remote(), Some(&info));
    }

    #[test]
    fn test_reject_all_fires_each_request_once() {
        let log = Log::default();
        let mut router = router();
        router.register(HandlerKey::Command("sign".into()), recording(&log, "command"));
        router.register(HandlerKey::Id(id(3)), recording(&log, "id"));
        router.registry_mut().add(id(3), "sign", None);
        router.registry_mut().add(id(4), "sign", None);

        let deliveries = router.reject_all(RpcError::ConnectionClosed);
        assert_eq!(deliveries.len(), 2);
        deliveries.into_iter().for_each(Delivery::fire);

        let mut log = log.lock().clone();
        log.sort();
        assert_eq!(
            log,
            vec![
                "command err 4 Connection was closed".to_string(),
                "id err 3 Connection was closed".to_string(),
            ]
        );
        assert!(router.registry().is_empty());
        assert!(router.reject_all(RpcError::ConnectionClosed).is_empty());
    }

    #[test]
    fn test_consumed_response_persisted() {
        let store = MemoryStore::new();
        let log = Log::default();
        let mut router = router().with_response_store(Arc::new(store.clone()), StoreKeys::default());
        router.register(HandlerKey::Id(id(9)), recording(&log, "id"));

        router.receive(&response_message("https://b", ResponseEnvelope::ok(id(9), Value::bytes(vec![1, 2]))));

        let stored = stored_response(&store, &StoreKeys::default(), id(9)).unwrap();
        assert_eq!(stored.data.result, Value::bytes(vec![1, 2]));
        assert_eq!(stored.origin, "https://b");
    }
}
