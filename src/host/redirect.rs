//! Redirect client
//!
//! Calls a target page by navigating to it. The calling page does not
//! survive: the request is written to the session store before navigating,
//! and the reply arrives when the target navigates back to the return URL.
//! A fresh client on the reloaded page picks it up in [`RedirectClient::init`]
//! and hands it to the command handler registered with
//! [`RedirectClient::on_response`].

use std::sync::Arc;

use crossframe_protocol::url_codec::{self, ReturnAddress};
use crossframe_protocol::{DeliveryMethod, RequestId, ResponseMessage, Value};
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::router::{stored_response, HandlerKey, ResponseHandler, ResponseRouter};
use crate::config::{ConfigError, RpcConfig};
use crate::context::Window;
use crate::error::{RpcError, RpcResult};
use crate::state::{RequestRegistry, SessionStore, StoreKeys};

/// What [`RedirectClient::init`] found on the current page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    /// A response arrived in the URL and reached its handler.
    Response(RequestId),
    /// A stored response was replayed for the URL's `id` to its handler.
    Replayed(RequestId),
    /// A response was found but dropped: foreign origin, or nobody waiting.
    Dropped(RequestId),
    /// The page was reached by going back; the request was rejected.
    BackRejected(RequestId),
    Nothing,
}

/// A redirect call under construction.
#[derive(Debug, Clone)]
pub struct RedirectCall {
    return_url: String,
    command: String,
    args: Vec<Value>,
    state: Option<Value>,
    handle_history_back: bool,
    response_method: DeliveryMethod,
}

impl RedirectCall {
    pub fn new(return_url: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            return_url: return_url.into(),
            command: command.into(),
            args: Vec::new(),
            state: None,
            handle_history_back: false,
            response_method: DeliveryMethod::RedirectGet,
        }
    }

    pub fn arg(mut self, arg: impl Into<Value>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    /// Caller state handed back with the response.
    pub fn state(mut self, state: impl Into<Value>) -> Self {
        self.state = Some(state.into());
        self
    }

    /// Reject the request if the user comes back to this page without a reply.
    pub fn handle_history_back(mut self, enabled: bool) -> Self {
        self.handle_history_back = enabled;
        self
    }

    /// Ask for the reply as a form submission instead of a navigation.
    pub fn respond_by_post(mut self) -> Self {
        self.response_method = DeliveryMethod::HttpPost;
        self
    }
}

/// Client for a target reached by full navigation.
pub struct RedirectClient {
    target: String,
    window: Arc<dyn Window>,
    store: Arc<dyn SessionStore>,
    keys: StoreKeys,
    router: Mutex<ResponseRouter>,
}

impl RedirectClient {
    /// Client calling the page at `target`. Pending requests left in `store`
    /// by an earlier page are restored.
    pub fn new(
        config: &RpcConfig,
        target: impl Into<String>,
        window: Arc<dyn Window>,
        store: Arc<dyn SessionStore>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let keys = config.store_keys();
        let registry = RequestRegistry::persistent(store.clone(), keys.clone());
        let router = ResponseRouter::new(config.origin_policy(), registry)
            .with_preserve_requests(config.preserve_requests);
        Ok(Self {
            target: target.into(),
            window,
            store,
            keys,
            router: Mutex::new(router),
        })
    }

    pub fn on_response<R, E>(&self, command: &str, resolve: R, reject: E)
    where
        R: Fn(Value, RequestId, Option<Value>) + Send + Sync + 'static,
        E: Fn(RpcError, RequestId, Option<Value>) + Send + Sync + 'static,
    {
        self.router.lock().register(
            HandlerKey::Command(command.to_string()),
            ResponseHandler::new(resolve, reject),
        );
    }

    pub fn has_pending(&self, id: RequestId) -> bool {
        self.router.lock().registry().has(id)
    }

    /// Process whatever the current page carries.
    ///
    /// In order: a response in the URL (stripped from the URL, and stored
    /// for replay when its origin is allowed), a stored response for the
    /// URL's `id`, or an armed back-rejection marker in the history state.
    pub fn init(&self) -> InitOutcome {
        let location = self.window.location();
        let referrer = self.window.referrer();

        if let Some(decoded) = url_codec::receive_redirect_response(&location, referrer.as_deref()) {
            self.window
                .replace_state(self.window.history_state(), Some(&decoded.cleaned));
            let message = decoded.message;
            let id = message.data.id;

            if !self.router.lock().policy().allows(&message.origin) {
                warn!(%id, origin = %message.origin, "ignoring response from disallowed origin");
                return InitOutcome::Dropped(id);
            }
            match crossframe_protocol::codec::stringify(&message) {
                Ok(text) => self.store.set(&self.keys.response(id), text),
                Err(e) => debug!(%id, error = %e, "response not stored"),
            }
            return self.deliver(&message, InitOutcome::Response(id));
        }

        let stored = url_codec::query_id(&location)
            .and_then(|id| stored_response(self.store.as_ref(), &self.keys, id));
        if let Some(stored) = stored {
            let id = stored.data.id;
            return self.deliver(&stored, InitOutcome::Replayed(id));
        }

        self.reject_on_back()
    }

    fn deliver(&self, message: &ResponseMessage, outcome: InitOutcome) -> InitOutcome {
        let delivery = self.router.lock().route(message, false);
        match delivery {
            Some(delivery) => {
                delivery.fire();
                outcome
            }
            None => InitOutcome::Dropped(message.data.id),
        }
    }

    fn reject_on_back(&self) -> InitOutcome {
        let history = self.window.history_state();
        let Some(id) = history.back_rejection_id() else {
            return InitOutcome::Nothing;
        };

        // disarm first so a reload of this entry does not reject again
        self.window
            .replace_state(history.with_back_rejection_id(None), None);

        let delivery = self.router.lock().reject(id, RpcError::Aborted);
        match delivery {
            Some(delivery) => {
                debug!(%id, "BACK");
                delivery.fire();
                InitOutcome::BackRejected(id)
            }
            None => InitOutcome::Nothing,
        }
    }

    /// Navigate to the target with `call` encoded in the URL.
    ///
    /// The request is registered (and persisted) before navigating. Returns
    /// the id the reply will carry.
    pub fn call(&self, call: RedirectCall) -> RpcResult<RequestId> {
        let id = RequestId::random();
        let href = url_codec::prepare_redirect_invocation(
            &self.target,
            id,
            &ReturnAddress::parse(&call.return_url),
            &call.command,
            &call.args,
            call.response_method,
        )?;

        self.router
            .lock()
            .registry_mut()
            .add(id, call.command.as_str(), call.state);

        if call.handle_history_back {
            let marked = self.window.history_state().with_back_rejection_id(Some(id));
            self.window.replace_state(marked, None);
        }

        debug!(%id, command = %call.command, args = call.args.len(), "REQUEST");
        self.window.navigate(&href);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockWindow;
    use crate::state::MemoryStore;
    use url::Url;

    fn client(window: &Arc<MockWindow>, store: &MemoryStore) -> RedirectClient {
        RedirectClient::new(
            &RpcConfig::for_origin("https://b"),
            "https://b/",
            window.clone(),
            Arc::new(store.clone()),
        )
        .unwrap()
    }

    #[test]
    fn test_call_registers_before_navigating() {
        let window = MockWindow::new("https://a/");
        let store = MemoryStore::new();
        let client = client(&window, &store);

        let id = client
            .call(RedirectCall::new("https://a/", "sign").arg("tx").state("local"))
            .unwrap();

        let href = window.last_navigation().unwrap();
        assert_eq!(url_codec::query_id(&Url::parse(&href).unwrap()), Some(id));
        assert!(store.get("rpcRequests").unwrap().contains(&id.to_string()));
        assert_eq!(window.history_state().back_rejection_id(), None);
    }

    #[test]
    fn test_post_reply_requested_in_fragment() {
        let window = MockWindow::new("https://a/");
        let client = client(&window, &MemoryStore::new());
        client
            .call(RedirectCall::new("https://a/", "sign").respond_by_post())
            .unwrap();
        assert!(window.last_navigation().unwrap().contains("responseMethod=post"));
    }

    #[test]
    fn test_nothing_to_do_on_plain_page() {
        let window = MockWindow::new("https://a/");
        let client = client(&window, &MemoryStore::new());
        assert_eq!(client.init(), InitOutcome::Nothing);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = RpcConfig::for_origin("https://b");
        config.allowed_origins.push("*".to_string());
        let result = RedirectClient::new(
            &config,
            "https://b/",
            MockWindow::new("https://a/"),
            Arc::new(MemoryStore::new()),
        );
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_forged_response_does_not_overwrite_stored() {
        let store = MemoryStore::new();
        let id = RequestId::new(77).unwrap();
        let key = StoreKeys::default().response(id);
        store.set(&key, "genuine".to_string());

        let href = url_codec::prepare_redirect_reply(
            "https://a/",
            id,
            crossframe_protocol::ResponseStatus::Ok,
            &Value::from("forged"),
        )
        .unwrap();
        let window = MockWindow::new(&href).with_referrer("https://evil.example/");
        let client = client(&window, &store);

        assert_eq!(client.init(), InitOutcome::Dropped(id));
        assert_eq!(store.get(&key).as_deref(), Some("genuine"));
        // the spent reply is still removed from the URL
        assert_eq!(window.location().as_str(), "https://a/?id=77");
    }

    #[test]
    fn test_unclaimed_response_reported_as_dropped() {
        let id = RequestId::new(78).unwrap();
        let href = url_codec::prepare_redirect_reply(
            "https://a/",
            id,
            crossframe_protocol::ResponseStatus::Ok,
            &Value::from(1),
        )
        .unwrap();
        let window = MockWindow::new(&href).with_referrer("https://b/");
        let store = MemoryStore::new();
        let client = client(&window, &store);

        assert_eq!(client.init(), InitOutcome::Dropped(id));
        // still kept for a deliberate replay by a later page
        assert!(store.get(&StoreKeys::default().response(id)).is_some());
    }
}
