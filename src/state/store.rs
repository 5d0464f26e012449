//! Session-scoped key/value store

use std::collections::HashMap;
use std::sync::Arc;

use crossframe_protocol::RequestId;
use parking_lot::Mutex;

/// Key/value store scoped to the current browsing session.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String);
    fn remove(&self, key: &str);
}

/// In-memory store. Clones share the same contents, so a clone handed to a
/// second client instance behaves like the same session after a reload.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.lock().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl SessionStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: String) {
        self.entries.lock().insert(key.to_string(), value);
    }

    fn remove(&self, key: &str) {
        self.entries.lock().remove(key);
    }
}

/// Key layout inside a [`SessionStore`], prefixed by a namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreKeys {
    namespace: String,
}

impl StoreKeys {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Registry blob of pending requests.
    pub fn registry(&self) -> String {
        format!("{}rpcRequests", self.namespace)
    }

    /// Consumed response kept for replay.
    pub fn response(&self, id: RequestId) -> String {
        format!("{}response-{}", self.namespace, id)
    }

    /// Accepted request kept for responder recovery.
    pub fn request(&self, id: RequestId) -> String {
        format!("{}request-{}", self.namespace, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_keys() {
        let keys = StoreKeys::default();
        let id = RequestId::new(12).unwrap();
        assert_eq!(keys.registry(), "rpcRequests");
        assert_eq!(keys.response(id), "response-12");
        assert_eq!(keys.request(id), "request-12");
    }

    #[test]
    fn test_namespaced_keys() {
        let keys = StoreKeys::new("wallet:");
        assert_eq!(keys.registry(), "wallet:rpcRequests");
    }

    #[test]
    fn test_memory_store_clones_share_contents() {
        let store = MemoryStore::new();
        let other = store.clone();
        store.set("a", "1".to_string());
        assert_eq!(other.get("a").as_deref(), Some("1"));
        other.remove("a");
        assert!(store.is_empty());
    }
}
