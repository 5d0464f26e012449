//! Request registry
//!
//! Maps request id → (command, caller state). Every mutation is mirrored to
//! the durable store before returning, so an entry written just before a
//! navigation is there when the page loads again.

use std::collections::BTreeMap;
use std::sync::Arc;

use crossframe_protocol::{codec, RequestId, Value};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::store::{SessionStore, StoreKeys};

/// A request waiting for its response.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRequest {
    pub command: String,
    /// Opaque caller state handed back with the response
    pub state: Option<Value>,
}

/// Id as found in the stored blob. Older writers stored ids as text.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum StoredId {
    Number(u64),
    Text(String),
}

impl StoredId {
    fn into_id(self) -> Option<RequestId> {
        match self {
            StoredId::Number(raw) => RequestId::new(raw),
            StoredId::Text(text) => text.parse().ok(),
        }
    }
}

type StoredEntry = (StoredId, (String, Option<Value>));

/// Registry of pending requests, optionally backed by a [`SessionStore`].
pub struct RequestRegistry {
    entries: BTreeMap<RequestId, PendingRequest>,
    store: Option<Arc<dyn SessionStore>>,
    keys: StoreKeys,
}

impl RequestRegistry {
    /// Registry that lives only in memory.
    pub fn in_memory() -> Self {
        Self {
            entries: BTreeMap::new(),
            store: None,
            keys: StoreKeys::default(),
        }
    }

    /// Registry mirrored to `store`, restoring whatever a previous page left there.
    pub fn persistent(store: Arc<dyn SessionStore>, keys: StoreKeys) -> Self {
        let mut registry = Self {
            entries: BTreeMap::new(),
            store: Some(store),
            keys,
        };
        registry.restore();
        registry
    }

    fn restore(&mut self) {
        let Some(store) = &self.store else { return };
        let Some(blob) = store.get(&self.keys.registry()) else { return };

        match codec::parse::<Vec<StoredEntry>>(&blob) {
            Ok(stored) => {
                for (id, (command, state)) in stored {
                    match id.into_id() {
                        Some(id) => {
                            self.entries.insert(id, PendingRequest { command, state });
                        }
                        None => warn!(command = %command, "skipping stored request with invalid id"),
                    }
                }
            }
            Err(e) => warn!(error = %e, "discarding unreadable request registry"),
        }
    }

    fn persist(&self) {
        let Some(store) = &self.store else { return };
        let stored: Vec<StoredEntry> = self
            .entries
            .iter()
            .map(|(id, pending)| {
                (
                    StoredId::Number(id.get()),
                    (pending.command.clone(), pending.state.clone()),
                )
            })
            .collect();

        match codec::stringify(&stored) {
            Ok(blob) => store.set(&self.keys.registry(), blob),
            Err(e) => warn!(error = %e, "failed to persist request registry"),
        }
    }

    pub fn add(&mut self, id: RequestId, command: impl Into<String>, state: Option<Value>) {
        self.entries.insert(
            id,
            PendingRequest {
                command: command.into(),
                state,
            },
        );
        self.persist();
    }

    pub fn has(&self, id: RequestId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn get(&self, id: RequestId) -> Option<&PendingRequest> {
        self.entries.get(&id)
    }

    pub fn command(&self, id: RequestId) -> Option<&str> {
        self.entries.get(&id).map(|p| p.command.as_str())
    }

    pub fn state(&self, id: RequestId) -> Option<Value> {
        self.entries.get(&id).and_then(|p| p.state.clone())
    }

    pub fn remove(&mut self, id: RequestId) -> Option<PendingRequest> {
        let removed = self.entries.remove(&id);
        self.persist();
        removed
    }

    /// Forget everything, in memory and in the store.
    pub fn clear(&mut self) {
        self.entries.clear();
        if let Some(store) = &self.store {
            store.remove(&self.keys.registry());
        }
    }

    pub fn ids(&self) -> Vec<RequestId> {
        self.entries.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
