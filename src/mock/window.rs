//! In-memory window with a history stack.

use std::sync::Arc;

use parking_lot::Mutex;
use url::Url;

use crate::context::{ContextRef, HistoryState, Window};

#[derive(Debug, Clone)]
struct Entry {
    url: Url,
    state: HistoryState,
}

struct Inner {
    entries: Vec<Entry>,
    current: usize,
    referrer: Option<String>,
    navigations: Vec<String>,
    opener: Option<Arc<dyn ContextRef>>,
    parent: Option<Arc<dyn ContextRef>>,
}

/// A window whose navigations are recorded instead of performed.
///
/// `navigate` only records the target. Tests decide what the next page is:
/// [`MockWindow::follow`] loads the last navigation as a new history entry,
/// [`MockWindow::back`] returns to the previous entry with its state.
pub struct MockWindow {
    inner: Mutex<Inner>,
}

impl MockWindow {
    /// Window showing `url`. Panics on an invalid URL.
    pub fn new(url: &str) -> Arc<Self> {
        let url = Url::parse(url).unwrap_or_else(|e| panic!("invalid mock URL {url:?}: {e}"));
        Arc::new(Self {
            inner: Mutex::new(Inner {
                entries: vec![Entry {
                    url,
                    state: HistoryState::default(),
                }],
                current: 0,
                referrer: None,
                navigations: Vec::new(),
                opener: None,
                parent: None,
            }),
        })
    }

    pub fn with_referrer(self: Arc<Self>, referrer: &str) -> Arc<Self> {
        self.inner.lock().referrer = Some(referrer.to_string());
        self
    }

    pub fn set_opener(&self, opener: Option<Arc<dyn ContextRef>>) {
        self.inner.lock().opener = opener;
    }

    pub fn set_parent(&self, parent: Option<Arc<dyn ContextRef>>) {
        self.inner.lock().parent = parent;
    }

    /// Every href passed to `navigate`, oldest first.
    pub fn navigations(&self) -> Vec<String> {
        self.inner.lock().navigations.clone()
    }

    pub fn last_navigation(&self) -> Option<String> {
        self.inner.lock().navigations.last().cloned()
    }

    /// Load the last navigation as a new page, referred by the current one.
    /// Returns false when nothing was navigated to.
    pub fn follow(&self) -> bool {
        let mut inner = self.inner.lock();
        let Some(href) = inner.navigations.last().cloned() else { return false };
        let Ok(url) = Url::parse(&href) else { return false };

        let referrer = inner.entries[inner.current].url.to_string();
        let next = inner.current + 1;
        inner.entries.truncate(next);
        inner.entries.push(Entry {
            url,
            state: HistoryState::default(),
        });
        inner.current = next;
        inner.referrer = Some(referrer);
        true
    }

    /// Go back one entry, restoring its URL and state. The referrer is lost.
    pub fn back(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.current == 0 {
            return false;
        }
        inner.current -= 1;
        inner.referrer = None;
        true
    }

    pub fn history_len(&self) -> usize {
        self.inner.lock().entries.len()
    }
}

impl Window for MockWindow {
    fn location(&self) -> Url {
        let inner = self.inner.lock();
        inner.entries[inner.current].url.clone()
    }

    fn referrer(&self) -> Option<String> {
        self.inner.lock().referrer.clone()
    }

    fn history_state(&self) -> HistoryState {
        let inner = self.inner.lock();
        inner.entries[inner.current].state.clone()
    }

    fn replace_state(&self, state: HistoryState, url: Option<&Url>) {
        let mut inner = self.inner.lock();
        let current = inner.current;
        let entry = &mut inner.entries[current];
        entry.state = state;
        if let Some(url) = url {
            entry.url = url.clone();
        }
    }

    fn navigate(&self, href: &str) {
        self.inner.lock().navigations.push(href.to_string());
    }

    fn opener(&self) -> Option<Arc<dyn ContextRef>> {
        self.inner.lock().opener.clone()
    }

    fn parent(&self) -> Option<Arc<dyn ContextRef>> {
        self.inner.lock().parent.clone()
    }
}
