//! Per-tab / per-document subscription bookkeeping.

use std::collections::{HashMap, HashSet};

use tabsync_protocol::{DocumentKey, TabId};

/// The two inverse mappings the Coordinator keeps consistent: tab → set
/// of document keys, and document key → set of tabs.
#[derive(Debug, Default)]
pub struct SubscriptionTables {
    doc_subs: HashMap<DocumentKey, HashSet<TabId>>,
    tab_subs: HashMap<TabId, HashSet<DocumentKey>>,
}

impl SubscriptionTables {
    /// Create empty tables.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `tab` is interested in `key`. Returns `true` if `tab`
    /// is the first subscriber for `key` — the signal to install event
    /// forwarding for it.
    pub fn subscribe(&mut self, tab: TabId, key: DocumentKey) -> bool {
        self.tab_subs.entry(tab.clone()).or_default().insert(key.clone());
        let subscribers = self.doc_subs.entry(key).or_default();
        let was_empty = subscribers.is_empty();
        subscribers.insert(tab);
        was_empty
    }

    /// Remove `tab`'s interest in `key`. Returns `true` if `key`'s
    /// subscriber set is now empty (forwarding for it may be torn down).
    pub fn unsubscribe(&mut self, tab: &TabId, key: &DocumentKey) -> bool {
        if let Some(keys) = self.tab_subs.get_mut(tab) {
            keys.remove(key);
            if keys.is_empty() {
                self.tab_subs.remove(tab);
            }
        }
        let Some(subscribers) = self.doc_subs.get_mut(key) else {
            return false;
        };
        subscribers.remove(tab);
        if subscribers.is_empty() {
            self.doc_subs.remove(key);
            true
        } else {
            false
        }
    }

    /// Remove every trace of `tab`. Idempotent: a tab
    /// already absent from both tables is a no-op. Returns the document
    /// keys whose subscriber set became empty as a result.
    pub fn cleanup_tab(&mut self, tab: &TabId) -> Vec<DocumentKey> {
        let Some(keys) = self.tab_subs.remove(tab) else {
            return Vec::new();
        };
        let mut newly_empty = Vec::new();
        for key in keys {
            if let Some(subscribers) = self.doc_subs.get_mut(&key) {
                subscribers.remove(tab);
                if subscribers.is_empty() {
                    self.doc_subs.remove(&key);
                    newly_empty.push(key);
                }
            }
        }
        newly_empty
    }

    /// Whether at least one tab is subscribed to `key` — the gate for
    /// whether a `doc.event` is worth broadcasting at all.
    #[must_use]
    pub fn has_subscribers(&self, key: &DocumentKey) -> bool {
        self.doc_subs.contains_key(key)
    }

    /// Number of distinct document keys with at least one subscriber.
    #[must_use]
    pub fn doc_count(&self) -> usize {
        self.doc_subs.len()
    }

    /// Number of distinct tabs with at least one subscription.
    #[must_use]
    pub fn tab_count(&self) -> usize {
        self.tab_subs.len()
    }

    /// Number of tabs subscribed to `key`.
    #[must_use]
    pub fn subscriber_count(&self, key: &DocumentKey) -> usize {
        self.doc_subs.get(key).map_or(0, HashSet::len)
    }
}
