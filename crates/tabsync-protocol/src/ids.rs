//! Tab and callback identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Process-lifetime identifier for one Facade Connection (one browser tab).
///
/// Unique with overwhelming probability: a random component plus the
/// millisecond the connection was created. Stamped on every outbound
/// frame so the sender can filter its own broadcasts and the
/// Coordinator can route replies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(String);

impl TabId {
    /// Generate a new, effectively-unique tab id.
    #[must_use]
    pub fn new() -> Self {
        let random: u64 = rand::random();
        Self(format!("{random:016x}-{}", crate::now_millis()))
    }

    /// Borrow the underlying string form of the id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TabId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for TabId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identifier for one outstanding request, unique within the originating
/// tab only (never reused within that tab's lifetime).
///
/// Allocated by the Broker, not the application: callers never construct
/// one directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallbackId(u64);

impl CallbackId {
    pub(crate) fn from_raw(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonically increasing allocator for `CallbackId`s within one tab.
///
/// Invariant: an id is never reused within the tab's
/// lifetime, so this is a plain saturating counter rather than a reused
/// free-list.
#[derive(Debug, Default)]
pub struct CallbackIdAllocator {
    next: std::sync::atomic::AtomicU64,
}

impl CallbackIdAllocator {
    /// Create a fresh allocator starting at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next id.
    pub fn next(&self) -> CallbackId {
        let value = self.next.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        CallbackId::from_raw(value)
    }
}
