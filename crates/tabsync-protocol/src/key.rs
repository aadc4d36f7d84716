//! Document routing key.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The pair `(collection, id)` used both as the cache key inside a Facade
/// Connection and as the fan-out routing key inside the Coordinator.
///
/// `to_wire_string` produces an opaque, unambiguous encoding for use in
/// contexts (e.g. a `HashMap` key, a log field) that want a single
/// scalar rather than a struct; the encoding escapes the separator so a
/// collection name may not itself be mistaken for one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentKey {
    /// The collection (table) the document lives in.
    pub collection: String,
    /// The document's id within its collection.
    pub id: String,
}

const SEPARATOR: char = '\u{1f}'; // ASCII unit separator — never appears in application strings.

impl DocumentKey {
    /// Construct a key from a collection and id.
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Encode as a single string that round-trips via [`DocumentKey::from_wire_string`].
    #[must_use]
    pub fn to_wire_string(&self) -> String {
        format!("{}{SEPARATOR}{}", self.collection, self.id)
    }

    /// Decode a string produced by [`DocumentKey::to_wire_string`].
    #[must_use]
    pub fn from_wire_string(s: &str) -> Option<Self> {
        let (collection, id) = s.split_once(SEPARATOR)?;
        Some(Self::new(collection, id))
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}
