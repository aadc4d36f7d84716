//! Document snapshots and the opaque operation type.

use serde::{Deserialize, Serialize};

use crate::key::DocumentKey;

/// One element of the operation-transform algebra that mutates document
/// data. Opaque to the core — carried as a
/// JSON value so the wire format never needs to know the algebra's shape.
pub type Op = serde_json::Value;

/// The authoritative connection's state machine, mirrored by every
/// Facade Connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Handshake with the backend in progress.
    Connecting,
    /// Ready to send and receive.
    Connected,
    /// Lost the backend, may reconnect.
    Disconnected,
    /// Torn down for good; never transitions further.
    Closed,
}

impl ConnectionState {
    /// Whether a connection in this state may originate new requests.
    ///
    /// Mirrors the `canSend` flag derived from the authoritative state
    /// machine.
    #[must_use]
    pub fn can_send(self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// A serialized document, as carried in `connection.get` / `doc.subscribe`
/// replies and applied to a Facade Document via `applySnapshot`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// The document this snapshot describes.
    pub key: DocumentKey,
    /// Current document data.
    pub data: serde_json::Value,
    /// Current version counter.
    pub version: u64,
    /// Type tag of the document (the OT algebra's type name), if known.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub type_tag: Option<String>,
    /// Whether the hosted session currently has this document subscribed.
    pub subscribed: bool,
    /// Number of not-yet-acknowledged local ops, as reported by the
    /// hosted session (the "pending-ops indicator" of Glossary: Snapshot).
    pub pending_op_count: usize,
}

impl Snapshot {
    /// Build a fresh, never-subscribed snapshot for a newly created
    /// document.
    #[must_use]
    pub fn new(key: DocumentKey, data: serde_json::Value) -> Self {
        Self {
            key,
            data,
            version: 0,
            type_tag: None,
            subscribed: false,
            pending_op_count: 0,
        }
    }
}
