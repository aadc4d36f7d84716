//! The closed set of frames that cross the broadcast bus.
//!
//! Every frame carries its originating [`TabId`] and a send-time
//! timestamp; frames whose opcode expects a reply also carry a
//! [`CallbackId`]. The `type` wire field is rendered as the enum's serde
//! tag rather than a bare string re-parsed at every call site.

use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, WireError};
use crate::ids::{CallbackId, TabId};
use crate::key::DocumentKey;
use crate::snapshot::{ConnectionState, Op, Snapshot};

/// A request/reply correlation result, carried inside a `callback` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CallbackResult {
    /// The call succeeded, with the given JSON-encoded result.
    Ok(serde_json::Value),
    /// The call failed; the remote side's reconstituted error.
    Err(WireError),
}

/// The payload of a `doc.event` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DocEventKind {
    /// A snapshot is available (first subscribe, or a fetch reply
    /// mirrored as an event so every consumer observes snapshots the
    /// same way regardless of which call triggered them).
    Load {
        /// The snapshot to apply.
        snapshot: Snapshot,
    },
    /// The document was created.
    Create {
        /// Local/remote origin tag, if the hosted session reported one.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        source: Option<String>,
    },
    /// An operation was applied to the document.
    Op {
        /// The applied operation.
        op: Op,
        /// Origin tag reported by the hosted session.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        source: Option<String>,
        /// The tab that originated this op, if it was submitted through
        /// this coordination layer.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        origin_tab: Option<TabId>,
    },
    /// The document was deleted.
    Del {
        /// The document's data at the time of deletion.
        data: serde_json::Value,
        /// Origin tag reported by the hosted session.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        source: Option<String>,
    },
    /// The hosted document emitted an error.
    Error {
        /// The error.
        error: WireError,
    },
}

/// The payload of a `connection.event` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ConnectionEventKind {
    /// The hosted session's state machine transitioned.
    State {
        /// The new state.
        state: ConnectionState,
        /// Why, if the hosted session reported a reason.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        reason: Option<String>,
    },
    /// The hosted session emitted an error.
    Error {
        /// The error.
        error: WireError,
    },
    /// Auto-flush was toggled.
    AutoFlush {
        /// The new value.
        enabled: bool,
    },
    /// The write queue's size changed.
    WriteQueueSize {
        /// Number of queued writes.
        size: usize,
    },
    /// Whether the write queue is non-empty changed.
    HasPendingWrites {
        /// The new value.
        pending: bool,
    },
}

/// Every frame that can cross the bus.
///
/// Variants are grouped by concern: lifecycle, session calls, document
/// calls, the reply frame, and the two event frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    // -- Lifecycle --
    /// A tab has come online.
    #[serde(rename = "tab.register")]
    TabRegister {
        /// Originating tab.
        tab_id: TabId,
        /// Send-time timestamp.
        timestamp: u64,
    },
    /// A tab is going away.
    #[serde(rename = "tab.unregister")]
    TabUnregister {
        /// Originating tab.
        tab_id: TabId,
        /// Send-time timestamp.
        timestamp: u64,
    },

    // -- Session calls --
    /// Fetch-or-create a document and subscribe to its events.
    #[serde(rename = "connection.get")]
    ConnectionGet {
        /// Originating tab.
        tab_id: TabId,
        /// Send-time timestamp.
        timestamp: u64,
        /// Present iff the caller expects a reply.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        callback_id: Option<CallbackId>,
        /// Target collection.
        collection: String,
        /// Target id.
        id: String,
    },
    /// Bulk fetch-or-create.
    #[serde(rename = "connection.getBulk")]
    ConnectionGetBulk {
        /// Originating tab.
        tab_id: TabId,
        /// Send-time timestamp.
        timestamp: u64,
        /// Present iff the caller expects a reply.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        callback_id: Option<CallbackId>,
        /// Target collection (shared by every id in the batch).
        collection: String,
        /// Ids to fetch, in caller order.
        ids: Vec<String>,
    },
    /// Toggle auto-flush on the hosted session's write queue.
    #[serde(rename = "connection.setAutoFlush")]
    ConnectionSetAutoFlush {
        /// Originating tab.
        tab_id: TabId,
        /// Send-time timestamp.
        timestamp: u64,
        /// Present iff the caller expects a reply.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        callback_id: Option<CallbackId>,
        /// The requested value.
        enabled: bool,
    },
    /// Query whether auto-flush is enabled.
    #[serde(rename = "connection.isAutoFlush")]
    ConnectionIsAutoFlush {
        /// Originating tab.
        tab_id: TabId,
        /// Send-time timestamp.
        timestamp: u64,
        /// Present iff the caller expects a reply.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        callback_id: Option<CallbackId>,
    },
    /// Queue one document for write.
    #[serde(rename = "connection.putDoc")]
    ConnectionPutDoc {
        /// Originating tab.
        tab_id: TabId,
        /// Send-time timestamp.
        timestamp: u64,
        /// Present iff the caller expects a reply.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        callback_id: Option<CallbackId>,
        /// The document reference (data is not re-transmitted).
        doc: DocumentKey,
    },
    /// Queue several documents for write.
    #[serde(rename = "connection.putDocs")]
    ConnectionPutDocs {
        /// Originating tab.
        tab_id: TabId,
        /// Send-time timestamp.
        timestamp: u64,
        /// Present iff the caller expects a reply.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        callback_id: Option<CallbackId>,
        /// The document references.
        docs: Vec<DocumentKey>,
    },
    /// Queue several documents for a single bulk write.
    #[serde(rename = "connection.putDocsBulk")]
    ConnectionPutDocsBulk {
        /// Originating tab.
        tab_id: TabId,
        /// Send-time timestamp.
        timestamp: u64,
        /// Present iff the caller expects a reply.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        callback_id: Option<CallbackId>,
        /// The document references.
        docs: Vec<DocumentKey>,
    },
    /// Flush the write queue now.
    #[serde(rename = "connection.flushWrites")]
    ConnectionFlushWrites {
        /// Originating tab.
        tab_id: TabId,
        /// Send-time timestamp.
        timestamp: u64,
        /// Present iff the caller expects a reply.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        callback_id: Option<CallbackId>,
    },
    /// Query the write queue's size.
    #[serde(rename = "connection.getWriteQueueSize")]
    ConnectionGetWriteQueueSize {
        /// Originating tab.
        tab_id: TabId,
        /// Send-time timestamp.
        timestamp: u64,
        /// Present iff the caller expects a reply.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        callback_id: Option<CallbackId>,
    },
    /// Query whether the write queue is non-empty.
    #[serde(rename = "connection.hasPendingWrites")]
    ConnectionHasPendingWrites {
        /// Originating tab.
        tab_id: TabId,
        /// Send-time timestamp.
        timestamp: u64,
        /// Present iff the caller expects a reply.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        callback_id: Option<CallbackId>,
    },

    // -- Document calls --
    /// Subscribe to a document's events.
    #[serde(rename = "doc.subscribe")]
    DocSubscribe {
        /// Originating tab.
        tab_id: TabId,
        /// Send-time timestamp.
        timestamp: u64,
        /// Present iff the caller expects a reply.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        callback_id: Option<CallbackId>,
        /// The document.
        key: DocumentKey,
    },
    /// Unsubscribe from a document's events.
    #[serde(rename = "doc.unsubscribe")]
    DocUnsubscribe {
        /// Originating tab.
        tab_id: TabId,
        /// Send-time timestamp.
        timestamp: u64,
        /// Present iff the caller expects a reply.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        callback_id: Option<CallbackId>,
        /// The document.
        key: DocumentKey,
    },
    /// Fetch a document once, without subscribing.
    #[serde(rename = "doc.fetch")]
    DocFetch {
        /// Originating tab.
        tab_id: TabId,
        /// Send-time timestamp.
        timestamp: u64,
        /// Present iff the caller expects a reply.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        callback_id: Option<CallbackId>,
        /// The document.
        key: DocumentKey,
    },
    /// Create a document.
    #[serde(rename = "doc.create")]
    DocCreate {
        /// Originating tab.
        tab_id: TabId,
        /// Send-time timestamp.
        timestamp: u64,
        /// Present iff the caller expects a reply.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        callback_id: Option<CallbackId>,
        /// The document.
        key: DocumentKey,
        /// Initial data.
        data: serde_json::Value,
        /// Type tag for the OT algebra, if the caller specified one.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        type_tag: Option<String>,
    },
    /// Submit an operation against a document.
    #[serde(rename = "doc.submitOp")]
    DocSubmitOp {
        /// Originating tab.
        tab_id: TabId,
        /// Send-time timestamp.
        timestamp: u64,
        /// Present iff the caller expects a reply.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        callback_id: Option<CallbackId>,
        /// The document.
        key: DocumentKey,
        /// The operation.
        op: Op,
        /// Caller-supplied origin tag.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        source: Option<String>,
    },
    /// Delete a document.
    #[serde(rename = "doc.del")]
    DocDel {
        /// Originating tab.
        tab_id: TabId,
        /// Send-time timestamp.
        timestamp: u64,
        /// Present iff the caller expects a reply.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        callback_id: Option<CallbackId>,
        /// The document.
        key: DocumentKey,
    },

    // -- Reply --
    /// A reply to a previously sent request.
    #[serde(rename = "callback")]
    Callback {
        /// The replying endpoint's tab id (the Coordinator's, typically).
        tab_id: TabId,
        /// Send-time timestamp.
        timestamp: u64,
        /// Echoes the request's callback id verbatim.
        callback_id: CallbackId,
        /// The outcome.
        result: CallbackResult,
    },

    // -- Events --
    /// A document-scoped event, fan-out routed by `(collection, id)`.
    #[serde(rename = "doc.event")]
    DocEvent {
        /// The Coordinator's tab id.
        tab_id: TabId,
        /// Send-time timestamp.
        timestamp: u64,
        /// The document this event concerns.
        key: DocumentKey,
        /// The event itself.
        event: DocEventKind,
    },
    /// A connection-scoped event, broadcast to every tab.
    #[serde(rename = "connection.event")]
    ConnectionEvent {
        /// The Coordinator's tab id.
        tab_id: TabId,
        /// Send-time timestamp.
        timestamp: u64,
        /// The event itself.
        event: ConnectionEventKind,
    },

    /// A frame whose `type` did not match any opcode above.
    ///
    /// Not an error: surfaced through the Broker's `message` event
    /// fallback rather than discarded, per the "unknown opcode fallback"
    /// requirement. Only ever produced by [`Frame::decode`] — never
    /// reached through ordinary deserialization, since `decode` diverts
    /// unrecognized opcodes before calling into serde.
    Unknown {
        /// Originating tab, if the raw record had a well-formed one.
        tab_id: TabId,
        /// Send-time timestamp, if the raw record had one.
        timestamp: u64,
        /// The unrecognized opcode string.
        opcode: String,
        /// The full raw record, for diagnostics.
        raw: serde_json::Value,
    },
}

/// Every opcode string recognized by the typed variants above. Kept as an
/// explicit list (rather than derived via macro) so [`Frame::decode`] can
/// distinguish "known opcode, malformed payload" (discarded) from
/// "unrecognized opcode" (routed to [`Frame::Unknown`]).
const KNOWN_OPCODES: &[&str] = &[
    "tab.register",
    "tab.unregister",
    "connection.get",
    "connection.getBulk",
    "connection.setAutoFlush",
    "connection.isAutoFlush",
    "connection.putDoc",
    "connection.putDocs",
    "connection.putDocsBulk",
    "connection.flushWrites",
    "connection.getWriteQueueSize",
    "connection.hasPendingWrites",
    "doc.subscribe",
    "doc.unsubscribe",
    "doc.fetch",
    "doc.create",
    "doc.submitOp",
    "doc.del",
    "callback",
    "doc.event",
    "connection.event",
];

impl Frame {
    /// Decode a raw JSON record into a `Frame`, implementing these
    /// framing rules:
    ///
    /// - no `type` field at all → [`DecodeError::MissingType`] (caller
    ///   discards and logs);
    /// - `type` present but not one of [`KNOWN_OPCODES`] → `Ok(Frame::Unknown)`,
    ///   surfaced through the `message` fallback, not discarded;
    /// - `type` present and known, but the payload doesn't match that
    ///   opcode's required fields → [`DecodeError::InvalidField`] (caller
    ///   discards and logs).
    pub fn decode(raw: serde_json::Value) -> Result<Frame, DecodeError> {
        let opcode = raw
            .get("type")
            .and_then(serde_json::Value::as_str)
            .ok_or(DecodeError::MissingType)?;

        if !KNOWN_OPCODES.contains(&opcode) {
            let tab_id = raw
                .get("tabId")
                .or_else(|| raw.get("tab_id"))
                .and_then(serde_json::Value::as_str)
                .map(|s| TabId::from(s.to_string()))
                .ok_or_else(|| DecodeError::InvalidField {
                    opcode: opcode.to_string(),
                    field: "tabId".to_string(),
                })?;
            let timestamp = raw
                .get("timestamp")
                .and_then(serde_json::Value::as_u64)
                .ok_or_else(|| DecodeError::InvalidField {
                    opcode: opcode.to_string(),
                    field: "timestamp".to_string(),
                })?;
            return Ok(Frame::Unknown {
                tab_id,
                timestamp,
                opcode: opcode.to_string(),
                raw,
            });
        }

        serde_json::from_value(raw).map_err(|_| DecodeError::InvalidField {
            opcode: opcode.to_string(),
            field: "<payload>".to_string(),
        })
    }

    /// The originating tab id, present on every frame.
    #[must_use]
    pub fn tab_id(&self) -> &TabId {
        match self {
            Frame::TabRegister { tab_id, .. }
            | Frame::TabUnregister { tab_id, .. }
            | Frame::ConnectionGet { tab_id, .. }
            | Frame::ConnectionGetBulk { tab_id, .. }
            | Frame::ConnectionSetAutoFlush { tab_id, .. }
            | Frame::ConnectionIsAutoFlush { tab_id, .. }
            | Frame::ConnectionPutDoc { tab_id, .. }
            | Frame::ConnectionPutDocs { tab_id, .. }
            | Frame::ConnectionPutDocsBulk { tab_id, .. }
            | Frame::ConnectionFlushWrites { tab_id, .. }
            | Frame::ConnectionGetWriteQueueSize { tab_id, .. }
            | Frame::ConnectionHasPendingWrites { tab_id, .. }
            | Frame::DocSubscribe { tab_id, .. }
            | Frame::DocUnsubscribe { tab_id, .. }
            | Frame::DocFetch { tab_id, .. }
            | Frame::DocCreate { tab_id, .. }
            | Frame::DocSubmitOp { tab_id, .. }
            | Frame::DocDel { tab_id, .. }
            | Frame::Callback { tab_id, .. }
            | Frame::DocEvent { tab_id, .. }
            | Frame::ConnectionEvent { tab_id, .. }
            | Frame::Unknown { tab_id, .. } => tab_id,
        }
    }

    /// The opcode string, mainly for logging.
    #[must_use]
    pub fn opcode(&self) -> &str {
        match self {
            Frame::TabRegister { .. } => "tab.register",
            Frame::TabUnregister { .. } => "tab.unregister",
            Frame::ConnectionGet { .. } => "connection.get",
            Frame::ConnectionGetBulk { .. } => "connection.getBulk",
            Frame::ConnectionSetAutoFlush { .. } => "connection.setAutoFlush",
            Frame::ConnectionIsAutoFlush { .. } => "connection.isAutoFlush",
            Frame::ConnectionPutDoc { .. } => "connection.putDoc",
            Frame::ConnectionPutDocs { .. } => "connection.putDocs",
            Frame::ConnectionPutDocsBulk { .. } => "connection.putDocsBulk",
            Frame::ConnectionFlushWrites { .. } => "connection.flushWrites",
            Frame::ConnectionGetWriteQueueSize { .. } => "connection.getWriteQueueSize",
            Frame::ConnectionHasPendingWrites { .. } => "connection.hasPendingWrites",
            Frame::DocSubscribe { .. } => "doc.subscribe",
            Frame::DocUnsubscribe { .. } => "doc.unsubscribe",
            Frame::DocFetch { .. } => "doc.fetch",
            Frame::DocCreate { .. } => "doc.create",
            Frame::DocSubmitOp { .. } => "doc.submitOp",
            Frame::DocDel { .. } => "doc.del",
            Frame::Callback { .. } => "callback",
            Frame::DocEvent { .. } => "doc.event",
            Frame::ConnectionEvent { .. } => "connection.event",
            Frame::Unknown { opcode, .. } => opcode,
        }
    }

    /// The request's callback id, if this frame is a request expecting a
    /// reply.
    #[must_use]
    pub fn callback_id(&self) -> Option<CallbackId> {
        match self {
            Frame::ConnectionGet { callback_id, .. }
            | Frame::ConnectionGetBulk { callback_id, .. }
            | Frame::ConnectionSetAutoFlush { callback_id, .. }
            | Frame::ConnectionIsAutoFlush { callback_id, .. }
            | Frame::ConnectionPutDoc { callback_id, .. }
            | Frame::ConnectionPutDocs { callback_id, .. }
            | Frame::ConnectionPutDocsBulk { callback_id, .. }
            | Frame::ConnectionFlushWrites { callback_id, .. }
            | Frame::ConnectionGetWriteQueueSize { callback_id, .. }
            | Frame::ConnectionHasPendingWrites { callback_id, .. }
            | Frame::DocSubscribe { callback_id, .. }
            | Frame::DocUnsubscribe { callback_id, .. }
            | Frame::DocFetch { callback_id, .. }
            | Frame::DocCreate { callback_id, .. }
            | Frame::DocSubmitOp { callback_id, .. }
            | Frame::DocDel { callback_id, .. } => *callback_id,
            Frame::Callback { callback_id, .. } => Some(*callback_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_type_is_rejected() {
        let raw = serde_json::json!({"tabId": "t1", "timestamp": 1});
        assert!(matches!(Frame::decode(raw), Err(DecodeError::MissingType)));
    }

    #[test]
    fn unknown_opcode_becomes_unknown_frame() {
        let raw = serde_json::json!({
            "type": "doc.presence",
            "tabId": "t1",
            "timestamp": 42,
        });
        let frame = Frame::decode(raw).expect("decodes");
        assert_eq!(frame.opcode(), "doc.presence");
        assert!(matches!(frame, Frame::Unknown { .. }));
    }

    #[test]
    fn known_opcode_malformed_payload_is_invalid_field() {
        let raw = serde_json::json!({"type": "doc.subscribe", "tabId": "t1", "timestamp": 1});
        assert!(matches!(
            Frame::decode(raw),
            Err(DecodeError::InvalidField { .. })
        ));
    }

    #[test]
    fn round_trips_a_connection_get() {
        let frame = Frame::ConnectionGet {
            tab_id: TabId::from("t1".to_string()),
            timestamp: 1,
            callback_id: Some(CallbackId::from_raw(7)),
            collection: "posts".to_string(),
            id: "d1".to_string(),
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "connection.get");
        let decoded = Frame::decode(value).unwrap();
        assert_eq!(decoded.opcode(), "connection.get");
        assert_eq!(decoded.callback_id(), Some(CallbackId::from_raw(7)));
    }

    #[test]
    fn every_known_opcode_is_reachable() {
        // Guards KNOWN_OPCODES against drifting from the variant list.
        let samples = [
            Frame::TabRegister {
                tab_id: TabId::from("t".into()),
                timestamp: 0,
            },
            Frame::TabUnregister {
                tab_id: TabId::from("t".into()),
                timestamp: 0,
            },
            Frame::Callback {
                tab_id: TabId::from("t".into()),
                timestamp: 0,
                callback_id: CallbackId::from_raw(1),
                result: CallbackResult::Ok(serde_json::Value::Null),
            },
        ];
        for frame in samples {
            assert!(KNOWN_OPCODES.contains(&frame.opcode()));
        }
    }
}
