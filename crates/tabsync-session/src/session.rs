//! The `HostedSession` seam.
//!
//! The backend connection and its wire protocol are deliberately out of
//! scope here — the Coordinator only needs something that behaves like
//! one. `HostedSession` is that something: every method the Coordinator
//! forwards a `connection.*`/`doc.*` opcode to has a matching method
//! here.

use async_trait::async_trait;
use tabsync_protocol::{ConnectionEventKind, ConnectionState, DocEventKind, DocumentKey, Op, Snapshot, TabId};
use tokio::sync::broadcast;

use crate::error::SessionError;

/// Capacity of the broadcast channels handed out by
/// `subscribe_document_events` / `subscribe_connection_events`.
pub const SESSION_EVENT_CHANNEL_CAPACITY: usize = 1024;

/// The out-of-scope authoritative collaborator, rendered as a trait so
/// the Coordinator is generic over it.
///
/// A real implementation wraps a WebSocket (or similar) to a backend
/// speaking ShareDB/json0 or an equivalent OT protocol; this crate only
/// ships [`crate::TestHostedSession`], an in-memory double used by the
/// test suite.
#[async_trait]
pub trait HostedSession: Send + Sync {
    /// Fetch-or-create a document and mark it subscribed
    /// (`connection.get`).
    async fn get_or_create(&self, key: DocumentKey) -> Result<Snapshot, SessionError>;

    /// Bulk fetch-or-create (`connection.getBulk`). Order of the
    /// returned snapshots matches `keys`.
    async fn get_bulk(&self, keys: Vec<DocumentKey>) -> Result<Vec<Snapshot>, SessionError>;

    /// Subscribe to a document's events without necessarily creating it
    /// (`doc.subscribe`).
    async fn subscribe(&self, key: DocumentKey) -> Result<Snapshot, SessionError>;

    /// Unsubscribe from a document's events (`doc.unsubscribe`).
    async fn unsubscribe(&self, key: DocumentKey) -> Result<(), SessionError>;

    /// Fetch a document once, without subscribing (`doc.fetch`).
    async fn fetch(&self, key: DocumentKey) -> Result<Snapshot, SessionError>;

    /// Create a document (`doc.create`).
    async fn create(
        &self,
        key: DocumentKey,
        data: serde_json::Value,
        type_tag: Option<String>,
    ) -> Result<Snapshot, SessionError>;

    /// Submit an operation (`doc.submitOp`).
    ///
    /// `origin_tab` is opaque to the hosted session: it is whatever the
    /// Coordinator stamped from the requesting frame, threaded through
    /// unchanged into the `doc.event` this call causes. The session has no intrinsic notion of tabs.
    async fn submit_op(
        &self,
        key: DocumentKey,
        op: Op,
        source: Option<String>,
        origin_tab: Option<TabId>,
    ) -> Result<(), SessionError>;

    /// Delete a document (`doc.del`), returning its data at the time of
    /// deletion.
    async fn delete(&self, key: DocumentKey) -> Result<serde_json::Value, SessionError>;

    /// Toggle auto-flush (`connection.setAutoFlush`).
    async fn set_auto_flush(&self, enabled: bool);

    /// Query auto-flush (`connection.isAutoFlush`).
    async fn is_auto_flush(&self) -> bool;

    /// Queue one document for write (`connection.putDoc`).
    async fn put_doc(&self, key: DocumentKey) -> Result<(), SessionError>;

    /// Queue several documents for write (`connection.putDocs`).
    async fn put_docs(&self, keys: Vec<DocumentKey>) -> Result<(), SessionError>;

    /// Queue several documents for a single bulk write
    /// (`connection.putDocsBulk`).
    ///
    /// The bundled [`crate::TestHostedSession`] returns
    /// [`SessionError::Unsupported`] for this opcode — bulk-write forwarding is left to a real
    /// backend implementation.
    async fn put_docs_bulk(&self, keys: Vec<DocumentKey>) -> Result<(), SessionError>;

    /// Flush the write queue now (`connection.flushWrites`).
    async fn flush_writes(&self) -> Result<(), SessionError>;

    /// Current write queue size (`connection.getWriteQueueSize`).
    async fn write_queue_size(&self) -> usize;

    /// Whether the write queue is non-empty
    /// (`connection.hasPendingWrites`).
    async fn has_pending_writes(&self) -> bool {
        self.write_queue_size().await > 0
    }

    /// Subscribe to this session's document-scoped events, fan-out
    /// routed by the Coordinator on `key`.
    fn subscribe_document_events(&self) -> broadcast::Receiver<(DocumentKey, DocEventKind)>;

    /// Subscribe to this session's connection-scoped events, broadcast
    /// by the Coordinator to every tab.
    fn subscribe_connection_events(&self) -> broadcast::Receiver<ConnectionEventKind>;

    /// The authoritative connection state.
    fn state(&self) -> ConnectionState;
}
