//! The Facade Connection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tabsync_broker::{Broker, BrokerEvent, BrokerEvents};
use tabsync_protocol::{ConnectionEventKind, ConnectionState, DocumentKey, Frame, OpAlgebra, Snapshot, TabId};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

use crate::document::FacadeDocument;
use crate::error::FacadeError;

/// Capacity of one Facade Connection's own connection-event broadcast
/// channel.
pub const CONNECTION_EVENT_CHANNEL_CAPACITY: usize = 256;

struct Inner {
    tab_id: TabId,
    broker: Broker,
    algebra: Arc<dyn OpAlgebra>,
    cache: Mutex<HashMap<DocumentKey, Arc<FacadeDocument>>>,
    connection_state: Mutex<ConnectionState>,
    auto_flush: Mutex<bool>,
    write_queue_size: Mutex<usize>,
    has_pending_writes: Mutex<bool>,
    events_tx: broadcast::Sender<ConnectionEventKind>,
    demux_task: Mutex<Option<JoinHandle<()>>>,
}

/// Per-tab mirror of the authoritative connection, reached through a
/// [`tabsync_broker::Broker`].
///
/// Cheap to clone — a handle around an `Arc<Inner>`, matching
/// [`tabsync_broker::Broker`]'s own rendering.
#[derive(Clone)]
pub struct FacadeConnection(Arc<Inner>);

impl std::fmt::Debug for FacadeConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FacadeConnection")
            .field("tab_id", &self.0.tab_id)
            .field("state", &self.state())
            .field("cached_documents", &self.0.cache.lock().unwrap().len())
            .finish()
    }
}

impl FacadeConnection {
    /// Build a Facade Connection over an already-constructed
    /// [`Broker`], using `algebra` for every [`FacadeDocument`] this
    /// connection hands out.
    ///
    /// Local mirrors start at the defaults a brand new connection would
    /// report before the Coordinator has said otherwise: `Connecting`,
    /// auto-flush on, an empty write queue.
    #[must_use]
    pub fn new(broker: Broker, algebra: Arc<dyn OpAlgebra>) -> Self {
        let (events_tx, _) = broadcast::channel(CONNECTION_EVENT_CHANNEL_CAPACITY);
        let inner = Arc::new(Inner {
            tab_id: broker.tab_id().clone(),
            broker: broker.clone(),
            algebra,
            cache: Mutex::new(HashMap::new()),
            connection_state: Mutex::new(ConnectionState::Connecting),
            auto_flush: Mutex::new(true),
            write_queue_size: Mutex::new(0),
            has_pending_writes: Mutex::new(false),
            events_tx,
            demux_task: Mutex::new(None),
        });

        let task_inner = Arc::clone(&inner);
        let handle = tokio::spawn(demux_loop(task_inner, broker.events()));
        *inner.demux_task.lock().unwrap() = Some(handle);

        inner.broker.send(|tab_id, timestamp| Frame::TabRegister { tab_id, timestamp });

        Self(inner)
    }

    /// This connection's tab identity.
    #[must_use]
    pub fn tab_id(&self) -> &TabId {
        &self.0.tab_id
    }

    /// The Broker this connection sends and receives through.
    #[must_use]
    pub fn broker(&self) -> &Broker {
        &self.0.broker
    }

    /// Mirrored authoritative connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.0.connection_state.lock().unwrap()
    }

    /// Whether new requests may currently be sent, derived from
    /// [`FacadeConnection::state`].
    #[must_use]
    pub fn can_send(&self) -> bool {
        self.state().can_send()
    }

    /// Mirrored auto-flush setting.
    #[must_use]
    pub fn is_auto_flush(&self) -> bool {
        *self.0.auto_flush.lock().unwrap()
    }

    /// Mirrored write queue size.
    #[must_use]
    pub fn write_queue_size(&self) -> usize {
        *self.0.write_queue_size.lock().unwrap()
    }

    /// Mirrored "queue non-empty" flag.
    #[must_use]
    pub fn has_pending_writes(&self) -> bool {
        *self.0.has_pending_writes.lock().unwrap()
    }

    /// Number of documents this connection has cached (for tests and
    /// diagnostics).
    #[must_use]
    pub fn cached_document_count(&self) -> usize {
        self.0.cache.lock().unwrap().len()
    }

    /// Subscribe to this connection's `connection.event` surface.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<ConnectionEventKind> {
        self.0.events_tx.subscribe()
    }

    /// Look up a document already in this connection's cache, without
    /// touching the bus.
    #[must_use]
    pub fn get_existing(&self, collection: impl Into<String>, id: impl Into<String>) -> Option<Arc<FacadeDocument>> {
        let key = DocumentKey::new(collection, id);
        self.0.cache.lock().unwrap().get(&key).cloned()
    }

    /// Return the cached facade for `(collection, id)` if any; otherwise
    /// construct one, insert it into the cache, and return it. A pure
    /// cache constructor — never touches the wire, never subscribes,
    /// never primes data. Callers that want the document's data loaded
    /// and kept live call [`FacadeDocument::subscribe`] or
    /// [`FacadeDocument::fetch`] on the object this returns, exactly as
    /// [`FacadeDocument::create`] is called on it to bring a new document
    /// into existence.
    pub async fn get(&self, collection: impl Into<String>, id: impl Into<String>) -> Result<Arc<FacadeDocument>, FacadeError> {
        let key = DocumentKey::new(collection, id);
        if let Some(cached) = self.0.cache.lock().unwrap().get(&key).cloned() {
            return Ok(cached);
        }
        let document = self.document_for(key.clone());
        Ok(self.insert_if_absent(key, document))
    }

    /// Fetch-or-create several documents in one request. Ids already
    /// cached are returned without touching the bus at all; if every id
    /// is already cached, no request is sent.
    pub async fn get_bulk(
        &self,
        collection: impl Into<String>,
        ids: Vec<String>,
    ) -> Result<Vec<Arc<FacadeDocument>>, FacadeError> {
        let collection = collection.into();
        let uncached: Vec<String> = {
            let cache = self.0.cache.lock().unwrap();
            ids.iter()
                .filter(|id| !cache.contains_key(&DocumentKey::new(collection.clone(), (*id).clone())))
                .cloned()
                .collect()
        };

        if !uncached.is_empty() {
            let value = self
                .0
                .broker
                .request({
                    let collection = collection.clone();
                    let uncached = uncached.clone();
                    move |tab_id, timestamp, callback_id| Frame::ConnectionGetBulk {
                        tab_id,
                        timestamp,
                        callback_id: Some(callback_id),
                        collection,
                        ids: uncached,
                    }
                })
                .await?;
            let snapshots: Vec<Snapshot> =
                serde_json::from_value(value).map_err(|e| FacadeError::Decode(e.to_string()))?;
            for snapshot in snapshots {
                let key = snapshot.key.clone();
                let document = self.document_for(key.clone());
                document.prime_from_snapshot(snapshot);
                self.insert_if_absent(key, document);
            }
        }

        let cache = self.0.cache.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| cache.get(&DocumentKey::new(collection.clone(), id.clone())).cloned())
            .collect())
    }

    /// Toggle auto-flush on the hosted session's write queue.
    pub async fn set_auto_flush(&self, enabled: bool) -> Result<(), FacadeError> {
        self.0
            .broker
            .request(move |tab_id, timestamp, callback_id| Frame::ConnectionSetAutoFlush {
                tab_id,
                timestamp,
                callback_id: Some(callback_id),
                enabled,
            })
            .await?;
        Ok(())
    }

    /// Queue one document for write.
    pub async fn put_doc(&self, doc: DocumentKey) -> Result<(), FacadeError> {
        self.0
            .broker
            .request(move |tab_id, timestamp, callback_id| Frame::ConnectionPutDoc {
                tab_id,
                timestamp,
                callback_id: Some(callback_id),
                doc,
            })
            .await?;
        Ok(())
    }

    /// Queue several documents for write.
    pub async fn put_docs(&self, docs: Vec<DocumentKey>) -> Result<(), FacadeError> {
        self.0
            .broker
            .request(move |tab_id, timestamp, callback_id| Frame::ConnectionPutDocs {
                tab_id,
                timestamp,
                callback_id: Some(callback_id),
                docs,
            })
            .await?;
        Ok(())
    }

    /// Queue several documents for a single bulk write. Not every hosted
    /// session implements this opcode — a [`tabsync_broker::BrokerCallError::Remote`]
    /// is the normal way to learn that.
    pub async fn put_docs_bulk(&self, docs: Vec<DocumentKey>) -> Result<(), FacadeError> {
        self.0
            .broker
            .request(move |tab_id, timestamp, callback_id| Frame::ConnectionPutDocsBulk {
                tab_id,
                timestamp,
                callback_id: Some(callback_id),
                docs,
            })
            .await?;
        Ok(())
    }

    /// Flush the write queue now.
    pub async fn flush_writes(&self) -> Result<(), FacadeError> {
        self.0
            .broker
            .request(move |tab_id, timestamp, callback_id| Frame::ConnectionFlushWrites {
                tab_id,
                timestamp,
                callback_id: Some(callback_id),
            })
            .await?;
        Ok(())
    }

    /// Tear this connection down: tell the Coordinator this tab is
    /// gone, stop the Broker's reaper, release the bus, and clear the
    /// document cache. Idempotent — a second call finds the Broker
    /// already closed and is a no-op beyond that.
    pub fn close(&self) {
        self.0.broker.send(|tab_id, timestamp| Frame::TabUnregister { tab_id, timestamp });
        self.0.broker.stop_cleanup_timer();
        self.0.broker.close();
        if let Some(handle) = self.0.demux_task.lock().unwrap().take() {
            handle.abort();
        }
        self.0.cache.lock().unwrap().clear();
        *self.0.connection_state.lock().unwrap() = ConnectionState::Closed;
    }

    fn document_for(&self, key: DocumentKey) -> Arc<FacadeDocument> {
        FacadeDocument::new(key, self.0.tab_id.clone(), self.0.broker.clone(), Arc::clone(&self.0.algebra))
    }

    fn insert_if_absent(&self, key: DocumentKey, document: Arc<FacadeDocument>) -> Arc<FacadeDocument> {
        let mut cache = self.0.cache.lock().unwrap();
        Arc::clone(cache.entry(key).or_insert(document))
    }
}

/// The single task that owns this connection's inbound event dispatch,
/// mirroring the Broker's and Coordinator's own "one task per endpoint"
/// rendering.
async fn demux_loop(inner: Arc<Inner>, mut events: BrokerEvents) {
    while let Some(event) = events.recv().await {
        match event {
            BrokerEvent::Ready | BrokerEvent::Close => {}
            BrokerEvent::Error { message } => {
                warn!(error = %message, "facade connection observed a broker fault");
            }
            BrokerEvent::DocEvent { key, event } => {
                let document = inner.cache.lock().unwrap().get(&key).cloned();
                match document {
                    Some(document) => document.handle_doc_event(event).await,
                    None => trace!(key = %key, "dropping doc event for a document this tab never opened"),
                }
            }
            BrokerEvent::ConnectionEvent { event } => {
                apply_connection_event(&inner, &event);
                let _ = inner.events_tx.send(event);
            }
            BrokerEvent::Message { frame } => {
                trace!(opcode = %frame.opcode(), "facade connection observed an unrecognized frame");
            }
        }
    }
}

fn apply_connection_event(inner: &Arc<Inner>, event: &ConnectionEventKind) {
    match event {
        ConnectionEventKind::State { state, .. } => *inner.connection_state.lock().unwrap() = *state,
        ConnectionEventKind::AutoFlush { enabled } => *inner.auto_flush.lock().unwrap() = *enabled,
        ConnectionEventKind::WriteQueueSize { size } => *inner.write_queue_size.lock().unwrap() = *size,
        ConnectionEventKind::HasPendingWrites { pending } => *inner.has_pending_writes.lock().unwrap() = *pending,
        ConnectionEventKind::Error { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc as StdArc;
    use std::time::Duration;

    use tabsync_bus::{Bus, BroadcastBus};
    use tabsync_coordinator::{Coordinator, CoordinatorConfig};
    use tabsync_protocol::{Op, OpApplyError};
    use tabsync_session::TestHostedSession;

    use super::*;

    struct AddAlgebra;
    impl OpAlgebra for AddAlgebra {
        fn apply(&self, data: &mut serde_json::Value, op: &Op) -> Result<(), OpApplyError> {
            let delta = op.get("n").and_then(serde_json::Value::as_i64).ok_or_else(|| {
                OpApplyError::new("expected {n: <i64>}")
            })?;
            let current = data.get("n").and_then(serde_json::Value::as_i64).unwrap_or(0);
            *data = serde_json::json!({"n": current + delta});
            Ok(())
        }
    }

    fn new_connection_pair() -> (FacadeConnection, FacadeConnection, Coordinator) {
        let bus = StdArc::new(BroadcastBus::new());
        let session = StdArc::new(TestHostedSession::default());
        let coordinator = Coordinator::new(TabId::new(), CoordinatorConfig::default(), session);
        coordinator.attach_bus(StdArc::clone(&bus) as StdArc<dyn Bus>);

        let broker_a = Broker::new(TabId::new(), tabsync_broker::BrokerConfig::default());
        broker_a.attach_bus(StdArc::clone(&bus) as StdArc<dyn Bus>);
        let connection_a = FacadeConnection::new(broker_a, StdArc::new(AddAlgebra));

        let broker_b = Broker::new(TabId::new(), tabsync_broker::BrokerConfig::default());
        broker_b.attach_bus(StdArc::clone(&bus) as StdArc<dyn Bus>);
        let connection_b = FacadeConnection::new(broker_b, StdArc::new(AddAlgebra));

        (connection_a, connection_b, coordinator)
    }

    #[tokio::test]
    async fn get_returns_the_same_instance_without_a_second_request() {
        let (connection, _other, _coordinator) = new_connection_pair();
        let first = connection.get("posts", "d1").await.unwrap();
        let second = connection.get("posts", "d1").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(connection.cached_document_count(), 1);
    }

    #[tokio::test]
    async fn get_bulk_with_everything_cached_sends_no_request() {
        let (connection, _other, _coordinator) = new_connection_pair();
        connection.get("posts", "d1").await.unwrap();
        let results = connection
            .get_bulk("posts", vec!["d1".to_string()])
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn cross_tab_create_is_observed_by_both_tabs_exactly_once() {
        let (connection_a, connection_b, _coordinator) = new_connection_pair();
        let doc_a = connection_a.get("posts", "d1").await.unwrap();
        let doc_b = connection_b.get("posts", "d1").await.unwrap();
        // Both subscribe before the document exists — subscribing to a
        // not-yet-created key must not create it, or the `create` below
        // would fail with "already exists".
        doc_a.subscribe().await.unwrap();
        doc_b.subscribe().await.unwrap();
        let mut events_a = doc_a.events();
        let mut events_b = doc_b.events();

        doc_a.create(serde_json::json!({"title": "T"}), None).await.unwrap();

        let event_a = tokio::time::timeout(Duration::from_millis(200), events_a.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event_a, crate::document::FacadeDocEvent::Create { .. }));
        let event_b = tokio::time::timeout(Duration::from_millis(200), events_b.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event_b, crate::document::FacadeDocEvent::Create { .. }));

        assert_eq!(doc_a.data(), serde_json::json!({"title": "T"}));
        assert_eq!(doc_b.data(), serde_json::json!({"title": "T"}));
    }

    #[tokio::test]
    async fn submitted_op_is_observed_cross_tab() {
        let (connection_a, connection_b, _coordinator) = new_connection_pair();
        let doc_a = connection_a.get("ops", "y").await.unwrap();
        doc_a.create(serde_json::json!({"n": 0}), None).await.unwrap();
        let doc_b = connection_b.get("ops", "y").await.unwrap();
        // Subscribing after creation is what makes the Coordinator treat
        // this key as having a subscriber at all, which is what gates
        // whether `op` events get broadcast.
        doc_b.subscribe().await.unwrap();
        let mut events_b = doc_b.events();

        doc_a.submit_op(serde_json::json!({"n": 1}), None).await.unwrap();

        let event_b = tokio::time::timeout(Duration::from_millis(200), events_b.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event_b, crate::document::FacadeDocEvent::Op { .. }));
        assert_eq!(doc_b.data(), serde_json::json!({"n": 1}));
        assert_eq!(doc_a.pending_op_count(), 0);
    }
}
