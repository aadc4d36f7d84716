//! An in-memory [`HostedSession`] double, for the test suite only.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tabsync_protocol::{
    ConnectionEventKind, ConnectionState, DocEventKind, DocumentKey, Op, OpAlgebra, Snapshot, TabId,
};
use tokio::sync::broadcast;
use tracing::trace;

use crate::error::SessionError;
use crate::session::{HostedSession, SESSION_EVENT_CHANNEL_CAPACITY};

struct DocRecord {
    data: serde_json::Value,
    version: u64,
    type_tag: Option<String>,
    subscriber_count: u32,
}

struct State {
    docs: HashMap<DocumentKey, DocRecord>,
    write_queue: Vec<DocumentKey>,
    auto_flush: bool,
    connection_state: ConnectionState,
}

/// An in-memory stand-in for the authoritative backend, used by this
/// repo's own tests and available to embedders' tests too.
///
/// Holds every document in a `HashMap`, applies operations through an
/// injected [`OpAlgebra`] (by default [`crate::JsonPatchAlgebra`]), and
/// fans document/connection events out over broadcast channels exactly
/// as a real hosted session would — but with nothing behind it.
pub struct TestHostedSession {
    state: Mutex<State>,
    algebra: Box<dyn OpAlgebra>,
    doc_events_tx: broadcast::Sender<(DocumentKey, DocEventKind)>,
    connection_events_tx: broadcast::Sender<ConnectionEventKind>,
}

impl TestHostedSession {
    /// Build a double that starts `Connected` with no documents and
    /// auto-flush on, applying operations through `algebra`.
    #[must_use]
    pub fn new(algebra: impl OpAlgebra + 'static) -> Self {
        let (doc_events_tx, _) = broadcast::channel(SESSION_EVENT_CHANNEL_CAPACITY);
        let (connection_events_tx, _) = broadcast::channel(SESSION_EVENT_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(State {
                docs: HashMap::new(),
                write_queue: Vec::new(),
                auto_flush: true,
                connection_state: ConnectionState::Connected,
            }),
            algebra: Box::new(algebra),
            doc_events_tx,
            connection_events_tx,
        }
    }

    /// Force the mirrored connection state, for tests of reconnection
    /// and error propagation.
    pub fn set_state(&self, state: ConnectionState) {
        self.state.lock().unwrap().connection_state = state;
        let _ = self
            .connection_events_tx
            .send(ConnectionEventKind::State { state, reason: None });
    }

    /// Seed a document directly, bypassing `create`, for test setup.
    pub fn seed(&self, key: DocumentKey, data: serde_json::Value) {
        self.state.lock().unwrap().docs.insert(
            key,
            DocRecord {
                data,
                version: 0,
                type_tag: None,
                subscriber_count: 0,
            },
        );
    }

    fn snapshot_of(record: &DocRecord, key: &DocumentKey) -> Snapshot {
        Snapshot {
            key: key.clone(),
            data: record.data.clone(),
            version: record.version,
            type_tag: record.type_tag.clone(),
            subscribed: record.subscriber_count > 0,
            pending_op_count: 0,
        }
    }
}

impl Default for TestHostedSession {
    fn default() -> Self {
        Self::new(crate::JsonPatchAlgebra)
    }
}

#[async_trait]
impl HostedSession for TestHostedSession {
    async fn get_or_create(&self, key: DocumentKey) -> Result<Snapshot, SessionError> {
        let mut state = self.state.lock().unwrap();
        let record = state.docs.entry(key.clone()).or_insert_with(|| DocRecord {
            data: serde_json::json!({}),
            version: 0,
            type_tag: None,
            subscriber_count: 0,
        });
        record.subscriber_count += 1;
        Ok(Self::snapshot_of(record, &key))
    }

    async fn get_bulk(&self, keys: Vec<DocumentKey>) -> Result<Vec<Snapshot>, SessionError> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            out.push(self.get_or_create(key).await?);
        }
        Ok(out)
    }

    async fn subscribe(&self, key: DocumentKey) -> Result<Snapshot, SessionError> {
        // Unlike `get_or_create`, subscribing to a document that does not
        // yet exist must not create it — a later `create` on the same
        // key has to succeed. Report a not-yet-created snapshot instead.
        let mut state = self.state.lock().unwrap();
        match state.docs.get_mut(&key) {
            Some(record) => {
                record.subscriber_count += 1;
                Ok(Self::snapshot_of(record, &key))
            }
            None => Ok(Snapshot {
                key,
                data: serde_json::Value::Null,
                version: 0,
                type_tag: None,
                subscribed: true,
                pending_op_count: 0,
            }),
        }
    }

    async fn unsubscribe(&self, key: DocumentKey) -> Result<(), SessionError> {
        // Symmetric with `subscribe`: unsubscribing from a document that
        // was never created (or already deleted) is a no-op, not an
        // error.
        if let Some(record) = self.state.lock().unwrap().docs.get_mut(&key) {
            record.subscriber_count = record.subscriber_count.saturating_sub(1);
        }
        Ok(())
    }

    async fn fetch(&self, key: DocumentKey) -> Result<Snapshot, SessionError> {
        let state = self.state.lock().unwrap();
        let record = state
            .docs
            .get(&key)
            .ok_or_else(|| SessionError::NotFound(key.clone()))?;
        Ok(Self::snapshot_of(record, &key))
    }

    async fn create(
        &self,
        key: DocumentKey,
        data: serde_json::Value,
        type_tag: Option<String>,
    ) -> Result<Snapshot, SessionError> {
        {
            let state = self.state.lock().unwrap();
            if state.docs.contains_key(&key) {
                return Err(SessionError::AlreadyExists(key));
            }
        }
        let record = DocRecord {
            data: data.clone(),
            version: 0,
            type_tag: type_tag.clone(),
            subscriber_count: 0,
        };
        let snapshot = Self::snapshot_of(&record, &key);
        self.state.lock().unwrap().docs.insert(key.clone(), record);

        let _ = self
            .doc_events_tx
            .send((key, DocEventKind::Create { source: Some("hosted".to_string()) }));
        Ok(snapshot)
    }

    async fn submit_op(
        &self,
        key: DocumentKey,
        op: Op,
        source: Option<String>,
        origin_tab: Option<TabId>,
    ) -> Result<(), SessionError> {
        let mut state = self.state.lock().unwrap();
        let record = state
            .docs
            .get_mut(&key)
            .ok_or_else(|| SessionError::NotFound(key.clone()))?;
        self.algebra.apply(&mut record.data, &op)?;
        record.version += 1;
        drop(state);

        trace!(key = %key, "hosted session applied submitted op");
        let _ = self.doc_events_tx.send((
            key,
            DocEventKind::Op {
                op,
                source,
                origin_tab,
            },
        ));
        Ok(())
    }

    async fn delete(&self, key: DocumentKey) -> Result<serde_json::Value, SessionError> {
        let removed = self
            .state
            .lock()
            .unwrap()
            .docs
            .remove(&key)
            .ok_or_else(|| SessionError::NotFound(key.clone()))?;
        let _ = self.doc_events_tx.send((
            key,
            DocEventKind::Del {
                data: removed.data.clone(),
                source: Some("hosted".to_string()),
            },
        ));
        Ok(removed.data)
    }

    async fn set_auto_flush(&self, enabled: bool) {
        self.state.lock().unwrap().auto_flush = enabled;
        let _ = self
            .connection_events_tx
            .send(ConnectionEventKind::AutoFlush { enabled });
    }

    async fn is_auto_flush(&self) -> bool {
        self.state.lock().unwrap().auto_flush
    }

    async fn put_doc(&self, key: DocumentKey) -> Result<(), SessionError> {
        self.put_docs(vec![key]).await
    }

    async fn put_docs(&self, keys: Vec<DocumentKey>) -> Result<(), SessionError> {
        let auto_flush = {
            let mut state = self.state.lock().unwrap();
            state.write_queue.extend(keys);
            let _ = self.connection_events_tx.send(ConnectionEventKind::WriteQueueSize {
                size: state.write_queue.len(),
            });
            let _ = self.connection_events_tx.send(ConnectionEventKind::HasPendingWrites {
                pending: !state.write_queue.is_empty(),
            });
            state.auto_flush
        };
        if auto_flush {
            self.flush_writes().await?;
        }
        Ok(())
    }

    async fn put_docs_bulk(&self, _keys: Vec<DocumentKey>) -> Result<(), SessionError> {
        Err(SessionError::Unsupported("connection.putDocsBulk"))
    }

    async fn flush_writes(&self) -> Result<(), SessionError> {
        let mut state = self.state.lock().unwrap();
        state.write_queue.clear();
        let _ = self
            .connection_events_tx
            .send(ConnectionEventKind::WriteQueueSize { size: 0 });
        let _ = self
            .connection_events_tx
            .send(ConnectionEventKind::HasPendingWrites { pending: false });
        Ok(())
    }

    async fn write_queue_size(&self) -> usize {
        self.state.lock().unwrap().write_queue.len()
    }

    fn subscribe_document_events(&self) -> broadcast::Receiver<(DocumentKey, DocEventKind)> {
        self.doc_events_tx.subscribe()
    }

    fn subscribe_connection_events(&self) -> broadcast::Receiver<ConnectionEventKind> {
        self.connection_events_tx.subscribe()
    }

    fn state(&self) -> ConnectionState {
        self.state.lock().unwrap().connection_state
    }
}
