//! The Facade Document.

use std::sync::{Arc, Mutex};

use tabsync_broker::Broker;
use tabsync_protocol::{DocEventKind, DocumentKey, Frame, Op, OpAlgebra, RemoteError, Snapshot, TabId, WireError};
use tokio::sync::broadcast;
use tracing::warn;

use crate::error::FacadeError;

/// Capacity of one Facade Document's own event broadcast channel.
pub const DOC_EVENT_CHANNEL_CAPACITY: usize = 256;

/// One event a [`FacadeDocument`] can surface to its owner.
#[derive(Debug, Clone)]
pub enum FacadeDocEvent {
    /// A fresh snapshot was applied (subscribe or fetch reply).
    Load,
    /// The document was created — locally or by another tab.
    Create {
        /// Origin tag reported by the hosted session, if any.
        source: Option<String>,
    },
    /// An operation landed, locally or remotely originated.
    Op {
        /// The applied operation.
        op: Op,
        /// Origin tag reported by the hosted session, if any.
        source: Option<String>,
    },
    /// The document was deleted.
    Del {
        /// The document's data at the time of deletion.
        data: serde_json::Value,
        /// Origin tag reported by the hosted session, if any.
        source: Option<String>,
    },
    /// The hosted document emitted an error.
    Error {
        /// The error.
        error: RemoteError,
    },
}

struct DocState {
    data: serde_json::Value,
    version: u64,
    type_tag: Option<String>,
    subscribed: bool,
    pending_op_count: usize,
}

impl Default for DocState {
    fn default() -> Self {
        Self {
            data: serde_json::Value::Null,
            version: 0,
            type_tag: None,
            subscribed: false,
            pending_op_count: 0,
        }
    }
}

/// A per-tab mirror of one authoritative document, reached through a
/// [`crate::FacadeConnection`]'s cache.
///
/// Ops submitted through this document are applied optimistically
/// (through the injected [`OpAlgebra`]) before the request is even sent,
/// then reconciled against the broadcast `doc.event` — a remote `op`
/// event whose `origin_tab` matches this document's own tab is
/// acknowledged (pending count
/// decremented) without re-applying, since the optimistic apply already
/// happened.
pub struct FacadeDocument {
    key: DocumentKey,
    tab_id: TabId,
    broker: Broker,
    algebra: Arc<dyn OpAlgebra>,
    state: Mutex<DocState>,
    events_tx: broadcast::Sender<FacadeDocEvent>,
}

impl std::fmt::Debug for FacadeDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap();
        f.debug_struct("FacadeDocument")
            .field("key", &self.key)
            .field("version", &state.version)
            .field("subscribed", &state.subscribed)
            .field("pending_op_count", &state.pending_op_count)
            .finish()
    }
}

impl FacadeDocument {
    pub(crate) fn new(key: DocumentKey, tab_id: TabId, broker: Broker, algebra: Arc<dyn OpAlgebra>) -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(DOC_EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            key,
            tab_id,
            broker,
            algebra,
            state: Mutex::new(DocState::default()),
            events_tx,
        })
    }

    /// The document this mirrors.
    #[must_use]
    pub fn key(&self) -> &DocumentKey {
        &self.key
    }

    /// The document's current locally-known data.
    #[must_use]
    pub fn data(&self) -> serde_json::Value {
        self.state.lock().unwrap().data.clone()
    }

    /// The document's current locally-known version.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.state.lock().unwrap().version
    }

    /// The OT algebra's type tag, if known.
    #[must_use]
    pub fn type_tag(&self) -> Option<String> {
        self.state.lock().unwrap().type_tag.clone()
    }

    /// Whether this tab is currently subscribed to the document's events.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.state.lock().unwrap().subscribed
    }

    /// Number of local ops submitted but not yet acknowledged.
    #[must_use]
    pub fn pending_op_count(&self) -> usize {
        self.state.lock().unwrap().pending_op_count
    }

    /// Subscribe to this document's event surface on the event bus.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<FacadeDocEvent> {
        self.events_tx.subscribe()
    }

    /// Subscribe to the document, priming local state from the returned
    /// snapshot and emitting `load`.
    pub async fn subscribe(&self) -> Result<(), FacadeError> {
        let key = self.key.clone();
        let value = self
            .broker
            .request(move |tab_id, timestamp, callback_id| Frame::DocSubscribe {
                tab_id,
                timestamp,
                callback_id: Some(callback_id),
                key,
            })
            .await?;
        let snapshot = crate::decode_snapshot(value)?;
        self.apply_snapshot(snapshot);
        Ok(())
    }

    /// Unsubscribe from the document's event surface.
    pub async fn unsubscribe(&self) -> Result<(), FacadeError> {
        let key = self.key.clone();
        self.broker
            .request(move |tab_id, timestamp, callback_id| Frame::DocUnsubscribe {
                tab_id,
                timestamp,
                callback_id: Some(callback_id),
                key,
            })
            .await?;
        self.state.lock().unwrap().subscribed = false;
        Ok(())
    }

    /// Fetch the document once, without subscribing, priming local
    /// state and emitting `load`.
    pub async fn fetch(&self) -> Result<(), FacadeError> {
        let snapshot = self.request_fetch().await?;
        self.apply_snapshot(snapshot);
        Ok(())
    }

    /// Create the document. Local state is primed synchronously from the
    /// reply, but the public `create` event is left to the broadcast
    /// `doc.event` — the same signal every other subscribed tab gets, so
    /// a creator that is also a subscriber observes it exactly once,
    /// from the same place everyone else does.
    pub async fn create(&self, data: serde_json::Value, type_tag: Option<String>) -> Result<(), FacadeError> {
        let key = self.key.clone();
        let value = self
            .broker
            .request(move |tab_id, timestamp, callback_id| Frame::DocCreate {
                tab_id,
                timestamp,
                callback_id: Some(callback_id),
                key,
                data,
                type_tag,
            })
            .await?;
        let snapshot = crate::decode_snapshot(value)?;
        self.prime_from_snapshot(snapshot);
        Ok(())
    }

    /// Submit an operation, applying it to local data immediately
    /// through the injected [`OpAlgebra`] before the request is even
    /// sent. If the local apply fails, the
    /// send is aborted and local data is left exactly as it was.
    pub async fn submit_op(&self, op: Op, source: Option<String>) -> Result<(), FacadeError> {
        {
            let mut state = self.state.lock().unwrap();
            self.algebra.apply(&mut state.data, &op)?;
            state.pending_op_count += 1;
        }
        let key = self.key.clone();
        let outbound = op.clone();
        let result = self
            .broker
            .request(move |tab_id, timestamp, callback_id| Frame::DocSubmitOp {
                tab_id,
                timestamp,
                callback_id: Some(callback_id),
                key,
                op: outbound,
                source,
            })
            .await;
        if result.is_err() {
            // No acknowledging broadcast will ever arrive for a send
            // that never reached the Coordinator; release the optimism
            // bookkeeping now rather than leaving it stuck forever.
            let mut state = self.state.lock().unwrap();
            state.pending_op_count = state.pending_op_count.saturating_sub(1);
        }
        result.map(|_| ()).map_err(FacadeError::from)
    }

    /// Delete the document, returning its data at the time of deletion.
    /// Local state and the public `del` event are left to the broadcast
    /// `doc.event`, mirroring [`FacadeDocument::create`].
    pub async fn del(&self) -> Result<serde_json::Value, FacadeError> {
        let key = self.key.clone();
        let value = self
            .broker
            .request(move |tab_id, timestamp, callback_id| Frame::DocDel {
                tab_id,
                timestamp,
                callback_id: Some(callback_id),
                key,
            })
            .await?;
        Ok(value)
    }

    /// Prime local state from a snapshot obtained out of band (e.g. a
    /// `connection.getBulk` reply), without emitting an event.
    pub(crate) fn prime_from_snapshot(&self, snapshot: Snapshot) {
        self.set_from_snapshot(snapshot);
    }

    /// Handle one `doc.event` routed to this document by the connection's
    /// event demultiplexer.
    pub(crate) async fn handle_doc_event(&self, event: DocEventKind) {
        match event {
            DocEventKind::Load { snapshot } => self.apply_snapshot(snapshot),
            DocEventKind::Create { source } => {
                match self.request_fetch().await {
                    Ok(snapshot) => self.set_from_snapshot(snapshot),
                    Err(error) => warn!(key = %self.key, %error, "failed to refresh data after a create event"),
                }
                let _ = self.events_tx.send(FacadeDocEvent::Create { source });
            }
            DocEventKind::Op { op, source, origin_tab } => {
                let is_own = origin_tab.as_ref() == Some(&self.tab_id);
                if is_own {
                    let mut state = self.state.lock().unwrap();
                    state.pending_op_count = state.pending_op_count.saturating_sub(1);
                    state.version += 1;
                } else {
                    let mut state = self.state.lock().unwrap();
                    if let Err(err) = self.algebra.apply(&mut state.data, &op) {
                        drop(state);
                        warn!(key = %self.key, error = %err, "failed to apply remote op");
                        let _ = self.events_tx.send(FacadeDocEvent::Error {
                            error: RemoteError::from(WireError::new(err.to_string())),
                        });
                        return;
                    }
                    state.version += 1;
                }
                let _ = self.events_tx.send(FacadeDocEvent::Op { op, source });
            }
            DocEventKind::Del { data, source } => {
                {
                    let mut state = self.state.lock().unwrap();
                    state.data = data.clone();
                    state.subscribed = false;
                }
                let _ = self.events_tx.send(FacadeDocEvent::Del { data, source });
            }
            DocEventKind::Error { error } => {
                let _ = self.events_tx.send(FacadeDocEvent::Error { error: RemoteError::from(error) });
            }
        }
    }

    async fn request_fetch(&self) -> Result<Snapshot, FacadeError> {
        let key = self.key.clone();
        let value = self
            .broker
            .request(move |tab_id, timestamp, callback_id| Frame::DocFetch {
                tab_id,
                timestamp,
                callback_id: Some(callback_id),
                key,
            })
            .await?;
        crate::decode_snapshot(value)
    }

    fn set_from_snapshot(&self, snapshot: Snapshot) {
        let mut state = self.state.lock().unwrap();
        state.data = snapshot.data;
        state.version = snapshot.version;
        state.type_tag = snapshot.type_tag;
        state.subscribed = snapshot.subscribed;
        state.pending_op_count = snapshot.pending_op_count;
    }

    fn apply_snapshot(&self, snapshot: Snapshot) {
        self.set_from_snapshot(snapshot);
        let _ = self.events_tx.send(FacadeDocEvent::Load);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // A minimal stand-in for `tabsync_session::JsonPatchAlgebra` so this
    // crate's unit tests don't need a dependency on `tabsync-session`
    // just to exercise optimistic apply.
    struct NullAlgebra;
    impl OpAlgebra for NullAlgebra {
        fn apply(&self, data: &mut serde_json::Value, op: &Op) -> Result<(), tabsync_protocol::OpApplyError> {
            *data = op.clone();
            Ok(())
        }
    }

    fn doc() -> Arc<FacadeDocument> {
        let broker = Broker::new(TabId::new(), tabsync_broker::BrokerConfig::default());
        FacadeDocument::new(
            DocumentKey::new("docs", "x"),
            broker.tab_id().clone(),
            broker,
            Arc::new(NullAlgebra),
        )
    }

    #[tokio::test]
    async fn submit_op_applies_optimistically_before_any_reply() {
        let document = doc();
        // The Broker has no bus attached, so the request will never
        // resolve; spawn it and inspect local state immediately instead
        // of awaiting it.
        let handle = tokio::spawn({
            let document = Arc::clone(&document);
            async move { document.submit_op(serde_json::json!({"n": 1}), None).await }
        });
        tokio::task::yield_now().await;
        assert_eq!(document.data(), serde_json::json!({"n": 1}));
        assert_eq!(document.pending_op_count(), 1);
        handle.abort();
    }

    #[tokio::test]
    async fn own_op_event_clears_pending_count_without_reapplying() {
        let document = doc();
        {
            let mut state = document.state.lock().unwrap();
            state.data = serde_json::json!({"n": 1});
            state.pending_op_count = 1;
        }
        document
            .handle_doc_event(DocEventKind::Op {
                op: serde_json::json!({"n": 99}),
                source: None,
                origin_tab: Some(document.tab_id.clone()),
            })
            .await;
        assert_eq!(document.pending_op_count(), 0);
        assert_eq!(document.data(), serde_json::json!({"n": 1}));
    }

    #[tokio::test]
    async fn remote_op_event_applies_through_the_algebra() {
        let document = doc();
        document
            .handle_doc_event(DocEventKind::Op {
                op: serde_json::json!({"n": 7}),
                source: None,
                origin_tab: Some(TabId::new()),
            })
            .await;
        assert_eq!(document.data(), serde_json::json!({"n": 7}));
    }
}
