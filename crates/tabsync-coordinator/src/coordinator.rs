//! The Coordinator itself.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use tabsync_bus::{Bus, BusReceiver};
use tabsync_protocol::{
    CallbackId, CallbackResult, ConnectionEventKind, DocEventKind, DocumentKey, Frame, TabId, WireError,
};
use tabsync_session::HostedSession;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::config::CoordinatorConfig;
use crate::error::CoordinatorError;
use crate::subscriptions::SubscriptionTables;

struct Inner {
    tab_id: TabId,
    config: CoordinatorConfig,
    session: Arc<dyn HostedSession>,
    bus: Mutex<Option<Arc<dyn Bus>>>,
    subs: Mutex<SubscriptionTables>,
    active_tabs: Mutex<HashMap<TabId, u64>>,
    recv_task: Mutex<Option<JoinHandle<()>>>,
    doc_event_task: Mutex<Option<JoinHandle<()>>>,
    connection_event_task: Mutex<Option<JoinHandle<()>>>,
    reaper_task: Mutex<Option<JoinHandle<()>>>,
}

/// The single endpoint that hosts the authoritative session and routes
/// events to tabs.
///
/// Cheap to clone, matching [`tabsync_broker::Broker`]'s "handle around
/// an `Arc<Inner>`" shape.
#[derive(Clone)]
pub struct Coordinator(Arc<Inner>);

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("tab_id", &self.0.tab_id)
            .field("tabs", &self.tab_count())
            .field("docs", &self.doc_count())
            .finish()
    }
}

impl Coordinator {
    /// Construct a Coordinator hosting `session`, with no bus attached
    /// yet.
    #[must_use]
    pub fn new(tab_id: TabId, config: CoordinatorConfig, session: Arc<dyn HostedSession>) -> Self {
        Self(Arc::new(Inner {
            tab_id,
            config,
            session,
            bus: Mutex::new(None),
            subs: Mutex::new(SubscriptionTables::new()),
            active_tabs: Mutex::new(HashMap::new()),
            recv_task: Mutex::new(None),
            doc_event_task: Mutex::new(None),
            connection_event_task: Mutex::new(None),
            reaper_task: Mutex::new(None),
        }))
    }

    /// This Coordinator's tab identity, stamped on every frame it emits.
    #[must_use]
    pub fn tab_id(&self) -> &TabId {
        &self.0.tab_id
    }

    /// Number of distinct tabs with at least one subscription.
    #[must_use]
    pub fn tab_count(&self) -> usize {
        self.0.subs.lock().unwrap().tab_count()
    }

    /// Number of distinct document keys with at least one subscriber.
    #[must_use]
    pub fn doc_count(&self) -> usize {
        self.0.subs.lock().unwrap().doc_count()
    }

    /// Number of tabs subscribed to `key`.
    #[must_use]
    pub fn subscriber_count(&self, key: &DocumentKey) -> usize {
        self.0.subs.lock().unwrap().subscriber_count(key)
    }

    /// Whether `tab` has been observed and not yet cleaned up.
    #[must_use]
    pub fn is_tab_active(&self, tab: &TabId) -> bool {
        self.0.active_tabs.lock().unwrap().contains_key(tab)
    }

    /// Attach the bus, spawning the dispatch task, the two event
    /// forwarding tasks, and the stale-tab reaper.
    pub fn attach_bus(&self, bus: Arc<dyn Bus>) {
        let receiver = bus.subscribe();
        *self.0.bus.lock().unwrap() = Some(Arc::clone(&bus));

        let inner = Arc::clone(&self.0);
        *self.0.recv_task.lock().unwrap() = Some(tokio::spawn(recv_loop(inner, receiver)));

        let inner = Arc::clone(&self.0);
        let doc_events = self.0.session.subscribe_document_events();
        *self.0.doc_event_task.lock().unwrap() =
            Some(tokio::spawn(forward_doc_events(inner, doc_events)));

        let inner = Arc::clone(&self.0);
        let connection_events = self.0.session.subscribe_connection_events();
        *self.0.connection_event_task.lock().unwrap() =
            Some(tokio::spawn(forward_connection_events(inner, connection_events)));

        let inner = Arc::clone(&self.0);
        *self.0.reaper_task.lock().unwrap() = Some(tokio::spawn(reap_stale_tabs(inner)));

        debug!(tab_id = %self.0.tab_id, "coordinator ready");
    }

    /// Remove every trace of `tab` from the subscription tables and the
    /// active-tabs set. Idempotent.
    pub fn cleanup_tab(&self, tab: &TabId) {
        cleanup_tab(&self.0, tab);
    }

    /// Stop every background task. Does not touch the hosted session.
    pub fn shutdown(&self) {
        for task in [
            &self.0.recv_task,
            &self.0.doc_event_task,
            &self.0.connection_event_task,
            &self.0.reaper_task,
        ] {
            if let Some(handle) = task.lock().unwrap().take() {
                handle.abort();
            }
        }
        *self.0.bus.lock().unwrap() = None;
    }
}

fn cleanup_tab(inner: &Arc<Inner>, tab: &TabId) {
    let emptied = inner.subs.lock().unwrap().cleanup_tab(tab);
    inner.active_tabs.lock().unwrap().remove(tab);
    debug!(tab_id = %tab, emptied_docs = emptied.len(), "tab cleaned up");
}

fn mark_active(inner: &Arc<Inner>, tab: TabId) {
    inner
        .active_tabs
        .lock()
        .unwrap()
        .insert(tab, tabsync_protocol::now_millis());
}

fn reply(inner: &Arc<Inner>, callback_id: Option<CallbackId>, result: Result<serde_json::Value, CoordinatorError>) {
    let Some(callback_id) = callback_id else {
        if let Err(error) = result {
            warn!(%error, "request with no callback id failed");
        }
        return;
    };
    let result = match result {
        Ok(value) => CallbackResult::Ok(value),
        Err(error) => {
            let wire: WireError = (&error).into();
            warn!(%error, "request handler returned an error");
            CallbackResult::Err(wire)
        }
    };
    let frame = Frame::Callback {
        tab_id: inner.tab_id.clone(),
        timestamp: tabsync_protocol::now_millis(),
        callback_id,
        result,
    };
    let Some(bus) = inner.bus.lock().unwrap().clone() else {
        return;
    };
    if let Err(error) = bus.send(frame) {
        warn!(%error, "failed to post callback reply");
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).expect("protocol types are always JSON-representable")
}

/// The single task that owns this Coordinator's inbound dispatch.
async fn recv_loop(inner: Arc<Inner>, mut receiver: BusReceiver) {
    while let Some(frame) = receiver.recv().await {
        if frame.tab_id() == &inner.tab_id {
            continue;
        }
        mark_active(&inner, frame.tab_id().clone());
        dispatch(&inner, &frame).await;
    }
}

#[allow(clippy::too_many_lines)]
async fn dispatch(inner: &Arc<Inner>, frame: &Frame) {
    match frame {
        Frame::TabRegister { .. } => {}
        Frame::TabUnregister { tab_id, .. } => cleanup_tab(inner, tab_id),

        Frame::ConnectionGet {
            tab_id,
            callback_id,
            collection,
            id,
            ..
        } => {
            let key = DocumentKey::new(collection.clone(), id.clone());
            let result = inner.session.get_or_create(key.clone()).await;
            if result.is_ok() {
                inner.subs.lock().unwrap().subscribe(tab_id.clone(), key);
            }
            reply(inner, *callback_id, result.map(|s| to_value(&s)).map_err(Into::into));
        }
        Frame::ConnectionGetBulk {
            tab_id,
            callback_id,
            collection,
            ids,
            ..
        } => {
            let keys: Vec<DocumentKey> = ids
                .iter()
                .map(|id| DocumentKey::new(collection.clone(), id.clone()))
                .collect();
            let result = inner.session.get_bulk(keys.clone()).await;
            if let Ok(snapshots) = &result {
                let mut subs = inner.subs.lock().unwrap();
                for (key, _) in keys.into_iter().zip(snapshots) {
                    subs.subscribe(tab_id.clone(), key);
                }
            }
            reply(
                inner,
                *callback_id,
                result.map(|snapshots| to_value(&snapshots)).map_err(Into::into),
            );
        }
        Frame::ConnectionSetAutoFlush {
            callback_id, enabled, ..
        } => {
            inner.session.set_auto_flush(*enabled).await;
            reply(inner, *callback_id, Ok(serde_json::Value::Null));
        }
        Frame::ConnectionIsAutoFlush { callback_id, .. } => {
            let enabled = inner.session.is_auto_flush().await;
            reply(inner, *callback_id, Ok(serde_json::json!(enabled)));
        }
        Frame::ConnectionPutDoc { callback_id, doc, .. } => {
            let result = inner.session.put_doc(doc.clone()).await;
            broadcast_write_queue_state(inner).await;
            reply(inner, *callback_id, result.map(|()| serde_json::Value::Null).map_err(Into::into));
        }
        Frame::ConnectionPutDocs { callback_id, docs, .. } => {
            let result = inner.session.put_docs(docs.clone()).await;
            broadcast_write_queue_state(inner).await;
            reply(inner, *callback_id, result.map(|()| serde_json::Value::Null).map_err(Into::into));
        }
        Frame::ConnectionPutDocsBulk { callback_id, docs, .. } => {
            let result = inner.session.put_docs_bulk(docs.clone()).await;
            broadcast_write_queue_state(inner).await;
            reply(inner, *callback_id, result.map(|()| serde_json::Value::Null).map_err(Into::into));
        }
        Frame::ConnectionFlushWrites { callback_id, .. } => {
            let result = inner.session.flush_writes().await;
            broadcast_write_queue_state(inner).await;
            reply(inner, *callback_id, result.map(|()| serde_json::Value::Null).map_err(Into::into));
        }
        Frame::ConnectionGetWriteQueueSize { callback_id, .. } => {
            let size = inner.session.write_queue_size().await;
            reply(inner, *callback_id, Ok(serde_json::json!(size)));
        }
        Frame::ConnectionHasPendingWrites { callback_id, .. } => {
            let pending = inner.session.has_pending_writes().await;
            reply(inner, *callback_id, Ok(serde_json::json!(pending)));
        }

        Frame::DocSubscribe {
            tab_id, callback_id, key, ..
        } => {
            let result = inner.session.subscribe(key.clone()).await;
            if result.is_ok() {
                inner.subs.lock().unwrap().subscribe(tab_id.clone(), key.clone());
            }
            reply(inner, *callback_id, result.map(|s| to_value(&s)).map_err(Into::into));
        }
        Frame::DocUnsubscribe {
            tab_id, callback_id, key, ..
        } => {
            let result = inner.session.unsubscribe(key.clone()).await;
            inner.subs.lock().unwrap().unsubscribe(tab_id, key);
            reply(inner, *callback_id, result.map(|()| serde_json::Value::Null).map_err(Into::into));
        }
        Frame::DocFetch { callback_id, key, .. } => {
            let result = inner.session.fetch(key.clone()).await;
            reply(inner, *callback_id, result.map(|s| to_value(&s)).map_err(Into::into));
        }
        Frame::DocCreate {
            callback_id,
            key,
            data,
            type_tag,
            ..
        } => {
            let result = inner.session.create(key.clone(), data.clone(), type_tag.clone()).await;
            reply(inner, *callback_id, result.map(|s| to_value(&s)).map_err(Into::into));
        }
        Frame::DocSubmitOp {
            tab_id,
            callback_id,
            key,
            op,
            source,
            ..
        } => {
            let result = inner
                .session
                .submit_op(key.clone(), op.clone(), source.clone(), Some(tab_id.clone()))
                .await;
            reply(inner, *callback_id, result.map(|()| serde_json::Value::Null).map_err(Into::into));
        }
        Frame::DocDel { callback_id, key, .. } => {
            let result = inner.session.delete(key.clone()).await;
            reply(inner, *callback_id, result.map_err(Into::into));
        }

        Frame::Callback { .. } | Frame::DocEvent { .. } | Frame::ConnectionEvent { .. } => {
            // The Coordinator never originates requests it awaits a
            // reply for, and never receives events — it only emits them.
        }
        Frame::Unknown { opcode, .. } => {
            warn!(opcode = %opcode, "coordinator received frame with unrecognized opcode");
        }
    }
}

async fn broadcast_write_queue_state(inner: &Arc<Inner>) {
    let size = inner.session.write_queue_size().await;
    let pending = size > 0;
    emit_connection_event(inner, ConnectionEventKind::WriteQueueSize { size });
    emit_connection_event(inner, ConnectionEventKind::HasPendingWrites { pending });
}

fn emit_connection_event(inner: &Arc<Inner>, event: ConnectionEventKind) {
    let Some(bus) = inner.bus.lock().unwrap().clone() else {
        return;
    };
    let frame = Frame::ConnectionEvent {
        tab_id: inner.tab_id.clone(),
        timestamp: tabsync_protocol::now_millis(),
        event,
    };
    if let Err(error) = bus.send(frame) {
        warn!(%error, "failed to broadcast connection event");
    }
}

/// Forwards hosted-document events as `doc.event` frames, but only for
/// keys with at least one subscriber. A single always-running task stands in for the
/// source's per-document listener registration: with one global
/// broadcast stream there is nothing to install per key, only a filter
/// to apply, so the "first subscriber" signal gates forwarding rather
/// than gating a listener's existence.
async fn forward_doc_events(
    inner: Arc<Inner>,
    mut events: broadcast::Receiver<(DocumentKey, DocEventKind)>,
) {
    loop {
        let (key, event) = match events.recv().await {
            Ok(pair) => pair,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "document event stream lagged, events dropped");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return,
        };
        if !inner.subs.lock().unwrap().has_subscribers(&key) {
            trace!(key = %key, "dropping document event with no subscribers");
            continue;
        }
        let Some(bus) = inner.bus.lock().unwrap().clone() else {
            continue;
        };
        let frame = Frame::DocEvent {
            tab_id: inner.tab_id.clone(),
            timestamp: tabsync_protocol::now_millis(),
            key,
            event,
        };
        if let Err(error) = bus.send(frame) {
            warn!(%error, "failed to broadcast document event");
        }
    }
}

/// Forwards hosted-session state/error events as `connection.event`
/// frames, broadcast unfiltered to every tab.
async fn forward_connection_events(inner: Arc<Inner>, mut events: broadcast::Receiver<ConnectionEventKind>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "connection event stream lagged, events dropped");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return,
        };
        emit_connection_event(&inner, event);
    }
}

/// Periodic reaper that cleans up tabs not seen for `stale_tab_ms`.
async fn reap_stale_tabs(inner: Arc<Inner>) {
    let interval = std::time::Duration::from_millis(inner.config.reaper_interval_ms);
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // first tick fires immediately; skip it
    loop {
        ticker.tick().await;
        let now = tabsync_protocol::now_millis();
        let stale: Vec<TabId> = inner
            .active_tabs
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, last_seen)| now.saturating_sub(**last_seen) > inner.config.stale_tab_ms)
            .map(|(tab, _)| tab.clone())
            .collect();
        for tab in stale {
            debug!(tab_id = %tab, "reaping stale tab");
            cleanup_tab(&inner, &tab);
        }
    }
}
