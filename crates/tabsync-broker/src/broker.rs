//! The Broker itself.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tabsync_bus::{Bus, BusReceiver};
use tabsync_protocol::{CallbackId, CallbackIdAllocator, CallbackResult, Frame, RemoteError, TabId};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::config::BrokerConfig;
use crate::error::BrokerCallError;
use crate::event::{BrokerEvent, BrokerEvents, EVENT_CHANNEL_CAPACITY};
use crate::pending::{PendingCall, ReplyHandler};

struct Inner {
    tab_id: TabId,
    config: BrokerConfig,
    callback_alloc: CallbackIdAllocator,
    pending: Mutex<HashMap<CallbackId, PendingCall>>,
    queue: Mutex<VecDeque<Frame>>,
    bus: Mutex<Option<Arc<dyn Bus>>>,
    ready: AtomicBool,
    closed: AtomicBool,
    events_tx: tokio::sync::broadcast::Sender<BrokerEvent>,
    recv_task: Mutex<Option<JoinHandle<()>>>,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    /// Sweep Pending Calls older than `callback_max_age_ms`, dropping
    /// them without invoking their handler.
    fn reap_expired(&self) {
        let now = tabsync_protocol::now_millis();
        let max_age = self.config.callback_max_age_ms;
        let expired: Vec<CallbackId> = {
            let pending = self.pending.lock().unwrap();
            pending
                .iter()
                .filter(|(_, call)| now.saturating_sub(call.created_at_ms) > max_age)
                .map(|(id, _)| *id)
                .collect()
        };
        if expired.is_empty() {
            return;
        }
        let mut pending = self.pending.lock().unwrap();
        for id in &expired {
            pending.remove(id);
            trace!(callback_id = %id, "pending call reaped");
        }
        drop(pending);
        debug!(count = expired.len(), "cleanup reaper swept expired pending calls");
    }
}

/// The per-tab endpoint on the broadcast bus.
///
/// Cheap to clone — it is a handle around an `Arc<Inner>`, the "owned by
/// one task, handed out to application code" rendering of a
/// single-threaded-per-endpoint model.
#[derive(Clone)]
pub struct Broker(Arc<Inner>);

impl fmt::Debug for Broker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broker")
            .field("tab_id", &self.0.tab_id)
            .field("ready", &self.is_ready())
            .field("closed", &self.is_closed())
            .field("pending_calls", &self.pending_call_count())
            .finish()
    }
}

impl Broker {
    /// Construct a Broker with no bus attached yet. Every `send`/`call` until
    /// [`Broker::attach_bus`] queues rather than posts.
    #[must_use]
    pub fn new(tab_id: TabId, config: BrokerConfig) -> Self {
        let (events_tx, _) = tokio::sync::broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self(Arc::new(Inner {
            tab_id,
            config,
            callback_alloc: CallbackIdAllocator::new(),
            pending: Mutex::new(HashMap::new()),
            queue: Mutex::new(VecDeque::new()),
            bus: Mutex::new(None),
            ready: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            events_tx,
            recv_task: Mutex::new(None),
            cleanup_task: Mutex::new(None),
        }))
    }

    /// This Broker's tab identity, stamped on every outbound frame.
    #[must_use]
    pub fn tab_id(&self) -> &TabId {
        &self.0.tab_id
    }

    /// Whether the bus has been attached (frames post directly rather
    /// than queueing).
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.0.ready.load(Ordering::Acquire)
    }

    /// Whether [`Broker::close`] has already run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.0.closed.load(Ordering::Acquire)
    }

    /// Number of outstanding Pending Calls.
    #[must_use]
    pub fn pending_call_count(&self) -> usize {
        self.0.pending.lock().unwrap().len()
    }

    /// Number of frames waiting for the bus to become ready.
    #[must_use]
    pub fn queued_frame_count(&self) -> usize {
        self.0.queue.lock().unwrap().len()
    }

    /// Subscribe to this Broker's event surface.
    #[must_use]
    pub fn events(&self) -> BrokerEvents {
        BrokerEvents {
            receiver: self.0.events_tx.subscribe(),
        }
    }

    /// Attach the bus this Broker sends and receives through, draining
    /// any frames queued before this point in send order and spawning the single task that owns this endpoint's
    /// inbound dispatch.
    ///
    /// A no-op once the Broker is closed.
    pub fn attach_bus(&self, bus: Arc<dyn Bus>) {
        if self.0.closed.load(Ordering::Acquire) {
            return;
        }
        let receiver = bus.subscribe();
        *self.0.bus.lock().unwrap() = Some(Arc::clone(&bus));
        self.0.ready.store(true, Ordering::Release);

        let drained: Vec<Frame> = self.0.queue.lock().unwrap().drain(..).collect();
        for frame in drained {
            self.post(frame);
        }

        let inner = Arc::clone(&self.0);
        let handle = tokio::spawn(recv_loop(inner, receiver));
        *self.0.recv_task.lock().unwrap() = Some(handle);

        debug!(tab_id = %self.0.tab_id, "broker ready");
        let _ = self.0.events_tx.send(BrokerEvent::Ready);
    }

    /// Send a request frame and register `handler` as its Pending Call.
    /// `build` receives the stamped `tab_id`/`timestamp`/`callback_id` so
    /// the caller never constructs a callback id itself — only the
    /// Broker allocates those.
    pub fn call<F>(&self, build: F, handler: ReplyHandler)
    where
        F: FnOnce(TabId, u64, CallbackId) -> Frame,
    {
        if self.0.closed.load(Ordering::Acquire) {
            handler(Err(BrokerCallError::Closed));
            return;
        }
        let callback_id = self.0.callback_alloc.next();
        let now = tabsync_protocol::now_millis();
        let frame = build(self.0.tab_id.clone(), now, callback_id);
        self.0.pending.lock().unwrap().insert(
            callback_id,
            PendingCall {
                id: callback_id,
                created_at_ms: now,
                handler,
            },
        );
        self.enqueue_or_post(frame);
    }

    /// `async`/`await`-shaped call, sharing the same Pending Call
    /// bookkeeping as [`Broker::call`].
    pub async fn request<F>(&self, build: F) -> Result<serde_json::Value, BrokerCallError>
    where
        F: FnOnce(TabId, u64, CallbackId) -> Frame + Send + 'static,
    {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.call(
            build,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        rx.await.unwrap_or(Err(BrokerCallError::Closed))
    }

    /// Send a frame with no reply expected (e.g. `tab.register`,
    /// `tab.unregister`). A no-op once closed.
    pub fn send<F>(&self, build: F)
    where
        F: FnOnce(TabId, u64) -> Frame,
    {
        if self.0.closed.load(Ordering::Acquire) {
            return;
        }
        let frame = build(self.0.tab_id.clone(), tabsync_protocol::now_millis());
        self.enqueue_or_post(frame);
    }

    /// Start the periodic reaper that sweeps expired Pending Calls.
    /// Replaces any timer already running.
    pub fn start_cleanup_timer(&self) {
        self.stop_cleanup_timer();
        let inner = Arc::clone(&self.0);
        let interval = std::time::Duration::from_millis(inner.config.cleanup_interval_ms);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                inner.reap_expired();
            }
        });
        *self.0.cleanup_task.lock().unwrap() = Some(handle);
    }

    /// Stop the cleanup reaper, if running.
    pub fn stop_cleanup_timer(&self) {
        if let Some(handle) = self.0.cleanup_task.lock().unwrap().take() {
            handle.abort();
        }
    }

    /// Release the bus, flush every Pending Call with
    /// [`BrokerCallError::Closed`], and clear the queue. Idempotent.
    pub fn close(&self) {
        if self.0.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stop_cleanup_timer();
        if let Some(handle) = self.0.recv_task.lock().unwrap().take() {
            handle.abort();
        }
        *self.0.bus.lock().unwrap() = None;
        self.0.ready.store(false, Ordering::Release);

        let pending: Vec<PendingCall> = self
            .0
            .pending
            .lock()
            .unwrap()
            .drain()
            .map(|(_, call)| call)
            .collect();
        let flushed = pending.len();
        for call in pending {
            (call.handler)(Err(BrokerCallError::Closed));
        }
        self.0.queue.lock().unwrap().clear();

        debug!(tab_id = %self.0.tab_id, flushed, "broker closed");
        let _ = self.0.events_tx.send(BrokerEvent::Close);
    }

    fn enqueue_or_post(&self, frame: Frame) {
        if self.0.ready.load(Ordering::Acquire) {
            self.post(frame);
            return;
        }
        let mut queue = self.0.queue.lock().unwrap();
        if queue.len() >= self.0.config.queue_capacity {
            warn!(tab_id = %self.0.tab_id, "broker queue at capacity, dropping oldest frame");
            queue.pop_front();
        }
        queue.push_back(frame);
    }

    fn post(&self, frame: Frame) {
        let bus = self.0.bus.lock().unwrap().clone();
        let Some(bus) = bus else {
            self.0.queue.lock().unwrap().push_back(frame);
            return;
        };
        let callback_id = frame.callback_id();
        let opcode = frame.opcode().to_string();
        match bus.send(frame) {
            Ok(_) => {}
            Err(e) => {
                warn!(opcode = %opcode, error = %e, "post to bus failed");
                if let Some(cb) = callback_id {
                    if let Some(pending) = self.0.pending.lock().unwrap().remove(&cb) {
                        (pending.handler)(Err(BrokerCallError::PostFailed(e.to_string())));
                    }
                } else {
                    let _ = self.0.events_tx.send(BrokerEvent::Error {
                        message: e.to_string(),
                    });
                }
            }
        }
    }
}

/// The single task that owns this Broker's inbound dispatch.
async fn recv_loop(inner: Arc<Inner>, mut receiver: BusReceiver) {
    while let Some(frame) = receiver.recv().await {
        if frame.tab_id() == &inner.tab_id {
            // Loopback prevention.
            continue;
        }
        match &*frame {
            Frame::Callback {
                callback_id,
                result,
                ..
            } => {
                let pending = inner.pending.lock().unwrap().remove(callback_id);
                match pending {
                    Some(call) => {
                        let outcome = match result {
                            CallbackResult::Ok(value) => Ok(value.clone()),
                            CallbackResult::Err(wire_error) => {
                                Err(BrokerCallError::Remote(RemoteError::from(wire_error)))
                            }
                        };
                        (call.handler)(outcome);
                    }
                    None => {
                        // Either stale (expired) or addressed to a
                        // different tab's Pending Call table — both
                        // discarded silently.
                        trace!(callback_id = %callback_id, "discarding reply for unknown callback id");
                    }
                }
            }
            Frame::DocEvent { key, event, .. } => {
                let _ = inner.events_tx.send(BrokerEvent::DocEvent {
                    key: key.clone(),
                    event: event.clone(),
                });
            }
            Frame::ConnectionEvent { event, .. } => {
                let _ = inner
                    .events_tx
                    .send(BrokerEvent::ConnectionEvent { event: event.clone() });
            }
            Frame::Unknown { opcode, .. } => {
                warn!(opcode = %opcode, "received frame with unrecognized opcode");
                let _ = inner
                    .events_tx
                    .send(BrokerEvent::Message { frame: (*frame).clone() });
            }
            // Requests and lifecycle frames authored by other tabs are
            // the Coordinator's concern, not another tab's Broker's;
            // high-volume and expected, so silently ignored.
            _ => {}
        }
    }
}
