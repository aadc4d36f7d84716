//! Per-tab endpoint on the broadcast bus.
//!
//! The Broker is the only component that touches the
//! [`tabsync_bus::Bus`] directly. It stamps outbound frames, correlates
//! `callback` replies against Pending Calls, demultiplexes `doc.event`
//! and `connection.event` frames onto its own event surface, and
//! queues outbound traffic until a bus is attached.

#![warn(missing_docs)]

mod broker;
mod config;
mod error;
mod event;
mod pending;

pub use broker::Broker;
pub use config::BrokerConfig;
pub use error::BrokerCallError;
pub use event::{BrokerEvent, BrokerEvents};
pub use pending::{PendingCall, ReplyHandler};

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tabsync_bus::BroadcastBus;
    use tabsync_protocol::{CallbackResult, ConnectionEventKind, ConnectionState, Frame, TabId};

    use super::*;

    fn config_with_max_age(ms: u64) -> BrokerConfig {
        BrokerConfig {
            callback_max_age_ms: ms,
            cleanup_interval_ms: 5,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn queues_until_bus_attached_then_drains_in_order() {
        let broker = Broker::new(TabId::new(), BrokerConfig::default());
        broker.send(|tab_id, timestamp| Frame::TabRegister { tab_id, timestamp });
        broker.send(|tab_id, timestamp| Frame::TabUnregister { tab_id, timestamp });
        assert_eq!(broker.queued_frame_count(), 2);
        assert!(!broker.is_ready());

        let bus = Arc::new(BroadcastBus::new());
        let mut observer = bus.subscribe();
        broker.attach_bus(bus);

        assert!(broker.is_ready());
        assert_eq!(broker.queued_frame_count(), 0);

        let first = observer.recv().await.unwrap();
        assert!(matches!(*first, Frame::TabRegister { .. }));
        let second = observer.recv().await.unwrap();
        assert!(matches!(*second, Frame::TabUnregister { .. }));
    }

    #[tokio::test]
    async fn loopback_frames_are_never_delivered_to_their_own_sender() {
        let bus = Arc::new(BroadcastBus::new());
        let broker = Broker::new(TabId::new(), BrokerConfig::default());
        broker.attach_bus(Arc::clone(&bus) as Arc<dyn tabsync_bus::Bus>);

        let mut events = broker.events();
        broker.send(|tab_id, timestamp| Frame::TabRegister { tab_id, timestamp });

        let outcome =
            tokio::time::timeout(std::time::Duration::from_millis(100), events.recv()).await;
        assert!(outcome.is_err(), "no event should have been observed");
    }

    #[tokio::test]
    async fn reply_resolves_pending_call_exactly_once() {
        let bus = Arc::new(BroadcastBus::new());
        let broker = Broker::new(TabId::new(), BrokerConfig::default());
        broker.attach_bus(Arc::clone(&bus) as Arc<dyn tabsync_bus::Bus>);

        let fut = broker.request(|tab_id, timestamp, callback_id| Frame::ConnectionIsAutoFlush {
            tab_id,
            timestamp,
            callback_id: Some(callback_id),
        });

        // Simulate the Coordinator replying from a different tab id.
        let mut observer = bus.subscribe();
        let Frame::ConnectionIsAutoFlush { callback_id, .. } = &*observer.recv().await.unwrap()
        else {
            panic!("expected the request frame");
        };
        let callback_id = (*callback_id).expect("request carries a callback id");
        bus.send(Frame::Callback {
            tab_id: TabId::new(),
            timestamp: 0,
            callback_id,
            result: CallbackResult::Ok(serde_json::json!(true)),
        })
        .unwrap();

        let result = fut.await.unwrap();
        assert_eq!(result, serde_json::json!(true));
        assert_eq!(broker.pending_call_count(), 0);
    }

    #[tokio::test]
    async fn expired_pending_calls_are_reaped_without_invoking_handler() {
        let broker = Broker::new(TabId::new(), config_with_max_age(10));
        let bus = Arc::new(BroadcastBus::new());
        broker.attach_bus(Arc::clone(&bus) as Arc<dyn tabsync_bus::Bus>);
        broker.start_cleanup_timer();

        let invoked = Arc::new(AtomicUsize::new(0));
        let invoked_clone = Arc::clone(&invoked);
        broker.call(
            |tab_id, timestamp, callback_id| Frame::ConnectionIsAutoFlush {
                tab_id,
                timestamp,
                callback_id: Some(callback_id),
            },
            Box::new(move |_| {
                invoked_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(broker.pending_call_count(), 1);

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        assert_eq!(broker.pending_call_count(), 0);
        assert_eq!(invoked.load(Ordering::SeqCst), 0, "handler must not fire on expiry");
    }

    #[tokio::test]
    async fn stale_reply_after_expiry_is_discarded_without_error_event() {
        let broker = Broker::new(TabId::new(), config_with_max_age(10));
        let bus = Arc::new(BroadcastBus::new());
        broker.attach_bus(Arc::clone(&bus) as Arc<dyn tabsync_bus::Bus>);
        broker.start_cleanup_timer();
        let mut events = broker.events();

        let mut pending_callback_id = None;
        broker.call(
            |tab_id, timestamp, callback_id| {
                pending_callback_id = Some(callback_id);
                Frame::ConnectionIsAutoFlush {
                    tab_id,
                    timestamp,
                    callback_id: Some(callback_id),
                }
            },
            Box::new(|_| panic!("handler must never run for a stale reply")),
        );
        let callback_id = pending_callback_id.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(broker.pending_call_count(), 0);

        bus.send(Frame::Callback {
            tab_id: TabId::new(),
            timestamp: 0,
            callback_id,
            result: CallbackResult::Ok(serde_json::Value::Null),
        })
        .unwrap();

        let outcome =
            tokio::time::timeout(std::time::Duration::from_millis(100), events.recv()).await;
        assert!(outcome.is_err(), "no error event should have been emitted");
    }

    #[tokio::test]
    async fn close_flushes_every_pending_call_with_broker_closed_and_is_idempotent() {
        let broker = Broker::new(TabId::new(), BrokerConfig::default());
        let bus = Arc::new(BroadcastBus::new());
        broker.attach_bus(Arc::clone(&bus) as Arc<dyn tabsync_bus::Bus>);

        let errors = Arc::new(std::sync::Mutex::new(Vec::new()));
        let errors_clone = Arc::clone(&errors);
        broker.call(
            |tab_id, timestamp, callback_id| Frame::ConnectionIsAutoFlush {
                tab_id,
                timestamp,
                callback_id: Some(callback_id),
            },
            Box::new(move |result| {
                errors_clone.lock().unwrap().push(result);
            }),
        );

        broker.close();
        broker.close(); // idempotent

        let recorded = errors.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert!(matches!(recorded[0], Err(BrokerCallError::Closed)));
        assert!(broker.is_closed());
        assert_eq!(broker.pending_call_count(), 0);
    }

    #[tokio::test]
    async fn forwards_connection_events_from_other_tabs() {
        let bus = Arc::new(BroadcastBus::new());
        let broker = Broker::new(TabId::new(), BrokerConfig::default());
        broker.attach_bus(Arc::clone(&bus) as Arc<dyn tabsync_bus::Bus>);
        let mut events = broker.events();

        bus.send(Frame::ConnectionEvent {
            tab_id: TabId::new(),
            timestamp: 0,
            event: ConnectionEventKind::State {
                state: ConnectionState::Connected,
                reason: None,
            },
        })
        .unwrap();

        let event = events.recv().await.unwrap();
        assert!(matches!(
            event,
            BrokerEvent::ConnectionEvent {
                event: ConnectionEventKind::State {
                    state: ConnectionState::Connected,
                    ..
                }
            }
        ));
    }
}
