//! Hosts the single authoritative session, tracks per-tab subscriptions,
//! fans document and session events out to interested tabs, and cleans
//! up after a tab departs.
//!
//! The Coordinator is the only component that holds a
//! [`tabsync_session::HostedSession`] — tabs never touch it directly
//!.

#![warn(missing_docs)]

mod config;
mod coordinator;
mod error;
mod subscriptions;

pub use config::CoordinatorConfig;
pub use coordinator::Coordinator;
pub use error::CoordinatorError;
pub use subscriptions::SubscriptionTables;

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tabsync_bus::BroadcastBus;
    use tabsync_protocol::{CallbackIdAllocator, DocumentKey, Frame, TabId};
    use tabsync_session::TestHostedSession;

    use super::*;

    fn new_coordinator(config: CoordinatorConfig) -> (Coordinator, Arc<BroadcastBus>) {
        let session = Arc::new(TestHostedSession::default());
        let coordinator = Coordinator::new(TabId::new(), config, session);
        let bus = Arc::new(BroadcastBus::new());
        coordinator.attach_bus(Arc::clone(&bus) as Arc<dyn tabsync_bus::Bus>);
        (coordinator, bus)
    }

    #[tokio::test]
    async fn connection_get_subscribes_and_replies_with_a_snapshot() {
        let (_coordinator, bus) = new_coordinator(CoordinatorConfig::default());
        let tab = TabId::new();
        let alloc = CallbackIdAllocator::new();
        let callback_id = alloc.next();
        let mut observer = bus.subscribe();

        bus.send(Frame::ConnectionGet {
            tab_id: tab.clone(),
            timestamp: 0,
            callback_id: Some(callback_id),
            collection: "posts".to_string(),
            id: "d1".to_string(),
        })
        .unwrap();

        let echoed = observer.recv().await.unwrap(); // the raw request, broadcast to every subscriber
        assert!(matches!(&*echoed, Frame::ConnectionGet { .. }));

        let reply = observer.recv().await.unwrap();
        let Frame::Callback { result, callback_id: got, .. } = &*reply else {
            panic!("expected a callback reply");
        };
        assert_eq!(*got, callback_id);
        assert!(matches!(result, tabsync_protocol::CallbackResult::Ok(_)));
    }

    #[tokio::test]
    async fn doc_create_then_op_is_forwarded_only_to_subscribed_tabs() {
        let (coordinator, bus) = new_coordinator(CoordinatorConfig::default());
        let tab_a = TabId::new();
        let key = DocumentKey::new("ops", "y");

        let mut observer = bus.subscribe();

        bus.send(Frame::DocCreate {
            tab_id: tab_a.clone(),
            timestamp: 0,
            callback_id: None,
            key: key.clone(),
            data: serde_json::json!({"n": 0}),
            type_tag: None,
        })
        .unwrap();
        let echoed = observer.recv().await.unwrap(); // the raw request frame itself, broadcast to every subscriber
        assert!(matches!(&*echoed, Frame::DocCreate { .. }));
        // No subscribers yet, so the hosted session's own `create` event is dropped, not forwarded.

        bus.send(Frame::DocSubscribe {
            tab_id: tab_a.clone(),
            timestamp: 0,
            callback_id: None,
            key: key.clone(),
        })
        .unwrap();
        let echoed = observer.recv().await.unwrap();
        assert!(matches!(&*echoed, Frame::DocSubscribe { .. }));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(coordinator.subscriber_count(&key), 1);

        bus.send(Frame::DocSubmitOp {
            tab_id: tab_a.clone(),
            timestamp: 0,
            callback_id: None,
            key: key.clone(),
            op: serde_json::json!([{"p": ["n"], "na": 1}]),
            source: None,
        })
        .unwrap();
        let echoed = observer.recv().await.unwrap();
        assert!(matches!(&*echoed, Frame::DocSubmitOp { .. }));

        let event = tokio::time::timeout(Duration::from_millis(200), observer.recv())
            .await
            .unwrap()
            .unwrap();
        let Frame::DocEvent { key: got_key, event, .. } = &*event else {
            panic!("expected a forwarded doc event");
        };
        assert_eq!(got_key, &key);
        assert!(matches!(event, tabsync_protocol::DocEventKind::Op { .. }));
    }

    #[tokio::test]
    async fn tab_unregister_cleans_up_subscriptions() {
        let (coordinator, bus) = new_coordinator(CoordinatorConfig::default());
        let tab = TabId::new();
        let key = DocumentKey::new("docs", "x");

        bus.send(Frame::DocSubscribe {
            tab_id: tab.clone(),
            timestamp: 0,
            callback_id: None,
            key: key.clone(),
        })
        .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(coordinator.subscriber_count(&key), 1);

        bus.send(Frame::TabUnregister {
            tab_id: tab.clone(),
            timestamp: 0,
        })
        .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(coordinator.subscriber_count(&key), 0);
        assert!(!coordinator.is_tab_active(&tab));

        // Idempotent: a second unregister changes nothing.
        bus.send(Frame::TabUnregister { tab_id: tab, timestamp: 0 }).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(coordinator.doc_count(), 0);
    }

    #[tokio::test]
    async fn unsupported_write_opcode_replies_with_an_error() {
        let (_coordinator, bus) = new_coordinator(CoordinatorConfig::default());
        let tab = TabId::new();
        let alloc = CallbackIdAllocator::new();
        let callback_id = alloc.next();
        let mut observer = bus.subscribe();

        bus.send(Frame::ConnectionPutDocsBulk {
            tab_id: tab,
            timestamp: 0,
            callback_id: Some(callback_id),
            docs: vec![DocumentKey::new("posts", "d1")],
        })
        .unwrap();

        let reply = loop {
            let frame = observer.recv().await.unwrap();
            if matches!(&*frame, Frame::Callback { .. }) {
                break frame;
            }
        };
        let Frame::Callback { result, .. } = &*reply else {
            unreachable!()
        };
        assert!(matches!(result, tabsync_protocol::CallbackResult::Err(_)));
    }
}
